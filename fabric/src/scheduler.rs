/// A schedulable candidate: either the local node or a neighbor, reduced
/// to the fields the scheduler actually scores on.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub url: String,
    pub load: f64,
}

/// Outcome of `choose_executor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    SelfNode,
    Peer(String),
    None,
}

fn score(load: f64) -> f64 {
    1.0 / (1.0 + load)
}

/// Given the local candidate and a set of neighbors, picks the best
/// executor by a load-inverse score. Grounded on `Libs/planificador.py`'s
/// `PlanificadorLocal.elegir_ejecutor` — the authoritative, richer
/// scheduler per the "duplicated source files" design note.
/// `Libs/scheduler.py`'s `SchedulerBasico` (latency term, randomized
/// top-3) is the simpler non-authoritative duplicate and is not ported.
pub fn choose_executor(self_candidate: Candidate, neighbors: &[Candidate]) -> Decision {
    let mut candidates: Vec<&Candidate> = Vec::with_capacity(neighbors.len() + 1);
    candidates.push(&self_candidate);
    for neighbor in neighbors {
        if neighbor.name != self_candidate.name {
            candidates.push(neighbor);
        }
    }

    if candidates.is_empty() {
        return Decision::None;
    }

    // Stable sort: ties keep the earlier (first-in-list) candidate, which
    // is always `self_candidate` since it was pushed first.
    candidates.sort_by(|a, b| score(b.load).partial_cmp(&score(a.load)).unwrap());

    let best = candidates[0];
    if best.url == self_candidate.url {
        Decision::SelfNode
    } else {
        Decision::Peer(best.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, url: &str, load: f64) -> Candidate {
        Candidate {
            name: name.to_string(),
            url: url.to_string(),
            load,
        }
    }

    #[test]
    fn self_priority_when_least_loaded() {
        let me = candidate("self", "http://self:8000", 0.0);
        let neighbors = vec![candidate("peer", "http://peer:8000", 0.99)];
        assert_eq!(choose_executor(me, &neighbors), Decision::SelfNode);
    }

    #[test]
    fn picks_best_scoring_peer() {
        let me = candidate("self", "http://self:8000", 0.9);
        let neighbors = vec![
            candidate("a", "http://a:8000", 0.8),
            candidate("b", "http://b:8000", 0.1),
        ];
        assert_eq!(
            choose_executor(me, &neighbors),
            Decision::Peer("http://b:8000".to_string())
        );
    }

    #[test]
    fn self_only_candidate_when_no_neighbors() {
        let me = candidate("self", "http://self:8000", 0.0);
        assert_eq!(choose_executor(me, &[]), Decision::SelfNode);
    }

    #[test]
    fn overloaded_sole_neighbor_does_not_win() {
        let me = candidate("self", "http://self:8000", 0.0);
        let neighbors = vec![candidate("sobrecargado", "http://x:1", 0.99)];
        assert_eq!(choose_executor(me, &neighbors), Decision::SelfNode);
    }

    #[test]
    fn filters_out_neighbor_entries_matching_self_name() {
        let me = candidate("self", "http://self:8000", 0.5);
        // A stale/duplicate neighbor entry sharing our own name must not
        // be double-counted or override the real self-candidate.
        let neighbors = vec![candidate("self", "http://ghost:8000", 0.0)];
        assert_eq!(choose_executor(me, &neighbors), Decision::SelfNode);
    }
}
