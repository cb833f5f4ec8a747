use std::collections::HashMap;
use std::sync::Mutex;

/// Process-wide counters and observation averages, grounded on
/// `Libs/metricas.py`'s `Metricas`. Thread-safe, read-only export.
#[derive(Default)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, f64>,
    observations: HashMap<String, Vec<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.counters.entry(name.to_string()).or_insert(0.0) += value;
    }

    pub fn inc_one(&self, name: &str) {
        self.inc(name, 1.0);
    }

    pub fn observe(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.observations.entry(name.to_string()).or_default().push(value);
    }

    /// Prometheus-ish text export: counters as `TYPE ... counter`, and the
    /// average of each observation list as `TYPE ..._avg gauge`.
    pub fn export_text(&self) -> String {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let mut lines = Vec::new();
        for (name, value) in inner.counters.iter() {
            lines.push(format!("# TYPE {name} counter"));
            lines.push(format!("{name} {value}"));
        }
        for (name, values) in inner.observations.iter() {
            if values.is_empty() {
                continue;
            }
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            lines.push(format!("# TYPE {name}_avg gauge"));
            lines.push(format!("{name}_avg {avg}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_accumulates() {
        let m = Metrics::new();
        m.inc_one("tareas_recibidas");
        m.inc_one("tareas_recibidas");
        let text = m.export_text();
        assert!(text.contains("tareas_recibidas 2"));
    }

    #[test]
    fn observe_reports_average() {
        let m = Metrics::new();
        m.observe("duracion_ms", 10.0);
        m.observe("duracion_ms", 20.0);
        let text = m.export_text();
        assert!(text.contains("duracion_ms_avg 15"));
    }

    #[test]
    fn export_is_empty_with_no_data() {
        let m = Metrics::new();
        assert_eq!(m.export_text(), "");
    }
}
