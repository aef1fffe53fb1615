use std::sync::{Arc, Mutex, PoisonError};

/// Compute (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Count of subscribers currently holding a live UE process.
///
/// The lock is only held for the increment/decrement itself.
#[derive(Debug, Clone, Default)]
pub struct ConnectedGauge {
    count: Arc<Mutex<usize>>,
}

impl ConnectedGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> usize {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        *count
    }

    pub fn decrement(&self) -> usize {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        *count
    }

    pub fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_need_samples() {
        assert!(compute_metrics(&[]).is_none());
        let (mean, median, p25, p75) = compute_metrics(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(mean, 2.5);
        assert_eq!(median, 3.0);
        assert_eq!(p25, 2.0);
        assert_eq!(p75, 4.0);
    }

    #[test]
    fn gauge_never_goes_negative() {
        let gauge = ConnectedGauge::new();
        assert_eq!(gauge.decrement(), 0);
        assert_eq!(gauge.increment(), 1);
        assert_eq!(gauge.increment(), 2);
        assert_eq!(gauge.decrement(), 1);
        assert_eq!(gauge.current(), 1);
    }

    #[test]
    fn gauge_updates_are_not_lost_across_threads() {
        let gauge = ConnectedGauge::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = gauge.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        g.increment();
                        g.decrement();
                    }
                    g.increment();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gauge.current(), 8);
    }
}
