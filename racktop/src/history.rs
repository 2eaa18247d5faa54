//! Small utilities to manage bounded history buffers for charts.

use std::collections::{BTreeMap, VecDeque};

/// Points kept for the dashboard charts.
pub const CHART_POINTS: usize = 20;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    while dq.len() >= cap && !dq.is_empty() {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// One chart sample: a wall-clock label plus one value per metric key.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp: String,
    pub values: BTreeMap<String, f64>,
}

impl TimeSeriesPoint {
    /// Stamp `values` with the local wall-clock time.
    pub fn now(values: BTreeMap<String, f64>) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            values,
        }
    }

    /// Value for `key`, zero when the sample does not carry it.
    pub fn get(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }
}

/// Fixed-capacity FIFO of chart samples in arrival order.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    points: VecDeque<TimeSeriesPoint>,
    cap: usize,
}

impl TimeSeriesBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            points: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn append(&mut self, point: TimeSeriesPoint) {
        push_capped(&mut self.points, point, self.cap);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn last(&self) -> Option<&TimeSeriesPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSeriesPoint> + '_ {
        self.points.iter()
    }

    /// Values of one metric, oldest first.
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.points.iter().map(|p| p.get(key)).collect()
    }
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new(CHART_POINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: usize) -> TimeSeriesPoint {
        TimeSeriesPoint {
            timestamp: format!("t{i}"),
            values: BTreeMap::from([("ai_cpu".to_string(), i as f64)]),
        }
    }

    #[test]
    fn push_capped_evicts_oldest() {
        let mut dq = VecDeque::new();
        for v in 0..5 {
            push_capped(&mut dq, v, 3);
        }
        assert_eq!(dq, VecDeque::from([2, 3, 4]));
    }

    #[test]
    fn never_exceeds_capacity_and_keeps_arrival_order() {
        let mut buf = TimeSeriesBuffer::default();
        for i in 0..57 {
            buf.append(point(i));
            assert!(buf.len() <= CHART_POINTS);
        }
        assert_eq!(buf.len(), CHART_POINTS);
        let labels: Vec<_> = buf.iter().map(|p| p.timestamp.clone()).collect();
        let expected: Vec<_> = (37..57).map(|i| format!("t{i}")).collect();
        assert_eq!(labels, expected);
        assert_eq!(buf.last().map(|p| p.get("ai_cpu")), Some(56.0));
    }

    #[test]
    fn series_defaults_missing_keys_to_zero() {
        let mut buf = TimeSeriesBuffer::new(4);
        buf.append(point(1));
        buf.append(point(2));
        assert_eq!(buf.series("ai_cpu"), vec![1.0, 2.0]);
        assert_eq!(buf.series("app_cpu"), vec![0.0, 0.0]);
    }
}
