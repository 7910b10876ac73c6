//! Application metrics
//!
//! Bounded-window latency tracking for requests and thumbnail renders.
//! Windows keep the most recent samples only; totals keep counting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

const REQUEST_WINDOW: usize = 1000;
const THUMBNAIL_WINDOW: usize = 500;

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    requests: Mutex<Window>,
    thumbnails: Mutex<Window>,
}

struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
    total: u64,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    fn record(&mut self, millis: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(millis);
        self.total += 1;
    }

    fn stats(&self) -> WindowStats {
        let count = self.samples.len();
        if count == 0 {
            return WindowStats {
                total: self.total,
                avg_ms: 0.0,
                min_ms: 0.0,
                max_ms: 0.0,
            };
        }
        let sum: f64 = self.samples.iter().sum();
        let min = self.samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().cloned().fold(0.0_f64, f64::max);
        WindowStats {
            total: self.total,
            avg_ms: sum / count as f64,
            min_ms: min,
            max_ms: max,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub total: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests: WindowStats,
    pub thumbnails: WindowStats,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests: Mutex::new(Window::new(REQUEST_WINDOW)),
                thumbnails: Mutex::new(Window::new(THUMBNAIL_WINDOW)),
            }),
        }
    }

    pub fn record_request(&self, elapsed: Duration) {
        self.inner.requests.lock().record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_thumbnail(&self, elapsed: Duration) {
        self.inner.thumbnails.lock().record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.inner.requests.lock().stats(),
            thumbnails: self.inner.thumbnails.lock().stats(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
