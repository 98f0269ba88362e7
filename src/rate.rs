use std::{collections::VecDeque, sync::Mutex, time::Instant};

/// Sliding-window download-rate estimator. Byte arrivals are folded into
/// per-second buckets; the estimate is the byte total across the window
/// divided by the window width. Locked internally: the coordinator adds
/// samples while a progress consumer may read the rate.
pub struct RateMeter {
    window: Mutex<Window>,
    window_secs: u64,
    started: Instant,
}

struct Window {
    samples: VecDeque<Sample>,
    window_bytes: u64,
}

struct Sample {
    bytes: u64,
    second: u64,
}

impl RateMeter {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Mutex::new(Window {
                samples: VecDeque::new(),
                window_bytes: 0,
            }),
            window_secs,
            started: Instant::now(),
        }
    }

    pub fn add(&self, bytes: u64) {
        self.add_at(bytes, self.elapsed_secs());
    }

    /// Current estimate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.rate_at(self.elapsed_secs())
    }

    fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn add_at(&self, bytes: u64, now: u64) {
        let mut window = self.window.lock().unwrap();
        let folded = match window.samples.back_mut() {
            Some(last) if last.second == now => {
                last.bytes += bytes;
                true
            }
            _ => false,
        };
        if !folded {
            window.samples.push_back(Sample { bytes, second: now });
        }
        window.window_bytes += bytes;
        self.prune(&mut window, now);
    }

    fn rate_at(&self, now: u64) -> f64 {
        let mut window = self.window.lock().unwrap();
        self.prune(&mut window, now);
        window.window_bytes as f64 / self.window_secs as f64
    }

    fn prune(&self, window: &mut Window, now: u64) {
        while let Some(head) = window.samples.front() {
            if now.saturating_sub(head.second) > self.window_secs {
                window.window_bytes -= head.bytes;
                window.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
