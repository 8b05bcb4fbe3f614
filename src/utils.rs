use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Readout statistics, with both all-time counters and a sliding-window rate.
#[derive(Debug)]
pub struct Counter {
    /// All-time total bytes
    pub total_size: usize,
    /// All-time number of shots
    pub n_shots: usize,
    /// Time when this counter was created
    pub t_begin: Instant,

    window: Duration,
    shots: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Counter {
            total_size: 0,
            n_shots: 0,
            t_begin: Instant::now(),
            window,
            shots: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    /// Long-term average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Rate over the sliding window, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record a shot of `size` bytes.
    pub fn increment(&mut self, size: usize) {
        let now = Instant::now();

        self.total_size += size;
        self.n_shots += 1;

        self.shots.push_back((now, size));
        self.bytes_in_window += size;

        while let Some(&(ts, sz)) = self.shots.front() {
            if now.duration_since(ts) > self.window {
                self.shots.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }
}
