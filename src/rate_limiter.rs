//! Byte-token pacing against a per-process transfer limit (spec §4.5). A
//! single struct holding the last tick and the remaining budget, with no
//! dependency on a global clock beyond `std::time::Instant` — the
//! re-architecture guidance in spec §9 asks for exactly this shape instead
//! of the source's `CLK_TCK`-driven busy loop.

use std::thread;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    limit_bytes_per_sec: u64,
    window_start: Instant,
    bytes_in_window: u64,
}

impl RateLimiter {
    /// `init()` in spec terms: called at the start of each file when
    /// `trl_per_process > 0`.
    pub fn new(limit_bytes_per_sec: u64) -> Self {
        RateLimiter { limit_bytes_per_sec, window_start: Instant::now(), bytes_in_window: 0 }
    }

    /// Effective block size for one wire write: `min(trl_per_process,
    /// job.block_size)`.
    pub fn effective_block_size(&self, job_block_size: usize) -> usize {
        if self.limit_bytes_per_sec == 0 {
            job_block_size
        } else {
            std::cmp::min(self.limit_bytes_per_sec as usize, job_block_size)
        }
    }

    /// Call after every wire write; blocks until the one-second token
    /// budget has room for `written` more bytes.
    pub fn limit(&mut self, written: u64) {
        if self.limit_bytes_per_sec == 0 {
            return;
        }
        self.bytes_in_window += written;
        if self.bytes_in_window < self.limit_bytes_per_sec {
            return;
        }
        let elapsed = self.window_start.elapsed();
        let window = Duration::from_secs(1);
        if elapsed < window {
            thread::sleep(window - elapsed);
        }
        self.window_start = Instant::now();
        self.bytes_in_window = 0;
    }
}
