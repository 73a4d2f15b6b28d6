use std::slice::from_raw_parts;
use std::time::{Duration, Instant};

use num::Complex;

pub fn slice_as_u8<T: Sized>(x: &[T]) -> &[u8] {
    unsafe { from_raw_parts(x.as_ptr() as *const u8, std::mem::size_of_val(x)) }
}

/// Unpacks interleaved u8 I/Q, as delivered to read callbacks, into unit-scale complex samples.
pub fn iq_to_complex(buf: &[u8], out: &mut Vec<Complex<f32>>) {
    out.clear();
    out.extend(
        buf.chunks_exact(2)
            .map(|p| Complex::new((p[0] as f32 - 128.0) / 128.0, (p[1] as f32 - 128.0) / 128.0)),
    );
}

/// Counts delivered samples and reports the achieved rate at a fixed interval.
pub struct RateMeter {
    t0: Instant,
    last: Instant,
    interval: Duration,
    samples: u64,
}

impl RateMeter {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            t0: now,
            last: now,
            interval,
            samples: 0,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Adds `n` samples; returns the mean rate in samples per second once per interval.
    pub fn add(&mut self, n: usize) -> Option<f64> {
        self.samples += n as u64;
        let now = Instant::now();
        if now.duration_since(self.last) < self.interval {
            return None;
        }
        self.last = now;
        let dt = now.duration_since(self.t0).as_secs_f64();
        Some(self.samples as f64 / dt)
    }
}
