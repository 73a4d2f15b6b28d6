use std::cell::Cell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sdk::DeliveryFn;

/// Consumer callback; receives every full output buffer of interleaved u8 I/Q.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is inside a consumer callback.
pub fn in_delivery() -> bool {
    DELIVERING.with(|d| d.get())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConverterConfig {
    /// Input runs at twice the output rate; average pairs 2:1.
    pub decimate: bool,
    pub downscale: f32,
    pub test_mode: bool,
}

/// Maps one signed sample onto the unsigned 8 bit range centred at 128.
#[inline]
pub fn to_u8(sample: i16, downscale: f32) -> u8 {
    ((sample as f32 * 128.0 / downscale).round() + 128.0).clamp(0.0, 255.0) as u8
}

#[derive(Debug, Default)]
struct Pending {
    config: Option<ConverterConfig>,
    reset: bool,
    suspended: bool,
}

/// Side channel into a converter that lives on the delivery thread.
///
/// Changes are picked up at the start of the next delivered block, so the
/// lock here is never held while the consumer callback runs.
#[derive(Debug, Clone, Default)]
pub struct ConverterControl {
    pending: Arc<Mutex<Pending>>,
}

impl ConverterControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconfigure(&self, config: ConverterConfig) {
        self.pending.lock().config = Some(config);
    }

    pub fn reset(&self) {
        self.pending.lock().reset = true;
    }

    /// Drops every block delivered until [`ConverterControl::resume`].
    ///
    /// Used around a rate switch, when the receiver may hand over blocks at
    /// either rate and the converter cannot tell which.
    pub fn suspend(&self) {
        self.pending.lock().suspended = true;
    }

    /// Ends a suspension. The partial output buffer is discarded, and `config`
    /// (if any) is in effect for the first block converted afterwards.
    pub fn resume(&self, config: Option<ConverterConfig>) {
        let mut pending = self.pending.lock();
        if config.is_some() {
            pending.config = config;
        }
        pending.reset = true;
        pending.suspended = false;
    }

    pub fn clear(&self) {
        *self.pending.lock() = Pending::default();
    }

    /// Returns false while suspended; the block is then dropped.
    fn apply(&self, conv: &mut SampleConverter) -> bool {
        let mut pending = self.pending.lock();
        if pending.suspended {
            return false;
        }
        if let Some(config) = pending.config.take() {
            conv.reconfigure(config);
        }
        if std::mem::take(&mut pending.reset) {
            conv.reset();
        }
        true
    }
}

pub struct SampleConverter {
    config: ConverterConfig,
    buffer: Vec<u8>,
    fill: usize,
    skip_next: bool,
    prev_i: i16,
    prev_q: i16,
    counter: u8,
    delivered: u64,
    callback: ReadCallback,
}

impl SampleConverter {
    pub fn new(config: ConverterConfig, buf_len: usize, callback: ReadCallback) -> Self {
        debug_assert!(buf_len >= 2 && buf_len % 2 == 0);
        Self {
            config,
            buffer: vec![0; buf_len],
            fill: 0,
            skip_next: false,
            prev_i: 0,
            prev_q: 0,
            counter: 0,
            delivered: 0,
            callback,
        }
    }

    pub fn config(&self) -> ConverterConfig {
        self.config
    }

    pub fn reconfigure(&mut self, config: ConverterConfig) {
        if config.decimate != self.config.decimate {
            self.skip_next = false;
            self.prev_i = 0;
            self.prev_q = 0;
        }
        self.config = config;
    }

    /// Drops whatever sits in the partially filled output buffer.
    pub fn reset(&mut self) {
        self.fill = 0;
    }

    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Number of full buffers handed to the callback so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn process(&mut self, xi: &[i16], xq: &[i16]) {
        for (&i, &q) in xi.iter().zip(xq) {
            let (i, q) = if self.config.decimate {
                if self.skip_next {
                    self.skip_next = false;
                    self.prev_i = i;
                    self.prev_q = q;
                    continue;
                }
                self.skip_next = true;
                (
                    ((i as i32 + self.prev_i as i32) / 2) as i16,
                    ((q as i32 + self.prev_q as i32) / 2) as i16,
                )
            } else {
                (i, q)
            };

            if self.config.test_mode {
                self.buffer[self.fill] = self.counter;
                self.buffer[self.fill + 1] = self.counter.wrapping_add(1);
                self.counter = self.counter.wrapping_add(2);
            } else {
                self.buffer[self.fill] = to_u8(i, self.config.downscale);
                self.buffer[self.fill + 1] = to_u8(q, self.config.downscale);
            }
            self.fill += 2;

            if self.fill >= self.buffer.len() {
                self.flush();
            }
        }
    }

    /// Moves the converter into the closure the SDK calls per sample block.
    pub fn into_delivery(mut self, control: ConverterControl) -> DeliveryFn {
        Box::new(move |xi: &[i16], xq: &[i16]| {
            if control.apply(&mut self) {
                self.process(xi, xq);
            }
        })
    }

    fn flush(&mut self) {
        DELIVERING.with(|d| d.set(true));
        (self.callback)(&self.buffer);
        DELIVERING.with(|d| d.set(false));
        self.fill = 0;
        self.delivered += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Sink = Arc<Mutex<Vec<Vec<u8>>>>;

    fn collector(downscale: f32, decimate: bool, buf_len: usize) -> (SampleConverter, Sink) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = out.clone();
        let conv = SampleConverter::new(
            ConverterConfig {
                decimate,
                downscale,
                test_mode: false,
            },
            buf_len,
            Box::new(move |buf: &[u8]| sink.lock().push(buf.to_vec())),
        );
        (conv, out)
    }

    #[test]
    fn test_to_u8_mapping() {
        assert_eq!(to_u8(0, 2048.0), 128);
        assert_eq!(to_u8(1024, 2048.0), 192);
        assert_eq!(to_u8(-2048, 2048.0), 0);
        assert_eq!(to_u8(2048, 2048.0), 255);
        assert_eq!(to_u8(i16::MAX, 2048.0), 255);
        assert_eq!(to_u8(4096, 8192.0), 192);
        assert_eq!(to_u8(-8192, 8192.0), 0);
        // 24 * 128 / 2048 = 1.5 rounds away from zero
        assert_eq!(to_u8(24, 2048.0), 130);
    }

    #[test]
    fn test_no_decimation_keeps_every_pair() {
        let (mut conv, out) = collector(2048.0, false, 8);
        let xi = [0, 1024, -1024, 2047];
        let xq = [16, -16, 0, -2048];
        conv.process(&xi, &xq);

        let out = out.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], vec![128, 129, 192, 127, 64, 128, 255, 0]);
    }

    #[test]
    fn test_decimation_halves_output() {
        let (mut conv, out) = collector(2048.0, true, 8);
        // 16 input pairs -> 8 output pairs -> two buffers of 4 pairs
        let xi: Vec<i16> = (0..16).map(|n| if n % 2 == 0 { 160 } else { 480 }).collect();
        let xq: Vec<i16> = xi.iter().map(|v| -v).collect();
        conv.process(&xi, &xq);

        let out = out.lock();
        assert_eq!(out.len(), 2);
        // first kept pair is averaged with the initial zero, the rest with the skipped neighbour
        assert_eq!(&out[0][..2], &[to_u8(80, 2048.0), to_u8(-80, 2048.0)]);
        for pair in out.iter().flatten().collect::<Vec<_>>().chunks(2).skip(1) {
            assert_eq!(*pair[0], to_u8(320, 2048.0));
            assert_eq!(*pair[1], to_u8(-320, 2048.0));
        }
    }

    #[test]
    fn test_decimation_phase_spans_blocks() {
        let (mut conv, out) = collector(2048.0, true, 4);
        conv.process(&[100], &[100]);
        conv.process(&[300], &[300]);
        conv.process(&[500], &[500]);
        let out = out.lock();
        assert_eq!(out.len(), 1);
        let (a, b) = (to_u8(50, 2048.0), to_u8(400, 2048.0));
        assert_eq!(out[0], vec![a, a, b, b]);
    }

    #[test]
    fn test_partial_buffer_not_delivered() {
        let (mut conv, out) = collector(8192.0, false, 16);
        conv.process(&[1, 2, 3], &[1, 2, 3]);
        assert!(out.lock().is_empty());
        assert_eq!(conv.fill(), 6);
        conv.reset();
        assert_eq!(conv.fill(), 0);
        conv.process(&[0; 8], &[0; 8]);
        assert_eq!(out.lock().len(), 1);
        assert_eq!(conv.delivered(), 1);
    }

    #[test]
    fn test_test_mode_counter() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = out.clone();
        let mut conv = SampleConverter::new(
            ConverterConfig {
                decimate: false,
                downscale: 2048.0,
                test_mode: true,
            },
            256,
            Box::new(move |buf: &[u8]| sink.lock().push(buf.to_vec())),
        );
        conv.process(&[7; 256], &[7; 256]);
        let out = out.lock();
        assert_eq!(out.len(), 2);
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(out[0], expected);
        assert_eq!(out[1], expected);
    }

    #[test]
    fn test_in_delivery_flag() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut conv = SampleConverter::new(
            ConverterConfig {
                decimate: false,
                downscale: 2048.0,
                test_mode: false,
            },
            2,
            Box::new(move |_: &[u8]| sink.lock().push(in_delivery())),
        );
        assert!(!in_delivery());
        conv.process(&[0, 0], &[0, 0]);
        assert!(!in_delivery());
        assert_eq!(*seen.lock(), vec![true, true]);
    }

    #[test]
    fn test_control_applies_on_next_block() {
        let (conv, out) = collector(2048.0, false, 4);
        let control = ConverterControl::new();
        let mut deliver = conv.into_delivery(control.clone());

        deliver(&[1024], &[1024]);
        control.reset();
        deliver(&[0, 0], &[0, 0]);
        assert_eq!(out.lock().len(), 1);
        assert_eq!(out.lock()[0], vec![128; 4]);

        control.reconfigure(ConverterConfig {
            decimate: true,
            downscale: 2048.0,
            test_mode: false,
        });
        deliver(&[1024, 0, 0, 0], &[1024, 0, 0, 0]);
        assert_eq!(out.lock().len(), 2);
        assert_eq!(out.lock()[1], vec![to_u8(512, 2048.0), to_u8(512, 2048.0), 128, 128]);
    }

    #[test]
    fn test_reconfigure_resets_decimator_phase() {
        let (mut conv, out) = collector(2048.0, true, 2);
        conv.process(&[100], &[100]);
        conv.reconfigure(ConverterConfig {
            decimate: false,
            downscale: 2048.0,
            test_mode: false,
        });
        conv.process(&[200], &[200]);
        let out = out.lock();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], vec![to_u8(200, 2048.0), to_u8(200, 2048.0)]);
    }

    #[test]
    fn test_suspended_blocks_are_dropped() {
        let (conv, out) = collector(2048.0, false, 4);
        let control = ConverterControl::new();
        let mut deliver = conv.into_delivery(control.clone());

        deliver(&[1024], &[1024]);
        control.suspend();
        deliver(&[1024; 8], &[1024; 8]);
        assert!(out.lock().is_empty());

        control.resume(Some(ConverterConfig {
            decimate: true,
            downscale: 2048.0,
            test_mode: false,
        }));
        // the half buffer from before the suspension is gone
        deliver(&[0, 0, 0, 0], &[0, 0, 0, 0]);
        let out = out.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], vec![128; 4]);
    }
}
