use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{
    band::Band,
    convert::{ConverterControl, ReadCallback, SampleConverter},
    descriptor::{Descriptor, MIN_INPUT_RATE},
    error::Error,
    queue::{CommandQueue, Signal},
    sdk::{AgcMode, Bandwidth, ReinitReason, Sdk, SdkError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Streaming,
    Cancelling,
}

/// Current engine state plus the condition variable cancellers wait on.
#[derive(Debug)]
pub struct StreamControl {
    state: Mutex<EngineState>,
    changed: Condvar,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Idle),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == EngineState::Streaming
    }

    fn set(&self, next: EngineState) {
        let mut state = self.state.lock();
        *state = next;
        self.changed.notify_all();
    }

    fn begin(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if *state != EngineState::Idle {
            return Err(Error::AlreadyStreaming);
        }
        *state = EngineState::Starting;
        Ok(())
    }

    /// Moves a running stream to `Cancelling`. Returns false if none is running.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            EngineState::Streaming => {
                *state = EngineState::Cancelling;
                true
            }
            EngineState::Cancelling => true,
            _ => false,
        }
    }

    /// Blocks until the engine is back to `Idle`. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while *state != EngineState::Idle {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return *state == EngineState::Idle;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        true
    }
}

/// One streaming session, run on the thread that called `read_async`.
///
/// `sdk_lock` serialises every call into the receiver. The descriptor lock
/// only guards snapshots and commits and is never held across an [`Sdk`]
/// call, so control-plane callers and the read callback can always reach it.
pub(crate) struct Engine<'a, S: Sdk> {
    pub sdk: &'a S,
    pub sdk_lock: &'a Mutex<()>,
    pub descriptor: &'a Mutex<Descriptor>,
    pub queue: &'a CommandQueue,
    pub control: &'a StreamControl,
    pub converter: &'a ConverterControl,
}

impl<S: Sdk> Engine<'_, S> {
    pub fn run(&self, callback: ReadCallback, buf_num: u32, buf_len: u32) -> Result<(), Error> {
        self.start(callback, buf_num, buf_len)?;
        self.command_loop();
        self.stop();
        Ok(())
    }

    fn snapshot(&self) -> Descriptor {
        self.descriptor.lock().clone()
    }

    fn start(&self, callback: ReadCallback, buf_num: u32, buf_len: u32) -> Result<(), Error> {
        let _sdk = self.sdk_lock.lock();
        let desc = {
            let mut desc = self.descriptor.lock();
            self.control.begin()?;
            desc.clamp_grdb();
            desc.buf_num = buf_num;
            desc.buf_len = buf_len;
            desc.gain_deferred = false;
            desc.ppm_deferred = false;
            desc.clone()
        };
        match self.init_stream(&desc, callback) {
            Ok(()) => {
                self.control.set(EngineState::Streaming);
                self.apply_deferred();
                Ok(())
            }
            Err(e) => {
                // requests queued while starting still describe what the caller wants
                let mut desc = self.descriptor.lock();
                for signal in self.queue.drain() {
                    desc.store(signal);
                }
                self.control.set(EngineState::Idle);
                Err(e)
            }
        }
    }

    fn init_stream(&self, desc: &Descriptor, callback: ReadCallback) -> Result<(), Error> {
        if desc.input_rate < MIN_INPUT_RATE {
            return Err(Error::RateTooLow {
                rate: desc.output_rate,
            });
        }

        self.converter.clear();
        let converter =
            SampleConverter::new(desc.converter_config(), desc.buf_len as usize, callback);
        let params = desc.stream_params();
        log::debug!("stream init {:?}", params);
        self.sdk
            .stream_init(&params, converter.into_delivery(self.converter.clone()))
            .map_err(|e| {
                log::error!("Error {} on streamInit", e);
                Error::sdk("stream_init", e)
            })?;

        if let Err(e) = self.sdk.set_ppm(desc.ppm as f64) {
            log::warn!("Error {} on set_ppm({})", e, desc.ppm);
        }
        if desc.agc {
            self.restore_gain();
        }

        log::info!(
            "{:?} streaming at {} Hz, {} S/s in / {} S/s out, {} x {} bytes",
            desc.hw,
            desc.frequency,
            desc.input_rate,
            desc.output_rate,
            desc.buf_num,
            desc.buf_len
        );
        Ok(())
    }

    fn command_loop(&self) {
        loop {
            let signal = self.queue.dequeue();
            if signal == Signal::Cancel {
                log::info!("cancel request");
                self.control.request_cancel();
                return;
            }

            let _sdk = self.sdk_lock.lock();
            if self.control.state() == EngineState::Cancelling {
                log::debug!("dropping {:?}, stream is stopping", signal);
                continue;
            }
            self.handle(signal);
            self.apply_deferred();
        }
    }

    fn handle(&self, signal: Signal) {
        log::debug!("we got a signal {:?}", signal);
        match signal {
            Signal::Cancel => {}
            Signal::SetFrequency(frequency) => self.set_frequency(frequency),
            Signal::SetBandwidth(bandwidth) => self.set_bandwidth(bandwidth),
            Signal::SetRate(rate) => self.set_rate(rate),
        }
    }

    fn set_frequency(&self, frequency: u32) {
        let current = self.snapshot();
        if Band::same_band(current.frequency, frequency) {
            if let Err(e) = self.sdk.set_rf(frequency) {
                log::error!("Error at frequency setting {}", e);
                return;
            }
        } else {
            let mut next = current;
            next.set_frequency(frequency);
            if !self.reinit(&next, ReinitReason::RfFrequency) {
                return;
            }
        }
        self.descriptor.lock().set_frequency(frequency);
        self.restore_gain();
    }

    fn set_bandwidth(&self, bandwidth: Bandwidth) {
        let mut next = self.snapshot();
        if next.bandwidth == bandwidth {
            log::debug!("bandwidth already {:?}", bandwidth);
            return;
        }
        next.bandwidth = bandwidth;
        if self.reinit(&next, ReinitReason::Bandwidth) {
            self.descriptor.lock().bandwidth = bandwidth;
            self.restore_gain();
        }
    }

    fn set_rate(&self, rate: u32) {
        let mut next = self.snapshot();
        if let Err(e) = next.set_rate(rate) {
            log::warn!("ignoring queued rate change: {}", e);
            return;
        }

        // blocks around the switch may come at either rate
        self.converter.suspend();
        if !self.reinit(&next, ReinitReason::SampleRate) {
            self.converter.resume(None);
            return;
        }
        let config = {
            let mut desc = self.descriptor.lock();
            desc.input_rate = next.input_rate;
            desc.output_rate = next.output_rate;
            desc.converter_config()
        };
        self.converter.resume(Some(config));
        self.restore_gain();
    }

    /// Full reinit to `next`. The caller commits it only on success.
    fn reinit(&self, next: &Descriptor, reason: ReinitReason) -> bool {
        match self.sdk.reinit(&next.stream_params(), reason) {
            Ok(()) => true,
            Err(e) => {
                log::error!("ReInit ({:?}) failed {}", reason, e);
                false
            }
        }
    }

    fn restore_gain(&self) {
        if let Err(e) = self.apply_gain(&self.snapshot()) {
            log::error!("Error {} restoring gain", e);
        }
    }

    /// Reinit leaves the receiver at its default gain; put ours back.
    fn apply_gain(&self, desc: &Descriptor) -> Result<(), SdkError> {
        self.sdk
            .set_agc(AgcMode::from_flag(desc.agc), -desc.grdb, desc.lna_state)?;
        if !desc.agc {
            self.sdk.set_gain_reduction(desc.grdb, desc.lna_state)?;
        }
        Ok(())
    }

    /// Pushes settings the read callback stored while `sdk_lock` was taken.
    fn apply_deferred(&self) {
        let (desc, gain, ppm) = {
            let mut desc = self.descriptor.lock();
            let gain = std::mem::take(&mut desc.gain_deferred);
            let ppm = std::mem::take(&mut desc.ppm_deferred);
            (desc.clone(), gain, ppm)
        };
        if ppm {
            if let Err(e) = self.sdk.set_ppm(desc.ppm as f64) {
                log::error!("Error {} on set_ppm({})", e, desc.ppm);
            }
        }
        if gain {
            if let Err(e) = self.apply_gain(&desc) {
                log::error!("Error {} applying deferred gain", e);
            }
        }
    }

    fn stop(&self) {
        {
            let _sdk = self.sdk_lock.lock();
            // uninit waits for the delivery thread, which may be inside the callback
            if let Err(e) = self.sdk.stream_uninit() {
                log::error!("Error at StreamUnInit {}", e);
            }
            // setters store directly while Cancelling, so nothing new is queued
            let stale = self.queue.reset();
            if stale > 0 {
                log::debug!("discarded {} stale signals", stale);
            }
        }
        log::info!("async is stopped");
        // waiters return as soon as they see Idle
        self.control.set(EngineState::Idle);
    }
}
