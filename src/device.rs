//! One open RSP presented through the rtlsdr call surface.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::{
    convert::{ConverterControl, ReadCallback, in_delivery},
    descriptor::{Descriptor, input_rate_for},
    engine::{Engine, EngineState, StreamControl},
    error::Error,
    gains::{HwVersion, TUNER_GAINS},
    queue::{CommandQueue, Signal},
    sdk::{AgcMode, Bandwidth, DeviceInfo, Sdk},
};

pub const DEFAULT_BUF_NUM: u32 = 15;
pub const DEFAULT_BUF_LEN: u32 = 16 * 32 * 512;
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuner type as librtlsdr numbers it. The RSP front end has no counterpart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TunerType(pub u32);

impl TunerType {
    pub const UNKNOWN: Self = Self(0);
    pub const E4000: Self = Self(1);
    pub const FC0012: Self = Self(2);
    pub const FC0013: Self = Self(3);
    pub const FC2580: Self = Self(4);
    pub const R820T: Self = Self(5);
    pub const R828D: Self = Self(6);
}

impl Debug for TunerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNKNOWN => write!(f, "TunerType::UNKNOWN"),
            Self::E4000 => write!(f, "TunerType::E4000"),
            Self::FC0012 => write!(f, "TunerType::FC0012"),
            Self::FC0013 => write!(f, "TunerType::FC0013"),
            Self::FC2580 => write!(f, "TunerType::FC2580"),
            Self::R820T => write!(f, "TunerType::R820T"),
            Self::R828D => write!(f, "TunerType::R828D"),
            _ => write!(f, "TunerType({})", self.0),
        }
    }
}

/// How a setter that talks to the receiver directly reaches it.
enum Route<'a> {
    /// No stream running; only the stored configuration changes.
    Store { _sdk: Option<MutexGuard<'a, ()>> },
    /// Called from the read callback while the streaming thread owns the
    /// receiver; the change is stored and pushed once that thread is done.
    Defer,
    Live { _sdk: MutexGuard<'a, ()> },
}

pub struct Device<S: Sdk> {
    sdk: Arc<S>,
    sdk_lock: Mutex<()>,
    info: DeviceInfo,
    descriptor: Mutex<Descriptor>,
    queue: CommandQueue,
    control: StreamControl,
    converter: ConverterControl,
    closed: AtomicBool,
}

impl<S: Sdk> Device<S> {
    pub fn open(sdk: Arc<S>, index: u32) -> Result<Self, Error> {
        let devices = sdk.devices().map_err(|e| Error::sdk("get_devices", e))?;
        if devices.is_empty() {
            return Err(Error::NoDevice);
        }
        let info = devices
            .get(index as usize)
            .cloned()
            .ok_or(Error::InvalidIndex {
                index,
                count: devices.len(),
            })?;

        sdk.select_device(index)
            .map_err(|e| Error::sdk("set_device_idx", e))?;

        let hw = HwVersion::from_hw_ver(info.hw_ver);
        log::info!(
            "opened {} (serial {}) as {:?} at index {}",
            info.name,
            info.serial,
            hw,
            index
        );

        Ok(Self {
            sdk,
            sdk_lock: Mutex::new(()),
            info,
            descriptor: Mutex::new(Descriptor::new(hw, index)),
            queue: CommandQueue::new(),
            control: StreamControl::new(),
            converter: ConverterControl::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Stops any running stream, waiting up to [`CLOSE_TIMEOUT`], and hands
    /// the receiver back to the SDK.
    pub fn close(&self) -> Result<(), Error> {
        self.shutdown(Some(CLOSE_TIMEOUT))
    }

    /// Like [`Device::close`], but with `None` it waits for the stream to stop
    /// however long that takes. Owners that free the device right after this
    /// returns need that guarantee.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<(), Error> {
        if in_delivery() && self.control.state() != EngineState::Idle {
            return Err(Error::InvalidArgument(
                "cannot close from inside the read callback",
            ));
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.control.state() != EngineState::Idle {
            if let Err(e) = self.cancel_async(timeout) {
                log::error!("closing with a live stream: {}", e);
            }
        }
        self.sdk.release_device().map_err(|e| {
            log::error!("Error {} on release_device", e);
            Error::sdk("release_device_idx", e)
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    /// Copy of the current configuration.
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor.lock().clone()
    }

    fn route(&self) -> Route<'_> {
        let guard = if in_delivery() {
            self.sdk_lock.try_lock()
        } else {
            Some(self.sdk_lock.lock())
        };
        match guard {
            Some(guard) if self.control.is_streaming() => Route::Live { _sdk: guard },
            None if self.control.state() != EngineState::Idle => Route::Defer,
            guard => Route::Store { _sdk: guard },
        }
    }

    /// Queues `signal` for a starting or running stream, otherwise stores it.
    /// Returns without waiting for the receiver.
    fn submit(&self, signal: Signal) {
        let mut desc = self.descriptor.lock();
        match self.control.state() {
            EngineState::Starting | EngineState::Streaming => self.queue.enqueue(signal),
            EngineState::Idle | EngineState::Cancelling => desc.store(signal),
        }
    }

    pub fn set_center_freq(&self, frequency: u32) -> Result<(), Error> {
        self.submit(Signal::SetFrequency(frequency));
        Ok(())
    }

    /// Last requested frequency; a queued retune shows up once it is applied.
    pub fn get_center_freq(&self) -> u32 {
        self.descriptor.lock().frequency
    }

    pub fn set_freq_correction(&self, ppm: i32) -> Result<(), Error> {
        let route = self.route();
        if let Route::Live { .. } = route {
            self.sdk
                .set_ppm(ppm as f64)
                .map_err(|e| Error::sdk("set_ppm", e))?;
        }
        let mut desc = self.descriptor.lock();
        desc.ppm = ppm;
        if let Route::Defer = route {
            desc.ppm_deferred = true;
        }
        Ok(())
    }

    pub fn get_freq_correction(&self) -> i32 {
        self.descriptor.lock().ppm
    }

    /// Gain in tenths of a dB, resolved to an LNA state and IF reduction.
    pub fn set_tuner_gain(&self, gain: i32) -> Result<(), Error> {
        let route = self.route();
        let mut next = self.descriptor();
        let Some(setting) = next.set_gain(gain) else {
            self.descriptor.lock().set_gain(gain);
            return Ok(());
        };
        log::debug!(
            "gain {} at {} Hz -> lna {} grdb {}",
            gain,
            next.frequency,
            setting.lna_state,
            next.grdb
        );
        if let Route::Live { .. } = route {
            if !next.agc {
                self.sdk
                    .set_gain_reduction(next.grdb, next.lna_state)
                    .map_err(|e| {
                        log::error!("Error {} on RSP_SetGr", e);
                        Error::sdk("rsp_set_gr", e)
                    })?;
            }
        }

        let mut desc = self.descriptor.lock();
        desc.set_gain(gain);
        if let Route::Defer = route {
            desc.gain_deferred = true;
        }
        Ok(())
    }

    pub fn get_tuner_gain(&self) -> i32 {
        self.descriptor.lock().tuner_gain
    }

    pub fn get_tuner_gains(&self) -> &'static [i32] {
        &TUNER_GAINS
    }

    pub fn set_tuner_gain_mode(&self, manual: bool) -> Result<(), Error> {
        self.descriptor.lock().manual_gain = manual;
        Ok(())
    }

    pub fn set_agc_mode(&self, on: bool) -> Result<(), Error> {
        let route = self.route();
        let current = {
            let mut desc = self.descriptor.lock();
            if desc.agc == on {
                return Ok(());
            }
            match route {
                Route::Live { .. } => desc.clone(),
                Route::Defer => {
                    desc.agc = on;
                    desc.gain_deferred = true;
                    return Ok(());
                }
                Route::Store { .. } => {
                    desc.agc = on;
                    return Ok(());
                }
            }
        };

        log::info!("switching agc mode to {}", if on { "on" } else { "off" });
        self.sdk
            .set_agc(AgcMode::from_flag(on), -current.grdb, current.lna_state)
            .map_err(|e| {
                log::error!("Error {} on AgcControl", e);
                Error::sdk("agc_control", e)
            })?;
        self.descriptor.lock().agc = on;
        if !on {
            self.sdk
                .set_gain_reduction(current.grdb, current.lna_state)
                .map_err(|e| {
                    log::error!("Error {} on RSP_SetGr", e);
                    Error::sdk("rsp_set_gr", e)
                })?;
        }
        Ok(())
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<(), Error> {
        input_rate_for(rate)?;
        self.submit(Signal::SetRate(rate));
        Ok(())
    }

    /// Rate delivered to the callback, after any decimation.
    pub fn get_sample_rate(&self) -> u32 {
        self.descriptor.lock().output_rate
    }

    /// While streaming every request is queued, and the streaming thread
    /// skips the ones that match the filter in use when it gets to them.
    pub fn set_tuner_bandwidth(&self, hz: u32) -> Result<(), Error> {
        let output_rate = self.descriptor.lock().output_rate;
        self.submit(Signal::SetBandwidth(Bandwidth::for_hz(hz.max(output_rate))));
        Ok(())
    }

    pub fn get_tuner_type(&self) -> TunerType {
        TunerType::UNKNOWN
    }

    /// Replaces samples with a counter so the consumer can check for gaps.
    pub fn set_testmode(&self, on: bool) -> Result<(), Error> {
        let mut desc = self.descriptor.lock();
        desc.test_mode = on;
        if self.control.state() != EngineState::Idle {
            self.converter.reconfigure(desc.converter_config());
        }
        Ok(())
    }

    pub fn reset_buffer(&self) -> Result<(), Error> {
        self.converter.reset();
        Ok(())
    }

    /// Streams until cancelled, calling `callback` with each full buffer of
    /// interleaved u8 I/Q. Blocks the calling thread for the whole stream.
    pub fn read_async<F>(&self, callback: F, buf_num: u32, buf_len: u32) -> Result<(), Error>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let buf_num = if buf_num == 0 { DEFAULT_BUF_NUM } else { buf_num };
        let buf_len = if buf_len == 0 { DEFAULT_BUF_LEN } else { buf_len };
        if buf_len % 2 != 0 {
            return Err(Error::InvalidArgument("buffer length must be even"));
        }

        let callback: ReadCallback = Box::new(callback);
        Engine {
            sdk: self.sdk.as_ref(),
            sdk_lock: &self.sdk_lock,
            descriptor: &self.descriptor,
            queue: &self.queue,
            control: &self.control,
            converter: &self.converter,
        }
        .run(callback, buf_num, buf_len)
    }

    /// Asks the running stream to stop and waits for it, up to `timeout`.
    ///
    /// From inside the read callback the request is only posted.
    pub fn cancel_async(&self, timeout: Option<Duration>) -> Result<(), Error> {
        {
            let _desc = self.descriptor.lock();
            match self.control.state() {
                EngineState::Idle => return Ok(()),
                EngineState::Streaming => {
                    self.control.request_cancel();
                    self.queue.enqueue(Signal::Cancel);
                }
                // picked up by the command loop once the stream is up
                EngineState::Starting => self.queue.enqueue(Signal::Cancel),
                EngineState::Cancelling => {}
            }
        }
        if in_delivery() {
            return Ok(());
        }
        if self.control.wait_idle(timeout) {
            Ok(())
        } else {
            Err(Error::CancelTimeout)
        }
    }

    pub fn set_direct_sampling(&self, _on: i32) -> Result<(), Error> {
        Ok(())
    }

    pub fn get_direct_sampling(&self) -> Result<i32, Error> {
        Ok(0)
    }

    pub fn set_xtal_freq(&self, _rtl_freq: u32, _tuner_freq: u32) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn get_xtal_freq(&self) -> Result<(u32, u32), Error> {
        Err(Error::Unsupported)
    }

    pub fn read_eeprom(&self, _offset: u8, _buf: &mut [u8]) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn write_eeprom(&self, _offset: u8, _buf: &[u8]) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn set_offset_tuning(&self, _on: bool) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn get_offset_tuning(&self) -> Result<bool, Error> {
        Err(Error::Unsupported)
    }

    pub fn set_bias_tee(&self, _on: bool) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn set_tuner_if_gain(&self, _stage: i32, _gain: i32) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    pub fn read_sync(&self, _buf: &mut [u8]) -> Result<usize, Error> {
        Err(Error::Unsupported)
    }

    pub fn wait_async<F>(&self, _callback: F, _buf_num: u32, _buf_len: u32) -> Result<(), Error>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        Err(Error::Unsupported)
    }
}

impl<S: Sdk> Drop for Device<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("close on drop failed: {}", e);
        }
    }
}
