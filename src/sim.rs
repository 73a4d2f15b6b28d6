//! A software RSP: one tone plus gaussian noise, delivered from its own thread.

use std::f64::consts::PI;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};
use num::Complex;
use parking_lot::Mutex;
use rand_distr::{Distribution, Normal};

use crate::{
    band::Band,
    descriptor::MIN_INPUT_RATE,
    gains::HwVersion,
    sdk::{AgcMode, DeliveryFn, DeviceInfo, ReinitReason, Sdk, SdkError, StreamParams},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    /// Tone position relative to the tuned frequency, Hz.
    pub tone_offset: f64,
    /// Tone amplitude as a fraction of full scale.
    pub amplitude: f64,
    /// Noise standard deviation per rail, fraction of full scale.
    pub noise_sigma: f64,
    /// Samples per delivered block.
    pub block_len: usize,
    /// Sleep between blocks to hold the nominal sample rate.
    pub paced: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tone_offset: 100_000.0,
            amplitude: 0.5,
            noise_sigma: 0.01,
            block_len: 1008,
            paced: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCmd {
    Reconfigure(StreamParams),
    Destroy,
}

struct Stream {
    tx_cmd: Sender<SimCmd>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct SimState {
    selected: Option<u32>,
    params: Option<StreamParams>,
    agc: Option<AgcMode>,
    ppm: f64,
}

pub struct SimSdk {
    devices: Vec<DeviceInfo>,
    config: SimConfig,
    state: Mutex<SimState>,
    stream: Mutex<Option<Stream>>,
}

impl Default for SimSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSdk {
    /// A single simulated RSP1A.
    pub fn new() -> Self {
        Self::with_devices(vec![Self::device("RSP1A", "SIM0001", 255)])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            config: SimConfig::default(),
            state: Mutex::new(SimState::default()),
            stream: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device(name: &str, serial: &str, hw_ver: u8) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            serial: serial.to_string(),
            hw_ver,
        }
    }

    pub fn config(&self) -> SimConfig {
        self.config
    }

    /// Parameters the simulated tuner currently runs with.
    pub fn params(&self) -> Option<StreamParams> {
        self.state.lock().params
    }

    pub fn agc(&self) -> Option<AgcMode> {
        self.state.lock().agc
    }

    pub fn ppm(&self) -> f64 {
        self.state.lock().ppm
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn send(&self, cmd: SimCmd) -> Result<(), SdkError> {
        match self.stream.lock().as_ref() {
            Some(stream) => stream.tx_cmd.send(cmd).map_err(|_| SdkError::HwRemoved),
            None => Err(SdkError::NotInitialised),
        }
    }
}

impl Sdk for SimSdk {
    fn devices(&self) -> Result<Vec<DeviceInfo>, SdkError> {
        Ok(self.devices.clone())
    }

    fn select_device(&self, index: u32) -> Result<(), SdkError> {
        if index as usize >= self.devices.len() {
            return Err(SdkError::InvalidParam);
        }
        self.state.lock().selected = Some(index);
        Ok(())
    }

    fn release_device(&self) -> Result<(), SdkError> {
        self.state.lock().selected = None;
        Ok(())
    }

    fn stream_init(&self, params: &StreamParams, delivery: DeliveryFn) -> Result<(), SdkError> {
        let mut stream = self.stream.lock();
        if stream.is_some() {
            return Err(SdkError::AlreadyInitialised);
        }
        if params.sample_rate < MIN_INPUT_RATE {
            return Err(SdkError::OutOfRange);
        }
        let selected = self.state.lock().selected.ok_or(SdkError::NotInitialised)?;
        let hw_ver = self.devices[selected as usize].hw_ver;
        let full_scale = HwVersion::from_hw_ver(hw_ver).downscale() as f64;
        let noise = Normal::new(0.0, self.config.noise_sigma * full_scale)
            .map_err(|_| SdkError::InvalidParam)?;

        let (tx_cmd, rx_cmd) = unbounded();
        let config = self.config;
        let initial = *params;
        let handle = thread::Builder::new()
            .name("rsp-sim".to_string())
            .spawn(move || run_stream(config, full_scale, noise, initial, delivery, rx_cmd))
            .map_err(|_| SdkError::Fail)?;

        *stream = Some(Stream { tx_cmd, handle });
        let mut state = self.state.lock();
        state.params = Some(*params);
        state.agc = Some(AgcMode::Disabled);
        Ok(())
    }

    fn reinit(&self, params: &StreamParams, reason: ReinitReason) -> Result<(), SdkError> {
        if params.sample_rate < MIN_INPUT_RATE {
            return Err(SdkError::OutOfRange);
        }
        log::debug!("sim reinit {:?} -> {:?}", reason, params);
        self.send(SimCmd::Reconfigure(*params))?;
        let mut state = self.state.lock();
        state.params = Some(*params);
        // a reinit drops the receiver back to fixed gain
        state.agc = Some(AgcMode::Disabled);
        Ok(())
    }

    fn set_rf(&self, frequency: u32) -> Result<(), SdkError> {
        let mut next = self.params().ok_or(SdkError::NotInitialised)?;
        if !Band::same_band(next.frequency, frequency) {
            return Err(SdkError::RfUpdateError);
        }
        next.frequency = frequency;
        self.send(SimCmd::Reconfigure(next))?;
        self.state.lock().params = Some(next);
        Ok(())
    }

    fn set_gain_reduction(&self, grdb: i32, lna_state: u8) -> Result<(), SdkError> {
        let mut state = self.state.lock();
        let params = state.params.as_mut().ok_or(SdkError::NotInitialised)?;
        params.grdb = grdb;
        params.lna_state = lna_state;
        Ok(())
    }

    fn set_agc(&self, mode: AgcMode, _set_point_dbfs: i32, lna_state: u8) -> Result<(), SdkError> {
        let mut state = self.state.lock();
        let params = state.params.as_mut().ok_or(SdkError::NotInitialised)?;
        params.lna_state = lna_state;
        state.agc = Some(mode);
        Ok(())
    }

    fn set_ppm(&self, ppm: f64) -> Result<(), SdkError> {
        self.state.lock().ppm = ppm;
        Ok(())
    }

    fn stream_uninit(&self) -> Result<(), SdkError> {
        let stream = self.stream.lock().take().ok_or(SdkError::NotInitialised)?;
        // the worker may be blocked in delivery; wait without holding any lock
        let _ = stream.tx_cmd.send(SimCmd::Destroy);
        if stream.handle.join().is_err() {
            log::error!("sim stream thread panicked");
        }
        let mut state = self.state.lock();
        state.params = None;
        state.agc = None;
        Ok(())
    }
}

fn run_stream(
    config: SimConfig,
    full_scale: f64,
    noise: Normal<f64>,
    mut params: StreamParams,
    mut delivery: DeliveryFn,
    rx_cmd: Receiver<SimCmd>,
) {
    let mut rng = rand::rng();
    let mut xi = vec![0i16; config.block_len];
    let mut xq = vec![0i16; config.block_len];
    let mut phasor = Complex::<f64>::new(config.amplitude * full_scale, 0.0);
    let mut t0 = Instant::now();
    let mut produced: u64 = 0;

    loop {
        loop {
            match rx_cmd.try_recv() {
                Ok(SimCmd::Reconfigure(p)) => {
                    params = p;
                    t0 = Instant::now();
                    produced = 0;
                }
                Ok(SimCmd::Destroy) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }

        let omega = 2.0 * PI * config.tone_offset / params.sample_rate as f64;
        let rot = Complex::from_polar(1.0, omega);
        for (i, q) in xi.iter_mut().zip(xq.iter_mut()) {
            let s = phasor + Complex::new(noise.sample(&mut rng), noise.sample(&mut rng));
            *i = s.re.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            *q = s.im.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            phasor *= rot;
        }
        let norm = phasor.norm();
        if norm > 0.0 {
            phasor = phasor.scale(config.amplitude * full_scale / norm);
        }

        delivery(&xi, &xq);

        if config.paced {
            produced += config.block_len as u64;
            let due = t0 + Duration::from_secs_f64(produced as f64 / params.sample_rate as f64);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::Bandwidth;
    use std::sync::Arc;

    fn params(frequency: u32) -> StreamParams {
        StreamParams {
            grdb: 40,
            sample_rate: 2_048_000,
            frequency,
            bandwidth: Bandwidth::Bw1536k,
            lna_state: 3,
        }
    }

    fn fast() -> SimConfig {
        SimConfig {
            paced: false,
            block_len: 256,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_stream_delivers_tone() {
        let sdk = SimSdk::new().with_config(SimConfig {
            noise_sigma: 0.0,
            ..fast()
        });
        sdk.select_device(0).unwrap();
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let sink = blocks.clone();
        sdk.stream_init(
            &params(100_000_000),
            Box::new(move |xi: &[i16], xq: &[i16]| {
                sink.lock().push((xi.to_vec(), xq.to_vec()));
            }),
        )
        .unwrap();
        while blocks.lock().len() < 4 {
            thread::yield_now();
        }
        sdk.stream_uninit().unwrap();

        let blocks = blocks.lock();
        let (xi, xq) = &blocks[0];
        assert_eq!(xi.len(), 256);
        // RSP1A full scale 8192, amplitude one half
        assert_eq!(xi[0], 4096);
        assert_eq!(xq[0], 0);
        for (i, q) in xi.iter().zip(xq) {
            let mag = ((*i as f64).powi(2) + (*q as f64).powi(2)).sqrt();
            assert!((mag - 4096.0).abs() < 2.0);
        }
    }

    #[test]
    fn test_set_rf_stays_in_band() {
        let sdk = SimSdk::new().with_config(fast());
        sdk.select_device(0).unwrap();
        sdk.stream_init(&params(200_000_000), Box::new(|_: &[i16], _: &[i16]| {}))
            .unwrap();
        sdk.set_rf(240_000_000).unwrap();
        assert_eq!(sdk.params().unwrap().frequency, 240_000_000);
        assert_eq!(sdk.set_rf(250_000_000), Err(SdkError::RfUpdateError));
        sdk.reinit(&params(250_000_000), ReinitReason::RfFrequency)
            .unwrap();
        assert_eq!(sdk.params().unwrap().frequency, 250_000_000);
        sdk.stream_uninit().unwrap();
        assert!(!sdk.is_streaming());
        assert_eq!(sdk.stream_uninit(), Err(SdkError::NotInitialised));
    }

    #[test]
    fn test_init_requires_selection() {
        let sdk = SimSdk::new().with_config(fast());
        assert_eq!(
            sdk.stream_init(&params(100_000_000), Box::new(|_: &[i16], _: &[i16]| {})),
            Err(SdkError::NotInitialised)
        );
        assert_eq!(sdk.select_device(3), Err(SdkError::InvalidParam));
    }
}
