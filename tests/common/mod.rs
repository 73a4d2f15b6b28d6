//! Recording SDK double shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rtlsdr_rsp::{
    Device, EngineState, Error,
    sdk::{AgcMode, DeliveryFn, DeviceInfo, ReinitReason, Sdk, SdkError, StreamParams},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Select(u32),
    Release,
    Init(StreamParams),
    Reinit(StreamParams, ReinitReason),
    SetRf(u32),
    SetGr(i32, u8),
    Agc(AgcMode, i32, u8),
    Ppm(f64),
    Uninit,
}

pub struct MockSdk {
    devices: Vec<DeviceInfo>,
    calls: Mutex<Vec<Call>>,
    delivery: Mutex<Option<DeliveryFn>>,
    failures: Mutex<HashMap<&'static str, SdkError>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    reinit_block: Mutex<Option<(Vec<i16>, Vec<i16>)>>,
}

impl MockSdk {
    pub fn new() -> Arc<Self> {
        Self::with_devices(vec![info("RSP1A", "1801000001", 255)])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            calls: Mutex::new(Vec::new()),
            delivery: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            reinit_block: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Makes every call to `function` fail with `err` until cleared.
    pub fn fail(&self, function: &'static str, err: SdkError) {
        self.failures.lock().insert(function, err);
    }

    pub fn clear_failure(&self, function: &'static str) {
        self.failures.lock().remove(function);
    }

    /// Makes every call to `function` take `delay` until cleared.
    pub fn delay(&self, function: &'static str, delay: Duration) {
        self.delays.lock().insert(function, delay);
    }

    pub fn clear_delay(&self, function: &'static str) {
        self.delays.lock().remove(function);
    }

    /// Delivers one block from inside the next `reinit`, the way the receiver
    /// keeps streaming while it switches.
    pub fn push_during_reinit(&self, xi: &[i16], xq: &[i16]) {
        *self.reinit_block.lock() = Some((xi.to_vec(), xq.to_vec()));
    }

    /// Feeds one block through the installed delivery closure.
    pub fn push(&self, xi: &[i16], xq: &[i16]) -> bool {
        match self.delivery.lock().as_mut() {
            Some(delivery) => {
                delivery(xi, xq);
                true
            }
            None => false,
        }
    }

    fn record(&self, function: &'static str, call: Call) -> Result<(), SdkError> {
        self.calls.lock().push(call);
        let delay = self.delays.lock().get(function).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match self.failures.lock().get(function) {
            Some(err) => Err(*err),
            None => Ok(()),
        }
    }
}

impl Sdk for MockSdk {
    fn devices(&self) -> Result<Vec<DeviceInfo>, SdkError> {
        Ok(self.devices.clone())
    }

    fn select_device(&self, index: u32) -> Result<(), SdkError> {
        self.record("select_device", Call::Select(index))
    }

    fn release_device(&self) -> Result<(), SdkError> {
        self.record("release_device", Call::Release)
    }

    fn stream_init(&self, params: &StreamParams, delivery: DeliveryFn) -> Result<(), SdkError> {
        self.record("stream_init", Call::Init(*params))?;
        *self.delivery.lock() = Some(delivery);
        Ok(())
    }

    fn reinit(&self, params: &StreamParams, reason: ReinitReason) -> Result<(), SdkError> {
        let ret = self.record("reinit", Call::Reinit(*params, reason));
        let block = self.reinit_block.lock().take();
        if let Some((xi, xq)) = block {
            self.push(&xi, &xq);
        }
        ret
    }

    fn set_rf(&self, frequency: u32) -> Result<(), SdkError> {
        self.record("set_rf", Call::SetRf(frequency))
    }

    fn set_gain_reduction(&self, grdb: i32, lna_state: u8) -> Result<(), SdkError> {
        self.record("set_gain_reduction", Call::SetGr(grdb, lna_state))
    }

    fn set_agc(&self, mode: AgcMode, set_point_dbfs: i32, lna_state: u8) -> Result<(), SdkError> {
        self.record("set_agc", Call::Agc(mode, set_point_dbfs, lna_state))
    }

    fn set_ppm(&self, ppm: f64) -> Result<(), SdkError> {
        self.record("set_ppm", Call::Ppm(ppm))
    }

    fn stream_uninit(&self) -> Result<(), SdkError> {
        let ret = self.record("stream_uninit", Call::Uninit);
        self.delivery.lock().take();
        ret
    }
}

pub fn info(name: &str, serial: &str, hw_ver: u8) -> DeviceInfo {
    DeviceInfo {
        name: name.to_string(),
        serial: serial.to_string(),
        hw_ver,
    }
}

/// Polls `cond` for up to two seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if cond() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub type Sink = Arc<Mutex<Vec<Vec<u8>>>>;

/// Runs `read_async` on its own thread and waits until the stream is up.
pub fn start<S: Sdk + 'static>(
    device: &Arc<Device<S>>,
    buf_len: u32,
) -> (JoinHandle<Result<(), Error>>, Sink) {
    let sink: Sink = Arc::new(Mutex::new(Vec::new()));
    let out = sink.clone();
    let dev = device.clone();
    let handle = thread::spawn(move || {
        dev.read_async(move |buf: &[u8]| out.lock().push(buf.to_vec()), 0, buf_len)
    });
    assert!(
        wait_for(|| device.state() == EngineState::Streaming),
        "stream did not start"
    );
    (handle, sink)
}

pub fn stop<S: Sdk + 'static>(device: &Device<S>, handle: JoinHandle<Result<(), Error>>) {
    device
        .cancel_async(Some(Duration::from_secs(2)))
        .expect("cancel timed out");
    handle
        .join()
        .expect("reader panicked")
        .expect("stream failed");
    assert_eq!(device.state(), EngineState::Idle);
}
