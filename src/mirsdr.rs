//! The real receiver, through SDRplay's `mirsdrapi-rsp` 2.x library.

use std::ffi::CStr;
use std::os::raw::{c_char, c_double, c_float, c_int, c_uchar, c_uint, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::slice;

use parking_lot::Mutex;

use crate::{
    MHZ,
    sdk::{AgcMode, DeliveryFn, DeviceInfo, ReinitReason, Sdk, SdkError, StreamParams},
};

pub const MIN_API_VERSION: f32 = 2.13;
const MAX_DEVICES: c_uint = 4;

const IF_ZERO: c_int = 0;
const LO_UNDEFINED: c_int = 0;
const USE_RSP_SET_GR: c_int = 2;
const AGC_DISABLE: c_int = 0;
const AGC_100HZ: c_int = 1;

#[repr(C)]
#[allow(non_snake_case)]
struct MirSdrDevice {
    SerNo: *mut c_char,
    DevNm: *mut c_char,
    hwVer: c_uchar,
    devAvail: c_uchar,
}

type StreamCallback = unsafe extern "C" fn(
    xi: *mut i16,
    xq: *mut i16,
    first_sample_num: c_uint,
    gr_changed: c_int,
    rf_changed: c_int,
    fs_changed: c_int,
    num_samples: c_uint,
    reset: c_uint,
    hw_removed: c_uint,
    cb_context: *mut c_void,
);

type GainChangeCallback =
    unsafe extern "C" fn(gr_db: c_uint, lna_gr_db: c_uint, cb_context: *mut c_void);

unsafe extern "C" {
    fn mir_sdr_ApiVersion(version: *mut c_float) -> c_int;
    fn mir_sdr_GetDevices(
        devices: *mut MirSdrDevice,
        num_devs: *mut c_uint,
        max_devs: c_uint,
    ) -> c_int;
    fn mir_sdr_SetDeviceIdx(idx: c_uint) -> c_int;
    fn mir_sdr_ReleaseDeviceIdx() -> c_int;
    fn mir_sdr_StreamInit(
        gr_db: *mut c_int,
        fs_mhz: c_double,
        rf_mhz: c_double,
        bw_type: c_int,
        if_type: c_int,
        lna_state: c_int,
        gr_db_system: *mut c_int,
        set_gr_mode: c_int,
        samples_per_packet: *mut c_int,
        stream_cb: StreamCallback,
        gain_cb: GainChangeCallback,
        cb_context: *mut c_void,
    ) -> c_int;
    fn mir_sdr_Reinit(
        gr_db: *mut c_int,
        fs_mhz: c_double,
        rf_mhz: c_double,
        bw_type: c_int,
        if_type: c_int,
        lo_mode: c_int,
        lna_state: c_int,
        gr_db_system: *mut c_int,
        set_gr_mode: c_int,
        samples_per_packet: *mut c_int,
        reason: c_int,
    ) -> c_int;
    fn mir_sdr_SetRf(drf_hz: c_double, abs: c_int, sync_update: c_int) -> c_int;
    fn mir_sdr_RSP_SetGr(gr_db: c_int, lna_state: c_int, abs: c_int, sync_update: c_int) -> c_int;
    fn mir_sdr_AgcControl(
        enable: c_int,
        set_point_dbfs: c_int,
        knee_dbfs: c_int,
        decay_ms: c_uint,
        hang_ms: c_uint,
        sync_update: c_int,
        lna_state: c_int,
    ) -> c_int;
    fn mir_sdr_SetPpm(ppm: c_double) -> c_int;
    fn mir_sdr_StreamUninit() -> c_int;
}

unsafe extern "C" fn stream_callback(
    xi: *mut i16,
    xq: *mut i16,
    _first_sample_num: c_uint,
    _gr_changed: c_int,
    _rf_changed: c_int,
    _fs_changed: c_int,
    num_samples: c_uint,
    _reset: c_uint,
    hw_removed: c_uint,
    cb_context: *mut c_void,
) {
    if hw_removed != 0 {
        log::error!("receiver removed while streaming");
        return;
    }
    if cb_context.is_null() || xi.is_null() || xq.is_null() {
        return;
    }
    let delivery = unsafe { &mut *(cb_context as *mut DeliveryFn) };
    let n = num_samples as usize;
    let (xi, xq) = unsafe { (slice::from_raw_parts(xi, n), slice::from_raw_parts(xq, n)) };
    if catch_unwind(AssertUnwindSafe(|| delivery(xi, xq))).is_err() {
        log::error!("sample delivery panicked");
    }
}

unsafe extern "C" fn gain_change_callback(
    _gr_db: c_uint,
    _lna_gr_db: c_uint,
    _cb_context: *mut c_void,
) {
}

/// Boxed delivery closure handed to the library as its callback context.
struct StreamContext(*mut DeliveryFn);

// the library calls back on one thread at a time; we only touch the pointer
// again after StreamUninit has returned
unsafe impl Send for StreamContext {}

/// Handle on the process-wide vendor library. Create one per process.
pub struct MirSdr {
    context: Mutex<Option<StreamContext>>,
}

impl MirSdr {
    pub fn new() -> Result<Self, SdkError> {
        let mut version: c_float = 0.0;
        SdkError::check(unsafe { mir_sdr_ApiVersion(&mut version) })?;
        if version < MIN_API_VERSION {
            log::error!(
                "sdrplay library {} found, need at least {}",
                version,
                MIN_API_VERSION
            );
            return Err(SdkError::HwVerError);
        }
        log::info!("sdrplay library version {}", version);
        Ok(Self {
            context: Mutex::new(None),
        })
    }
}

fn mhz(hz: u32) -> c_double {
    hz as c_double / MHZ as c_double
}

fn agc_flag(mode: AgcMode) -> c_int {
    match mode {
        AgcMode::Disabled => AGC_DISABLE,
        AgcMode::Loop100Hz => AGC_100HZ,
    }
}

unsafe fn owned_string(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
    }
}

impl Sdk for MirSdr {
    fn devices(&self) -> Result<Vec<DeviceInfo>, SdkError> {
        let mut raw: Vec<MirSdrDevice> = (0..MAX_DEVICES)
            .map(|_| MirSdrDevice {
                SerNo: ptr::null_mut(),
                DevNm: ptr::null_mut(),
                hwVer: 0,
                devAvail: 0,
            })
            .collect();
        let mut count: c_uint = 0;
        let ret = unsafe { mir_sdr_GetDevices(raw.as_mut_ptr(), &mut count, MAX_DEVICES) };
        SdkError::check(ret)?;
        Ok(raw
            .iter()
            .take(count.min(MAX_DEVICES) as usize)
            .map(|d| unsafe {
                DeviceInfo {
                    name: owned_string(d.DevNm),
                    serial: owned_string(d.SerNo),
                    hw_ver: d.hwVer,
                }
            })
            .collect())
    }

    fn select_device(&self, index: u32) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_SetDeviceIdx(index) })
    }

    fn release_device(&self) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_ReleaseDeviceIdx() })
    }

    fn stream_init(&self, params: &StreamParams, delivery: DeliveryFn) -> Result<(), SdkError> {
        let mut context = self.context.lock();
        if context.is_some() {
            return Err(SdkError::AlreadyInitialised);
        }
        let ctx = Box::into_raw(Box::new(delivery));
        let mut gr_db = params.grdb;
        let mut gr_db_system = 0;
        let mut samples_per_packet = 0;
        let ret = unsafe {
            mir_sdr_StreamInit(
                &mut gr_db,
                mhz(params.sample_rate),
                mhz(params.frequency),
                params.bandwidth.khz() as c_int,
                IF_ZERO,
                params.lna_state as c_int,
                &mut gr_db_system,
                USE_RSP_SET_GR,
                &mut samples_per_packet,
                stream_callback,
                gain_change_callback,
                ctx as *mut c_void,
            )
        };
        if let Err(e) = SdkError::check(ret) {
            drop(unsafe { Box::from_raw(ctx) });
            return Err(e);
        }
        log::debug!(
            "stream init: {} samples per packet, system gain reduction {}",
            samples_per_packet,
            gr_db_system
        );
        *context = Some(StreamContext(ctx));
        Ok(())
    }

    fn reinit(&self, params: &StreamParams, reason: ReinitReason) -> Result<(), SdkError> {
        let mut gr_db = params.grdb;
        let mut gr_db_system = 0;
        let mut samples_per_packet = 0;
        SdkError::check(unsafe {
            mir_sdr_Reinit(
                &mut gr_db,
                mhz(params.sample_rate),
                mhz(params.frequency),
                params.bandwidth.khz() as c_int,
                IF_ZERO,
                LO_UNDEFINED,
                params.lna_state as c_int,
                &mut gr_db_system,
                USE_RSP_SET_GR,
                &mut samples_per_packet,
                reason.flag(),
            )
        })
    }

    fn set_rf(&self, frequency: u32) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_SetRf(frequency as c_double, 1, 0) })
    }

    fn set_gain_reduction(&self, grdb: i32, lna_state: u8) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_RSP_SetGr(grdb, lna_state as c_int, 1, 0) })
    }

    fn set_agc(&self, mode: AgcMode, set_point_dbfs: i32, lna_state: u8) -> Result<(), SdkError> {
        SdkError::check(unsafe {
            mir_sdr_AgcControl(agc_flag(mode), set_point_dbfs, 0, 0, 0, 0, lna_state as c_int)
        })
    }

    fn set_ppm(&self, ppm: f64) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_SetPpm(ppm) })
    }

    fn stream_uninit(&self) -> Result<(), SdkError> {
        SdkError::check(unsafe { mir_sdr_StreamUninit() })?;
        if let Some(StreamContext(ctx)) = self.context.lock().take() {
            drop(unsafe { Box::from_raw(ctx) });
        }
        Ok(())
    }
}

impl Drop for MirSdr {
    fn drop(&mut self) {
        if self.context.lock().is_some() {
            if let Err(e) = self.stream_uninit() {
                log::error!("Error {} on StreamUninit at shutdown", e);
            }
        }
    }
}
