//! librtlsdr-compatible C entry points, so the cdylib can replace `librtlsdr.so`.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{CStr, CString, c_char, c_int, c_uchar, c_void};
use std::ptr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::{
    convert::in_delivery,
    device::Device,
    enumerate::{self, UsbStrings},
    error::Error,
    mirsdr::MirSdr,
    sdk::SdkError,
};

/// Size of each string buffer the usb string calls write into.
pub const USB_STRING_LEN: usize = 256;

/// Opaque handle handed out by `rtlsdr_open`.
///
/// `rtlsdr_read_async` runs on its own clone of the device, so closing the
/// handle never frees a device a reader thread is still inside.
pub struct RtlsdrDev {
    device: Arc<Device<MirSdr>>,
}

pub type RtlsdrReadAsyncCb =
    Option<unsafe extern "C" fn(buf: *mut c_uchar, len: u32, ctx: *mut c_void)>;

static SDK: OnceLock<Result<Arc<MirSdr>, SdkError>> = OnceLock::new();
static NAMES: Mutex<Vec<&'static CStr>> = parking_lot::const_mutex(Vec::new());
static BLANK: &CStr = c" ";

fn sdk() -> Option<Arc<MirSdr>> {
    match SDK.get_or_init(|| MirSdr::new().map(Arc::new)) {
        Ok(sdk) => Some(sdk.clone()),
        Err(e) => {
            log::error!("sdrplay library unavailable: {}", e);
            None
        }
    }
}

fn status(result: Result<(), Error>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("{}", e);
            -1
        }
    }
}

/// Names are handed out as `const char*` with no release call, so keep one
/// copy of each distinct name for the life of the process.
fn intern(name: &str) -> *const c_char {
    let Ok(name) = CString::new(name) else {
        return BLANK.as_ptr();
    };
    let mut names = NAMES.lock();
    if let Some(known) = names.iter().find(|n| n.to_bytes() == name.as_bytes()) {
        return known.as_ptr();
    }
    let leaked: &'static CStr = Box::leak(name.into_boxed_c_str());
    names.push(leaked);
    leaked.as_ptr()
}

unsafe fn copy_out(s: &str, out: *mut c_char) {
    if out.is_null() {
        return;
    }
    let bytes = s.as_bytes();
    let n = bytes.len().min(USB_STRING_LEN - 1);
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, out, n);
        *out.add(n) = 0;
    }
}

unsafe fn write_usb_strings(strings: &UsbStrings, m: *mut c_char, p: *mut c_char, s: *mut c_char) {
    unsafe {
        copy_out(&strings.manufacturer, m);
        copy_out(&strings.product, p);
        copy_out(&strings.serial, s);
    }
}

unsafe fn dev_ref<'a>(dev: *mut RtlsdrDev) -> Option<&'a Device<MirSdr>> {
    unsafe { dev.as_ref() }.map(|d| d.device.as_ref())
}

macro_rules! with_dev {
    ($dev:expr, $fail:expr, |$d:ident| $body:expr) => {
        match unsafe { dev_ref($dev) } {
            Some($d) => $body,
            None => $fail,
        }
    };
}

/// C callback plus its context pointer, carried onto the delivery thread.
struct CCallback {
    cb: unsafe extern "C" fn(*mut c_uchar, u32, *mut c_void),
    ctx: *mut c_void,
}

// librtlsdr clients expect the callback on a foreign thread
unsafe impl Send for CCallback {}

impl CCallback {
    fn call(&self, buf: &[u8]) {
        unsafe { (self.cb)(buf.as_ptr() as *mut c_uchar, buf.len() as u32, self.ctx) }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rtlsdr_get_device_count() -> u32 {
    sdk().map_or(0, |sdk| enumerate::device_count(sdk.as_ref()))
}

#[unsafe(no_mangle)]
pub extern "C" fn rtlsdr_get_device_name(index: u32) -> *const c_char {
    let Some(sdk) = sdk() else {
        return BLANK.as_ptr();
    };
    match enumerate::device_name(sdk.as_ref(), index) {
        Ok(name) => intern(&name),
        Err(_) => BLANK.as_ptr(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_device_usb_strings(
    index: u32,
    manufacturer: *mut c_char,
    product: *mut c_char,
    serial: *mut c_char,
) -> c_int {
    let Some(sdk) = sdk() else {
        return -1;
    };
    match enumerate::device_usb_strings(sdk.as_ref(), index) {
        Ok(strings) => {
            unsafe { write_usb_strings(&strings, manufacturer, product, serial) };
            0
        }
        Err(_) => -1,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_index_by_serial(serial: *const c_char) -> c_int {
    if serial.is_null() {
        return -1;
    }
    let Some(sdk) = sdk() else {
        return -2;
    };
    let serial = unsafe { CStr::from_ptr(serial) }.to_string_lossy();
    match enumerate::index_by_serial(sdk.as_ref(), &serial) {
        Ok(index) => index as c_int,
        Err(Error::NoDevice) => -2,
        Err(_) => -3,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_open(dev: *mut *mut RtlsdrDev, index: u32) -> c_int {
    if dev.is_null() {
        return -1;
    }
    let Some(sdk) = sdk() else {
        return -1;
    };
    match Device::open(sdk, index) {
        Ok(device) => {
            unsafe { *dev = Box::into_raw(Box::new(RtlsdrDev {
                device: Arc::new(device),
            })) };
            0
        }
        Err(e) => {
            log::error!("open failed: {}", e);
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_close(dev: *mut RtlsdrDev) -> c_int {
    if dev.is_null() {
        return -1;
    }
    if in_delivery() {
        log::error!("rtlsdr_close called from inside the read callback");
        return -1;
    }
    let dev = unsafe { Box::from_raw(dev) };
    status(dev.device.shutdown(None))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_usb_strings(
    dev: *mut RtlsdrDev,
    manufacturer: *mut c_char,
    product: *mut c_char,
    serial: *mut c_char,
) -> c_int {
    with_dev!(dev, -1, |d| {
        let info = d.info();
        let strings = UsbStrings {
            manufacturer: enumerate::MANUFACTURER.to_string(),
            product: info.name.clone(),
            serial: info.serial.clone(),
        };
        unsafe { write_usb_strings(&strings, manufacturer, product, serial) };
        0
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_center_freq(dev: *mut RtlsdrDev, freq: u32) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_center_freq(freq)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_center_freq(dev: *mut RtlsdrDev) -> u32 {
    with_dev!(dev, 0, |d| d.get_center_freq())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_freq_correction(dev: *mut RtlsdrDev, ppm: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_freq_correction(ppm)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_freq_correction(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, -1, |d| d.get_freq_correction())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_tuner_type(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, 0, |d| d.get_tuner_type().0 as c_int)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_tuner_gains(dev: *mut RtlsdrDev, gains: *mut c_int) -> c_int {
    with_dev!(dev, -1, |d| {
        let table = d.get_tuner_gains();
        if !gains.is_null() {
            unsafe { ptr::copy_nonoverlapping(table.as_ptr(), gains, table.len()) };
        }
        table.len() as c_int
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_tuner_gain(dev: *mut RtlsdrDev, gain: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_tuner_gain(gain)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_tuner_gain(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, 0, |d| d.get_tuner_gain())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_tuner_bandwidth(dev: *mut RtlsdrDev, bw: u32) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_tuner_bandwidth(bw)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_tuner_if_gain(
    dev: *mut RtlsdrDev,
    stage: c_int,
    gain: c_int,
) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_tuner_if_gain(stage, gain)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_tuner_gain_mode(dev: *mut RtlsdrDev, manual: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_tuner_gain_mode(manual != 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_sample_rate(dev: *mut RtlsdrDev, rate: u32) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_sample_rate(rate)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_sample_rate(dev: *mut RtlsdrDev) -> u32 {
    with_dev!(dev, 0, |d| d.get_sample_rate())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_testmode(dev: *mut RtlsdrDev, on: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_testmode(on != 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_agc_mode(dev: *mut RtlsdrDev, on: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_agc_mode(on != 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_direct_sampling(dev: *mut RtlsdrDev, on: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_direct_sampling(on)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_direct_sampling(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, -1, |d| d.get_direct_sampling().unwrap_or(-1))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_offset_tuning(dev: *mut RtlsdrDev, on: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_offset_tuning(on != 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_offset_tuning(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, -1, |d| d.get_offset_tuning().map_or(-1, |on| on as c_int))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_bias_tee(dev: *mut RtlsdrDev, on: c_int) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_bias_tee(on != 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_set_xtal_freq(
    dev: *mut RtlsdrDev,
    rtl_freq: u32,
    tuner_freq: u32,
) -> c_int {
    with_dev!(dev, -1, |d| status(d.set_xtal_freq(rtl_freq, tuner_freq)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_get_xtal_freq(
    dev: *mut RtlsdrDev,
    _rtl_freq: *mut u32,
    _tuner_freq: *mut u32,
) -> c_int {
    with_dev!(dev, -1, |d| d.get_xtal_freq().map_or(-1, |_| 0))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_write_eeprom(
    dev: *mut RtlsdrDev,
    _data: *mut u8,
    offset: u8,
    _len: u16,
) -> c_int {
    with_dev!(dev, -1, |d| d.write_eeprom(offset, &[]).map_or(-3, |_| 0))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_read_eeprom(
    dev: *mut RtlsdrDev,
    _data: *mut u8,
    offset: u8,
    _len: u16,
) -> c_int {
    with_dev!(dev, -1, |d| d.read_eeprom(offset, &mut []).map_or(-3, |_| 0))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_reset_buffer(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, -1, |d| status(d.reset_buffer()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_read_sync(
    dev: *mut RtlsdrDev,
    _buf: *mut c_void,
    _len: c_int,
    n_read: *mut c_int,
) -> c_int {
    if !n_read.is_null() {
        unsafe { *n_read = 0 };
    }
    with_dev!(dev, -1, |d| d.read_sync(&mut []).map_or(-1, |n| n as c_int))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_wait_async(
    dev: *mut RtlsdrDev,
    _cb: RtlsdrReadAsyncCb,
    _ctx: *mut c_void,
) -> c_int {
    with_dev!(dev, -1, |d| status(d.wait_async(|_: &[u8]| {}, 0, 0)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_read_async(
    dev: *mut RtlsdrDev,
    cb: RtlsdrReadAsyncCb,
    ctx: *mut c_void,
    buf_num: u32,
    buf_len: u32,
) -> c_int {
    let Some(cb) = cb else {
        return -1;
    };
    let callback = CCallback { cb, ctx };
    let Some(device) = (unsafe { dev.as_ref() }).map(|d| d.device.clone()) else {
        return -1;
    };
    status(device.read_async(
        move |buf: &[u8]| callback.call(buf),
        buf_num,
        buf_len,
    ))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtlsdr_cancel_async(dev: *mut RtlsdrDev) -> c_int {
    with_dev!(dev, -1, |d| status(d.cancel_async(None)))
}
