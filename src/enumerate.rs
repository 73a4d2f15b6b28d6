//! Device lookup without opening anything.

use crate::{error::Error, sdk::Sdk};

pub const MANUFACTURER: &str = "sdrplay.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

/// Number of attached receivers; an SDK failure counts as none.
pub fn device_count<S: Sdk>(sdk: &S) -> u32 {
    match sdk.devices() {
        Ok(devices) => devices.len() as u32,
        Err(e) => {
            log::warn!("Error {} enumerating devices", e);
            0
        }
    }
}

pub fn device_name<S: Sdk>(sdk: &S, index: u32) -> Result<String, Error> {
    let devices = sdk.devices().map_err(|e| Error::sdk("get_devices", e))?;
    devices
        .get(index as usize)
        .map(|d| d.name.clone())
        .ok_or(Error::InvalidIndex {
            index,
            count: devices.len(),
        })
}

pub fn device_usb_strings<S: Sdk>(sdk: &S, index: u32) -> Result<UsbStrings, Error> {
    let devices = sdk.devices().map_err(|e| Error::sdk("get_devices", e))?;
    let dev = devices.get(index as usize).ok_or(Error::InvalidIndex {
        index,
        count: devices.len(),
    })?;
    Ok(UsbStrings {
        manufacturer: MANUFACTURER.to_string(),
        product: dev.name.clone(),
        serial: dev.serial.clone(),
    })
}

pub fn index_by_serial<S: Sdk>(sdk: &S, serial: &str) -> Result<u32, Error> {
    let devices = sdk.devices().map_err(|e| Error::sdk("get_devices", e))?;
    if devices.is_empty() {
        return Err(Error::NoDevice);
    }
    devices
        .iter()
        .position(|d| d.serial == serial)
        .map(|i| i as u32)
        .ok_or(Error::InvalidArgument("no device with that serial"))
}
