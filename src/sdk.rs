//! The slice of the RSP vendor API the bridge drives.
//!
//! Everything the core needs from the receiver goes through [`Sdk`], so the
//! real library ([`crate::mirsdr`]), the simulator ([`crate::sim`]) and test
//! doubles are interchangeable.

use crate::KHZ;

/// IF filter bandwidth classes offered by the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bandwidth {
    Bw200k,
    Bw300k,
    Bw600k,
    Bw1536k,
    Bw5000k,
}

impl Bandwidth {
    /// Narrowest class that passes `hz`.
    pub fn for_hz(hz: u32) -> Bandwidth {
        if hz <= 200 * KHZ {
            Bandwidth::Bw200k
        } else if hz <= 300 * KHZ {
            Bandwidth::Bw300k
        } else if hz <= 600 * KHZ {
            Bandwidth::Bw600k
        } else if hz <= 1536 * KHZ {
            Bandwidth::Bw1536k
        } else {
            Bandwidth::Bw5000k
        }
    }

    /// Width in kHz; also the vendor's enum value.
    pub fn khz(&self) -> u32 {
        match self {
            Bandwidth::Bw200k => 200,
            Bandwidth::Bw300k => 300,
            Bandwidth::Bw600k => 600,
            Bandwidth::Bw1536k => 1536,
            Bandwidth::Bw5000k => 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReinitReason {
    SampleRate,
    RfFrequency,
    Bandwidth,
}

impl ReinitReason {
    /// Bit value of the vendor's reason-for-reinit flags.
    pub fn flag(&self) -> i32 {
        match self {
            ReinitReason::SampleRate => 0x02,
            ReinitReason::RfFrequency => 0x04,
            ReinitReason::Bandwidth => 0x08,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcMode {
    Disabled,
    Loop100Hz,
}

impl AgcMode {
    pub fn from_flag(on: bool) -> AgcMode {
        if on { AgcMode::Loop100Hz } else { AgcMode::Disabled }
    }
}

/// Everything stream init and reinit take in one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub grdb: i32,
    pub sample_rate: u32,
    pub frequency: u32,
    pub bandwidth: Bandwidth,
    pub lna_state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub hw_ver: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    #[error("Fail")]
    Fail,
    #[error("invalidParam")]
    InvalidParam,
    #[error("OutOfRange")]
    OutOfRange,
    #[error("GainUpdateError")]
    GainUpdateError,
    #[error("RfUpdateError")]
    RfUpdateError,
    #[error("FsUpdateError")]
    FsUpdateError,
    #[error("HwError")]
    HwError,
    #[error("AliasingError")]
    AliasingError,
    #[error("AlreadyInitialised")]
    AlreadyInitialised,
    #[error("NotInitialised")]
    NotInitialised,
    #[error("NotEnabled")]
    NotEnabled,
    #[error("HwVerError")]
    HwVerError,
    #[error("OutOfMemError")]
    OutOfMemError,
    #[error("HwRemoved")]
    HwRemoved,
    #[error("??? ({0})")]
    Unknown(i32),
}

impl SdkError {
    /// Turns a vendor return code into a result; 0 is success.
    pub fn check(code: i32) -> Result<(), SdkError> {
        Err(match code {
            0 => return Ok(()),
            1 => SdkError::Fail,
            2 => SdkError::InvalidParam,
            3 => SdkError::OutOfRange,
            4 => SdkError::GainUpdateError,
            5 => SdkError::RfUpdateError,
            6 => SdkError::FsUpdateError,
            7 => SdkError::HwError,
            8 => SdkError::AliasingError,
            9 => SdkError::AlreadyInitialised,
            10 => SdkError::NotInitialised,
            11 => SdkError::NotEnabled,
            12 => SdkError::HwVerError,
            13 => SdkError::OutOfMemError,
            14 => SdkError::HwRemoved,
            other => SdkError::Unknown(other),
        })
    }
}

/// Receives every block of raw I and Q samples, on the SDK's own thread.
pub type DeliveryFn = Box<dyn FnMut(&[i16], &[i16]) + Send + 'static>;

pub trait Sdk: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>, SdkError>;

    fn select_device(&self, index: u32) -> Result<(), SdkError>;

    fn release_device(&self) -> Result<(), SdkError>;

    fn stream_init(&self, params: &StreamParams, delivery: DeliveryFn) -> Result<(), SdkError>;

    fn reinit(&self, params: &StreamParams, reason: ReinitReason) -> Result<(), SdkError>;

    /// In-band retune; fails if `frequency` leaves the current RF band.
    fn set_rf(&self, frequency: u32) -> Result<(), SdkError>;

    fn set_gain_reduction(&self, grdb: i32, lna_state: u8) -> Result<(), SdkError>;

    fn set_agc(&self, mode: AgcMode, set_point_dbfs: i32, lna_state: u8) -> Result<(), SdkError>;

    fn set_ppm(&self, ppm: f64) -> Result<(), SdkError>;

    fn stream_uninit(&self) -> Result<(), SdkError>;
}
