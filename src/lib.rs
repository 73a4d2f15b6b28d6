
pub mod band;
pub mod convert;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod gains;
pub mod queue;
pub mod sdk;
pub mod sim;
pub mod utils;

#[cfg(feature = "mirsdr")]
pub mod capi;
#[cfg(feature = "mirsdr")]
pub mod mirsdr;

pub use device::{Device, TunerType};
pub use engine::EngineState;
pub use error::Error;
pub use sdk::{Bandwidth, DeviceInfo, Sdk, SdkError};

pub const KHZ: u32 = 1_000;
pub const MHZ: u32 = 1_000_000;

/// IF gain reduction limits in dB accepted by the RSP tuners.
pub const MIN_GRDB: i32 = 20;
pub const MAX_GRDB: i32 = 59;
