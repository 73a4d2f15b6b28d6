use crate::sdk::SdkError;

/// Errors returned by the control plane of a [`crate::device::Device`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no RSP device found")]
    NoDevice,
    #[error("device index {index} out of range, found {count}")]
    InvalidIndex { index: u32, count: usize },
    #[error("a stream is already running on this device")]
    AlreadyStreaming,
    #[error("sample rate {rate} Hz too low, need at least 1 MHz")]
    RateTooLow { rate: u32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("operation not supported")]
    Unsupported,
    #[error("stream did not stop in time")]
    CancelTimeout,
    #[error("device is closed")]
    Closed,
    #[error("sdrplay error: {function} returned {err}")]
    Sdk {
        function: &'static str,
        err: SdkError,
    },
}

impl Error {
    pub(crate) fn sdk(function: &'static str, err: SdkError) -> Self {
        Self::Sdk { function, err }
    }
}
