//! Hardware error types

/// A failed SDK call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HwError {
    /// The SDK returned a failure HRESULT
    #[error("{call}() failed with error code {code:#010x}")]
    Call { call: &'static str, code: u32 },

    /// The SDK could not open the requested device
    #[error("Unable to open camera '{0}'")]
    OpenFailed(String),

    /// The handle is no longer valid (closed, or the device is gone)
    #[error("Invalid camera handle")]
    InvalidHandle,

    /// The SDK library is missing or incomplete
    #[error("SDK not loaded: {0}")]
    SdkNotLoaded(String),
}

impl HwError {
    pub fn call(call: &'static str, code: i32) -> Self {
        Self::Call {
            call,
            code: code as u32,
        }
    }
}

pub type HwResult<T> = Result<T, HwError>;

/// Maps an SDK HRESULT to a result. Negative values are failures.
pub fn check(call: &'static str, result: i32) -> HwResult<()> {
    if result < 0 {
        Err(HwError::call(call, result))
    } else {
        Ok(())
    }
}
