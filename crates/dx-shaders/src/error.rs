//! Errors returned by dispatches and the DX9 bridge.

use dx_interop::{DxgiFormat, InteropError};
use thiserror::Error;

use crate::kernels::Operation;

/// Why a dispatch or bridge call produced no output this frame.
///
/// Every failure is local to the call. Nothing is retried internally; the
/// caller tries again on a later frame.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("no D3D11 device could be created")]
    DeviceUnavailable,

    #[error("D3D11 device has not been opened")]
    NoDevice,

    #[error("format {0} does not support typed unordered-access stores")]
    UnsupportedFormat(DxgiFormat),

    #[error("{operation} kernel failed to compile: {message}")]
    ShaderCompile {
        operation: Operation,
        message: String,
    },

    #[error("shared handle {handle:#x} could not be opened: {reason}")]
    SharedHandle { handle: usize, reason: String },

    #[error("failed to create {what}: {code} (0x{hresult:08X})")]
    ResourceCreation {
        what: &'static str,
        code: &'static str,
        hresult: u32,
    },

    #[error("{0} kernel needs a source texture")]
    MissingSource(Operation),

    #[error("dispatch bypassed while GPU load is high")]
    Bypassed,

    #[error("invalid texture dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),
}

pub type ShaderResult<T> = Result<T, ShaderError>;

impl From<InteropError> for ShaderError {
    fn from(err: InteropError) -> Self {
        match err {
            InteropError::DeviceUnavailable => Self::DeviceUnavailable,
            InteropError::NoDevice => Self::NoDevice,
            InteropError::InvalidDimensions(w, h) => Self::InvalidDimensions(w, h),
            InteropError::ResourceCreation {
                what,
                code,
                hresult,
            } => Self::ResourceCreation {
                what,
                code,
                hresult,
            },
            InteropError::SharedHandle { handle, reason } => Self::SharedHandle { handle, reason },
        }
    }
}
