//! Errors raised by device and texture management.

use thiserror::Error;

/// Failures of device creation, texture allocation and shared-handle access.
#[derive(Error, Debug)]
pub enum InteropError {
    #[error("no D3D11 driver type / feature level combination could create a device")]
    DeviceUnavailable,

    #[error("D3D11 device has not been opened")]
    NoDevice,

    #[error("invalid texture dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("failed to create {what}: {code} (0x{hresult:08X})")]
    ResourceCreation {
        what: &'static str,
        code: &'static str,
        hresult: u32,
    },

    #[error("shared handle {handle:#x} could not be opened: {reason}")]
    SharedHandle { handle: usize, reason: String },
}

pub type InteropResult<T> = Result<T, InteropError>;

/// Symbolic name of the HRESULTs texture creation commonly fails with.
pub fn hresult_name(hresult: u32) -> &'static str {
    match hresult {
        0x887A_0001 => "DXGI_ERROR_INVALID_CALL",
        0x8007_0057 => "E_INVALIDARG",
        0x8007_000E => "E_OUTOFMEMORY",
        0x887A_0005 => "DXGI_ERROR_DEVICE_REMOVED",
        _ => "unlisted error",
    }
}

#[cfg(target_os = "windows")]
impl InteropError {
    pub(crate) fn creation(what: &'static str, err: &windows::core::Error) -> Self {
        let hresult = err.code().0 as u32;
        Self::ResourceCreation {
            what,
            code: hresult_name(hresult),
            hresult,
        }
    }
}
