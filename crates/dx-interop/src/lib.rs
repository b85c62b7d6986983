//! D3D11 device and texture plumbing shared by the compute engine and the
//! DX9 bridge.
//!
//! Texture descriptors and DXGI format codes are plain data and build on every
//! platform. Everything that touches a device lives in [`dx11`], which only
//! exists on Windows.

pub mod error;
pub mod format;

pub use error::{InteropError, InteropResult};
pub use format::{DxgiFormat, TextureDescriptor};

#[cfg(target_os = "windows")]
pub mod dx11;
