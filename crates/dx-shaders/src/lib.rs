//! GPU image operations on Direct3D 11 and the DX11 to DX9 texture bridge.
//!
//! # Overview
//!
//! - [`Operation`] names a fixed compute kernel; the HLSL sources live in
//!   `shaders/` and are compiled on first use.
//! - `ComputeShaders` dispatches those kernels on a D3D11 device, caching
//!   views, parameters and programs between frames.
//! - `Dx9Bridge` hands DX9 consumers a BGRA copy of any DX11 shared
//!   texture, throttled by [`throttle::Throttle`] when the GPU is overloaded.
//! - [`reference`] holds CPU versions of every kernel.
//!
//! The registry, parameter handling, throttle and bridge bookkeeping are
//! plain Rust and build everywhere. Types that touch a device are only
//! available on Windows.

pub mod bindings;
pub mod bridge;
pub mod error;
pub mod kernels;
pub mod params;
pub mod reference;
pub mod throttle;

#[cfg(target_os = "windows")]
pub mod dispatch;
#[cfg(target_os = "windows")]
pub mod programs;
#[cfg(target_os = "windows")]
pub mod timer;
#[cfg(target_os = "windows")]
pub mod usage;

pub use bindings::BindingKey;
pub use bridge::BridgeState;
pub use error::{ShaderError, ShaderResult};
pub use kernels::{dispatch_groups, Operation, THREAD_GROUP_SIZE};
pub use params::{ParamSnapshot, ShaderParams};
pub use throttle::{GpuTimer, Throttle, ThrottleConfig, TimerReading, UsageSampler};

#[cfg(target_os = "windows")]
pub use bindings::ResourceBindings;
#[cfg(target_os = "windows")]
pub use bridge::Dx9Bridge;
#[cfg(target_os = "windows")]
pub use dispatch::ComputeShaders;
