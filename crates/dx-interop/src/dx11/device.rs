//! D3D11 device lifecycle.
//!
//! [`DeviceManager`] holds at most one [`Dx11Device`]. The device is either
//! adopted from the application (borrowed: never cleared or flushed by us) or
//! created here (owned: state cleared and the context flushed before release).
//! Consumers such as the compute-shader engine and the DX9 bridge share this
//! one component instead of each managing a device of their own.

use windows::Win32::Foundation::{E_INVALIDARG, HMODULE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;

use tracing::{debug, error};

use crate::error::{InteropError, InteropResult};

/// Driver types tried in order when creating a device.
const DRIVER_TYPES: [D3D_DRIVER_TYPE; 3] = [
    D3D_DRIVER_TYPE_HARDWARE,
    D3D_DRIVER_TYPE_WARP,
    D3D_DRIVER_TYPE_REFERENCE,
];

/// Accepted feature levels, newest first.
const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] = [
    D3D_FEATURE_LEVEL_11_1,
    D3D_FEATURE_LEVEL_11_0,
    D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_10_0,
];

/// A D3D11 device and its immediate context.
pub struct Dx11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    /// True when this crate created the device and is responsible for
    /// clearing and flushing the context on teardown.
    owned: bool,
    feature_level: D3D_FEATURE_LEVEL,
}

impl Dx11Device {
    /// Create a new device, trying hardware, WARP and reference drivers in
    /// that order with feature levels 11.1 down to 10.0.
    ///
    /// Runtimes that predate 11.1 reject the whole level list with
    /// `E_INVALIDARG`; the attempt is then repeated without 11.1.
    pub fn create() -> InteropResult<Self> {
        for &driver_type in &DRIVER_TYPES {
            for levels in [&FEATURE_LEVELS[..], &FEATURE_LEVELS[1..]] {
                let mut device: Option<ID3D11Device> = None;
                let mut context: Option<ID3D11DeviceContext> = None;
                let mut feature_level = D3D_FEATURE_LEVEL::default();

                let hr = unsafe {
                    D3D11CreateDevice(
                        None,
                        driver_type,
                        HMODULE::default(),
                        D3D11_CREATE_DEVICE_FLAG(0),
                        Some(levels),
                        D3D11_SDK_VERSION,
                        Some(&mut device as *mut _),
                        Some(&mut feature_level as *mut _),
                        Some(&mut context as *mut _),
                    )
                };

                match hr {
                    Ok(()) => {
                        if let (Some(device), Some(context)) = (device, context) {
                            debug!(
                                "D3D11 device created with driver type {:?}, feature level {:#x}",
                                driver_type, feature_level.0
                            );
                            return Ok(Self {
                                device,
                                context,
                                owned: true,
                                feature_level,
                            });
                        }
                        break;
                    }
                    Err(e) if e.code() == E_INVALIDARG => continue,
                    Err(_) => break,
                }
            }
        }

        error!("Failed to create D3D11 device with any driver type");
        Err(InteropError::DeviceUnavailable)
    }

    /// Adopt an application device and context. They are never cleared or
    /// flushed by us; dropping this only releases our own references.
    pub fn borrowed(device: &ID3D11Device, context: &ID3D11DeviceContext) -> Self {
        let feature_level = unsafe { device.GetFeatureLevel() };
        Self {
            device: device.clone(),
            context: context.clone(),
            owned: false,
            feature_level,
        }
    }

    /// Borrow the underlying `ID3D11Device`.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Borrow the immediate device context.
    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn feature_level(&self) -> D3D_FEATURE_LEVEL {
        self.feature_level
    }
}

impl Drop for Dx11Device {
    fn drop(&mut self) {
        if self.owned {
            debug!("Releasing D3D11 device {:p}", windows::core::Interface::as_raw(&self.device));
            unsafe {
                self.context.ClearState();
                self.context.Flush();
            }
        }
    }
}

/// Owns or borrows the single device used by a compute engine or bridge.
#[derive(Default)]
pub struct DeviceManager {
    inner: Option<Dx11Device>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise the device.
    ///
    /// With both `device` and `context` supplied they are adopted as borrowed.
    /// Otherwise a device is created. Calling this again on an open manager is
    /// a no-op that succeeds.
    pub fn open(
        &mut self,
        device: Option<&ID3D11Device>,
        context: Option<&ID3D11DeviceContext>,
    ) -> InteropResult<()> {
        if let Some(existing) = &self.inner {
            debug!(
                "D3D11 device {:p} already initialized",
                windows::core::Interface::as_raw(existing.device())
            );
            return Ok(());
        }

        let dev = match (device, context) {
            (Some(device), Some(context)) => {
                debug!("Using application D3D11 device");
                Dx11Device::borrowed(device, context)
            }
            _ => Dx11Device::create()?,
        };
        self.inner = Some(dev);
        Ok(())
    }

    /// Release the device. Owned devices are cleared and flushed first;
    /// borrowed devices are left untouched. No-op when not open.
    pub fn close(&mut self) {
        if self.inner.take().is_none() {
            debug!("D3D11 device already released");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_owned(&self) -> bool {
        self.inner.as_ref().is_some_and(Dx11Device::is_owned)
    }

    /// The open device, or [`InteropError::NoDevice`].
    pub fn get(&self) -> InteropResult<&Dx11Device> {
        self.inner.as_ref().ok_or(InteropError::NoDevice)
    }

    pub fn device(&self) -> Option<&ID3D11Device> {
        self.inner.as_ref().map(Dx11Device::device)
    }

    pub fn context(&self) -> Option<&ID3D11DeviceContext> {
        self.inner.as_ref().map(Dx11Device::context)
    }
}

/// Create a dynamic constant buffer of the given size (rounded up to 16-byte
/// alignment).
pub fn create_dynamic_cbuf(device: &ID3D11Device, size: usize) -> InteropResult<ID3D11Buffer> {
    let aligned_size = (size + 15) & !15;
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: aligned_size as u32,
        Usage: D3D11_USAGE_DYNAMIC,
        BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
        CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
        ..Default::default()
    };
    let mut buf: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, None, Some(&mut buf as *mut _)) }
        .map_err(|e| InteropError::creation("constant buffer", &e))?;
    buf.ok_or(InteropError::ResourceCreation {
        what: "constant buffer",
        code: "null buffer",
        hresult: 0,
    })
}
