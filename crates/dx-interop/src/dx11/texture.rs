//! Texture allocation and shared-handle access.

use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIResource;

use tracing::{debug, error, warn};

use crate::error::{InteropError, InteropResult};
use crate::format::{DxgiFormat, TextureDescriptor};

/// Usage and flag set for a new texture.
#[derive(Clone, Copy, Debug)]
pub struct TextureUsage {
    pub usage: D3D11_USAGE,
    pub cpu_access: u32,
    pub bind: u32,
    pub misc: u32,
}

impl TextureUsage {
    /// GPU-only texture that compute shaders write, DX9 reads through a
    /// legacy shared handle, and can be bound as a render target.
    pub fn shared_compute() -> Self {
        Self {
            usage: D3D11_USAGE_DEFAULT,
            cpu_access: 0,
            bind: (D3D11_BIND_SHADER_RESOURCE.0
                | D3D11_BIND_UNORDERED_ACCESS.0
                | D3D11_BIND_RENDER_TARGET.0) as u32,
            misc: D3D11_RESOURCE_MISC_SHARED.0 as u32,
        }
    }

    /// Unshared texture usable as both shader input and compute output.
    pub fn compute() -> Self {
        Self {
            usage: D3D11_USAGE_DEFAULT,
            cpu_access: 0,
            bind: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_UNORDERED_ACCESS.0) as u32,
            misc: 0,
        }
    }

    /// CPU-readable copy target.
    pub fn staging() -> Self {
        Self {
            usage: D3D11_USAGE_STAGING,
            cpu_access: D3D11_CPU_ACCESS_READ.0 as u32,
            bind: 0,
            misc: 0,
        }
    }
}

/// Create a single-mip, single-sample 2D texture.
///
/// `UNKNOWN` and the DX9 ARGB/XRGB codes allocate as `B8G8R8A8_UNORM`.
pub fn create_texture(
    device: &ID3D11Device,
    descriptor: TextureDescriptor,
    usage: TextureUsage,
    initial_data: Option<&[u8]>,
) -> InteropResult<ID3D11Texture2D> {
    if descriptor.is_empty() {
        return Err(InteropError::InvalidDimensions(
            descriptor.width,
            descriptor.height,
        ));
    }

    let format = descriptor.format.for_allocation();
    debug!(
        "Creating D3D11 texture {}x{} {}",
        descriptor.width, descriptor.height, format
    );

    let desc = D3D11_TEXTURE2D_DESC {
        Width: descriptor.width,
        Height: descriptor.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: format.into(),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: usage.usage,
        BindFlags: usage.bind,
        CPUAccessFlags: usage.cpu_access,
        MiscFlags: usage.misc,
    };

    let init = initial_data.map(|data| D3D11_SUBRESOURCE_DATA {
        pSysMem: data.as_ptr() as *const _,
        SysMemPitch: descriptor.width * format.bytes_per_pixel().unwrap_or(4),
        SysMemSlicePitch: 0,
    });

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe {
        device.CreateTexture2D(
            &desc,
            init.as_ref().map(|i| i as *const _),
            Some(&mut texture as *mut _),
        )
    }
    .map_err(|e| {
        let err = InteropError::creation("texture", &e);
        error!("{err}");
        err
    })?;

    texture.ok_or(InteropError::ResourceCreation {
        what: "texture",
        code: "null texture",
        hresult: 0,
    })
}

/// Open a texture shared by another device or process.
///
/// Handles created on a different adapter fail here rather than faulting.
pub fn open_shared_texture(device: &ID3D11Device, handle: HANDLE) -> InteropResult<ID3D11Texture2D> {
    if handle.is_invalid() {
        return Err(InteropError::SharedHandle {
            handle: 0,
            reason: "null handle".into(),
        });
    }

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.OpenSharedResource(handle, &mut texture) }.map_err(|e| {
        warn!("OpenSharedResource({:?}) failed: {e}", handle.0);
        InteropError::SharedHandle {
            handle: handle.0 as usize,
            reason: e.message().to_string(),
        }
    })?;
    texture.ok_or(InteropError::SharedHandle {
        handle: handle.0 as usize,
        reason: "OpenSharedResource returned no texture".into(),
    })
}

/// Legacy shared handle of a texture created with `MISC_SHARED`.
pub fn shared_handle(texture: &ID3D11Texture2D) -> InteropResult<HANDLE> {
    let resource: IDXGIResource = texture.cast().map_err(|e| InteropError::SharedHandle {
        handle: 0,
        reason: format!("texture is not a DXGI resource: {e}"),
    })?;
    unsafe { resource.GetSharedHandle() }.map_err(|e| InteropError::SharedHandle {
        handle: 0,
        reason: format!("GetSharedHandle failed: {e}"),
    })
}

/// Whether `format` supports typed unordered-access stores, which every
/// compute kernel needs for its destination.
pub fn supports_typed_uav_store(device: &ID3D11Device, format: DxgiFormat) -> bool {
    let mut support = D3D11_FEATURE_DATA_FORMAT_SUPPORT2 {
        InFormat: format.into(),
        OutFormatSupport2: 0,
    };
    let hr = unsafe {
        device.CheckFeatureSupport(
            D3D11_FEATURE_FORMAT_SUPPORT2,
            &mut support as *mut _ as *mut _,
            std::mem::size_of::<D3D11_FEATURE_DATA_FORMAT_SUPPORT2>() as u32,
        )
    };
    hr.is_ok() && (support.OutFormatSupport2 & D3D11_FORMAT_SUPPORT2_UAV_TYPED_STORE.0 as u32) != 0
}
