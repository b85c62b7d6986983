//! Views and parameter buffer bound to the kernels.
//!
//! One source SRV, one destination UAV and one constant buffer are cached
//! across dispatches. The views are recreated whenever the textures, their
//! formats or the image size change, and the constant buffer is only written
//! when its contents differ from the last upload.

use dx_interop::DxgiFormat;

/// Everything the cached views depend on.
///
/// Textures are identified by their COM pointer. The views hold a reference
/// to their texture, so an address cannot be reused while the key is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub dest: usize,
    pub source: Option<usize>,
    pub dest_format: DxgiFormat,
    pub source_format: DxgiFormat,
    pub width: u32,
    pub height: u32,
}

impl BindingKey {
    /// Whether views built for `previous` can be reused for `self`.
    pub fn reuses(&self, previous: Option<&BindingKey>) -> bool {
        previous == Some(self)
    }
}

#[cfg(target_os = "windows")]
pub use self::dx11::ResourceBindings;

#[cfg(target_os = "windows")]
mod dx11 {
    use windows::core::Interface;
    use windows::Win32::Graphics::Direct3D::D3D_SRV_DIMENSION_TEXTURE2D;
    use windows::Win32::Graphics::Direct3D11::*;

    use tracing::{debug, warn};

    use dx_interop::dx11::create_dynamic_cbuf;
    use dx_interop::{DxgiFormat, TextureDescriptor};

    use super::BindingKey;
    use crate::error::ShaderResult;
    use crate::params::{ParamSnapshot, ShaderParams};

    /// Cached SRV, UAV and constant buffer for the compute kernels.
    #[derive(Default)]
    pub struct ResourceBindings {
        srv: Option<ID3D11ShaderResourceView>,
        uav: Option<ID3D11UnorderedAccessView>,
        params: Option<ID3D11Buffer>,
        snapshot: ParamSnapshot,
        key: Option<BindingKey>,
        uploads: u64,
    }

    impl ResourceBindings {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the views and parameters current for a dispatch.
        ///
        /// A `source_format` of `UNKNOWN` views the source in its own format.
        /// The destination format must be explicit. View creation failures are
        /// logged and leave the view unset, so the next call retries; callers
        /// check [`srv`](Self::srv) and [`uav`](Self::uav) before dispatching.
        #[allow(clippy::too_many_arguments)]
        pub fn ensure(
            &mut self,
            device: &ID3D11Device,
            context: &ID3D11DeviceContext,
            dest: &ID3D11Texture2D,
            source: Option<&ID3D11Texture2D>,
            dest_format: DxgiFormat,
            source_format: DxgiFormat,
            width: u32,
            height: u32,
            values: [f32; 4],
        ) -> ShaderResult<()> {
            let key = BindingKey {
                dest: dest.as_raw() as usize,
                source: source.map(|s| s.as_raw() as usize),
                dest_format,
                source_format,
                width,
                height,
            };
            if !key.reuses(self.key.as_ref()) {
                if self.key.is_some() {
                    debug!("Texture bindings changed, recreating views");
                }
                self.srv = None;
                self.uav = None;
                self.key = Some(key);
            }

            if self.srv.is_none() {
                if let Some(source) = source {
                    self.srv = create_srv(device, source, source_format);
                }
            }
            if self.uav.is_none() {
                self.uav = create_uav(device, dest, dest_format);
            }

            let buffer = match &self.params {
                Some(buffer) => buffer.clone(),
                None => {
                    let buffer =
                        create_dynamic_cbuf(device, std::mem::size_of::<ShaderParams>())?;
                    self.params = Some(buffer.clone());
                    buffer
                }
            };

            let params = ShaderParams::new(values, width, height);
            if self.snapshot.needs_upload(&params) {
                if write_buffer(context, &buffer, params.as_bytes()) {
                    self.uploads += 1;
                } else {
                    // Retry the upload on the next dispatch.
                    self.snapshot.reset();
                }
            }
            Ok(())
        }

        /// Rebind to a new texture pair, taking formats and size from the
        /// textures themselves.
        pub fn update(
            &mut self,
            device: &ID3D11Device,
            context: &ID3D11DeviceContext,
            dest: &ID3D11Texture2D,
            source: &ID3D11Texture2D,
        ) -> ShaderResult<()> {
            self.release();
            let dst = TextureDescriptor::of(dest);
            let src = TextureDescriptor::of(source);
            self.ensure(
                device,
                context,
                dest,
                Some(source),
                dst.format,
                src.format,
                src.width,
                src.height,
                [0.0; 4],
            )
        }

        /// Drop views and buffer. The next [`ensure`](Self::ensure) recreates
        /// everything and uploads the parameters.
        pub fn release(&mut self) {
            self.srv = None;
            self.uav = None;
            self.params = None;
            self.key = None;
            self.snapshot.reset();
        }

        pub fn srv(&self) -> Option<&ID3D11ShaderResourceView> {
            self.srv.as_ref()
        }

        pub fn uav(&self) -> Option<&ID3D11UnorderedAccessView> {
            self.uav.as_ref()
        }

        pub fn params(&self) -> Option<&ID3D11Buffer> {
            self.params.as_ref()
        }

        /// Constant buffer writes performed so far.
        pub fn upload_count(&self) -> u64 {
            self.uploads
        }
    }

    fn create_srv(
        device: &ID3D11Device,
        texture: &ID3D11Texture2D,
        format: DxgiFormat,
    ) -> Option<ID3D11ShaderResourceView> {
        let format = if format == DxgiFormat::UNKNOWN {
            TextureDescriptor::of(texture).format
        } else {
            format
        };
        let desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: format.into(),
            ViewDimension: D3D_SRV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                },
            },
        };
        let mut srv: Option<ID3D11ShaderResourceView> = None;
        if let Err(e) = unsafe {
            device.CreateShaderResourceView(texture, Some(&desc), Some(&mut srv as *mut _))
        } {
            warn!("Failed to create source view ({format}): {e}");
        }
        srv
    }

    fn create_uav(
        device: &ID3D11Device,
        texture: &ID3D11Texture2D,
        format: DxgiFormat,
    ) -> Option<ID3D11UnorderedAccessView> {
        let desc = D3D11_UNORDERED_ACCESS_VIEW_DESC {
            Format: format.into(),
            ViewDimension: D3D11_UAV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_UAV { MipSlice: 0 },
            },
        };
        let mut uav: Option<ID3D11UnorderedAccessView> = None;
        if let Err(e) = unsafe {
            device.CreateUnorderedAccessView(texture, Some(&desc), Some(&mut uav as *mut _))
        } {
            warn!("Failed to create destination view ({format}): {e}");
        }
        uav
    }

    /// Map a dynamic constant buffer, copy `data` in and unmap.
    fn write_buffer(context: &ID3D11DeviceContext, buffer: &ID3D11Buffer, data: &[u8]) -> bool {
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            if let Err(e) = context.Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped)) {
                warn!("Failed to map shader parameters: {e}");
                return false;
            }
            if mapped.pData.is_null() {
                context.Unmap(buffer, 0);
                return false;
            }
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.pData as *mut u8, data.len());
            context.Unmap(buffer, 0);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BindingKey {
        BindingKey {
            dest: 0x1000,
            source: Some(0x2000),
            dest_format: DxgiFormat::B8G8R8A8_UNORM,
            source_format: DxgiFormat::UNKNOWN,
            width: 1280,
            height: 720,
        }
    }

    #[test]
    fn first_use_never_reuses() {
        assert!(!key().reuses(None));
        assert!(key().reuses(Some(&key())));
    }

    #[test]
    fn any_field_change_invalidates() {
        let base = key();
        let variants = [
            BindingKey { dest: 0x1001, ..base },
            BindingKey { source: None, ..base },
            BindingKey { source: Some(0x3000), ..base },
            BindingKey {
                dest_format: DxgiFormat::R8G8B8A8_UNORM,
                ..base
            },
            BindingKey {
                source_format: DxgiFormat::R16G16B16A16_FLOAT,
                ..base
            },
            BindingKey { width: 1281, ..base },
            BindingKey { height: 721, ..base },
        ];
        for v in variants {
            assert!(!v.reuses(Some(&base)), "{v:?}");
        }
    }
}
