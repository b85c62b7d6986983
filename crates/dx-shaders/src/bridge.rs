//! DX11 to DX9 shared texture bridge.
//!
//! A DX9 device can only open shared textures in `B8G8R8A8_UNORM`. When a
//! DX11 producer shares anything else, the bridge copies it into a BGRA
//! texture it owns and hands out that texture's shared handle instead.

use dx_interop::{DxgiFormat, TextureDescriptor};

/// What the bridge remembers between frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgeState {
    /// Raw value of the last producer handle that was opened.
    pub source_handle: Option<usize>,
    pub source: Option<TextureDescriptor>,
    /// Size the BGRA copy texture was allocated at.
    pub copy_size: Option<(u32, u32)>,
    /// Copy through the compute shader even when the producer is BGRA.
    pub force_copy: bool,
}

impl BridgeState {
    /// The producer handle can be handed straight back without opening it.
    pub fn is_passthrough(&self, handle: usize) -> bool {
        !self.force_copy
            && self.source_handle == Some(handle)
            && self
                .source
                .is_some_and(|d| d.format == DxgiFormat::DX9_COMPATIBLE)
    }

    /// Remember an opened producer texture. Returns `true` when its format or
    /// size changed, which invalidates everything built for the old one.
    pub fn record_source(&mut self, handle: usize, descriptor: TextureDescriptor) -> bool {
        self.source_handle = Some(handle);
        let changed = self.source != Some(descriptor);
        if changed {
            self.source = Some(descriptor);
            self.copy_size = None;
        }
        changed
    }

    /// Whether the current producer must be copied for DX9.
    pub fn needs_copy(&self) -> bool {
        self.force_copy
            || self
                .source
                .is_some_and(|d| !d.format.is_dx9_compatible())
    }

    /// Whether the copy texture has to be (re)allocated for this size.
    pub fn needs_copy_texture(&self, width: u32, height: u32) -> bool {
        self.copy_size != Some((width, height))
    }

    pub fn copy_texture_allocated(&mut self, width: u32, height: u32) {
        self.copy_size = Some((width, height));
    }

    pub fn source_format(&self) -> DxgiFormat {
        self.source.map(|d| d.format).unwrap_or_default()
    }
}

#[cfg(target_os = "windows")]
pub use self::dx11::Dx9Bridge;

#[cfg(target_os = "windows")]
mod dx11 {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Graphics::Direct3D11::*;

    use tracing::{debug, error, warn};

    use dx_interop::dx11::{create_texture, open_shared_texture, shared_handle, TextureUsage};
    use dx_interop::{DxgiFormat, TextureDescriptor};

    use super::BridgeState;
    use crate::dispatch::{ComputeShaders, GpuThrottle};
    use crate::error::ShaderError;
    use crate::kernels::Operation;

    /// Converts DX11 shared textures into something a DX9 device can open.
    ///
    /// The bridge creates and owns its own D3D11 device, and throttles its
    /// copy kernel when the GPU is overloaded.
    #[derive(Default)]
    pub struct Dx9Bridge {
        shaders: ComputeShaders,
        state: BridgeState,
        copy_texture: Option<ID3D11Texture2D>,
    }

    impl Dx9Bridge {
        pub fn new() -> Self {
            Self::default()
        }

        /// Return a handle DX9 can open for the producer texture `source`.
        ///
        /// `None` only for a null handle. Otherwise this is either `source`
        /// itself (already BGRA, or the copy was not possible this frame) or
        /// the shared handle of the bridge's BGRA copy.
        pub fn bridge(&mut self, source: HANDLE, width: u32, height: u32) -> Option<HANDLE> {
            if source.is_invalid() {
                return None;
            }
            if !self.open() {
                return Some(source);
            }

            let raw = source.0 as usize;
            if self.state.is_passthrough(raw) {
                return Some(source);
            }

            let Some(device) = self.shaders.device().cloned() else {
                return Some(source);
            };
            let texture = match open_shared_texture(&device, source) {
                Ok(texture) => texture,
                Err(e) => {
                    warn!("Cannot bridge producer texture: {e}");
                    return Some(source);
                }
            };

            let descriptor = TextureDescriptor::of(&texture);
            if self.state.record_source(raw, descriptor) {
                debug!("Producer texture is now {descriptor}");
                self.shaders.release_resources();
                self.copy_texture = None;
            }

            if !self.state.needs_copy() {
                return Some(source);
            }

            let Some(copy) = self.ensure_copy_texture(&device, width, height) else {
                return Some(source);
            };

            match self.shaders.dispatch(
                Operation::Copy,
                &copy,
                Some(&texture),
                DxgiFormat::DX9_COMPATIBLE,
                DxgiFormat::UNKNOWN,
                width,
                height,
                [0.0; 4],
            ) {
                Ok(()) => {}
                Err(ShaderError::Bypassed) => return Some(source),
                Err(e) => {
                    warn!("Bridge copy failed: {e}");
                    return Some(source);
                }
            }

            match shared_handle(&copy) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Bridge copy texture has no shared handle: {e}");
                    Some(source)
                }
            }
        }

        /// Copy every frame through the compute shader, even for BGRA
        /// producers.
        pub fn set_force_copy(&mut self, force: bool) {
            self.state.force_copy = force;
        }

        /// Format of the last producer texture opened.
        pub fn producer_format(&self) -> DxgiFormat {
            self.state.source_format()
        }

        pub fn device(&self) -> Option<&ID3D11Device> {
            self.shaders.device()
        }

        pub fn context(&self) -> Option<&ID3D11DeviceContext> {
            self.shaders.context()
        }

        /// The BGRA texture handed to DX9, when one has been needed.
        pub fn copy_texture(&self) -> Option<&ID3D11Texture2D> {
            self.copy_texture.as_ref()
        }

        pub fn shaders(&self) -> &ComputeShaders {
            &self.shaders
        }

        pub fn state(&self) -> &BridgeState {
            &self.state
        }

        pub fn throttle(&self) -> Option<&GpuThrottle> {
            self.shaders.throttle()
        }

        /// Copy kernel time of the last timing window, in milliseconds.
        pub fn gpu_time_ms(&self) -> f64 {
            self.throttle().map_or(0.0, GpuThrottle::gpu_time_ms)
        }

        pub fn latest_usage(&self) -> f64 {
            self.throttle().map_or(0.0, GpuThrottle::latest_usage)
        }

        pub fn peak_usage(&self) -> f64 {
            self.throttle().map_or(0.0, GpuThrottle::peak_usage)
        }

        pub fn recovery_usage(&self) -> f64 {
            self.throttle().map_or(0.0, GpuThrottle::recovery_usage)
        }

        /// Release the copy texture, the shader resources and the device.
        pub fn close(&mut self) {
            self.copy_texture = None;
            self.state = BridgeState {
                force_copy: self.state.force_copy,
                ..BridgeState::default()
            };
            self.shaders.close();
        }

        fn open(&mut self) -> bool {
            if self.shaders.is_open() {
                return true;
            }
            if let Err(e) = self.shaders.open(None, None) {
                error!("Bridge device unavailable: {e}");
                return false;
            }
            if let Err(e) = self.shaders.enable_throttle() {
                warn!("GPU throttle unavailable: {e}");
            }
            true
        }

        fn ensure_copy_texture(
            &mut self,
            device: &ID3D11Device,
            width: u32,
            height: u32,
        ) -> Option<ID3D11Texture2D> {
            if let Some(copy) = &self.copy_texture {
                if !self.state.needs_copy_texture(width, height) {
                    return Some(copy.clone());
                }
            }

            self.copy_texture = None;
            let descriptor = TextureDescriptor::new(DxgiFormat::DX9_COMPATIBLE, width, height);
            match create_texture(device, descriptor, TextureUsage::shared_compute(), None) {
                Ok(copy) => {
                    debug!("Allocated {descriptor} bridge texture");
                    self.state.copy_texture_allocated(width, height);
                    self.copy_texture = Some(copy.clone());
                    Some(copy)
                }
                Err(e) => {
                    error!("Cannot allocate bridge texture: {e}");
                    None
                }
            }
        }
    }
}
