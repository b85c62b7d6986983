//! Compute dispatch engine.
//!
//! [`ComputeShaders`] owns the device, the binding cache, the compiled
//! programs and, on the bridge path, the load throttle. Every operation goes
//! through [`ComputeShaders::dispatch`]; the named helpers only fill in the
//! parameter block.

use windows::Win32::Graphics::Direct3D11::*;

use tracing::{debug, warn};

use dx_interop::dx11::{self, supports_typed_uav_store, DeviceManager, TextureUsage};
use dx_interop::{DxgiFormat, TextureDescriptor};

use crate::bindings::ResourceBindings;
use crate::error::{ShaderError, ShaderResult};
use crate::kernels::{dispatch_groups, Operation};
use crate::programs::ProgramCache;
use crate::throttle::Throttle;
use crate::timer::Dx11Timer;
use crate::usage::GpuUsage;

/// Throttle driven by D3D11 timestamps and the system GPU counter.
pub type GpuThrottle = Throttle<Dx11Timer, GpuUsage>;

/// GPU image operations on one D3D11 device.
#[derive(Default)]
pub struct ComputeShaders {
    devices: DeviceManager,
    bindings: ResourceBindings,
    programs: ProgramCache,
    sampler: Option<ID3D11SamplerState>,
    /// Copy of the destination read by kernels run in place.
    scratch: Option<ID3D11Texture2D>,
    throttle: Option<GpuThrottle>,
    dispatches: u64,
}

impl ComputeShaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the application's device and context, or create a device when
    /// either is `None`. A no-op once open.
    pub fn open(
        &mut self,
        device: Option<&ID3D11Device>,
        context: Option<&ID3D11DeviceContext>,
    ) -> ShaderResult<()> {
        Ok(self.devices.open(device, context)?)
    }

    /// Release all GPU objects and then the device.
    pub fn close(&mut self) {
        self.release_resources();
        self.programs.clear();
        self.sampler = None;
        self.throttle = None;
        self.devices.close();
    }

    pub fn is_open(&self) -> bool {
        self.devices.is_open()
    }

    pub fn device(&self) -> Option<&ID3D11Device> {
        self.devices.device()
    }

    pub fn context(&self) -> Option<&ID3D11DeviceContext> {
        self.devices.context()
    }

    pub fn device_manager(&self) -> &DeviceManager {
        &self.devices
    }

    /// Block until the GPU has finished all submitted work. Debugging only.
    pub fn wait(&self) {
        if let (Some(device), Some(context)) = (self.device(), self.context()) {
            dx11::wait(device, context);
        }
    }

    /// Attach the GPU load throttle to every following dispatch.
    pub fn enable_throttle(&mut self) -> ShaderResult<()> {
        if self.throttle.is_some() {
            return Ok(());
        }
        let dev = self.devices.get()?;
        let timer = Dx11Timer::new(dev.device(), dev.context())?;
        self.throttle = Some(Throttle::new(timer, GpuUsage::new()));
        Ok(())
    }

    pub fn throttle(&self) -> Option<&GpuThrottle> {
        self.throttle.as_ref()
    }

    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    /// Kernels dispatched so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Drop the cached views and parameter buffer.
    pub fn release_resources(&mut self) {
        self.bindings.release();
        self.scratch = None;
    }

    /// Rebind to a new texture pair, taking formats and size from the
    /// textures.
    pub fn update_resources(
        &mut self,
        dest: &ID3D11Texture2D,
        source: &ID3D11Texture2D,
    ) -> ShaderResult<()> {
        let dev = self.devices.get()?;
        let (device, context) = (dev.device().clone(), dev.context().clone());
        self.bindings.update(&device, &context, dest, source)
    }

    /// Run one kernel over a `width` x `height` region.
    ///
    /// `source` may be omitted for every operation except Copy; the kernel then
    /// reads a snapshot of the destination, viewed in `dest_format`. Nothing
    /// is dispatched when either view cannot be created. A `dest_format` of
    /// `UNKNOWN` uses the destination's own format; a `source_format` of
    /// `UNKNOWN` views the source in its own format.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        op: Operation,
        dest: &ID3D11Texture2D,
        source: Option<&ID3D11Texture2D>,
        dest_format: DxgiFormat,
        source_format: DxgiFormat,
        width: u32,
        height: u32,
        values: [f32; 4],
    ) -> ShaderResult<()> {
        let dev = self.devices.get()?;
        let (device, context) = (dev.device().clone(), dev.context().clone());

        if width == 0 || height == 0 {
            return Err(ShaderError::InvalidDimensions(width, height));
        }
        if source.is_none() && op.needs_source() {
            return Err(ShaderError::MissingSource(op));
        }

        let dest_format = if dest_format == DxgiFormat::UNKNOWN {
            TextureDescriptor::of(dest).format
        } else {
            dest_format
        };
        if !supports_typed_uav_store(&device, dest_format) {
            warn!("{op}: {dest_format} cannot be written by a compute shader");
            return Err(ShaderError::UnsupportedFormat(dest_format));
        }

        if let Some(throttle) = &mut self.throttle {
            if !throttle.admit() {
                return Err(ShaderError::Bypassed);
            }
        }

        let scratch;
        let (source, source_format) = match source {
            Some(source) => (Some(source), source_format),
            None => {
                scratch = self.snapshot_destination(&device, &context, dest)?;
                (Some(&scratch), dest_format)
            }
        };

        self.bindings.ensure(
            &device,
            &context,
            dest,
            source,
            dest_format,
            source_format,
            width,
            height,
            values,
        )?;
        // Every kernel reads t0 and writes u0. Without either the kernel
        // would store zeros.
        if self.bindings.srv().is_none() {
            return Err(missing_view("source view"));
        }
        if self.bindings.uav().is_none() {
            return Err(missing_view("destination view"));
        }
        let program = self.programs.get(&device, op)?;
        let sampler = if op.uses_sampler() {
            Some(self.linear_clamp_sampler(&device)?)
        } else {
            None
        };

        let (groups_x, groups_y) = dispatch_groups(width, height);
        if let Some(throttle) = &mut self.throttle {
            throttle.begin();
        }

        unsafe {
            context.CSSetShader(&program, None);
            context.CSSetConstantBuffers(0, Some(&[self.bindings.params().cloned()]));
            if let Some(srv) = self.bindings.srv() {
                context.CSSetShaderResources(0, Some(&[Some(srv.clone())]));
            }
            let uavs = [self.bindings.uav().cloned()];
            context.CSSetUnorderedAccessViews(0, 1, Some(uavs.as_ptr()), None);
            if let Some(sampler) = &sampler {
                context.CSSetSamplers(0, Some(&[Some(sampler.clone())]));
            }

            context.Dispatch(groups_x, groups_y, 1);

            // Unbind so the textures can be used as inputs or outputs elsewhere.
            let null_uavs: [Option<ID3D11UnorderedAccessView>; 1] = Default::default();
            context.CSSetUnorderedAccessViews(0, 1, Some(null_uavs.as_ptr()), None);
            context.CSSetShaderResources(0, Some(&[None]));
            context.CSSetConstantBuffers(0, Some(&[None]));
        }

        if let Some(throttle) = &mut self.throttle {
            throttle.finish();
        }
        self.dispatches += 1;

        unsafe { context.Flush() };
        Ok(())
    }

    /// Copy `source` into `dest`, converting through the view formats.
    pub fn copy(
        &mut self,
        dest: &ID3D11Texture2D,
        source: &ID3D11Texture2D,
    ) -> ShaderResult<()> {
        let desc = TextureDescriptor::of(source);
        self.dispatch(
            Operation::Copy,
            dest,
            Some(source),
            DxgiFormat::UNKNOWN,
            DxgiFormat::UNKNOWN,
            desc.width,
            desc.height,
            [0.0; 4],
        )
    }

    /// Flip vertically in place, optionally swapping red and blue.
    pub fn flip(&mut self, texture: &ID3D11Texture2D, swap_rb: bool) -> ShaderResult<()> {
        self.in_place(Operation::Flip, texture, [flag(swap_rb), 0.0, 0.0, 0.0])
    }

    /// Mirror horizontally in place, optionally swapping red and blue.
    pub fn mirror(&mut self, texture: &ID3D11Texture2D, swap_rb: bool) -> ShaderResult<()> {
        self.in_place(Operation::Mirror, texture, [flag(swap_rb), 0.0, 0.0, 0.0])
    }

    /// Swap red and blue in place.
    pub fn swap(&mut self, texture: &ID3D11Texture2D) -> ShaderResult<()> {
        self.in_place(Operation::Swap, texture, [0.0; 4])
    }

    /// Gaussian blur with taps `amount` pixels apart.
    pub fn blur(
        &mut self,
        dest: &ID3D11Texture2D,
        source: Option<&ID3D11Texture2D>,
        amount: f32,
    ) -> ShaderResult<()> {
        self.filter(Operation::Blur, dest, source, [amount, 0.0, 0.0, 0.0])
    }

    /// Unsharp mask with neighbours `width` pixels away.
    pub fn sharpen(
        &mut self,
        dest: &ID3D11Texture2D,
        source: Option<&ID3D11Texture2D>,
        width: f32,
        strength: f32,
    ) -> ShaderResult<()> {
        self.filter(Operation::Sharpen, dest, source, [width, strength, 0.0, 0.0])
    }

    /// Contrast adaptive sharpening. `level` runs from 0 to 1.
    pub fn adaptive_sharpen(
        &mut self,
        dest: &ID3D11Texture2D,
        source: Option<&ID3D11Texture2D>,
        width: f32,
        level: f32,
    ) -> ShaderResult<()> {
        self.filter(Operation::AdaptiveSharpen, dest, source, [width, level, 0.0, 0.0])
    }

    /// Brightness, contrast, saturation and gamma in place. Identity is
    /// `(0, 1, 1, 1)`.
    pub fn adjust(
        &mut self,
        texture: &ID3D11Texture2D,
        brightness: f32,
        contrast: f32,
        saturation: f32,
        gamma: f32,
    ) -> ShaderResult<()> {
        self.in_place(
            Operation::Adjust,
            texture,
            [brightness, contrast, saturation, gamma],
        )
    }

    /// Tint towards the white point of `kelvin` in place.
    pub fn temperature(&mut self, texture: &ID3D11Texture2D, kelvin: f32) -> ShaderResult<()> {
        self.in_place(Operation::Temperature, texture, [kelvin, 0.0, 0.0, 0.0])
    }

    fn in_place(
        &mut self,
        op: Operation,
        texture: &ID3D11Texture2D,
        values: [f32; 4],
    ) -> ShaderResult<()> {
        let desc = TextureDescriptor::of(texture);
        self.dispatch(
            op,
            texture,
            None,
            desc.format,
            DxgiFormat::UNKNOWN,
            desc.width,
            desc.height,
            values,
        )
    }

    fn filter(
        &mut self,
        op: Operation,
        dest: &ID3D11Texture2D,
        source: Option<&ID3D11Texture2D>,
        values: [f32; 4],
    ) -> ShaderResult<()> {
        let desc = TextureDescriptor::of(source.unwrap_or(dest));
        self.dispatch(
            op,
            dest,
            source,
            TextureDescriptor::of(dest).format,
            DxgiFormat::UNKNOWN,
            desc.width,
            desc.height,
            values,
        )
    }

    /// Copy the destination into a scratch texture of the same shape.
    fn snapshot_destination(
        &mut self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        dest: &ID3D11Texture2D,
    ) -> ShaderResult<ID3D11Texture2D> {
        let wanted = TextureDescriptor::of(dest);
        let reusable = self
            .scratch
            .as_ref()
            .filter(|s| TextureDescriptor::of(s).is_compatible(&wanted))
            .cloned();
        let scratch = match reusable {
            Some(scratch) => scratch,
            None => {
                debug!("Allocating {wanted} scratch texture");
                let scratch = dx11::create_texture(device, wanted, TextureUsage::compute(), None)?;
                self.scratch = Some(scratch.clone());
                scratch
            }
        };
        unsafe { context.CopyResource(&scratch, dest) };
        Ok(scratch)
    }

    fn linear_clamp_sampler(&mut self, device: &ID3D11Device) -> ShaderResult<ID3D11SamplerState> {
        if let Some(sampler) = &self.sampler {
            return Ok(sampler.clone());
        }
        let desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
            ..Default::default()
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        unsafe { device.CreateSamplerState(&desc, Some(&mut sampler as *mut _)) }.map_err(|e| {
            ShaderError::ResourceCreation {
                what: "sampler",
                code: dx_interop::error::hresult_name(e.code().0 as u32),
                hresult: e.code().0 as u32,
            }
        })?;
        let sampler = sampler.ok_or(ShaderError::ResourceCreation {
            what: "sampler",
            code: "null sampler",
            hresult: 0,
        })?;
        self.sampler = Some(sampler.clone());
        Ok(sampler)
    }
}

impl Drop for ComputeShaders {
    fn drop(&mut self) {
        self.close();
    }
}

fn missing_view(what: &'static str) -> ShaderError {
    ShaderError::ResourceCreation {
        what,
        code: "view creation failed",
        hresult: 0,
    }
}

fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}
