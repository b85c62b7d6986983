//! Lazily compiled compute programs, one per operation.

use std::collections::HashMap;
use std::ffi::CString;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D11::*;

use tracing::{debug, error};

use crate::error::{ShaderError, ShaderResult};
use crate::kernels::{Operation, ENTRY_POINT, TARGET_PROFILE};

/// Compiled kernels for one device.
///
/// Failed compilations are not cached, so the next dispatch tries again.
#[derive(Default)]
pub struct ProgramCache {
    programs: HashMap<Operation, ID3D11ComputeShader>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The program for `op`, compiling it on first use.
    pub fn get(&mut self, device: &ID3D11Device, op: Operation) -> ShaderResult<ID3D11ComputeShader> {
        if let Some(program) = self.programs.get(&op) {
            return Ok(program.clone());
        }

        let bytecode = compile(op)?;
        let mut shader: Option<ID3D11ComputeShader> = None;
        unsafe { device.CreateComputeShader(&bytecode, None, Some(&mut shader as *mut _)) }
            .map_err(|e| {
                error!("Failed to create {op} compute shader: {e}");
                ShaderError::ShaderCompile {
                    operation: op,
                    message: e.message().to_string(),
                }
            })?;
        let shader = shader.ok_or(ShaderError::ShaderCompile {
            operation: op,
            message: "CreateComputeShader returned null".into(),
        })?;

        debug!("Compiled {op} kernel ({} bytes)", bytecode.len());
        self.programs.insert(op, shader.clone());
        Ok(shader)
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.programs.contains_key(&op)
    }

    /// Drop every program. Required when the device changes.
    pub fn clear(&mut self) {
        self.programs.clear();
    }
}

/// Compile the HLSL source of `op` to `cs_5_0` bytecode.
pub fn compile(op: Operation) -> ShaderResult<Vec<u8>> {
    compile_source(op, op.source())
}

fn compile_source(op: Operation, source: &str) -> ShaderResult<Vec<u8>> {
    let compile_error = |message: String| {
        error!("{op} kernel failed to compile: {message}");
        ShaderError::ShaderCompile {
            operation: op,
            message,
        }
    };

    let name = CString::new(format!("{}.hlsl", op.name())).map_err(|e| compile_error(e.to_string()))?;
    let entry = CString::new(ENTRY_POINT).map_err(|e| compile_error(e.to_string()))?;
    let target = CString::new(TARGET_PROFILE).map_err(|e| compile_error(e.to_string()))?;

    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            PCSTR(name.as_ptr() as *const u8),
            None,
            None,
            PCSTR(entry.as_ptr() as *const u8),
            PCSTR(target.as_ptr() as *const u8),
            D3DCOMPILE_ENABLE_STRICTNESS,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let message = errors
            .as_ref()
            .map(blob_text)
            .unwrap_or_else(|| e.message().to_string());
        return Err(compile_error(message));
    }

    blob.map(|b| blob_bytes(&b).to_vec())
        .ok_or_else(|| compile_error("D3DCompile produced no bytecode".into()))
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

fn blob_text(blob: &ID3DBlob) -> String {
    String::from_utf8_lossy(blob_bytes(blob))
        .trim_end_matches('\0')
        .trim()
        .to_string()
}
