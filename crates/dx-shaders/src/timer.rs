//! D3D11 timestamp queries.

use std::ffi::c_void;

use windows::Win32::Graphics::Direct3D11::*;

use crate::error::{ShaderError, ShaderResult};
use crate::throttle::{elapsed_ms, GpuTimer, TimerReading};

/// Start/end timestamps inside a disjoint window on the immediate context.
pub struct Dx11Timer {
    context: ID3D11DeviceContext,
    start: ID3D11Query,
    end: ID3D11Query,
    disjoint: ID3D11Query,
}

impl Dx11Timer {
    pub fn new(device: &ID3D11Device, context: &ID3D11DeviceContext) -> ShaderResult<Self> {
        Ok(Self {
            context: context.clone(),
            start: create_query(device, D3D11_QUERY_TIMESTAMP)?,
            end: create_query(device, D3D11_QUERY_TIMESTAMP)?,
            disjoint: create_query(device, D3D11_QUERY_TIMESTAMP_DISJOINT)?,
        })
    }

    /// Poll one query without flushing. `None` until the GPU has written it.
    fn poll<T: Default>(&self, query: &ID3D11Query) -> Option<T> {
        let mut data = T::default();
        unsafe {
            self.context.GetData(
                query,
                Some(&mut data as *mut T as *mut c_void),
                std::mem::size_of::<T>() as u32,
                0,
            )
        }
        .ok()?;
        Some(data)
    }
}

impl GpuTimer for Dx11Timer {
    fn begin(&mut self) {
        unsafe {
            self.context.Begin(&self.disjoint);
            self.context.End(&self.start);
        }
    }

    fn end(&mut self) {
        unsafe {
            self.context.End(&self.end);
            self.context.End(&self.disjoint);
        }
    }

    fn read(&mut self) -> TimerReading {
        // Pending queries return S_FALSE, which the bindings report as success,
        // so readiness is judged from the data: zero until written.
        let Some(window) = self.poll::<D3D11_QUERY_DATA_TIMESTAMP_DISJOINT>(&self.disjoint) else {
            return TimerReading::NotReady;
        };
        let (Some(start), Some(end)) = (self.poll::<u64>(&self.start), self.poll::<u64>(&self.end))
        else {
            return TimerReading::NotReady;
        };
        if window.Frequency == 0 || start == 0 || end == 0 {
            return TimerReading::NotReady;
        }
        if window.Disjoint.as_bool() {
            return TimerReading::Disjoint;
        }
        TimerReading::Elapsed(elapsed_ms(start, end, window.Frequency))
    }
}

fn create_query(device: &ID3D11Device, kind: D3D11_QUERY) -> ShaderResult<ID3D11Query> {
    let desc = D3D11_QUERY_DESC {
        Query: kind,
        MiscFlags: 0,
    };
    let mut query: Option<ID3D11Query> = None;
    unsafe { device.CreateQuery(&desc, Some(&mut query as *mut _)) }.map_err(|e| {
        ShaderError::ResourceCreation {
            what: "timestamp query",
            code: dx_interop::error::hresult_name(e.code().0 as u32),
            hresult: e.code().0 as u32,
        }
    })?;
    query.ok_or(ShaderError::ResourceCreation {
        what: "timestamp query",
        code: "null query",
        hresult: 0,
    })
}
