//! CPU/GPU synchronization and readback.
//!
//! Nothing here is used on the per-frame path: the engine only ever flushes.
//! [`wait`] and [`read_pixels`] block the calling thread until the GPU has
//! caught up and exist for debugging and tests.

use anyhow::{anyhow, bail, Context, Result};
use windows::Win32::Graphics::Direct3D11::*;

use tracing::warn;

use super::texture::{create_texture, TextureUsage};
use crate::format::TextureDescriptor;

/// Create a `D3D11_QUERY_EVENT` for GPU synchronization.
pub fn create_event_query(device: &ID3D11Device) -> Option<ID3D11Query> {
    let desc = D3D11_QUERY_DESC {
        Query: D3D11_QUERY_EVENT,
        ..Default::default()
    };
    let mut query: Option<ID3D11Query> = None;
    unsafe { device.CreateQuery(&desc, Some(&mut query as *mut _)) }.ok()?;
    query
}

/// Block until the GPU has executed everything queued on `context`.
///
/// Issues an event query and spin-polls it, yielding between polls.
pub fn wait(device: &ID3D11Device, context: &ID3D11DeviceContext) {
    let Some(query) = create_event_query(device) else {
        warn!("Could not create event query, skipping GPU wait");
        return;
    };

    unsafe {
        context.End(&query);
        // GetData maps S_OK and S_FALSE both to Ok(()); the BOOL payload is
        // what tells them apart. It stays zero until the GPU reaches the query.
        loop {
            let mut done: u32 = 0;
            let hr = context.GetData(
                &query,
                Some(&mut done as *mut u32 as *mut _),
                std::mem::size_of::<u32>() as u32,
                0,
            );
            if let Err(e) = hr {
                warn!("GPU wait aborted: {e}");
                break;
            }
            if done != 0 {
                break;
            }
            std::thread::yield_now();
        }
        context.Flush();
    }
}

/// Copy a texture into CPU memory, rows tightly packed.
///
/// The texture is copied into a staging texture of the same format, mapped
/// and read. Waits for the GPU.
pub fn read_pixels(
    device: &ID3D11Device,
    context: &ID3D11DeviceContext,
    texture: &ID3D11Texture2D,
) -> Result<Vec<u8>> {
    let descriptor = TextureDescriptor::of(texture);
    let bpp = descriptor
        .format
        .bytes_per_pixel()
        .ok_or_else(|| anyhow!("readback of {} is not supported", descriptor.format))?;

    let staging = create_texture(device, descriptor, TextureUsage::staging(), None)
        .context("creating staging texture for readback")?;

    let row_bytes = (descriptor.width * bpp) as usize;
    let mut pixels = vec![0u8; row_bytes * descriptor.height as usize];

    unsafe {
        context.CopyResource(&staging, texture);
        wait(device, context);

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        context
            .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            .context("mapping staging texture")?;
        if mapped.pData.is_null() {
            context.Unmap(&staging, 0);
            bail!("staging texture mapped to a null pointer");
        }

        let base = mapped.pData as *const u8;
        for (y, row) in pixels.chunks_exact_mut(row_bytes).enumerate() {
            let src = base.add(y * mapped.RowPitch as usize);
            std::ptr::copy_nonoverlapping(src, row.as_mut_ptr(), row_bytes);
        }
        context.Unmap(&staging, 0);
    }

    Ok(pixels)
}
