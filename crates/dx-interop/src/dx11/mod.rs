//! D3D11 device, texture and synchronization helpers (Windows only).

pub mod device;
pub mod sync;
pub mod texture;

pub use device::{create_dynamic_cbuf, DeviceManager, Dx11Device};
pub use sync::{read_pixels, wait};
pub use texture::{
    create_texture, open_shared_texture, shared_handle, supports_typed_uav_store, TextureUsage,
};
