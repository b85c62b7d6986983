//! DX9 bridge against producer textures shared from a second device.
#![cfg(target_os = "windows")]

use dx_interop::dx11::{
    create_texture, read_pixels, shared_handle, wait, DeviceManager, TextureUsage,
};
use dx_interop::{DxgiFormat, TextureDescriptor};
use dx_shaders::Dx9Bridge;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

/// A texture shared by another device, kept alive for the test.
struct Producer {
    _devices: DeviceManager,
    _texture: ID3D11Texture2D,
    handle: HANDLE,
}

fn producer(format: DxgiFormat, width: u32, height: u32, data: &[u8]) -> Producer {
    let mut devices = DeviceManager::new();
    devices.open(None, None).expect("no D3D11 device");
    let desc = TextureDescriptor::new(format, width, height);
    let texture = create_texture(
        devices.device().unwrap(),
        desc,
        TextureUsage::shared_compute(),
        Some(data),
    )
    .unwrap();
    wait(devices.device().unwrap(), devices.context().unwrap());
    let handle = shared_handle(&texture).unwrap();
    Producer {
        _devices: devices,
        _texture: texture,
        handle,
    }
}

fn rgba_pattern(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| [(i % 251) as u8, (i / 3) as u8, 200, 255])
        .collect()
}

#[test]
fn null_handle_yields_nothing() {
    let mut bridge = Dx9Bridge::new();
    assert_eq!(bridge.bridge(HANDLE::default(), 640, 360), None);
    assert!(bridge.device().is_none());
}

#[test]
fn bgra_producer_is_passed_through() {
    let data = vec![128u8; 64 * 32 * 4];
    let p = producer(DxgiFormat::B8G8R8A8_UNORM, 64, 32, &data);
    let mut bridge = Dx9Bridge::new();

    assert_eq!(bridge.bridge(p.handle, 64, 32), Some(p.handle));
    assert_eq!(bridge.producer_format(), DxgiFormat::B8G8R8A8_UNORM);
    assert_eq!(bridge.bridge(p.handle, 64, 32), Some(p.handle));
    assert_eq!(bridge.shaders().dispatch_count(), 0);
    assert!(bridge.copy_texture().is_none());
}

#[test]
fn rgba_producer_gets_a_bgra_copy() {
    let (w, h) = (96, 54);
    let data = rgba_pattern(w, h);
    let p = producer(DxgiFormat::R8G8B8A8_UNORM, w, h, &data);
    let mut bridge = Dx9Bridge::new();

    let handle = bridge.bridge(p.handle, w, h).unwrap();
    assert_ne!(handle, p.handle);
    assert_eq!(bridge.producer_format(), DxgiFormat::R8G8B8A8_UNORM);

    let copy = bridge.copy_texture().unwrap().clone();
    assert_eq!(
        TextureDescriptor::of(&copy),
        TextureDescriptor::new(DxgiFormat::B8G8R8A8_UNORM, w, h)
    );

    let got = read_pixels(bridge.device().unwrap(), bridge.context().unwrap(), &copy).unwrap();
    let expected: Vec<u8> = data
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect();
    assert_eq!(got, expected);

    // Same handle again still copies, into the same texture.
    assert_eq!(bridge.bridge(p.handle, w, h), Some(handle));
    assert_eq!(bridge.shaders().dispatch_count(), 2);
}

#[test]
fn copy_texture_follows_the_requested_size() {
    let data = rgba_pattern(64, 64);
    let p = producer(DxgiFormat::R8G8B8A8_UNORM, 64, 64, &data);
    let mut bridge = Dx9Bridge::new();

    bridge.bridge(p.handle, 64, 64).unwrap();
    bridge.bridge(p.handle, 32, 16).unwrap();
    let copy = bridge.copy_texture().unwrap();
    assert_eq!(TextureDescriptor::of(copy).width, 32);
    assert_eq!(TextureDescriptor::of(copy).height, 16);
}

#[test]
fn force_copy_copies_bgra_too() {
    let data = vec![7u8; 16 * 16 * 4];
    let p = producer(DxgiFormat::B8G8R8A8_UNORM, 16, 16, &data);
    let mut bridge = Dx9Bridge::new();
    bridge.set_force_copy(true);

    let handle = bridge.bridge(p.handle, 16, 16).unwrap();
    assert_ne!(handle, p.handle);
    assert_eq!(bridge.shaders().dispatch_count(), 1);
    assert!(bridge.throttle().is_some());
}

