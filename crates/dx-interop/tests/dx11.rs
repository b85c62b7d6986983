#![cfg(target_os = "windows")]

use dx_interop::dx11::{
    create_texture, open_shared_texture, read_pixels, shared_handle, supports_typed_uav_store,
    wait, DeviceManager, TextureUsage,
};
use dx_interop::{DxgiFormat, InteropError, TextureDescriptor};
use windows::Win32::Foundation::HANDLE;

fn open() -> DeviceManager {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut devices = DeviceManager::new();
    devices.open(None, None).expect("no D3D11 device");
    devices
}

#[test]
fn manager_lifecycle() {
    let mut devices = DeviceManager::new();
    assert!(matches!(devices.get(), Err(InteropError::NoDevice)));

    devices.open(None, None).unwrap();
    assert!(devices.is_open());
    assert!(devices.is_owned());

    let mut borrowed = DeviceManager::new();
    borrowed.open(devices.device(), devices.context()).unwrap();
    assert!(!borrowed.is_owned());
    borrowed.close();

    devices.close();
    devices.close();
    assert!(devices.device().is_none());
}

#[test]
fn bgra_is_a_compute_target() {
    let devices = open();
    assert!(supports_typed_uav_store(
        devices.device().unwrap(),
        DxgiFormat::B8G8R8A8_UNORM
    ));
}

#[test]
fn empty_texture_is_rejected() {
    let devices = open();
    let desc = TextureDescriptor::new(DxgiFormat::B8G8R8A8_UNORM, 0, 16);
    let err = create_texture(devices.device().unwrap(), desc, TextureUsage::compute(), None)
        .unwrap_err();
    assert!(matches!(err, InteropError::InvalidDimensions(0, 16)));
}

#[test]
fn unknown_format_allocates_bgra() {
    let devices = open();
    let desc = TextureDescriptor::new(DxgiFormat::UNKNOWN, 8, 4);
    let tex = create_texture(devices.device().unwrap(), desc, TextureUsage::compute(), None).unwrap();
    assert_eq!(
        TextureDescriptor::of(&tex),
        TextureDescriptor::new(DxgiFormat::B8G8R8A8_UNORM, 8, 4)
    );
}

#[test]
fn shared_texture_crosses_devices() {
    let producer = open();
    let consumer = open();
    let data: Vec<u8> = (0..32 * 8 * 4).map(|i| (i % 256) as u8).collect();

    let desc = TextureDescriptor::new(DxgiFormat::R8G8B8A8_UNORM, 32, 8);
    let tex = create_texture(
        producer.device().unwrap(),
        desc,
        TextureUsage::shared_compute(),
        Some(&data),
    )
    .unwrap();
    wait(producer.device().unwrap(), producer.context().unwrap());

    let handle = shared_handle(&tex).unwrap();
    let opened = open_shared_texture(consumer.device().unwrap(), handle).unwrap();
    assert_eq!(TextureDescriptor::of(&opened), desc);

    let pixels = read_pixels(consumer.device().unwrap(), consumer.context().unwrap(), &opened).unwrap();
    assert_eq!(pixels, data);
}

#[test]
fn null_handle_is_refused() {
    let devices = open();
    let err = open_shared_texture(devices.device().unwrap(), HANDLE::default()).unwrap_err();
    assert!(matches!(err, InteropError::SharedHandle { handle: 0, .. }));
}
