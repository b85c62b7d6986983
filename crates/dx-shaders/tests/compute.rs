//! Kernel dispatch on a real D3D11 device.
#![cfg(target_os = "windows")]

use dx_interop::dx11::{create_texture, read_pixels, TextureUsage};
use dx_interop::{DxgiFormat, TextureDescriptor};
use dx_shaders::reference::{self, Image};
use dx_shaders::{ComputeShaders, Operation, ShaderError, ShaderParams};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

fn open() -> ComputeShaders {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut shaders = ComputeShaders::new();
    shaders.open(None, None).expect("no D3D11 device");
    shaders
}

fn pattern(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let (x, y) = (i % width, i / width);
            [(x * 7) as u8, (y * 13) as u8, ((x ^ y) * 3) as u8, 255 - (x as u8)]
        })
        .collect()
}

fn texture(shaders: &ComputeShaders, width: u32, height: u32, data: Option<&[u8]>) -> ID3D11Texture2D {
    let desc = TextureDescriptor::new(DxgiFormat::B8G8R8A8_UNORM, width, height);
    create_texture(shaders.device().unwrap(), desc, TextureUsage::compute(), data).unwrap()
}

/// GPU and CPU results may differ by rounding in the last bits.
fn assert_close(got: &[u8], expected: &[u8], op: Operation) {
    assert_eq!(got.len(), expected.len(), "{op}");
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!((*g as i32 - *e as i32).abs() <= 3, "{op} byte {i}: {g} vs {e}");
    }
}

fn pixels(shaders: &ComputeShaders, texture: &ID3D11Texture2D) -> Vec<u8> {
    read_pixels(shaders.device().unwrap(), shaders.context().unwrap(), texture).unwrap()
}

#[test]
fn open_is_idempotent() {
    let mut shaders = open();
    let first = shaders.device().unwrap().as_raw();
    shaders.open(None, None).unwrap();
    assert_eq!(shaders.device().unwrap().as_raw(), first);
    assert!(shaders.device_manager().is_owned());

    shaders.close();
    assert!(!shaders.is_open());
    shaders.close();
}

#[test]
fn borrowed_device_is_not_owned() {
    let owner = open();
    let mut shaders = ComputeShaders::new();
    shaders.open(owner.device(), owner.context()).unwrap();
    assert!(!shaders.device_manager().is_owned());
    assert_eq!(
        shaders.device().unwrap().as_raw(),
        owner.device().unwrap().as_raw()
    );
}

#[test]
fn dispatch_without_device_fails() {
    let owner = open();
    let tex = texture(&owner, 4, 4, None);
    let mut shaders = ComputeShaders::new();
    assert!(matches!(shaders.swap(&tex), Err(ShaderError::NoDevice)));
}

#[test]
fn copy_is_pixel_exact() {
    let mut shaders = open();
    let data = pattern(37, 21);
    let src = texture(&shaders, 37, 21, Some(&data));
    let dst = texture(&shaders, 37, 21, None);

    shaders.copy(&dst, &src).unwrap();
    assert_eq!(pixels(&shaders, &dst), data);
}

#[test]
fn full_hd_copy() {
    let mut shaders = open();
    let src = texture(&shaders, 1920, 1080, Some(&pattern(1920, 1080)));
    let dst = texture(&shaders, 1920, 1080, None);
    shaders.copy(&dst, &src).unwrap();
    assert_eq!(shaders.dispatch_count(), 1);
    assert_eq!(pixels(&shaders, &dst), pixels(&shaders, &src));
}

#[test]
fn flip_and_mirror_twice_are_identity() {
    let mut shaders = open();
    let data = pattern(19, 11);
    let tex = texture(&shaders, 19, 11, Some(&data));

    shaders.flip(&tex, true).unwrap();
    assert_ne!(pixels(&shaders, &tex), data);
    shaders.flip(&tex, true).unwrap();
    assert_eq!(pixels(&shaders, &tex), data);

    shaders.mirror(&tex, false).unwrap();
    shaders.mirror(&tex, false).unwrap();
    assert_eq!(pixels(&shaders, &tex), data);
}

#[test]
fn in_place_kernels_match_reference() {
    let mut shaders = open();
    let data = pattern(16, 9);
    let cases: [(Operation, [f32; 4]); 3] = [
        (Operation::Flip, [1.0, 0.0, 0.0, 0.0]),
        (Operation::Mirror, [0.0; 4]),
        (Operation::Swap, [0.0; 4]),
    ];
    for (op, values) in cases {
        let tex = texture(&shaders, 16, 9, Some(&data));
        shaders
            .dispatch(op, &tex, None, DxgiFormat::B8G8R8A8_UNORM, DxgiFormat::UNKNOWN, 16, 9, values)
            .unwrap();

        let mut expected = Image::from_bgra8(16, 9, &data);
        reference::apply(op, &mut expected, None, &ShaderParams::new(values, 16, 9));
        assert_eq!(pixels(&shaders, &tex), expected.to_bgra8(), "{op}");
    }
}

#[test]
fn adjust_identity_keeps_pixels() {
    let mut shaders = open();
    let data = pattern(8, 8);
    let tex = texture(&shaders, 8, 8, Some(&data));
    shaders.adjust(&tex, 0.0, 1.0, 1.0, 1.0).unwrap();
    assert_eq!(pixels(&shaders, &tex), data);
}

#[test]
fn filters_stay_close_to_reference() {
    let mut shaders = open();
    let data = pattern(24, 16);
    let src = texture(&shaders, 24, 16, Some(&data));
    let source = Image::from_bgra8(24, 16, &data);

    let cases: [(Operation, [f32; 4]); 3] = [
        (Operation::Blur, [1.5, 0.0, 0.0, 0.0]),
        (Operation::Sharpen, [1.0, 0.5, 0.0, 0.0]),
        (Operation::AdaptiveSharpen, [1.0, 0.5, 0.0, 0.0]),
    ];
    for (op, values) in cases {
        let dst = texture(&shaders, 24, 16, None);
        shaders
            .dispatch(op, &dst, Some(&src), DxgiFormat::B8G8R8A8_UNORM, DxgiFormat::UNKNOWN, 24, 16, values)
            .unwrap();

        let mut expected = Image::new(24, 16);
        reference::apply(op, &mut expected, Some(&source), &ShaderParams::new(values, 24, 16));
        assert_close(&pixels(&shaders, &dst), &expected.to_bgra8(), op);
    }
}

#[test]
fn copy_needs_a_source() {
    let mut shaders = open();
    let tex = texture(&shaders, 4, 4, None);
    let err = shaders
        .dispatch(Operation::Copy, &tex, None, DxgiFormat::UNKNOWN, DxgiFormat::UNKNOWN, 4, 4, [0.0; 4])
        .unwrap_err();
    assert!(matches!(err, ShaderError::MissingSource(Operation::Copy)));
    assert_eq!(shaders.dispatch_count(), 0);
}

#[test]
fn zero_size_is_rejected() {
    let mut shaders = open();
    let tex = texture(&shaders, 4, 4, None);
    let err = shaders
        .dispatch(Operation::Swap, &tex, None, DxgiFormat::UNKNOWN, DxgiFormat::UNKNOWN, 0, 4, [0.0; 4])
        .unwrap_err();
    assert!(matches!(err, ShaderError::InvalidDimensions(0, 4)));
}

#[test]
fn unchanged_parameters_upload_once() {
    let mut shaders = open();
    let tex = texture(&shaders, 32, 32, None);

    shaders.swap(&tex).unwrap();
    shaders.swap(&tex).unwrap();
    assert_eq!(shaders.bindings().upload_count(), 1);

    shaders.flip(&tex, true).unwrap();
    assert_eq!(shaders.bindings().upload_count(), 2);

    shaders.release_resources();
    shaders.flip(&tex, true).unwrap();
    assert_eq!(shaders.bindings().upload_count(), 3);
    assert_eq!(shaders.dispatch_count(), 4);
}

#[test]
fn views_follow_the_textures() {
    let mut shaders = open();
    let a = texture(&shaders, 16, 16, None);
    let b = texture(&shaders, 16, 16, None);

    shaders.swap(&a).unwrap();
    let first = shaders.bindings().uav().unwrap().as_raw();
    shaders.swap(&a).unwrap();
    assert_eq!(shaders.bindings().uav().unwrap().as_raw(), first);

    shaders.swap(&b).unwrap();
    assert!(shaders.bindings().srv().is_some());
    assert!(shaders.bindings().uav().is_some());
    assert_eq!(shaders.bindings().upload_count(), 1);
}

#[test]
fn colour_kernels_stay_close_to_reference() {
    let mut shaders = open();
    let data = pattern(24, 16);
    let cases: [(Operation, [f32; 4]); 3] = [
        (Operation::Adjust, [0.1, 1.2, 0.8, 1.1]),
        (Operation::Temperature, [3500.0, 0.0, 0.0, 0.0]),
        (Operation::Temperature, [9000.0, 0.0, 0.0, 0.0]),
    ];
    for (op, values) in cases {
        let tex = texture(&shaders, 24, 16, Some(&data));
        shaders
            .dispatch(op, &tex, None, DxgiFormat::UNKNOWN, DxgiFormat::UNKNOWN, 24, 16, values)
            .unwrap();

        let mut expected = Image::from_bgra8(24, 16, &data);
        reference::apply(op, &mut expected, None, &ShaderParams::new(values, 24, 16));
        assert_close(&pixels(&shaders, &tex), &expected.to_bgra8(), op);
    }
}

#[test]
fn unsupported_format_is_refused_without_side_effects() {
    let mut shaders = open();
    shaders.enable_throttle().unwrap();
    let data = pattern(8, 8);
    let tex = texture(&shaders, 8, 8, Some(&data));

    let err = shaders
        .dispatch(
            Operation::Swap,
            &tex,
            None,
            DxgiFormat::R8G8B8A8_UNORM_SRGB,
            DxgiFormat::UNKNOWN,
            8,
            8,
            [0.0; 4],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ShaderError::UnsupportedFormat(DxgiFormat::R8G8B8A8_UNORM_SRGB)
    ));
    assert_eq!(shaders.dispatch_count(), 0);
    assert_eq!(shaders.throttle().unwrap().frame(), 0);
    assert_eq!(shaders.bindings().upload_count(), 0);
    assert_eq!(pixels(&shaders, &tex), data);

    shaders.swap(&tex).unwrap();
    assert_eq!(shaders.throttle().unwrap().frame(), 1);
}

#[test]
fn typeless_destination_runs_in_place() {
    let mut shaders = open();
    let data = pattern(20, 10);
    let desc = TextureDescriptor::new(DxgiFormat::R8G8B8A8_TYPELESS, 20, 10);
    let tex = create_texture(shaders.device().unwrap(), desc, TextureUsage::compute(), Some(&data))
        .unwrap();

    shaders
        .dispatch(
            Operation::Swap,
            &tex,
            None,
            DxgiFormat::R8G8B8A8_UNORM,
            DxgiFormat::UNKNOWN,
            20,
            10,
            [0.0; 4],
        )
        .unwrap();

    let swapped: Vec<u8> = data
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect();
    assert_eq!(pixels(&shaders, &tex), swapped);
}

#[test]
fn failed_source_view_dispatches_nothing() {
    let mut shaders = open();
    let src = texture(&shaders, 8, 8, Some(&pattern(8, 8)));
    let before = vec![9u8; 8 * 8 * 4];
    let dst = texture(&shaders, 8, 8, Some(&before));

    // A BGRA8 texture cannot be viewed as half floats.
    let err = shaders
        .dispatch(
            Operation::Copy,
            &dst,
            Some(&src),
            DxgiFormat::B8G8R8A8_UNORM,
            DxgiFormat::R16G16B16A16_FLOAT,
            8,
            8,
            [0.0; 4],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ShaderError::ResourceCreation {
            what: "source view",
            ..
        }
    ));
    assert_eq!(shaders.dispatch_count(), 0);
    assert_eq!(pixels(&shaders, &dst), before);
}
