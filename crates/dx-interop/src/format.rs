//! Texture format codes and descriptors.
//!
//! Formats are carried as raw `DXGI_FORMAT` values so descriptors can be
//! compared, logged and tested on any platform. On Windows they convert to and
//! from the `windows` crate types.

use std::fmt;

/// A raw `DXGI_FORMAT` code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DxgiFormat(pub u32);

impl DxgiFormat {
    pub const UNKNOWN: Self = Self(0);
    pub const R32G32B32A32_FLOAT: Self = Self(2);
    pub const R16G16B16A16_FLOAT: Self = Self(10);
    pub const R16G16B16A16_UNORM: Self = Self(11);
    pub const R10G10B10A2_UNORM: Self = Self(24);
    pub const R8G8B8A8_TYPELESS: Self = Self(27);
    pub const R8G8B8A8_UNORM: Self = Self(28);
    pub const R8G8B8A8_UNORM_SRGB: Self = Self(29);
    pub const B8G8R8A8_UNORM: Self = Self(87);

    /// DX9 `D3DFMT_A8R8G8B8`, sometimes passed through by DX9 callers.
    pub const D3DFMT_A8R8G8B8: Self = Self(21);
    /// DX9 `D3DFMT_X8R8G8B8`.
    pub const D3DFMT_X8R8G8B8: Self = Self(22);

    /// The only format a DX9 consumer can open from a shared handle.
    pub const DX9_COMPATIBLE: Self = Self::B8G8R8A8_UNORM;

    /// Format to allocate a texture with.
    ///
    /// `UNKNOWN` and the DX9 ARGB/XRGB codes map to `B8G8R8A8_UNORM`.
    pub fn for_allocation(self) -> Self {
        match self {
            Self::UNKNOWN | Self::D3DFMT_A8R8G8B8 | Self::D3DFMT_X8R8G8B8 => Self::B8G8R8A8_UNORM,
            other => other,
        }
    }

    pub fn is_dx9_compatible(self) -> bool {
        self == Self::DX9_COMPATIBLE
    }

    /// Bytes per pixel of the formats producers commonly share.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::B8G8R8A8_UNORM
            | Self::R8G8B8A8_TYPELESS
            | Self::R8G8B8A8_UNORM
            | Self::R8G8B8A8_UNORM_SRGB
            | Self::R10G10B10A2_UNORM => Some(4),
            Self::R16G16B16A16_FLOAT | Self::R16G16B16A16_UNORM => Some(8),
            Self::R32G32B32A32_FLOAT => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for DxgiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::UNKNOWN => "UNKNOWN",
            Self::R32G32B32A32_FLOAT => "R32G32B32A32_FLOAT",
            Self::R16G16B16A16_FLOAT => "R16G16B16A16_FLOAT",
            Self::R16G16B16A16_UNORM => "R16G16B16A16_UNORM",
            Self::R10G10B10A2_UNORM => "R10G10B10A2_UNORM",
            Self::R8G8B8A8_TYPELESS => "R8G8B8A8_TYPELESS",
            Self::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
            Self::R8G8B8A8_UNORM_SRGB => "R8G8B8A8_UNORM_SRGB",
            Self::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
            other => return write!(f, "DXGI_FORMAT({})", other.0),
        };
        f.write_str(name)
    }
}

#[cfg(target_os = "windows")]
impl From<windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT> for DxgiFormat {
    fn from(format: windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT) -> Self {
        Self(format.0 as u32)
    }
}

#[cfg(target_os = "windows")]
impl From<DxgiFormat> for windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT {
    fn from(format: DxgiFormat) -> Self {
        Self(format.0 as i32)
    }
}

/// Format and size of a 2D texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub format: DxgiFormat,
    pub width: u32,
    pub height: u32,
}

impl TextureDescriptor {
    pub fn new(format: DxgiFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    /// Two descriptors are compatible when format, width and height all match.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self == other
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Read the descriptor of a D3D11 texture.
    #[cfg(target_os = "windows")]
    pub fn of(texture: &windows::Win32::Graphics::Direct3D11::ID3D11Texture2D) -> Self {
        let mut desc = windows::Win32::Graphics::Direct3D11::D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };
        Self::new(desc.Format.into(), desc.Width, desc.Height)
    }
}

impl fmt::Display for TextureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}
