//! CPU versions of the compute kernels.
//!
//! These follow the HLSL sources operation for operation on RGBA `f32`
//! images. They are used to check GPU readback and to test kernel behaviour
//! on machines without Direct3D.

use crate::kernels::Operation;
use crate::params::ShaderParams;

/// An RGBA image, one `[r, g, b, a]` per pixel, rows top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; (width * height) as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [f32; 4]) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decode tightly packed `B8G8R8A8_UNORM` bytes.
    pub fn from_bgra8(width: u32, height: u32, bytes: &[u8]) -> Self {
        let pixels = bytes
            .chunks_exact(4)
            .take((width * height) as usize)
            .map(|p| [unorm(p[2]), unorm(p[1]), unorm(p[0]), unorm(p[3])])
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Encode as tightly packed `B8G8R8A8_UNORM` bytes.
    pub fn to_bgra8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|[r, g, b, a]| [to_unorm(*b), to_unorm(*g), to_unorm(*r), to_unorm(*a)])
            .collect()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        self.pixels[(y * self.width + x) as usize] = value;
    }

    /// Pixel at signed coordinates, clamped to the edge.
    fn clamped(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }

    /// Bilinear sample at a position in texel units, clamped to the edge.
    fn bilinear(&self, sx: f32, sy: f32) -> [f32; 4] {
        let (x0, y0) = (sx.floor(), sy.floor());
        let (fx, fy) = (sx - x0, sy - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let top = mix(self.clamped(x0, y0), self.clamped(x0 + 1, y0), fx);
        let bottom = mix(self.clamped(x0, y0 + 1), self.clamped(x0 + 1, y0 + 1), fx);
        mix(top, bottom, fy)
    }
}

fn unorm(v: u8) -> f32 {
    v as f32 / 255.0
}

fn to_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn mix(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

fn bgra(c: [f32; 4]) -> [f32; 4] {
    [c[2], c[1], c[0], c[3]]
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Run `op` the way the GPU would for the given parameter block.
///
/// Without a source every operation except Copy reads a copy of `dest`.
/// Per-pixel operations given a source start from that source instead.
pub fn apply(op: Operation, dest: &mut Image, source: Option<&Image>, params: &ShaderParams) {
    let v = params.values;
    if let Some(source) = source.filter(|_| !op.needs_source() && !reads_neighbours(op)) {
        copy(dest, source, params.width, params.height);
    }
    match op {
        Operation::Copy => {
            if let Some(source) = source {
                copy(dest, source, params.width, params.height);
            }
        }
        Operation::Flip => flip(dest, v[0] == 1.0),
        Operation::Mirror => mirror(dest, v[0] == 1.0),
        Operation::Swap => swap(dest),
        Operation::Blur | Operation::Sharpen | Operation::AdaptiveSharpen => {
            let snapshot;
            let source = match source {
                Some(source) => source,
                None => {
                    snapshot = dest.clone();
                    &snapshot
                }
            };
            match op {
                Operation::Blur => blur(dest, source, v[0]),
                Operation::Sharpen => sharpen(dest, source, v[0], v[1]),
                _ => adaptive_sharpen(dest, source, v[0], v[1]),
            }
        }
        Operation::Adjust => adjust(dest, v[0], v[1], v[2], v[3]),
        Operation::Temperature => temperature(dest, v[0]),
    }
}

fn reads_neighbours(op: Operation) -> bool {
    matches!(
        op,
        Operation::Blur | Operation::Sharpen | Operation::AdaptiveSharpen
    )
}

/// Copy the `width` x `height` region. Texels outside the source read as
/// zero, like an out-of-range `Load`.
pub fn copy(dest: &mut Image, source: &Image, width: u32, height: u32) {
    for y in 0..height.min(dest.height) {
        for x in 0..width.min(dest.width) {
            let c = if x < source.width && y < source.height {
                source.get(x, y)
            } else {
                [0.0; 4]
            };
            dest.set(x, y, c);
        }
    }
}

pub fn flip(img: &mut Image, swap_rb: bool) {
    let h = img.height;
    for y in 0..h.div_ceil(2) {
        let y2 = h - 1 - y;
        for x in 0..img.width {
            let (mut a, mut b) = (img.get(x, y), img.get(x, y2));
            if swap_rb {
                a = bgra(a);
                b = bgra(b);
            }
            img.set(x, y2, a);
            img.set(x, y, b);
        }
    }
}

pub fn mirror(img: &mut Image, swap_rb: bool) {
    let w = img.width;
    for y in 0..img.height {
        for x in 0..w.div_ceil(2) {
            let x2 = w - 1 - x;
            let (mut a, mut b) = (img.get(x, y), img.get(x2, y));
            if swap_rb {
                a = bgra(a);
                b = bgra(b);
            }
            img.set(x2, y, a);
            img.set(x, y, b);
        }
    }
}

pub fn swap(img: &mut Image) {
    for p in &mut img.pixels {
        *p = bgra(*p);
    }
}

const BLUR_WEIGHTS: [f32; 5] = [0.204164, 0.304005, 0.093913, 0.010381, 0.001097];

pub fn blur(dest: &mut Image, source: &Image, amount: f32) {
    for y in 0..dest.height {
        for x in 0..dest.width {
            let mut sum = [0.0f32; 4];
            let mut total = 0.0;
            for dy in -2i32..=2 {
                for dx in -2i32..=2 {
                    let w = BLUR_WEIGHTS[dx.unsigned_abs() as usize]
                        * BLUR_WEIGHTS[dy.unsigned_abs() as usize];
                    let c = source.bilinear(
                        x as f32 + dx as f32 * amount,
                        y as f32 + dy as f32 * amount,
                    );
                    for i in 0..4 {
                        sum[i] += w * c[i];
                    }
                    total += w;
                }
            }
            dest.set(x, y, sum.map(|s| s / total));
        }
    }
}

pub fn sharpen(dest: &mut Image, source: &Image, width: f32, strength: f32) {
    let d = width as i64;
    for y in 0..dest.height {
        for x in 0..dest.width {
            let (cx, cy) = (x as i64, y as i64);
            let tap = |ox: i64, oy: i64| source.clamped(cx + ox, cy + oy);
            let orig = tap(0, 0);
            let corners = [tap(-d, -d), tap(d, -d), tap(-d, d), tap(d, d)];
            let edges = [tap(0, -d), tap(-d, 0), tap(d, 0), tap(0, d)];
            let out = std::array::from_fn(|i| {
                let c: f32 = corners.iter().map(|p| p[i]).sum();
                let e: f32 = edges.iter().map(|p| p[i]).sum();
                let blur = (c + 2.0 * e + 4.0 * orig[i]) / 16.0;
                (1.0 + strength) * orig[i] - strength * blur
            });
            dest.set(x, y, out);
        }
    }
}

fn luma(c: [f32; 4]) -> f32 {
    c[0] * 0.2126 + c[1] * 0.7152 + c[2] * 0.0722
}

pub fn adaptive_sharpen(dest: &mut Image, source: &Image, width: f32, level: f32) {
    let d = width as i64;
    for y in 0..dest.height {
        for x in 0..dest.width {
            let (cx, cy) = (x as i64, y as i64);
            let centre = source.clamped(cx, cy);
            let n = [
                source.clamped(cx - d, cy),
                source.clamped(cx, cy + d),
                source.clamped(cx + d, cy),
                source.clamped(cx, cy - d),
            ];

            let l = luma(centre);
            let lo = n.iter().map(|p| luma(*p)).fold(l, f32::min);
            let hi = n.iter().map(|p| luma(*p)).fold(l, f32::max);
            if hi <= 0.0 {
                dest.set(x, y, centre);
                continue;
            }

            let a = ((lo.min(1.0 - hi) / hi).clamp(0.0, 1.0)).sqrt() * lerp(-0.125, -0.2, level);
            let mut out = centre;
            for i in 0..3 {
                let sum: f32 = n.iter().map(|p| p[i]).sum();
                out[i] = (centre[i] + sum * a) / (1.0 + 4.0 * a);
            }
            dest.set(x, y, out);
        }
    }
}

pub fn adjust(img: &mut Image, brightness: f32, contrast: f32, saturation: f32, gamma: f32) {
    for p in &mut img.pixels {
        let mut rgb = [p[0], p[1], p[2]].map(|c| c.max(0.0).powf(1.0 / gamma));
        let l = rgb[0] * 0.2125 + rgb[1] * 0.7154 + rgb[2] * 0.0721;
        rgb = rgb.map(|c| lerp(l, c, saturation));
        rgb = rgb.map(|c| (c - 0.5) * contrast + 0.5 + brightness);
        *p = [rgb[0], rgb[1], rgb[2], p[3]];
    }
}

pub fn temperature(img: &mut Image, kelvin: f32) {
    let tint = kelvin_to_rgb(kelvin);
    for p in &mut img.pixels {
        let rgb = [p[0], p[1], p[2]];
        let value = rgb_to_hsv(rgb)[2];
        let tinted = rgb_to_hsv([rgb[0] * tint[0], rgb[1] * tint[1], rgb[2] * tint[2]]);
        let out = hsv_to_rgb([tinted[0], tinted[1], value]);
        *p = [out[0], out[1], out[2], p[3]];
    }
}

/// Approximate RGB of a black body at `kelvin`, each channel in `0..=1`.
pub fn kelvin_to_rgb(kelvin: f32) -> [f32; 3] {
    let t = kelvin / 100.0;
    let rgb = if t < 66.0 {
        let g = (-155.254_86 - 0.445_969_5 * (t - 2.0) + 104.492_16 * (t - 2.0).ln()) / 255.0;
        let b = if kelvin < 2001.0 {
            0.0
        } else {
            (-254.769_35 + 0.827_409_6 * (t - 10.0) + 115.679_94 * (t - 10.0).ln()) / 255.0
        };
        [1.0, g, b]
    } else {
        let r = (351.976_9 + 0.114_206_45 * (t - 55.0) - 40.253_662 * (t - 55.0).ln()) / 255.0;
        let g = (325.449_4 + 0.079_434_57 * (t - 50.0) - 28.085_297 * (t - 50.0).ln()) / 255.0;
        [r, g, 1.0]
    };
    rgb.map(|c| if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) })
}

pub fn rgb_to_hsv(c: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = c;
    let k = [0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0];
    let p = if g < b {
        [b, g, k[3], k[2]]
    } else {
        [g, b, k[0], k[1]]
    };
    let q = if r < p[0] {
        [p[0], p[1], p[3], r]
    } else {
        [r, p[1], p[2], p[0]]
    };
    let d = q[0] - q[3].min(q[1]);
    let e = 1.0e-10;
    [
        (q[2] + (q[3] - q[1]) / (6.0 * d + e)).abs(),
        d / (q[0] + e),
        q[0],
    ]
}

pub fn hsv_to_rgb(c: [f32; 3]) -> [f32; 3] {
    let k = [1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0];
    std::array::from_fn(|i| {
        let h = c[0] + k[i];
        let p = ((h - h.floor()) * 6.0 - k[3]).abs();
        c[2] * lerp(k[0], (p - k[0]).clamp(0.0, 1.0), c[1])
    })
}
