//! Kernel registry.
//!
//! Every operation is a fixed HLSL compute kernel compiled from source at
//! first use. The sources are baked into the binary and never change at run
//! time.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Threads per group along X and Y. Must match `[numthreads]` in every kernel.
pub const THREAD_GROUP_SIZE: u32 = 16;

/// Entry point shared by all kernels.
pub const ENTRY_POINT: &str = "CSMain";

/// Shader model the kernels are compiled for.
pub const TARGET_PROFILE: &str = "cs_5_0";

/// An image operation backed by one compute kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Copy,
    Flip,
    Mirror,
    Swap,
    Blur,
    Sharpen,
    AdaptiveSharpen,
    Adjust,
    Temperature,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Copy,
        Operation::Flip,
        Operation::Mirror,
        Operation::Swap,
        Operation::Blur,
        Operation::Sharpen,
        Operation::AdaptiveSharpen,
        Operation::Adjust,
        Operation::Temperature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Copy => "copy",
            Operation::Flip => "flip",
            Operation::Mirror => "mirror",
            Operation::Swap => "swap",
            Operation::Blur => "blur",
            Operation::Sharpen => "sharpen",
            Operation::AdaptiveSharpen => "cas",
            Operation::Adjust => "adjust",
            Operation::Temperature => "temperature",
        }
    }

    /// HLSL source of the kernel.
    pub fn source(self) -> &'static str {
        match self {
            Operation::Copy => include_str!("../shaders/copy.hlsl"),
            Operation::Flip => include_str!("../shaders/flip.hlsl"),
            Operation::Mirror => include_str!("../shaders/mirror.hlsl"),
            Operation::Swap => include_str!("../shaders/swap.hlsl"),
            Operation::Blur => include_str!("../shaders/blur.hlsl"),
            Operation::Sharpen => include_str!("../shaders/sharpen.hlsl"),
            Operation::AdaptiveSharpen => include_str!("../shaders/cas.hlsl"),
            Operation::Adjust => include_str!("../shaders/adjust.hlsl"),
            Operation::Temperature => include_str!("../shaders/temperature.hlsl"),
        }
    }

    /// Whether the kernel has no in-place form.
    ///
    /// Every kernel reads its input through the view at t0. Typed UAV loads of
    /// four-component formats are not available in `cs_5_0`, so an in-place
    /// dispatch reads a snapshot of the destination instead.
    pub fn needs_source(self) -> bool {
        self == Operation::Copy
    }

    /// Whether the kernel samples through the linear clamp sampler at s0.
    pub fn uses_sampler(self) -> bool {
        self == Operation::Blur
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A name that matches no kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown operation '{0}'")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let op = match lower.as_str() {
            "adaptive_sharpen" | "adaptivesharpen" => Operation::AdaptiveSharpen,
            "temp" => Operation::Temperature,
            other => Operation::ALL
                .into_iter()
                .find(|op| op.name() == other)
                .ok_or_else(|| UnknownOperation(s.to_string()))?,
        };
        Ok(op)
    }
}

/// Thread groups needed to cover a `width` x `height` image.
pub fn dispatch_groups(width: u32, height: u32) -> (u32, u32) {
    (
        width.div_ceil(THREAD_GROUP_SIZE),
        height.div_ceil(THREAD_GROUP_SIZE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_hd_grid() {
        assert_eq!(dispatch_groups(1920, 1080), (120, 68));
        assert_eq!(dispatch_groups(16, 16), (1, 1));
        assert_eq!(dispatch_groups(17, 1), (2, 1));
        assert_eq!(dispatch_groups(0, 0), (0, 0));
    }

    #[test]
    fn every_kernel_has_the_shared_entry_point() {
        let numthreads = format!("[numthreads({THREAD_GROUP_SIZE}, {THREAD_GROUP_SIZE}, 1)]");
        for op in Operation::ALL {
            let src = op.source();
            assert!(src.contains(&format!("void {ENTRY_POINT}(")), "{op}");
            assert!(src.contains(&numthreads), "{op}");
            assert!(src.contains("register(b0)"), "{op}");
            assert!(src.contains("register(u0)"), "{op}");
            assert!(!src.contains("dst.Load") && !src.contains("= dst["), "{op} loads from its UAV");
            assert!(src.contains("register(t0)"), "{op}");
            assert_eq!(src.contains("register(s0)"), op.uses_sampler(), "{op}");
        }
    }

    #[test]
    fn only_copy_needs_a_source() {
        let needing: Vec<_> = Operation::ALL.into_iter().filter(|op| op.needs_source()).collect();
        assert_eq!(needing, [Operation::Copy]);
    }

    #[test]
    fn kernels_guard_the_image_bounds() {
        for op in Operation::ALL {
            assert!(op.source().contains("return;"), "{op} has no bounds check");
        }
    }

    #[test]
    fn names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>(), Ok(op));
        }
        assert_eq!("Blur".parse::<Operation>(), Ok(Operation::Blur));
        assert_eq!(
            "adaptive_sharpen".parse::<Operation>(),
            Ok(Operation::AdaptiveSharpen)
        );
        assert_eq!(
            "emboss".parse::<Operation>().unwrap_err().to_string(),
            "unknown operation 'emboss'"
        );
    }
}
