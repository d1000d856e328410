#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera parameters, field of view and projection helpers.
pub mod camera;

/// Disparity to depth conversion and depth quantization.
pub mod depth;

/// Error types for the geometry module.
pub mod error;

/// Colored point clouds reconstructed from depth.
pub mod pointcloud;

/// The stereo reprojection matrix.
pub mod reprojection;

pub use crate::error::GeometryError;
