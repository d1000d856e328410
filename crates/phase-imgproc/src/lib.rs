#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Color space conversions between sensor and display layouts.
pub mod color;

/// Flip images along rows, columns or both.
pub mod flip;

/// Normalization of disparity maps for display.
pub mod normalize;

/// Utility functions for parallel processing.
pub mod parallel;

/// Image resizing.
pub mod resize;
