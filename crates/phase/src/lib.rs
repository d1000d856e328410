#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use phase_image as image;

#[doc(inline)]
pub use phase_imgproc as imgproc;

#[doc(inline)]
pub use phase_3d as k3d;

#[doc(inline)]
pub use phase_stereo as stereo;
