#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Fixed wall-clock cadence for polling devices.
pub mod cadence;

/// Stream configuration loaded from JSON.
pub mod config;

/// The host loop tying devices, schedulers, pipeline and sink together.
///
/// See [`controller::StereoController`] for the entry point.
pub mod controller;

/// Capability traits of the stereo camera, matcher and calibration.
pub mod device;

/// Error types for the stereo stream.
pub mod error;

/// Frame rate counter for processed frames.
pub mod fps_counter;

/// Cooperative multi-step conversion of raw results into display buffers.
pub mod pipeline;

/// Schedulers driving the start / is-running / get-result protocol.
pub mod scheduler;

/// The renderer boundary and a point cloud implementation of it.
pub mod sink;

/// In-process devices serving fixed buffers from worker threads.
pub mod virtual_device;

pub use crate::error::StereoError;
