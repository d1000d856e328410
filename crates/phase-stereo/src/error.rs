use std::path::PathBuf;

use phase_3d::GeometryError;
use phase_image::ImageError;

/// An error type for the stereo stream.
#[derive(thiserror::Error, Debug)]
pub enum StereoError {
    /// A buffer did not match the expected image layout.
    #[error(transparent)]
    InvalidInput(#[from] ImageError),

    /// The camera geometry could not be derived.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The stereo camera refused the connection.
    #[error("Failed to connect to the stereo camera")]
    ConnectFailed,

    /// An operation needs a connected camera.
    #[error("Stereo camera is not connected")]
    NotConnected,

    /// The calibration cannot be used for rectification.
    #[error("Calibration is invalid")]
    InvalidCalibration,

    /// A file needed at startup does not exist.
    #[error("{kind} file does not exist at: {}", path.display())]
    MissingFile {
        /// What the file was needed for.
        kind: &'static str,
        /// The path that was checked.
        path: PathBuf,
    },

    /// The device and interface combination is not supported.
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The pipeline already holds a job of this kind.
    #[error("Pipeline is busy with a {0} job")]
    PipelineBusy(&'static str),

    /// The sink was updated before it was initialised.
    #[error("Frame sink is not initialised")]
    SinkNotInitialized,

    /// Workers were still running when the teardown wait ran out.
    #[error("Workers still running after teardown timeout: {0}")]
    TeardownTimeout(String),

    /// An invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error reading a configuration or calibration file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error parsing a configuration or calibration file.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StereoError {
    /// Returns true for errors that prevent the stream from starting.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            StereoError::ConnectFailed
                | StereoError::NotConnected
                | StereoError::InvalidCalibration
                | StereoError::MissingFile { .. }
                | StereoError::UnsupportedDevice(_)
        )
    }
}
