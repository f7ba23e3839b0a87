use thiserror::Error;

/// Errors raised by stream backends and the control plane.
///
/// The `AudioDevice` contract itself reports plain `bool` success; these
/// errors are logged by the device and collapsed to `false` at that boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("stream setup failed: {0}")]
    StreamSetupFailed(String),

    #[error("stream control failed: {0}")]
    StreamControlFailed(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Errors from the factory and engine control surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("no external audio device is attached")]
    NoAudioDevice,

    #[error("audio device rejected initialization")]
    DeviceInitializationFailed,

    #[error("{stream} stream could not be {action}")]
    StreamTransitionFailed {
        stream: &'static str,
        action: &'static str,
    },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

/// Failure reported from a real-time callback.
///
/// `Copy` and allocation-free so it can be returned from an audio thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    #[error("render block invoked more than once in a single callback")]
    RenderBlockReused,

    #[error("buffer holds {available} samples, callback needs {required}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("no delegate bound")]
    NoDelegate,
}

/// Result of a real-time callback.
pub type RenderResult = Result<(), RenderError>;
