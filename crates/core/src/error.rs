use crate::lifecycle::DeviceKind;

/// Result alias that carries the custom [`MotionLabError`] type.
pub type Result<T> = std::result::Result<T, MotionLabError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MotionLabError {
    /// The device is busy, missing, or the audio subsystem could not be
    /// created or resumed.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// The user or the operating system refused access to a capture device.
    #[error("{0} access denied")]
    PermissionDenied(DeviceKind),
    /// The pose inference capability failed to initialise.
    #[error("pose model failed to load: {0}")]
    ModelLoad(String),
    /// The supplied media could not be decoded.
    #[error("unable to decode media: {0}")]
    Decode(String),
    /// A single inference call failed. The owning loop keeps running.
    #[error("pose estimate failed: {0}")]
    TransientInference(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("spectral transform failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl MotionLabError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` for failures caused by an explicit denial.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<&str> for MotionLabError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MotionLabError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<symphonia::core::errors::Error> for MotionLabError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
