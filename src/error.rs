/// Errors that can occur when interacting with a depth sensor.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Failed to initialize sensor session: {0}")]
    NotInitialized(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} operation already pending")]
    OperationPending(&'static str),

    #[error("Device operation failed: {0}")]
    OperationFailed(String),

    #[error("Failed to obtain tilt state: {0}")]
    StateQueryFailed(String),

    #[error("{0} operation cancelled")]
    Cancelled(&'static str),

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("{0:?} stream already started, try stopping it first")]
    AlreadyStarted(crate::types::StreamKind),

    #[error("{0:?} stream not started")]
    NotStarted(crate::types::StreamKind),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}
