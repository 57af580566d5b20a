use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// An expected system transition interrupted capture: display mode
    /// change, fullscreen switch, session lock, driver reset. The engine
    /// recovers from these by rebuilding the capture pipeline.
    SystemTransition(&'static str),

    /// Selected output index does not exist on the adapter.
    OutputLost,

    /// The adapter currently exposes no outputs at all (e.g. remote
    /// session, display driver restart). Recoverable.
    NoOutputs,

    /// A keyed-mutex or frame acquire wait expired. The caller retries
    /// on the next pump without tearing anything down.
    NotReady,

    AlreadyRunning,

    NotRunning,

    InvalidConfig(String),

    Unsupported(String),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    Busy,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::InvalidConfig(_) => {
                ErrorClass::InvalidInput
            }
            Self::NotReady => ErrorClass::Busy,
            Self::SystemTransition(_) | Self::OutputLost | Self::NoOutputs => ErrorClass::Transient,
            Self::Unsupported(_) | Self::Platform(_) => ErrorClass::Fatal,
        }
    }

    /// Whether the supervisor should tear down and rebuild the pipeline
    /// rather than stop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.class(), ErrorClass::Busy)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SystemTransition(context) => {
                write!(f, "capture interrupted by a system transition during {context}")
            }
            Self::OutputLost => write!(f, "selected display output is no longer available"),
            Self::NoOutputs => write!(f, "adapter exposes no display outputs"),
            Self::NotReady => write!(f, "shared surface was not available within the wait budget"),
            Self::AlreadyRunning => write!(f, "engine is already running"),
            Self::NotRunning => write!(f, "engine is not running"),
            Self::InvalidConfig(message) => write!(f, "invalid engine configuration: {message}"),
            Self::Unsupported(message) => write!(f, "capture is unsupported here: {message}"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_recoverable_platform_errors_are_not() {
        assert!(CaptureError::SystemTransition("frame acquire").is_recoverable());
        assert!(CaptureError::NoOutputs.is_recoverable());
        assert!(!CaptureError::Platform(anyhow::anyhow!("boom")).is_recoverable());
        assert!(!CaptureError::InvalidConfig("zero grid".into()).is_recoverable());
    }

    #[test]
    fn not_ready_is_busy_not_transient() {
        let err = CaptureError::NotReady;
        assert_eq!(err.class(), ErrorClass::Busy);
        assert!(err.is_busy());
        assert!(!err.is_recoverable());
    }
}
