pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no compute platform found: {0}")]
    PlatformNotFound(String),

    #[error("no usable compute device found: {0}")]
    DeviceNotFound(String),

    #[error("couldn't create a context: {0}")]
    ContextCreationFailed(String),

    #[error("couldn't create a command queue: {0}")]
    QueueCreationFailed(String),

    #[error("couldn't read kernel source {path}: {reason}")]
    SourceNotFound { path: String, reason: String },

    #[error("kernel compilation failed:\n{log}")]
    CompileFailed { log: String },

    #[error("kernel entry point `{0}` not found in program")]
    EntryNotFound(String),

    #[error("buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("buffer transfer failed: {0}")]
    TransferFailed(String),

    #[error("couldn't bind kernel arguments: {0}")]
    ArgBindingFailed(String),

    #[error("kernel enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("output mismatch at index {index}: expected {expected}, got {actual}")]
    VerificationFailed {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn platform_not_found<S: Into<String>>(msg: S) -> Self {
        Error::PlatformNotFound(msg.into())
    }

    pub fn device_not_found<S: Into<String>>(msg: S) -> Self {
        Error::DeviceNotFound(msg.into())
    }

    pub fn context_creation<S: Into<String>>(msg: S) -> Self {
        Error::ContextCreationFailed(msg.into())
    }

    pub fn queue_creation<S: Into<String>>(msg: S) -> Self {
        Error::QueueCreationFailed(msg.into())
    }

    pub fn source_not_found<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Error::SourceNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn compile_failed<S: Into<String>>(log: S) -> Self {
        Error::CompileFailed { log: log.into() }
    }

    pub fn entry_not_found<S: Into<String>>(name: S) -> Self {
        Error::EntryNotFound(name.into())
    }

    pub fn allocation<S: Into<String>>(msg: S) -> Self {
        Error::AllocationFailed(msg.into())
    }

    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Error::TransferFailed(msg.into())
    }

    pub fn arg_binding<S: Into<String>>(msg: S) -> Self {
        Error::ArgBindingFailed(msg.into())
    }

    pub fn enqueue<S: Into<String>>(msg: S) -> Self {
        Error::EnqueueFailed(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Pipeline stage that produced this error, for the terminal diagnostic.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::PlatformNotFound(_) | Error::DeviceNotFound(_) => "device selection",
            Error::ContextCreationFailed(_) | Error::QueueCreationFailed(_) => "execution context",
            Error::SourceNotFound { .. } | Error::CompileFailed { .. } | Error::EntryNotFound(_) => {
                "program build"
            }
            Error::AllocationFailed(_) | Error::TransferFailed(_) => "buffer management",
            Error::ArgBindingFailed(_) | Error::EnqueueFailed(_) => "kernel dispatch",
            Error::VerificationFailed { .. } => "verification",
            Error::Config(_) => "configuration",
            Error::Io(_) => "I/O",
        }
    }

    /// Full build log when compilation failed.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Error::CompileFailed { log } => Some(log),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_failed_keeps_log() {
        let err = Error::compile_failed("error: expected `;`\n  ┌─ wgsl:3:5");
        assert_eq!(err.build_log(), Some("error: expected `;`\n  ┌─ wgsl:3:5"));
        assert!(err.to_string().contains("expected `;`"));
        assert_eq!(err.stage(), "program build");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Error::device_not_found("none").stage(), "device selection");
        assert_eq!(Error::queue_creation("twice").stage(), "execution context");
        assert_eq!(Error::arg_binding("index 2").stage(), "kernel dispatch");
        assert_eq!(Error::transfer("short").stage(), "buffer management");
        assert!(Error::enqueue("x").build_log().is_none());
    }
}
