pub type PipelineResult<T> = Result<T, PipelineError>;

/// How far a failure reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Ends the session (or sampling for the session). Surfaced once.
    Fatal,
    /// Logged and counted; the render loop carries on.
    Transient,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("render target error: {0}")]
    RenderTarget(String),

    #[error("worker not ready: {0}")]
    WorkerNotReady(String),

    #[error("transfer failure: {0}")]
    TransferFailure(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn session_unavailable(msg: impl Into<String>) -> Self {
        Self::SessionUnavailable(msg.into())
    }

    pub fn camera_unavailable(msg: impl Into<String>) -> Self {
        Self::CameraUnavailable(msg.into())
    }

    pub fn render_target(msg: impl Into<String>) -> Self {
        Self::RenderTarget(msg.into())
    }

    pub fn worker_not_ready(msg: impl Into<String>) -> Self {
        Self::WorkerNotReady(msg.into())
    }

    pub fn transfer_failure(msg: impl Into<String>) -> Self {
        Self::TransferFailure(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SessionUnavailable(_) | Self::RenderTarget(_) => Severity::Fatal,
            Self::CameraUnavailable(_)
            | Self::WorkerNotReady(_)
            | Self::TransferFailure(_)
            | Self::Validation(_)
            | Self::Other(_) => Severity::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            PipelineError::session_unavailable("x")
                .to_string()
                .contains("session unavailable:")
        );
        assert!(
            PipelineError::camera_unavailable("x")
                .to_string()
                .contains("camera unavailable:")
        );
        assert!(
            PipelineError::render_target("x")
                .to_string()
                .contains("render target error:")
        );
        assert!(
            PipelineError::worker_not_ready("x")
                .to_string()
                .contains("worker not ready:")
        );
        assert!(
            PipelineError::transfer_failure("x")
                .to_string()
                .contains("transfer failure:")
        );
        assert!(
            PipelineError::validation("x")
                .to_string()
                .contains("validation error:")
        );
    }

    #[test]
    fn only_session_and_render_target_are_fatal() {
        assert!(PipelineError::session_unavailable("x").is_fatal());
        assert!(PipelineError::render_target("x").is_fatal());
        assert!(!PipelineError::camera_unavailable("x").is_fatal());
        assert!(!PipelineError::worker_not_ready("x").is_fatal());
        assert!(!PipelineError::transfer_failure("x").is_fatal());
        assert!(!PipelineError::validation("x").is_fatal());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = PipelineError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.severity(), Severity::Transient);
    }
}
