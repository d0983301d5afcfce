use std::time::Duration;

/// Fatal errors returned by [`crate::orchestrator::Orchestrator::run`].
///
/// Startup variants name the phase that failed. The `Task*` variants are
/// reported by the supervisor after startup completed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to initialize workspace")]
    Initialize(#[source] anyhow::Error),

    #[error("environment check failed")]
    Environment(#[source] anyhow::Error),

    #[error("failed to create dashboard server")]
    DashboardConstruction(#[source] anyhow::Error),

    #[error("failed to create API server")]
    ApiConstruction(#[source] anyhow::Error),

    #[error("dashboard server failed to initialize")]
    DashboardInit(#[source] anyhow::Error),

    #[error("dashboard server did not become ready within {0:?}")]
    DashboardInitTimeout(Duration),

    #[error("task '{name}' failed")]
    TaskFailed {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("task '{name}' stopped unexpectedly")]
    TaskStopped { name: &'static str },

    #[error("task '{name}' panicked: {message}")]
    TaskPanicked { name: &'static str, message: String },
}

impl ServiceError {
    /// True for errors raised before the service reported itself started.
    pub fn is_startup(&self) -> bool {
        !matches!(
            self,
            Self::TaskFailed { .. } | Self::TaskStopped { .. } | Self::TaskPanicked { .. }
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    #[error("a message handler is already attached to this hub")]
    HandlerAlreadyAttached,
}

#[cfg(test)]
mod tests {
    use {super::*, std::error::Error as _};

    #[test]
    fn phase_errors_keep_their_source() {
        let err = ServiceError::Initialize(anyhow::anyhow!("mod.pp not found"));
        assert_eq!(err.to_string(), "failed to initialize workspace");
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("mod.pp not found")
        );
        assert!(err.is_startup());
    }

    #[test]
    fn task_errors_are_not_startup() {
        let err = ServiceError::TaskStopped { name: "api-server" };
        assert_eq!(err.to_string(), "task 'api-server' stopped unexpectedly");
        assert!(!err.is_startup());
    }
}
