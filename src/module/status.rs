//! Module status reporting.

/// Represents the current status of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Module is initializing.
    Initializing,

    /// Module is running normally.
    Running,

    /// Module is running but with degraded functionality.
    ///
    /// The admission gate reports this while the allow-list cache is
    /// serving a snapshot whose last refresh failed.
    Degraded {
        /// Reason for degradation.
        reason: String,
    },

    /// Module is stopped.
    Stopped,
}

impl ModuleStatus {
    /// Returns `true` if the module is operational (running or degraded).
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded { .. })
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Degraded { reason } => write!(f, "degraded: {reason}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(ModuleStatus::Running.is_operational());

        let degraded = ModuleStatus::Degraded {
            reason: "stale allow-list".to_string(),
        };
        assert!(degraded.is_operational());
        assert_eq!(degraded.to_string(), "degraded: stale allow-list");

        assert!(!ModuleStatus::Stopped.is_operational());
        assert!(!ModuleStatus::Initializing.is_operational());
    }
}
