//! Module configuration handed over by the host.

/// Configuration for a module.
///
/// Hosts embedding the gate pass the module's section of their own
/// configuration as raw TOML; an empty config means "use the defaults the
/// module was constructed with".
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    /// Raw TOML string (if available).
    raw: Option<String>,
}

impl ModuleConfig {
    /// Creates a new empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ModuleConfig from a raw TOML string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
        }
    }

    /// Gets the raw configuration string.
    #[must_use]
    pub fn raw_config(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}
