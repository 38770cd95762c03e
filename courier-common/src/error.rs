use thiserror::Error;

/// Startup-fatal configuration problems.
///
/// These are never retried: the owning process reports them and exits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required setting has no value in either the config file or the environment.
    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting is present but unusable.
    #[error("Invalid value for `{setting}`: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Unable to load configuration: {0}")]
    Load(String),
}

impl ConfigurationError {
    pub(crate) fn invalid(setting: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            setting,
            reason: reason.into(),
        }
    }
}
