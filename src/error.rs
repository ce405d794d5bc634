use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Failure of one bundle build. Every variant names the archive.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Bundle {jar} has a configuration error: {message}")]
    Configuration { jar: String, message: String },

    #[error("Bundle {jar} has {} error(s): {}", .errors.len(), summarize(.errors))]
    Failed {
        jar: String,
        errors: Vec<Diagnostic>,
    },

    #[error("Bundle {jar} could not be built: {source:#}")]
    Io {
        jar: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    pub fn jar(&self) -> &str {
        match self {
            Self::Configuration { jar, .. } | Self::Failed { jar, .. } | Self::Io { jar, .. } => {
                jar
            }
        }
    }
}

fn summarize(errors: &[Diagnostic]) -> String {
    errors
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
