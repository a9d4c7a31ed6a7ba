//! Error types for the activity trail service.

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias.
pub type Result<T> = std::result::Result<T, TrailError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TrailError {
    #[error("[TRAIL-1001] invalid payload: {details}")]
    InvalidPayload { details: String },

    #[error("[TRAIL-2001] storage unavailable ({backend}): {details}")]
    StorageUnavailable {
        backend: &'static str,
        details: String,
    },

    #[error("[TRAIL-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TRAIL-3001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TRAIL-3002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TRAIL-3003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TRAIL-3101] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TrailError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "TRAIL-1001",
            Self::StorageUnavailable { .. } => "TRAIL-2001",
            Self::Serialization { .. } => "TRAIL-2101",
            Self::InvalidConfig { .. } => "TRAIL-3001",
            Self::MissingConfig { .. } => "TRAIL-3002",
            Self::ConfigParse { .. } => "TRAIL-3003",
            Self::Io { .. } => "TRAIL-3101",
        }
    }

    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::InvalidPayload {
            details: details.into(),
        }
    }

    pub fn storage_unavailable(backend: &'static str, details: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            backend,
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for TrailError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StorageUnavailable {
            backend: "sqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrailError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TrailError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(TrailError::invalid_payload("x").code(), "TRAIL-1001");
        assert_eq!(
            TrailError::storage_unavailable("sqlite", "gone").code(),
            "TRAIL-2001"
        );
    }

    #[test]
    fn display_carries_code_and_details() {
        let err = TrailError::invalid_payload("missing field: sessionId");
        assert_eq!(
            err.to_string(),
            "[TRAIL-1001] invalid payload: missing field: sessionId"
        );
    }

    #[test]
    fn rusqlite_errors_surface_as_storage_unavailable() {
        let err: TrailError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(
            err,
            TrailError::StorageUnavailable {
                backend: "sqlite",
                ..
            }
        ));
    }
}
