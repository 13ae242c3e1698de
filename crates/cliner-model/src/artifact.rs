//! Versioned model artifact
//!
//! A trained model is stored as one JSON document: the format version, the
//! feature plan the passes were trained with, and every pass's vectorizer
//! and classifier weights.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use cliner_core::{ClinerError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::FeatureSignature;
use crate::model::TrainedPasses;

/// Artifact format written by this build
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub sequence_mode: bool,
    pub third_pass: bool,
    pub feature_plan: FeatureSignature,
    pub passes: TrainedPasses,
}

impl ModelArtifact {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| ClinerError::Artifact(format!("failed to serialize model: {e}")))?;
        fs::write(path, json).map_err(|source| ClinerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), version = self.format_version, "Saved model");
        Ok(())
    }

    /// Read an artifact, rejecting any format version other than the current one
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ClinerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            created_at = %artifact.created_at,
            third_pass = artifact.third_pass,
            "Loaded model"
        );
        Ok(artifact)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ClinerError::Artifact(format!("not a JSON document: {e}")))?;

        let found = value
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ClinerError::Artifact("missing format_version".to_string()))?;
        if found != u64::from(ARTIFACT_VERSION) {
            return Err(ClinerError::UnsupportedArtifactVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: ARTIFACT_VERSION,
            });
        }

        serde_json::from_value(value).map_err(|e| ClinerError::Artifact(format!("malformed model: {e}")))
    }
}
