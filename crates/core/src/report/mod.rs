//! Build reports.
//!
//! A [`BuildReport`] is the serializable record of one assemble-and-link
//! run: what was built, how big it came out, where execution starts, and a
//! digest for identifying the artifact later. Frontends print it as text or
//! JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::elf::ElfArtifact;

/// Summary of one build, suitable for display and for JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Program name (typically derived from the source file name).
    pub program: String,
    /// Where the artifact was written.
    pub output: String,
    /// Code section size in bytes.
    pub code_size: usize,
    /// Data section size in bytes.
    pub data_size: usize,
    /// Total artifact size in bytes.
    pub total_size: usize,
    /// Entry point virtual address.
    pub entry: u64,
    /// Number of pointers resolved while linking.
    pub pointers_resolved: usize,
    /// SHA-256 of the artifact bytes, hex encoded.
    pub sha256: String,
    /// RFC 3339 timestamp of when the report was created.
    pub generated_at: String,
}

impl BuildReport {
    /// Summarize a finished artifact, stamped with the current time.
    pub fn from_artifact(
        program: impl Into<String>,
        output: impl Into<String>,
        artifact: &ElfArtifact,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            output: output.into(),
            code_size: artifact.code_size,
            data_size: artifact.data_size,
            total_size: artifact.bytes.len(),
            entry: artifact.entry,
            pointers_resolved: artifact.pointers_resolved,
            sha256: sha256.into(),
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
