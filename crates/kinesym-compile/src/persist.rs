//! On-disk artifacts for compiled functions.
//!
//! An artifact is a single JSON document holding the tape, the parameter
//! layout and the graph's [`CacheKey`].  Loading is forgiving: a file that
//! cannot be decoded, was written by another format version or fails tape
//! validation is logged, deleted and reported as absent, so the caller simply
//! recompiles.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::CompileError;
use crate::function::CompiledFunction;
use crate::lower::CacheKey;
use crate::parameter::Parameter;
use crate::tape::Tape;

/// Version of the artifact layout.  Artifacts with any other version are
/// discarded on load.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Artifact {
    format_version: u32,
    key: CacheKey,
    created_at: DateTime<Utc>,
    parameters: Vec<Parameter>,
    shape: (usize, usize),
    tape: Tape,
}

impl CompiledFunction {
    /// Write this function to `path`, creating parent directories.
    ///
    /// The document is written to a sibling temporary file first and renamed
    /// into place, so readers never observe a half-written artifact.
    pub fn save(&self, path: &Path) -> Result<(), CompileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let artifact = Artifact {
            format_version: FORMAT_VERSION,
            key: self.key(),
            created_at: Utc::now(),
            parameters: self.parameters().to_vec(),
            shape: self.shape(),
            tape: self.tape().clone(),
        };
        let json = serde_json::to_vec(&artifact)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), key = %artifact.key, bytes = json.len(), "saved compiled function");
        Ok(())
    }

    /// Read a function saved by [`save`](Self::save).
    ///
    /// Returns `Ok(None)` when the file does not exist, and also when it
    /// exists but is unusable; the unusable file is removed.
    ///
    /// # Errors
    ///
    /// Only I/O errors other than "not found" while reading.
    pub fn load(path: &Path) -> Result<Option<Self>, CompileError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match decode(&bytes) {
            Ok(function) => {
                debug!(path = %path.display(), key = %function.key(), "loaded compiled function");
                Ok(Some(function))
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "discarding unusable compiled artifact");
                discard(path);
                Ok(None)
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<CompiledFunction, CompileError> {
    let artifact: Artifact = serde_json::from_slice(bytes)?;
    if artifact.format_version != FORMAT_VERSION {
        return Err(CompileError::InvalidArtifact(format!(
            "format version {} (expected {FORMAT_VERSION})",
            artifact.format_version
        )));
    }
    let input_len = artifact.parameters.iter().map(Parameter::len).sum();
    artifact
        .tape
        .validate(input_len, artifact.shape.0 * artifact.shape.1)?;
    Ok(CompiledFunction::from_parts(
        artifact.key,
        artifact.parameters,
        artifact.shape,
        artifact.tape,
    ))
}

/// Best-effort removal of an unusable artifact.
pub(crate) fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove compiled artifact");
        }
    }
}
