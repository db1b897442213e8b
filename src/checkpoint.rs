//! JSON checkpoints: the only cache in the pipeline.
//!
//! Every stage writes its result to a deterministic path and treats an
//! existing file there as "already done". Writes go to a temp file in the
//! target directory followed by a rename, so an interrupted run never leaves
//! a truncated checkpoint that a later run would mistake for finished work.
//!
//! Deduplication and table substitution rewrite the normalized document in
//! place, so for them the file's existence says nothing. They record
//! themselves under `model_metadata["stages"]` instead, see [`has_stage`].

use crate::document::Document;
use crate::error::ZoneDocError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const STAGES_KEY: &str = "stages";

/// Result of invoking a stage entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran and wrote this checkpoint.
    Done(PathBuf),
    /// The checkpoint already existed; nothing was recomputed.
    AlreadyDone(PathBuf),
}

impl StageOutcome {
    pub fn path(&self) -> &Path {
        match self {
            StageOutcome::Done(p) | StageOutcome::AlreadyDone(p) => p,
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, StageOutcome::AlreadyDone(_))
    }
}

/// Read a checkpoint as untyped JSON.
pub fn read_value(path: &Path) -> Result<Value, ZoneDocError> {
    let bytes = std::fs::read(path).map_err(|e| ZoneDocError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ZoneDocError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read a checkpoint and decode it against a schema. Schema mismatches are
/// reported as [`ZoneDocError::MalformedInput`] naming `what`.
pub fn read_as<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T, ZoneDocError> {
    let value = read_value(path)?;
    serde_json::from_value(value)
        .map_err(|e| ZoneDocError::malformed(what, format!("{}: {}", path.display(), e)))
}

/// Load and validate a persisted [`Document`].
pub fn read_document(path: &Path) -> Result<Document, ZoneDocError> {
    let doc: Document = read_as(path, "document")?;
    doc.validate()?;
    Ok(doc)
}

/// Atomically write `value` as pretty-printed JSON, creating parent
/// directories as needed.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ZoneDocError> {
    let write_err = |e: std::io::Error| ZoneDocError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| ZoneDocError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(b"\n").map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!("Wrote checkpoint {}", path.display());
    Ok(())
}

/// Validate and persist a [`Document`].
pub fn write_document(path: &Path, doc: &Document) -> Result<(), ZoneDocError> {
    doc.validate()?;
    write_json(path, doc)
}

/// Whether `stage` has already been applied to this document.
pub fn has_stage(doc: &Document, stage: &str) -> bool {
    doc.model_metadata
        .get(STAGES_KEY)
        .and_then(Value::as_array)
        .is_some_and(|stages| stages.iter().any(|s| s.as_str() == Some(stage)))
}

/// Record that `stage` has been applied to this document.
pub fn mark_stage(doc: &mut Document, stage: &str) {
    if has_stage(doc, stage) {
        return;
    }
    let entry = doc
        .model_metadata
        .entry(STAGES_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(stages) => stages.push(Value::from(stage)),
        other => *other = Value::Array(vec![Value::from(stage)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{document, page};
    use tempfile::TempDir;

    #[test]
    fn document_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/doc.json");
        let doc = document(vec![page(1, &["Intro"], vec![])]);
        write_document(&path, &doc).unwrap();
        assert_eq!(read_document(&path).unwrap(), doc);
        // No temp files left behind next to the checkpoint.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn rewriting_same_document_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let doc = document(vec![page(1, &["a", "b"], vec![])]);
        write_document(&path, &doc).unwrap();
        let first = std::fs::read(&path).unwrap();
        write_document(&path, &doc).unwrap();
        assert_eq!(first, std::fs::read(&path).unwrap());
    }

    #[test]
    fn schema_mismatch_is_malformed_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"pages": []}"#).unwrap();
        assert!(matches!(
            read_document(&path),
            Err(ZoneDocError::MalformedInput { what: "document", .. })
        ));
    }

    #[test]
    fn invalid_json_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        match read_value(&path) {
            Err(ZoneDocError::Json { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Json error, got {other:?}"),
        }
    }

    #[test]
    fn stage_markers_are_recorded_once() {
        let mut doc = document(vec![]);
        assert!(!has_stage(&doc, "dedup"));
        mark_stage(&mut doc, "dedup");
        mark_stage(&mut doc, "dedup");
        mark_stage(&mut doc, "tables");
        assert!(has_stage(&doc, "dedup"));
        assert_eq!(
            doc.model_metadata["stages"],
            serde_json::json!(["dedup", "tables"])
        );
    }
}
