//! Archive kind inferred from the file-name prefix

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::store::FieldSchema;

/// Record kind carried by an archive (`RS_*` submissions, `RC_*` comments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Submission,
    Comment,
}

impl RecordKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with("RS") {
            Ok(RecordKind::Submission)
        } else if name.starts_with("RC") {
            Ok(RecordKind::Comment)
        } else {
            Err(Error::UnrecognizedKind(path.to_path_buf()))
        }
    }

    /// The single kind shared by every path; mixed kinds are rejected
    pub fn of_all(paths: &[PathBuf]) -> Result<Self> {
        let mut found: Option<(RecordKind, &PathBuf)> = None;
        for path in paths {
            let kind = RecordKind::from_path(path)?;
            match found {
                None => found = Some((kind, path)),
                Some((first, first_path)) if first != kind => {
                    return Err(Error::MixedKinds {
                        first: first_path.clone(),
                        second: path.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        found
            .map(|(kind, _)| kind)
            .ok_or(Error::NoArchives)
    }

    /// Fields that get a secondary index once loading finishes
    pub fn index_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Submission => &["name", "author", "subreddit_id", "created_utc"],
            RecordKind::Comment => &["parent_id", "name", "author", "subreddit_id", "created_utc"],
        }
    }

    pub fn schema(&self) -> FieldSchema {
        match self {
            RecordKind::Submission => FieldSchema::submissions(),
            RecordKind::Comment => FieldSchema::comments(),
        }
    }
}
