//! User media fixtures.
//!
//! An external generator writes one directory per user under the media root,
//! each holding the ID images and a `meta.json` descriptor:
//!
//! ```json
//! { "seed": "u1718…", "id": "8207106197083", "issueDate": "2024-06-10",
//!   "idFront": "/abs/id_front.png", "idBack": "/abs/id_back.png" }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid media descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ID image {0} does not exist")]
    MissingImage(PathBuf),
    #[error("ID number {0:?} is not 13 digits")]
    InvalidIdNumber(String),
    #[error("no media descriptors under {0}")]
    Empty(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMedia {
    pub seed: String,
    pub id: String,
    pub issue_date: NaiveDate,
    pub id_front: PathBuf,
    pub id_back: PathBuf,
}

impl UserMedia {
    /// Read a descriptor. Relative image paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, MediaError> {
        let raw = fs::read_to_string(path).map_err(|source| MediaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut media: UserMedia =
            serde_json::from_str(&raw).map_err(|source| MediaError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(dir) = path.parent() {
            for image in [&mut media.id_front, &mut media.id_back] {
                if image.is_relative() {
                    *image = dir.join(&*image);
                }
            }
        }
        Ok(media)
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        if self.id.len() != 13 || !self.id.chars().all(|c| c.is_ascii_digit()) {
            return Err(MediaError::InvalidIdNumber(self.id.clone()));
        }
        for image in [&self.id_front, &self.id_back] {
            if !image.is_file() {
                return Err(MediaError::MissingImage(image.clone()));
            }
        }
        Ok(())
    }
}

/// Descriptors under `root`, newest directory first.
pub fn discover(root: &Path) -> Result<Vec<UserMedia>, MediaError> {
    let entries = fs::read_dir(root).map_err(|source| MediaError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let meta = entry.path().join(META_FILE);
        if !meta.is_file() {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified()).ok();
        found.push((modified, entry.file_name(), meta));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    found
        .into_iter()
        .map(|(_, _, meta)| UserMedia::load(&meta))
        .collect()
}

/// The `count` newest valid descriptors.
pub fn take_newest(root: &Path, count: usize) -> Result<Vec<UserMedia>, MediaError> {
    let mut media = Vec::with_capacity(count);
    for candidate in discover(root)? {
        match candidate.validate() {
            Ok(()) => media.push(candidate),
            Err(err) => log::warn!("skipping media {}: {err}", candidate.seed),
        }
        if media.len() == count {
            break;
        }
    }
    if media.is_empty() && count > 0 {
        return Err(MediaError::Empty(root.to_path_buf()));
    }
    Ok(media)
}
