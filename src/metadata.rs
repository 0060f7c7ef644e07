//! The per-dataset metadata blob.
//!
//! Written once per output directory as `metadata.json`, after every dumped
//! split is complete, so the schema it carries is final. Readers cannot
//! decode split files without it.

use std::collections::BTreeMap;
use std::fs::{File, rename};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DatasetError;
use crate::indexify::LabelDict;
use crate::schema::Schema;

/// Version of the metadata and record layout written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// File name of the metadata blob inside an output directory.
pub const METADATA_FILE: &str = "metadata.json";

/// What was written for one split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// Records in the split file.
    pub records: usize,
    /// Raw items that failed preprocessing and were left out.
    pub failed: usize,
    /// File name relative to the output directory.
    pub file: String,
    /// SHA-256 of the split file, hex encoded.
    pub sha256: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub format_version: u32,
    pub label_dict: LabelDict,
    pub schema: Schema,
    pub splits: BTreeMap<String, SplitSummary>,
}

impl Metadata {
    #[must_use]
    pub fn new(
        label_dict: LabelDict,
        schema: Schema,
        splits: BTreeMap<String, SplitSummary>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            label_dict,
            schema,
            splits,
        }
    }

    #[must_use]
    pub fn path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(METADATA_FILE)
    }

    #[must_use]
    pub fn split(&self, name: &str) -> Option<&SplitSummary> {
        self.splits.get(name)
    }

    /// Persist to `dir/metadata.json`.
    ///
    /// # Errors
    /// If the file cannot be created, serialized or renamed into place.
    pub fn write(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = Self::path(dir);
        let tmp = path.with_extension("json.partial");
        let f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize metadata to {}", tmp.display()))?;
        w.write_all(b"\n")?;
        w.flush()?;
        rename(&tmp, &path)
            .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
        Ok(path)
    }

    /// Load `dir/metadata.json`.
    ///
    /// # Errors
    /// [`DatasetError::MissingMetadata`] if the file does not exist,
    /// [`DatasetError::MetadataVersion`] for an unknown format version, or a
    /// parse error.
    pub fn read(dir: impl AsRef<Path>) -> Result<Self> {
        let path = Self::path(dir);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DatasetError::MissingMetadata { path }.into());
            }
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };
        let meta: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse metadata {}", path.display()))?;
        if meta.format_version != FORMAT_VERSION {
            return Err(DatasetError::MetadataVersion {
                found: meta.format_version,
                expected: FORMAT_VERSION,
            }
            .into());
        }
        Ok(meta)
    }

    /// Recompute the digest of every split file under `dir`.
    ///
    /// # Errors
    /// [`DatasetError::ChecksumMismatch`] for the first file whose content
    /// changed, or an I/O error.
    pub fn verify(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for summary in self.splits.values() {
            let path = dir.join(&summary.file);
            let found = file_sha256(&path)?;
            if found != summary.sha256 {
                return Err(DatasetError::ChecksumMismatch {
                    path,
                    expected: summary.sha256.clone(),
                    found,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Hex SHA-256 of a file's bytes.
///
/// # Errors
/// If the file cannot be opened or read.
pub fn file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}
