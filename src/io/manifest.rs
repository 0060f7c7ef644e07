//! JSON Lines manifests of raw items.
//!
//! One line per raw item:
//!
//! ```text
//! {"split": "training", "source": "clips/a.mp3", "labels": ["rock", "live"]}
//! ```
//!
//! Empty or whitespace-only lines are skipped. Relative sources are resolved
//! against the manifest's directory. A manifest may be gzip or zstd compressed
//! (picked from its extension, as for record files).

use std::fs::{File, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{RawDataProvider, RawSplit, Split};
use crate::io::compression::{Compression, RecordSink, open_reader};

/// One manifest line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub split: Split,
    pub source: PathBuf,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Read every entry of a manifest, in file order.
///
/// # Errors
/// If the file cannot be opened or decoded, or a line fails to parse. The
/// error names the offending line number. An entry with split `all` is
/// rejected: that split only exists as a union.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = BufReader::new(open_reader(f, path)?);
    let mut out = Vec::new();
    for (i, line) in rdr.lines().enumerate() {
        let line = line.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(&line).with_context(|| {
            format!("parse manifest line {} in {}: {}", i + 1, path.display(), line)
        })?;
        anyhow::ensure!(
            entry.split != Split::All,
            "manifest line {} in {}: split `all` cannot be listed directly",
            i + 1,
            path.display()
        );
        out.push(entry);
    }
    Ok(out)
}

/// Write entries as a manifest, one JSON object per line.
///
/// Parent directories are created as needed. Returns the number of lines.
///
/// # Errors
/// If the file cannot be created or an entry fails to serialize.
pub fn write_manifest(path: impl AsRef<Path>, entries: &[ManifestEntry]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(RecordSink::new(f, Compression::from_path(path))?);
    for (i, entry) in entries.iter().enumerate() {
        serde_json::to_writer(&mut w, entry)
            .with_context(|| format!("serialize entry #{} to {}", i, path.display()))?;
        w.write_all(b"\n")?;
    }
    let sink = w
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("flush {}", path.display()))?;
    sink.finish()
        .with_context(|| format!("finish {}", path.display()))?;
    Ok(entries.len())
}

/// [`RawDataProvider`] over a manifest file, loaded once up front.
#[derive(Clone, Debug)]
pub struct ManifestProvider {
    root: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl ManifestProvider {
    /// # Errors
    /// See [`read_manifest`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = read_manifest(path)?;
        let root = path
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        debug!(path = %path.display(), entries = entries.len(), "read manifest");
        Ok(Self { root, entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    fn resolve(&self, source: &Path) -> PathBuf {
        if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.root.join(source)
        }
    }
}

impl RawDataProvider<PathBuf> for ManifestProvider {
    /// Entries of `split` in file order; [`Split::All`] is every entry.
    fn load_split(&self, split: Split) -> Result<RawSplit<PathBuf>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| split == Split::All || e.split == split)
            .map(|e| (self.resolve(&e.source), e.labels.clone()))
            .unzip())
    }
}
