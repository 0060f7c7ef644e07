//! Split-level orchestration: build, dump and load.
//!
//! A [`Dataset`] owns, per split, the raw label lists and a lazy
//! [`Generator`], plus one label dictionary (fit on `training`), one
//! [`Schema`] shared by every split, and one [`ErrorRecord`] per split.
//!
//! ```no_run
//! use corpusbeam::dataset::{BuildOptions, Dataset, DumpOptions, Split, load};
//! use corpusbeam::io::record::ReadOptions;
//! use corpusbeam::testing::{InMemoryProvider, fake_features};
//! # fn main() -> anyhow::Result<()> {
//! let provider = InMemoryProvider::new()
//!     .with_split(Split::Training, [("a.mp3".to_string(), vec!["rock"])]);
//!
//! let options = BuildOptions::default();
//! let mut ds = Dataset::build(&provider, &[Split::Training], fake_features, options)?;
//! ds.dump("out", None, &DumpOptions::default())?;
//!
//! let loaded = load("out", &[Split::Training], ReadOptions::default())?;
//! for example in loaded.split(Split::Training)?.iter()? {
//!     let _example = example?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::fs::{create_dir_all, read_dir, remove_file};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DatasetError;
use crate::generate::{ErrorRecord, ExecMode, Generator, Pass, Preprocessor};
use crate::indexify::{self, LabelDict, UnknownLabelPolicy};
use crate::io::compression::Compression;
use crate::io::record::{ReadOptions, RecordSource, write_records};
use crate::metadata::{Metadata, SplitSummary, file_sha256};
use crate::schema::Schema;
use crate::tensor::Example;

/// A named partition of the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Training,
    Test,
    Validation,
    /// Union of the three concrete splits, stored as its own file.
    All,
}

impl Split {
    pub const CONCRETE: [Self; 3] = [Self::Training, Self::Test, Self::Validation];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Test => "test",
            Self::Validation => "validation",
            Self::All => "all",
        }
    }

    /// Record file name for this split, e.g. `test.records.gz`.
    #[must_use]
    pub fn file_name(self, compression: Compression) -> String {
        format!("{}.{}", self.as_str(), compression.extension())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Self::Training),
            "test" => Ok(Self::Test),
            "validation" => Ok(Self::Validation),
            "all" => Ok(Self::All),
            other => Err(DatasetError::UnknownSplit {
                split: other.to_string(),
            }),
        }
    }
}

/// Feature sources and their raw label lists, index-aligned.
pub type RawSplit<S> = (Vec<S>, Vec<Vec<String>>);

/// Source of raw `(feature sources, label lists)` per split.
///
/// Implementations must return both lists in a stable order.
pub trait RawDataProvider<S> {
    /// # Errors
    /// Whatever prevents the split from being listed.
    fn load_split(&self, split: Split) -> Result<RawSplit<S>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub unknown_labels: UnknownLabelPolicy,
    /// Mode used by [`Dataset::pass`].
    pub exec: ExecMode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpOptions {
    /// Write into a destination that already holds files.
    pub overwrite: bool,
    pub compression: Compression,
    pub exec: ExecMode,
}

/// Outcome of [`Dataset::dump`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpReport {
    pub directory: PathBuf,
    pub metadata: PathBuf,
    pub splits: BTreeMap<String, SplitSummary>,
}

impl DumpReport {
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.splits.values().map(|s| s.records).sum()
    }

    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.splits.values().map(|s| s.failed).sum()
    }
}

struct SplitState<S> {
    raw_labels: Vec<Vec<String>>,
    generator: Generator<S, Vec<i64>>,
    errors: ErrorRecord<S, Vec<i64>>,
}

/// In-memory dataset: lazy per-split generators and the state they feed.
pub struct Dataset<S> {
    exec: ExecMode,
    label_dict: Arc<LabelDict>,
    schema: Schema,
    splits: BTreeMap<Split, SplitState<S>>,
}

impl<S> Dataset<S>
where
    S: Debug + Clone + Send + Sync + 'static,
{
    /// Load the requested splits and index their labels.
    ///
    /// The vocabulary is always fit on [`Split::Training`], which is fetched
    /// from `provider` even when it is not among `splits`. Labels of every
    /// split are taken before preprocessing, so a label seen only on items
    /// that later fail still gets an index.
    ///
    /// # Errors
    /// Provider errors, mismatched list lengths, or
    /// [`DatasetError::UnknownLabel`] under [`UnknownLabelPolicy::Fail`].
    pub fn build<P, F>(
        provider: &P,
        splits: &[Split],
        preprocessor: F,
        options: BuildOptions,
    ) -> Result<Self>
    where
        P: RawDataProvider<S> + ?Sized,
        F: Preprocessor<S, Vec<i64>> + 'static,
    {
        let (train_x, train_y) = provider
            .load_split(Split::Training)
            .context("load split training")?;
        let (_, dict) = indexify::fit(&train_y);
        info!(labels = dict.len(), "fit label dictionary on training split");

        let mut preloaded = Some((train_x, train_y));
        let mut raw: Vec<(Split, RawSplit<S>)> = Vec::with_capacity(splits.len());
        for &split in splits {
            if split == Split::Training
                && let Some(training) = preloaded.take()
            {
                raw.push((split, training));
            } else if !raw.iter().any(|(s, _)| *s == split) {
                raw.push((split, load_raw(provider, split)?));
            }
        }
        Self::assemble(Arc::new(dict), raw, Arc::new(preprocessor), options)
    }

    /// Like [`build`](Self::build) but reuse an existing dictionary for every split.
    ///
    /// # Errors
    /// As for [`build`](Self::build).
    pub fn with_label_dict<P, F>(
        provider: &P,
        splits: &[Split],
        preprocessor: F,
        label_dict: Arc<LabelDict>,
        options: BuildOptions,
    ) -> Result<Self>
    where
        P: RawDataProvider<S> + ?Sized,
        F: Preprocessor<S, Vec<i64>> + 'static,
    {
        let mut raw: Vec<(Split, RawSplit<S>)> = Vec::with_capacity(splits.len());
        for &split in splits {
            if !raw.iter().any(|(s, _)| *s == split) {
                raw.push((split, load_raw(provider, split)?));
            }
        }
        Self::assemble(label_dict, raw, Arc::new(preprocessor), options)
    }

    fn assemble(
        label_dict: Arc<LabelDict>,
        raw: Vec<(Split, RawSplit<S>)>,
        preprocessor: Arc<dyn Preprocessor<S, Vec<i64>>>,
        options: BuildOptions,
    ) -> Result<Self> {
        let mut splits = BTreeMap::new();
        for (split, (sources, raw_labels)) in raw {
            let indexed = indexify::apply(&raw_labels, &label_dict, options.unknown_labels)
                .with_context(|| format!("index labels of split {split}"))?;
            let generator = Generator::new(sources, indexed, Arc::clone(&preprocessor))
                .with_context(|| format!("split {split}"))?;
            info!(split = %split, items = generator.len(), "prepared split");
            splits.insert(
                split,
                SplitState {
                    raw_labels,
                    generator,
                    errors: ErrorRecord::new(),
                },
            );
        }
        Ok(Self {
            exec: options.exec,
            label_dict,
            schema: Schema::new(),
            splits,
        })
    }

    #[must_use]
    pub fn label_dict(&self) -> &LabelDict {
        &self.label_dict
    }

    #[must_use]
    pub fn shared_label_dict(&self) -> Arc<LabelDict> {
        Arc::clone(&self.label_dict)
    }

    /// Schema accumulated over every pass so far.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn splits(&self) -> impl Iterator<Item = Split> + '_ {
        self.splits.keys().copied()
    }

    fn state(&self, split: Split) -> Result<&SplitState<S>, DatasetError> {
        self.splits.get(&split).ok_or_else(|| unknown(split))
    }

    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not built.
    pub fn generator(&self, split: Split) -> Result<&Generator<S, Vec<i64>>, DatasetError> {
        self.state(split).map(|s| &s.generator)
    }

    /// Failures of the latest pass over `split`.
    ///
    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not built.
    pub fn errors(&self, split: Split) -> Result<&ErrorRecord<S, Vec<i64>>, DatasetError> {
        self.state(split).map(|s| &s.errors)
    }

    /// Failures of the latest pass, with their raw string labels.
    ///
    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not built.
    pub fn failed_raw(&self, split: Split) -> Result<Vec<(S, Vec<String>)>, DatasetError> {
        let state = self.state(split)?;
        Ok(state
            .errors
            .iter()
            .map(|e| (e.source.clone(), state.raw_labels[e.position].clone()))
            .collect())
    }

    /// Lazily preprocess `split`, widening the shared schema as items are pulled.
    ///
    /// The split's error record is reset first, so afterwards it describes
    /// this pass only.
    ///
    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not built.
    pub fn stream(&mut self, split: Split) -> Result<Pass<'_, S, Vec<i64>>, DatasetError> {
        let mode = self.exec;
        let state = self.splits.get_mut(&split).ok_or_else(|| unknown(split))?;
        state.errors.clear();
        Ok(state.generator.pass_in(&mut self.schema, &mut state.errors, mode))
    }

    /// Run a full pass over `split` and collect the surviving examples.
    ///
    /// Uses the [`ExecMode`] given at build time.
    ///
    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not built.
    pub fn pass(&mut self, split: Split) -> Result<Vec<Example>, DatasetError> {
        Ok(self.stream(split)?.collect())
    }

    /// Write `splits` (default: every built split) under `dest`, then the metadata.
    ///
    /// Runs two passes per split and never holds a whole split in memory:
    /// 1. a schema pass over every requested split, whose examples are
    ///    dropped as soon as the schema has seen them;
    /// 2. a write pass that streams each split into its record file against
    ///    the now final schema.
    ///
    /// The error records describe the write pass. Metadata is written last, once.
    ///
    /// # Errors
    /// - [`DatasetError::UnknownSplit`] for a split that was not built.
    /// - [`DatasetError::DestinationExists`] if `dest` holds files and
    ///   `overwrite` is off. Checked before anything is written.
    /// - [`DatasetError::CompressionUnavailable`], schema, conformance or I/O errors.
    pub fn dump(
        &mut self,
        dest: impl AsRef<Path>,
        splits: Option<&[Split]>,
        options: &DumpOptions,
    ) -> Result<DumpReport> {
        let dest = dest.as_ref();
        let built: Vec<Split> = self.splits().collect();
        let mut requested: Vec<Split> = Vec::new();
        for &split in splits.unwrap_or(&built) {
            self.state(split)?;
            if !requested.contains(&split) {
                requested.push(split);
            }
        }
        if !options.compression.is_available() {
            return Err(DatasetError::CompressionUnavailable {
                name: options.compression.name(),
            }
            .into());
        }
        prepare_destination(dest, options.overwrite)?;

        for &split in &requested {
            let state = self.splits.get_mut(&split).ok_or_else(|| unknown(split))?;
            state.errors.clear();
            let kept = state
                .generator
                .pass_in(&mut self.schema, &mut state.errors, options.exec)
                .count();
            info!(split = %split, kept, failed = state.errors.len(), "inferred schema of split");
        }

        let mut summaries = BTreeMap::new();
        for split in requested {
            let file = split.file_name(options.compression);
            let path = dest.join(&file);
            let state = self.splits.get_mut(&split).ok_or_else(|| unknown(split))?;
            if state.generator.prime().is_none() && !state.generator.is_empty() {
                warn!(split = %split, "no item of split preprocesses cleanly");
            }
            state.errors.clear();
            info!(split = %split, path = %path.display(), "saving split");

            // The schema is final here; the write pass observes into a copy.
            let mut scratch = self.schema.clone();
            let examples = state.generator.pass_in(&mut scratch, &mut state.errors, options.exec);
            let records = write_records(&path, examples, &self.schema, options.compression)
                .with_context(|| format!("dump split {split}"))?;
            let failed = state.errors.len();
            let sha256 = file_sha256(&path)?;
            info!(split = %split, records, failed, "saved split");
            summaries.insert(
                split.as_str().to_string(),
                SplitSummary {
                    records,
                    failed,
                    file,
                    sha256,
                },
            );
        }

        let meta = Metadata::new((*self.label_dict).clone(), self.schema.clone(), summaries);
        let metadata = meta.write(dest)?;
        info!(path = %metadata.display(), "saved metadata");
        Ok(DumpReport {
            directory: dest.to_path_buf(),
            metadata,
            splits: meta.splits,
        })
    }
}


fn unknown(split: Split) -> DatasetError {
    DatasetError::UnknownSplit {
        split: split.as_str().to_string(),
    }
}

fn load_raw<S, P>(provider: &P, split: Split) -> Result<RawSplit<S>>
where
    P: RawDataProvider<S> + ?Sized,
{
    provider
        .load_split(split)
        .with_context(|| format!("load split {split}"))
}

fn prepare_destination(dest: &Path, overwrite: bool) -> Result<()> {
    if !dest.exists() {
        create_dir_all(dest).with_context(|| format!("mkdir -p {}", dest.display()))?;
        return Ok(());
    }
    let occupied = !dest.is_dir()
        || read_dir(dest)
            .with_context(|| format!("list {}", dest.display()))?
            .next()
            .is_some();
    if occupied && !overwrite {
        return Err(DatasetError::DestinationExists {
            path: dest.to_path_buf(),
        }
        .into());
    }
    // Stale metadata must not describe a half-written replacement.
    let stale = Metadata::path(dest);
    if stale.exists() {
        remove_file(&stale).with_context(|| format!("remove {}", stale.display()))?;
    }
    Ok(())
}

/// A dumped dataset opened for reading.
#[derive(Clone, Debug)]
pub struct LoadedDataset {
    directory: PathBuf,
    metadata: Metadata,
    label_dict: Arc<LabelDict>,
    schema: Arc<Schema>,
    splits: BTreeMap<Split, RecordSource>,
}

impl LoadedDataset {
    /// Read the metadata under `source` and prepare a record source per split.
    ///
    /// # Errors
    /// [`DatasetError::MissingMetadata`] without a metadata blob,
    /// [`DatasetError::UnknownSplit`] for a split that was never dumped.
    pub fn open(source: impl AsRef<Path>, splits: &[Split], options: ReadOptions) -> Result<Self> {
        let directory = source.as_ref().to_path_buf();
        info!(splits = ?splits, path = %directory.display(), "loading datasets");
        let metadata = Metadata::read(&directory)?;
        let schema = Arc::new(metadata.schema.clone());
        let mut sources = BTreeMap::new();
        for &split in splits {
            let summary = metadata.split(split.as_str()).ok_or_else(|| unknown(split))?;
            let path = directory.join(&summary.file);
            sources.insert(split, RecordSource::new(path, Arc::clone(&schema), options.clone()));
        }
        Ok(Self {
            directory,
            label_dict: Arc::new(metadata.label_dict.clone()),
            metadata,
            schema,
            splits: sources,
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn label_dict(&self) -> &LabelDict {
        &self.label_dict
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn splits(&self) -> impl Iterator<Item = Split> + '_ {
        self.splits.keys().copied()
    }

    /// # Errors
    /// [`DatasetError::UnknownSplit`] if `split` was not opened.
    pub fn split(&self, split: Split) -> Result<&RecordSource, DatasetError> {
        self.splits.get(&split).ok_or_else(|| unknown(split))
    }

    /// Check every dumped split file against its recorded digest.
    ///
    /// # Errors
    /// See [`Metadata::verify`].
    pub fn verify(&self) -> Result<()> {
        self.metadata.verify(&self.directory)
    }
}

/// Open a dumped dataset. Shorthand for [`LoadedDataset::open`].
///
/// # Errors
/// See [`LoadedDataset::open`].
pub fn load(
    source: impl AsRef<Path>,
    splits: &[Split],
    options: ReadOptions,
) -> Result<LoadedDataset> {
    LoadedDataset::open(source, splits, options)
}
