//! Error taxonomy for dataset generation, record I/O and loading.
//!
//! Fatal conditions are variants of [`DatasetError`]. Public I/O entry points
//! return [`anyhow::Result`], so callers that need to branch on the kind of
//! failure use `err.downcast_ref::<DatasetError>()`.
//!
//! Per-item preprocessing failures are *not* fatal: they are carried as
//! [`PreprocessingError`] values and collected in an
//! [`ErrorRecord`](crate::generate::ErrorRecord).

use std::path::PathBuf;
use thiserror::Error;

use crate::tensor::DType;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("label {label:?} in item #{position} is not in the fitted vocabulary")]
    UnknownLabel { label: String, position: usize },

    #[error("slot {slot}: rank of shape {shape:?} does not match schema shape {expected:?}")]
    SchemaRank {
        slot: usize,
        shape: Vec<usize>,
        expected: Vec<i64>,
    },

    #[error("example has {found} slots but the schema has {expected}")]
    SlotCount { expected: usize, found: usize },

    #[error("slot {slot}: shape {shape:?} does not conform to schema shape {schema:?}")]
    NonConforming {
        slot: usize,
        shape: Vec<usize>,
        schema: Vec<i64>,
    },

    #[error(
        "slot {slot}: schema shape {schema:?} has a variable inner dimension and cannot be framed"
    )]
    RaggedInnerDimension { slot: usize, schema: Vec<i64> },

    #[error("no example has been observed yet, schema is empty")]
    EmptySchema,

    #[error("tensor of {dtype:?} has {len} elements but shape {shape:?} needs {expected}")]
    InvalidTensor {
        dtype: DType,
        len: usize,
        shape: Vec<usize>,
        expected: usize,
    },

    #[error("{sources} feature sources but {labels} label lists")]
    LengthMismatch { sources: usize, labels: usize },

    #[error(
        "destination {} already exists and is not empty (pass overwrite to replace it)",
        path.display()
    )]
    DestinationExists { path: PathBuf },

    #[error("no metadata found at {}", path.display())]
    MissingMetadata { path: PathBuf },

    #[error("metadata format version {found} is not supported (expected {expected})")]
    MetadataVersion { found: u32, expected: u32 },

    #[error("split {split:?} is not part of this dataset")]
    UnknownSplit { split: String },

    #[error("corrupt record file {} at byte {offset}: {reason}", path.display())]
    CorruptRecord {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("checksum mismatch for {}: expected {expected}, found {found}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("compression {name} is not enabled in this build")]
    CompressionUnavailable { name: &'static str },
}

/// A single raw item that could not be turned into an example.
///
/// `origin` is the `Debug` rendering of the feature source, kept so the error
/// can be reported without the generic source type.
#[derive(Debug, Error)]
#[error("item #{position} ({origin}) failed: {cause:#}")]
pub struct PreprocessingError {
    pub position: usize,
    pub origin: String,
    pub cause: anyhow::Error,
}
