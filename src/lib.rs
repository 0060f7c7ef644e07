//! # corpusbeam
//!
//! Turns labeled raw items (audio clips with multi-label genre tags, say) into a
//! normalized training corpus: string labels become dense integer indices,
//! a user preprocessor turns each item into a `(features, labels)` tensor
//! pair, and the results are written per split into a portable record format
//! that can be streamed back for training.
//!
//! ## Key Features
//!
//! - **Lazy, restartable generation** - preprocessing runs only when a pass is pulled
//! - **Failure isolation** - a bad item is logged and recorded, never aborts a pass
//! - **Schema inference** - per-slot dtype and shape, with disagreeing dimensions marked variable
//! - **Ragged features** - variable-length leading dimensions survive the round trip
//! - **Sequential and parallel passes** - identical output either way
//! - **Compressed splits** - gzip and zstd via feature flags
//! - **Integrity** - each split file's SHA-256 is recorded and can be verified
//!
//! ## Quick Start
//!
//! ```no_run
//! use corpusbeam::*;
//! use corpusbeam::testing::{failing_on, fake_features, genre_fixture};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let mut ds = Dataset::build(
//!     &genre_fixture(),
//!     &Split::CONCRETE,
//!     failing_on("bad", fake_features),
//!     BuildOptions::default(),
//! )?;
//! let report = ds.dump("corpus", None, &DumpOptions::default())?;
//! assert_eq!(report.total_failed(), 1);
//!
//! let loaded = load("corpus", &[Split::Training], ReadOptions::default())?;
//! let examples = loaded.split(Split::Training)?.read_all()?;
//! assert_eq!(examples.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Label dictionary
//!
//! [`indexify::fit`] assigns indices in first-seen order over the training
//! labels; [`indexify::apply`] maps other splits with the same [`LabelDict`].
//!
//! ### Generator
//!
//! A [`Generator`] pairs raw sources and indexed labels with a
//! [`Preprocessor`]. [`Generator::results`] yields one `Result` per item;
//! [`Generator::pass`] feeds successes to a [`Schema`] and failures to an
//! [`ErrorRecord`].
//!
//! ### Schema
//!
//! One [`SlotSchema`] per output slot: dtype, shape with `-1` for variable
//! dimensions, and the per-dimension min and max observed.
//!
//! ### Records
//!
//! Each example is stored as a sequence record: labels as context, features as
//! a list of steps along the leading dimension. The [`Metadata`] blob next to
//! the split files carries the dictionary and the final schema.
//!
//! ## Logging
//!
//! Events are emitted through `tracing`; install any subscriber to see them.

pub mod dataset;
pub mod error;
pub mod generate;
pub mod indexify;
pub mod io;
pub mod metadata;
pub mod schema;
pub mod tensor;
pub mod testing;

pub use dataset::{
    BuildOptions, Dataset, DumpOptions, DumpReport, LoadedDataset, RawDataProvider, Split, load,
};
pub use error::{DatasetError, PreprocessingError};
pub use generate::{ErrorRecord, ExecMode, FailedExample, Generator, Identity, Preprocessor};
pub use indexify::{LabelDict, UnknownLabelPolicy};
pub use io::compression::Compression;
pub use io::manifest::{ManifestEntry, ManifestProvider, read_manifest, write_manifest};
pub use io::record::{ReadOptions, RecordReader, RecordSource, read_records, write_records};
pub use metadata::{Metadata, SplitSummary};
pub use schema::{Schema, SlotSchema, VARIABLE};
pub use tensor::{DType, Example, Tensor, TensorData, TensorSpec};
