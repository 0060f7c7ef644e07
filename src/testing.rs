//! Fixtures for exercising datasets without real audio.
//!
//! - [`InMemoryProvider`]: a [`RawDataProvider`] over literal pairs
//! - [`genre_fixture`]: a small multi-label genre corpus with one bad item
//! - [`fake_features`]: a deterministic preprocessor producing ragged `[n, 4]` features
//! - [`failing_on`]: wrap a preprocessor so it fails for one source
//!
//! ```
//! use corpusbeam::dataset::{BuildOptions, Dataset, Split};
//! use corpusbeam::testing::{failing_on, fake_features, genre_fixture};
//!
//! let mut ds = Dataset::build(
//!     &genre_fixture(),
//!     &[Split::Training],
//!     failing_on("bad", fake_features),
//!     BuildOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(ds.pass(Split::Training).unwrap().len(), 2);
//! ```

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::dataset::{RawDataProvider, RawSplit, Split};
use crate::generate::Preprocessor;
use crate::tensor::{Example, Tensor};

/// Width of the feature rows produced by [`fake_features`].
pub const FAKE_FEATURE_WIDTH: usize = 4;

/// Raw pairs held in memory, keyed by split.
///
/// Splits that were never given are empty. [`Split::All`] is the
/// concatenation of the concrete splits unless it was set explicitly.
#[derive(Clone, Debug)]
pub struct InMemoryProvider<S = String> {
    splits: HashMap<Split, RawSplit<S>>,
}

impl<S> Default for InMemoryProvider<S> {
    fn default() -> Self {
        Self {
            splits: HashMap::new(),
        }
    }
}

impl<S> InMemoryProvider<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pairs` to `split`.
    #[must_use]
    pub fn with_split<I, L>(mut self, split: Split, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<L>)>,
        L: Into<String>,
    {
        for (source, labels) in pairs {
            self.push(split, source, labels);
        }
        self
    }

    pub fn push<L: Into<String>>(&mut self, split: Split, source: S, labels: Vec<L>) {
        let (sources, label_lists) = self
            .splits
            .entry(split)
            .or_insert_with(|| (Vec::new(), Vec::new()));
        sources.push(source);
        label_lists.push(labels.into_iter().map(Into::into).collect());
    }
}

impl<S: Clone> RawDataProvider<S> for InMemoryProvider<S> {
    fn load_split(&self, split: Split) -> Result<RawSplit<S>> {
        if let Some(raw) = self.splits.get(&split) {
            return Ok(raw.clone());
        }
        if split != Split::All {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut all: RawSplit<S> = (Vec::new(), Vec::new());
        for concrete in Split::CONCRETE {
            if let Some((sources, labels)) = self.splits.get(&concrete) {
                all.0.extend(sources.iter().cloned());
                all.1.extend(labels.iter().cloned());
            }
        }
        Ok(all)
    }
}

/// Small genre corpus.
///
/// Training holds `f1: [rock]`, `f2: [pop, rock]` and `bad: [jazz]`; pair it
/// with [`failing_on`]`("bad", ..)` to get exactly one preprocessing failure.
/// Test and validation hold one clean item each, using training labels only.
#[must_use]
pub fn genre_fixture() -> InMemoryProvider<String> {
    InMemoryProvider::new()
        .with_split(
            Split::Training,
            [
                ("f1".to_string(), vec!["rock"]),
                ("f2".to_string(), vec!["pop", "rock"]),
                ("bad".to_string(), vec!["jazz"]),
            ],
        )
        .with_split(Split::Test, [("t1".to_string(), vec!["pop"])])
        .with_split(Split::Validation, [("v1".to_string(), vec!["rock", "pop"])])
}

/// Deterministic stand-in for audio feature extraction.
///
/// A source named `s` yields `s.len()` frames of [`FAKE_FEATURE_WIDTH`] `f32`
/// values derived from its bytes, so sources of different name lengths give
/// ragged outer dimensions. Labels pass through as an `i64` vector.
///
/// # Errors
/// Never fails; the signature matches [`Preprocessor`].
#[allow(clippy::ptr_arg)]
pub fn fake_features(source: &String, labels: &Vec<i64>) -> Result<Example> {
    let frames = source.len();
    let values: Vec<f32> = source
        .bytes()
        .flat_map(|b| {
            (0u8..)
                .take(FAKE_FEATURE_WIDTH)
                .map(move |k| f32::from(b) / 255.0 + f32::from(k))
        })
        .collect();
    Ok(Example::new(
        Tensor::new(values, vec![frames, FAKE_FEATURE_WIDTH])?,
        Tensor::vector(labels.clone()),
    ))
}

/// Wrap `inner` so that the source equal to `name` fails to preprocess.
pub fn failing_on<P>(
    name: impl Into<String>,
    inner: P,
) -> impl Fn(&String, &Vec<i64>) -> Result<Example> + Send + Sync + 'static
where
    P: Preprocessor<String, Vec<i64>> + 'static,
{
    let name = name.into();
    move |source: &String, labels: &Vec<i64>| {
        if *source == name {
            bail!("cannot decode {source}");
        }
        inner.process(source, labels)
    }
}
