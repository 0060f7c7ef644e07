//! Lazy, restartable preprocessing of raw `(source, labels)` pairs.
//!
//! A [`Generator`] owns the raw inputs and a [`Preprocessor`]. It never holds
//! schema or error state itself; those are passed in by the caller for each
//! pass, so several passes (or several splits sharing one schema) compose
//! without hidden globals.
//!
//! Two views of the same work:
//! - [`Generator::results`] yields one `Result<Example, PreprocessingError>`
//!   per input, in order, with no side effects.
//! - [`Generator::pass`] is the recovering adapter: successes are fed to the
//!   [`Schema`] and yielded, failures are logged and appended to an
//!   [`ErrorRecord`]. One bad item never ends the pass.
//!
//! ```
//! use std::sync::Arc;
//! use corpusbeam::generate::{ErrorRecord, Generator};
//! use corpusbeam::schema::Schema;
//! use corpusbeam::tensor::{Example, Tensor};
//!
//! let r#gen = Generator::new(
//!     vec![3usize, 0, 5],
//!     vec![vec![0i64], vec![1], vec![0]],
//!     Arc::new(|n: &usize, y: &Vec<i64>| -> anyhow::Result<Example> {
//!         anyhow::ensure!(*n > 0, "empty clip");
//!         Ok(Example::new(Tensor::vector(vec![0.5f32; *n]), Tensor::vector(y.clone())))
//!     }),
//! )
//! .unwrap();
//!
//! let mut schema = Schema::new();
//! let mut errors = ErrorRecord::new();
//! let kept: Vec<_> = r#gen.pass(&mut schema, &mut errors).collect();
//! assert_eq!(kept.len(), 2);
//! assert_eq!(errors.len(), 1);
//! assert_eq!(schema.features().unwrap().shape, vec![-1]);
//! ```

use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DatasetError, PreprocessingError};
use crate::schema::Schema;
use crate::tensor::{Example, SLOTS, Tensor, TensorSpec};

/// Turns one raw pair into an [`Example`]. May fail for any reason.
pub trait Preprocessor<S, L>: Send + Sync {
    /// # Errors
    /// Any error; the generator records it against the item and moves on.
    fn process(&self, source: &S, labels: &L) -> anyhow::Result<Example>;
}

impl<S, L, F> Preprocessor<S, L> for F
where
    F: Fn(&S, &L) -> anyhow::Result<Example> + Send + Sync,
{
    fn process(&self, source: &S, labels: &L) -> anyhow::Result<Example> {
        self(source, labels)
    }
}

/// Pass-through preprocessor for sources that already are feature tensors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Preprocessor<Tensor, Vec<i64>> for Identity {
    fn process(&self, source: &Tensor, labels: &Vec<i64>) -> anyhow::Result<Example> {
        Ok(Example::new(source.clone(), Tensor::vector(labels.clone())))
    }
}

/// How a full pass is executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Sequential,
    /// Preprocess items on a rayon pool; schema updates and error appends
    /// still happen one at a time, in input order.
    Parallel { threads: Option<usize> },
}

/// A raw item that failed, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExample<S, L> {
    /// Index of the item in the generator's input.
    pub position: usize,
    pub source: S,
    pub labels: L,
    pub reason: String,
}

/// Items that failed preprocessing during one or more passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord<S, L> {
    entries: Vec<FailedExample<S, L>>,
}

impl<S, L> Default for ErrorRecord<S, L> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S, L> ErrorRecord<S, L> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failed: FailedExample<S, L>) {
        self.entries.push(failed);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FailedExample<S, L>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn entries(&self) -> &[FailedExample<S, L>] {
        &self.entries
    }

    /// The failing `(source, labels)` pairs, in the order they failed.
    #[must_use]
    pub fn pairs(&self) -> Vec<(&S, &L)> {
        self.entries.iter().map(|e| (&e.source, &e.labels)).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<S: Serialize, L: Serialize> ErrorRecord<S, L> {
    /// Export the record as pretty JSON.
    ///
    /// # Errors
    /// If a source or label list fails to serialize.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }
}

impl<'a, S, L> IntoIterator for &'a ErrorRecord<S, L> {
    type Item = &'a FailedExample<S, L>;
    type IntoIter = std::slice::Iter<'a, FailedExample<S, L>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Restartable source of preprocessed examples.
pub struct Generator<S, L> {
    sources: Arc<[S]>,
    labels: Arc<[L]>,
    preprocessor: Arc<dyn Preprocessor<S, L>>,
}

impl<S, L> Clone for Generator<S, L> {
    fn clone(&self) -> Self {
        Self {
            sources: Arc::clone(&self.sources),
            labels: Arc::clone(&self.labels),
            preprocessor: Arc::clone(&self.preprocessor),
        }
    }
}

impl<S, L> Generator<S, L>
where
    S: Debug + Clone,
    L: Clone,
{
    /// # Errors
    /// [`DatasetError::LengthMismatch`] if `sources` and `labels` differ in length.
    pub fn new(
        sources: Vec<S>,
        labels: Vec<L>,
        preprocessor: Arc<dyn Preprocessor<S, L>>,
    ) -> Result<Self, DatasetError> {
        if sources.len() != labels.len() {
            return Err(DatasetError::LengthMismatch {
                sources: sources.len(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            sources: sources.into(),
            labels: labels.into(),
            preprocessor,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    #[must_use]
    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    #[must_use]
    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    fn attempt(&self, position: usize) -> Result<Example, PreprocessingError> {
        let source = &self.sources[position];
        self.preprocessor
            .process(source, &self.labels[position])
            .map_err(|cause| PreprocessingError {
                position,
                origin: format!("{source:?}"),
                cause,
            })
    }

    /// Preprocess every item in order, without touching any schema or record.
    pub fn results(&self) -> impl Iterator<Item = Result<Example, PreprocessingError>> + '_ {
        (0..self.len()).map(move |i| self.attempt(i))
    }

    /// Descriptors of the first item that preprocesses successfully.
    ///
    /// Used to learn output dtypes before a full pass. Items that fail here
    /// are not recorded, and nothing is held back from later passes.
    #[must_use]
    pub fn prime(&self) -> Option<[TensorSpec; SLOTS]> {
        info!(items = self.len(), "determining processed dtypes");
        let specs = self.results().find_map(Result::ok)?.specs();
        info!(
            features = %specs[0].dtype,
            labels = %specs[1].dtype,
            "preprocess dtypes determined"
        );
        Some(specs)
    }

    fn absorb(
        &self,
        position: usize,
        outcome: Result<Example, PreprocessingError>,
        schema: &mut Schema,
        errors: &mut ErrorRecord<S, L>,
    ) -> Option<Example> {
        let failure = match outcome {
            Ok(example) => match schema.observe(&example.specs()) {
                Ok(()) => return Some(example),
                Err(conflict) => PreprocessingError {
                    position,
                    origin: format!("{:?}", self.sources[position]),
                    cause: conflict.into(),
                },
            },
            Err(failure) => failure,
        };
        warn!(
            position,
            source = %failure.origin,
            error = %format!("{:#}", failure.cause),
            "error preprocessing value"
        );
        errors.push(FailedExample {
            position,
            source: self.sources[position].clone(),
            labels: self.labels[position].clone(),
            reason: format!("{:#}", failure.cause),
        });
        None
    }
}

impl<S, L> Generator<S, L>
where
    S: Debug + Clone + Send + Sync,
    L: Clone + Send + Sync,
{
    /// Start a sequential recovering pass. Nothing runs until the pass is pulled.
    pub fn pass<'a>(
        &'a self,
        schema: &'a mut Schema,
        errors: &'a mut ErrorRecord<S, L>,
    ) -> Pass<'a, S, L> {
        self.pass_in(schema, errors, ExecMode::Sequential)
    }

    /// Start a recovering pass executed with `mode`.
    ///
    /// In parallel mode items are preprocessed a chunk at a time on a rayon
    /// pool and then fed to the schema and error record one by one, in input
    /// order. At most one chunk of examples is held at once.
    pub fn pass_in<'a>(
        &'a self,
        schema: &'a mut Schema,
        errors: &'a mut ErrorRecord<S, L>,
        mode: ExecMode,
    ) -> Pass<'a, S, L> {
        let pool = match mode {
            ExecMode::Sequential => None,
            ExecMode::Parallel { threads } => preprocessing_pool(threads),
        };
        let chunk = pool.as_ref().map_or(1, |p| p.current_num_threads() * CHUNK_PER_THREAD);
        Pass {
            generator: self,
            positions: 0..self.len(),
            buffered: Vec::new().into_iter(),
            chunk,
            pool,
            schema,
            errors,
        }
    }

    /// Run a whole pass and collect the surviving examples.
    ///
    /// Output order, schema and error record are the same for both modes.
    pub fn collect_pass(
        &self,
        schema: &mut Schema,
        errors: &mut ErrorRecord<S, L>,
        mode: ExecMode,
    ) -> Vec<Example> {
        self.pass_in(schema, errors, mode).collect()
    }
}

/// Items preprocessed per pool thread before they are handed downstream.
const CHUNK_PER_THREAD: usize = 4;

#[cfg(feature = "parallel-io")]
fn preprocessing_pool(threads: Option<usize>) -> Option<rayon::ThreadPool> {
    let threads = threads.unwrap_or_else(|| num_cpus::get().max(2));
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, "could not build preprocessing pool, running sequentially");
            None
        }
    }
}

#[cfg(not(feature = "parallel-io"))]
fn preprocessing_pool(_threads: Option<usize>) -> Option<rayon::ThreadPool> {
    None
}

type Outcome = (usize, Result<Example, PreprocessingError>);

/// One recovering pass over a [`Generator`]. See [`Generator::pass_in`].
pub struct Pass<'a, S, L> {
    generator: &'a Generator<S, L>,
    positions: Range<usize>,
    buffered: std::vec::IntoIter<Outcome>,
    chunk: usize,
    pool: Option<rayon::ThreadPool>,
    schema: &'a mut Schema,
    errors: &'a mut ErrorRecord<S, L>,
}

impl<S, L> Pass<'_, S, L>
where
    S: Debug + Clone + Send + Sync,
    L: Clone + Send + Sync,
{
    fn next_outcome(&mut self) -> Option<Outcome> {
        if let Some(outcome) = self.buffered.next() {
            return Some(outcome);
        }
        let generator = self.generator;
        match &self.pool {
            None => self.positions.next().map(|i| (i, generator.attempt(i))),
            Some(pool) => {
                use rayon::prelude::*;
                let end = self.positions.end.min(self.positions.start + self.chunk);
                let batch = self.positions.start..end;
                self.positions.start = end;
                let outcomes: Vec<Outcome> = pool.install(|| {
                    batch.into_par_iter().map(|i| (i, generator.attempt(i))).collect()
                });
                self.buffered = outcomes.into_iter();
                self.buffered.next()
            }
        }
    }
}

impl<S, L> Iterator for Pass<'_, S, L>
where
    S: Debug + Clone + Send + Sync,
    L: Clone + Send + Sync,
{
    type Item = Example;

    fn next(&mut self) -> Option<Example> {
        while let Some((position, outcome)) = self.next_outcome() {
            if let Some(example) =
                self.generator.absorb(position, outcome, self.schema, self.errors)
            {
                return Some(example);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.positions.len() + self.buffered.len()))
    }
}
