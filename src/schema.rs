//! Incremental schema inference over a stream of examples.
//!
//! A [`Schema`] holds one [`SlotSchema`] per output slot. Every observed
//! example widens it: a dimension that ever disagrees with an earlier example
//! becomes [`VARIABLE`] (`-1`) and stays that way. The schema never narrows.
//!
//! ## Rules
//!
//! - **dtype**: the first-seen dtype wins. A later, different dtype is logged
//!   as a warning and otherwise ignored.
//! - **rank**: an example whose rank differs from the schema in any slot is
//!   rejected as a whole with [`DatasetError::SchemaRank`] and leaves *every*
//!   slot untouched.
//! - **extents**: `min_shape` and `max_shape` track the per-dimension minimum
//!   and maximum seen so far.
//!
//! Observing the same example twice gives the same schema as observing it once.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::DatasetError;
use crate::tensor::{DType, TensorSpec};

/// Marker for a dimension whose size varies across examples.
pub const VARIABLE: i64 = -1;

/// Reconciled descriptor of one output slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSchema {
    pub dtype: DType,
    /// Observed size per dimension, or [`VARIABLE`].
    pub shape: Vec<i64>,
    pub min_shape: Vec<usize>,
    pub max_shape: Vec<usize>,
}

impl SlotSchema {
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_spec(spec: &TensorSpec) -> Self {
        Self {
            dtype: spec.dtype,
            shape: spec.shape.iter().map(|&d| d as i64).collect(),
            min_shape: spec.shape.clone(),
            max_shape: spec.shape.clone(),
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether any dimension has varied.
    #[must_use]
    pub fn is_ragged(&self) -> bool {
        self.shape.contains(&VARIABLE)
    }

    /// Shape of one element along the outer dimension, if every trailing
    /// dimension is fixed. Rank-0 slots have an empty inner shape.
    #[must_use]
    pub fn inner_shape(&self) -> Option<Vec<usize>> {
        self.shape
            .iter()
            .skip(1)
            .map(|&d| usize::try_from(d).ok())
            .collect()
    }

    /// Whether `shape` has this slot's rank and agrees with every fixed dimension.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn admits(&self, shape: &[usize]) -> bool {
        shape.len() == self.rank()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(&s, &d)| s == VARIABLE || s == d as i64)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn widen(&mut self, slot: usize, spec: &TensorSpec) {
        if spec.dtype != self.dtype {
            warn!(
                slot,
                observed = %spec.dtype,
                kept = %self.dtype,
                "dtype does not match previous dtype, keeping the first one"
            );
        }
        for (dim, &observed) in self.shape.iter_mut().zip(&spec.shape) {
            if *dim != observed as i64 {
                *dim = VARIABLE;
            }
        }
        for (lo, &observed) in self.min_shape.iter_mut().zip(&spec.shape) {
            *lo = (*lo).min(observed);
        }
        for (hi, &observed) in self.max_shape.iter_mut().zip(&spec.shape) {
            *hi = (*hi).max(observed);
        }
    }
}

/// Per-slot schema accumulated over a generation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    slots: Vec<SlotSchema>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the first example has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn slots(&self) -> &[SlotSchema] {
        &self.slots
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&SlotSchema> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn features(&self) -> Option<&SlotSchema> {
        self.slot(0)
    }

    #[must_use]
    pub fn labels(&self) -> Option<&SlotSchema> {
        self.slot(1)
    }

    /// Fold one example's descriptors into the schema.
    ///
    /// # Errors
    /// - [`DatasetError::SlotCount`] if `specs` has a different number of slots.
    /// - [`DatasetError::SchemaRank`] if any slot's rank differs.
    ///
    /// In both cases the schema is left exactly as it was.
    pub fn observe(&mut self, specs: &[TensorSpec]) -> Result<(), DatasetError> {
        if self.slots.is_empty() {
            self.slots = specs.iter().map(SlotSchema::from_spec).collect();
            return Ok(());
        }
        if specs.len() != self.slots.len() {
            return Err(DatasetError::SlotCount {
                expected: self.slots.len(),
                found: specs.len(),
            });
        }
        for (slot, (prior, spec)) in self.slots.iter().zip(specs).enumerate() {
            if prior.rank() != spec.shape.len() {
                error!(
                    slot,
                    shape = ?spec.shape,
                    previous = ?prior.shape,
                    "data shape incompatible with previous data shape"
                );
                return Err(DatasetError::SchemaRank {
                    slot,
                    shape: spec.shape.clone(),
                    expected: prior.shape.clone(),
                });
            }
        }
        for (slot, (prior, spec)) in self.slots.iter_mut().zip(specs).enumerate() {
            prior.widen(slot, spec);
        }
        Ok(())
    }
}

/// Functional form of [`Schema::observe`]: `prior` is not modified.
///
/// # Errors
/// Same as [`Schema::observe`].
pub fn update(prior: &Schema, specs: &[TensorSpec]) -> Result<Schema, DatasetError> {
    let mut next = prior.clone();
    next.observe(specs)?;
    Ok(next)
}
