//! Typed tensors and their descriptors.
//!
//! Preprocessors hand back [`Example`]s made of two [`Tensor`]s. The schema
//! inferencer never introspects the values: it works on [`TensorSpec`]s,
//! obtained with [`Tensor::spec`], which is the single conversion point from
//! data to descriptor.

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl DType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
        }
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Flat element storage, one variant per [`DType`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for TensorData {
                fn from(v: Vec<$ty>) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_vec!(f32 => F32, f64 => F64, i32 => I32, i64 => I64, u8 => U8);

macro_rules! cast_elements {
    ($values:expr, $target:expr) => {
        match $target {
            DType::F32 => TensorData::F32($values.iter().map(|&x| x as f32).collect()),
            DType::F64 => TensorData::F64($values.iter().map(|&x| x as f64).collect()),
            DType::I32 => TensorData::I32($values.iter().map(|&x| x as i32).collect()),
            DType::I64 => TensorData::I64($values.iter().map(|&x| x as i64).collect()),
            DType::U8 => TensorData::U8($values.iter().map(|&x| x as u8).collect()),
        }
    };
}

impl TensorData {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::U8(_) => DType::U8,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn empty(dtype: DType) -> Self {
        match dtype {
            DType::F32 => Self::F32(Vec::new()),
            DType::F64 => Self::F64(Vec::new()),
            DType::I32 => Self::I32(Vec::new()),
            DType::I64 => Self::I64(Vec::new()),
            DType::U8 => Self::U8(Vec::new()),
        }
    }

    /// Append `other`, converting it to this storage's dtype first.
    pub fn append(&mut self, other: &Self) {
        let other = other.cast(self.dtype());
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.extend(b),
            (Self::F64(a), Self::F64(b)) => a.extend(b),
            (Self::I32(a), Self::I32(b)) => a.extend(b),
            (Self::I64(a), Self::I64(b)) => a.extend(b),
            (Self::U8(a), Self::U8(b)) => a.extend(b),
            _ => unreachable!("cast yields the receiver's dtype"),
        }
    }

    /// Numeric conversion with `as` semantics (float to int truncates and saturates).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }
        match self {
            Self::F32(v) => cast_elements!(v, dtype),
            Self::F64(v) => cast_elements!(v, dtype),
            Self::I32(v) => cast_elements!(v, dtype),
            Self::I64(v) => cast_elements!(v, dtype),
            Self::U8(v) => cast_elements!(v, dtype),
        }
    }
}

/// Dtype and shape of a tensor, without its values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

/// A dense, row-major tensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    data: TensorData,
    shape: Vec<usize>,
}

impl Tensor {
    /// Build a tensor, checking that the element count matches `shape`.
    ///
    /// # Errors
    /// [`DatasetError::InvalidTensor`] if `shape`'s product differs from the
    /// number of elements.
    pub fn new(data: impl Into<TensorData>, shape: Vec<usize>) -> Result<Self, DatasetError> {
        let data = data.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(DatasetError::InvalidTensor {
                dtype: data.dtype(),
                len: data.len(),
                shape,
                expected,
            });
        }
        Ok(Self { data, shape })
    }

    /// One-dimensional tensor of shape `[len]`.
    #[must_use]
    pub fn vector(data: impl Into<TensorData>) -> Self {
        let data = data.into();
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Rank-0 tensor holding `value`.
    #[must_use]
    pub fn scalar<T>(value: T) -> Self
    where
        Vec<T>: Into<TensorData>,
    {
        Self {
            data: vec![value].into(),
            shape: Vec::new(),
        }
    }

    /// Stack equally long rows into a `[rows, cols]` tensor.
    ///
    /// # Errors
    /// [`DatasetError::InvalidTensor`] if the rows differ in length.
    pub fn from_rows<T: Clone>(rows: &[Vec<T>]) -> Result<Self, DatasetError>
    where
        Vec<T>: Into<TensorData>,
    {
        let cols = rows.first().map_or(0, Vec::len);
        let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().cloned()).collect();
        Self::new(flat, vec![rows.len(), cols])
    }

    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub const fn data(&self) -> &TensorData {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn spec(&self) -> TensorSpec {
        TensorSpec {
            dtype: self.dtype(),
            shape: self.shape.clone(),
        }
    }

    /// Same shape, values converted to `dtype`.
    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        Self {
            data: self.data.cast(dtype),
            shape: self.shape.clone(),
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (TensorData, Vec<usize>) {
        (self.data, self.shape)
    }
}

/// Number of output slots in an [`Example`].
pub const SLOTS: usize = 2;

/// A preprocessed `(features, labels)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub features: Tensor,
    pub labels: Tensor,
}

impl Example {
    #[must_use]
    pub fn new(features: Tensor, labels: Tensor) -> Self {
        Self { features, labels }
    }

    #[must_use]
    pub const fn slots(&self) -> [&Tensor; SLOTS] {
        [&self.features, &self.labels]
    }

    #[must_use]
    pub fn specs(&self) -> [TensorSpec; SLOTS] {
        [self.features.spec(), self.labels.spec()]
    }
}
