//! Schema-driven record files.
//!
//! Each split is one file: the 8-byte magic [`MAGIC`], then one frame per
//! example. A frame is a little-endian `u64` payload length followed by a
//! postcard-encoded [`SequenceRecord`]:
//!
//! - `feature_list` holds the feature tensor as a sequence of sub-elements,
//!   one per step along its outer dimension. Every sub-element has the
//!   schema's fixed inner shape; the number of steps may vary per record.
//! - `context.labels` holds the flattened label tensor as a variable-length list.
//!
//! Writing checks every example against the schema first
//! ([`check_conformance`]) and casts values to the schema dtype, so reading
//! with the persisted schema gives back the same values.
//!
//! ```no_run
//! use corpusbeam::io::record::{ReadOptions, RecordSource};
//! # fn run(schema: corpusbeam::schema::Schema) -> anyhow::Result<()> {
//! let source = RecordSource::new("out/training.records", schema, ReadOptions::default());
//! for example in source.iter()? {
//!     let example = example?;
//!     println!("{:?}", example.features.shape());
//! }
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::fs::{File, create_dir_all, remove_file, rename};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::io::compression::{Compression, RecordSink, open_reader};
use crate::schema::{Schema, SlotSchema};
use crate::tensor::{DType, Example, SLOTS, Tensor, TensorData};

/// File signature (format name and version).
pub const MAGIC: &[u8; 8] = b"CBRECv01";

/// Upper bound on a single frame; larger length prefixes are treated as corruption.
const MAX_FRAME_LEN: u64 = 1 << 32;

/// One list of values, typed by storage class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int64(Vec<i64>),
    Bytes(Vec<u8>),
}

impl Feature {
    /// `i32` values are widened to `Int64`; everything else maps one to one.
    #[must_use]
    pub fn from_data(data: TensorData) -> Self {
        match data {
            TensorData::F32(v) => Self::Float(v),
            TensorData::F64(v) => Self::Double(v),
            TensorData::I32(v) => Self::Int64(v.into_iter().map(i64::from).collect()),
            TensorData::I64(v) => Self::Int64(v),
            TensorData::U8(v) => Self::Bytes(v),
        }
    }

    #[must_use]
    pub fn into_data(self, dtype: DType) -> TensorData {
        let data = match self {
            Self::Float(v) => TensorData::F32(v),
            Self::Double(v) => TensorData::F64(v),
            Self::Int64(v) => TensorData::I64(v),
            Self::Bytes(v) => TensorData::U8(v),
        };
        if data.dtype() == dtype {
            data
        } else {
            data.cast(dtype)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-record values that are not part of the feature sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub labels: Feature,
}

/// One serialized example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub context: Context,
    pub feature_list: Vec<Feature>,
}

/// Read-side decoding options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Value used for label positions a record does not fill.
    pub label_default: i64,
    /// Pad every label vector to this length with `label_default`.
    /// `None` returns each record's labels at their stored length.
    pub label_width: Option<usize>,
}

fn slot(schema: &Schema, index: usize) -> Result<&SlotSchema, DatasetError> {
    if schema.is_empty() {
        return Err(DatasetError::EmptySchema);
    }
    schema.slot(index).ok_or(DatasetError::SlotCount {
        expected: schema.slots().len(),
        found: SLOTS,
    })
}

/// Inner (per-step) shape of the feature slot.
///
/// # Errors
/// [`DatasetError::EmptySchema`] before any example was observed, and
/// [`DatasetError::RaggedInnerDimension`] if a trailing feature dimension varies.
pub fn feature_inner_shape(schema: &Schema) -> Result<Vec<usize>, DatasetError> {
    let features = slot(schema, 0)?;
    features
        .inner_shape()
        .ok_or_else(|| DatasetError::RaggedInnerDimension {
            slot: 0,
            schema: features.shape.clone(),
        })
}

/// Check that `example` fits `schema` closely enough to be framed.
///
/// # Errors
/// [`DatasetError::NonConforming`] if a slot's rank or any fixed dimension
/// disagrees with the schema; see also [`feature_inner_shape`].
pub fn check_conformance(example: &Example, schema: &Schema) -> Result<(), DatasetError> {
    if schema.is_empty() {
        return Err(DatasetError::EmptySchema);
    }
    if schema.slots().len() != SLOTS {
        return Err(DatasetError::SlotCount {
            expected: schema.slots().len(),
            found: SLOTS,
        });
    }
    for (index, (tensor, slot)) in example.slots().into_iter().zip(schema.slots()).enumerate() {
        if !slot.admits(tensor.shape()) {
            return Err(DatasetError::NonConforming {
                slot: index,
                shape: tensor.shape().to_vec(),
                schema: slot.shape.clone(),
            });
        }
    }
    feature_inner_shape(schema).map(drop)
}

fn split_steps(data: TensorData, steps: usize, step_len: usize) -> Vec<Feature> {
    macro_rules! split {
        ($values:expr, $variant:ident) => {
            if step_len == 0 {
                (0..steps).map(|_| Feature::$variant(Vec::new())).collect()
            } else {
                $values
                    .chunks(step_len)
                    .map(|c| Feature::$variant(c.to_vec()))
                    .collect()
            }
        };
    }
    match Feature::from_data(data) {
        Feature::Float(v) => split!(v, Float),
        Feature::Double(v) => split!(v, Double),
        Feature::Int64(v) => split!(v, Int64),
        Feature::Bytes(v) => split!(v, Bytes),
    }
}

/// Encode one example against `schema`.
///
/// # Errors
/// See [`check_conformance`].
pub fn encode(example: &Example, schema: &Schema) -> Result<SequenceRecord, DatasetError> {
    check_conformance(example, schema)?;
    let features = slot(schema, 0)?;
    let labels = slot(schema, 1)?;
    let inner = feature_inner_shape(schema)?;

    let (data, shape) = example.features.cast(features.dtype).into_parts();
    let feature_list = match shape.first() {
        None => vec![Feature::from_data(data)],
        Some(&steps) => split_steps(data, steps, inner.iter().product()),
    };
    let (label_data, _) = example.labels.cast(labels.dtype).into_parts();
    Ok(SequenceRecord {
        context: Context {
            labels: Feature::from_data(label_data),
        },
        feature_list,
    })
}

/// Decode one record with the persisted `schema`.
///
/// # Errors
/// A human-readable reason when the record does not match the schema; the
/// reader wraps it into [`DatasetError::CorruptRecord`].
pub fn decode(
    record: SequenceRecord,
    schema: &Schema,
    options: &ReadOptions,
) -> Result<Example, String> {
    let features_schema = slot(schema, 0).map_err(|e| e.to_string())?;
    let labels_schema = slot(schema, 1).map_err(|e| e.to_string())?;
    let inner = feature_inner_shape(schema).map_err(|e| e.to_string())?;
    let step_len: usize = inner.iter().product();

    let steps = record.feature_list.len();
    let mut values = TensorData::empty(features_schema.dtype);
    for (i, step) in record.feature_list.into_iter().enumerate() {
        if step.len() != step_len {
            return Err(format!(
                "feature step {i} has {} values, schema expects {step_len}",
                step.len()
            ));
        }
        values.append(&step.into_data(features_schema.dtype));
    }
    let shape = if features_schema.rank() == 0 {
        if steps != 1 {
            return Err(format!("scalar feature stored as {steps} steps"));
        }
        Vec::new()
    } else {
        std::iter::once(steps).chain(inner).collect()
    };
    let features = Tensor::new(values, shape).map_err(|e| e.to_string())?;

    let mut labels = record.context.labels.into_data(labels_schema.dtype);
    let label_shape = match options.label_width {
        Some(width) if labels.len() > width => {
            return Err(format!(
                "{} labels do not fit label_width {width}",
                labels.len()
            ));
        }
        Some(width) => {
            let missing = width - labels.len();
            labels.append(&TensorData::I64(vec![options.label_default; missing]));
            vec![width]
        }
        None => fixed_shape(labels_schema)
            .filter(|shape| shape.iter().product::<usize>() == labels.len())
            .unwrap_or_else(|| vec![labels.len()]),
    };
    let labels = Tensor::new(labels, label_shape).map_err(|e| e.to_string())?;
    Ok(Example::new(features, labels))
}

fn fixed_shape(slot: &SlotSchema) -> Option<Vec<usize>> {
    slot.shape.iter().map(|&d| usize::try_from(d).ok()).collect()
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Write `examples` to `path`, one frame each, in iteration order.
///
/// The examples are pulled exactly once. Output goes to a sibling
/// `.partial` file that is renamed over `path` only after every record has
/// been written and synced; on failure the partial file is removed.
///
/// # Returns
/// The number of records written.
///
/// # Errors
/// Schema errors (checked before the file is created), conformance errors for
/// any example, or I/O errors.
pub fn write_records<I>(
    path: impl AsRef<Path>,
    examples: I,
    schema: &Schema,
    compression: Compression,
) -> anyhow::Result<usize>
where
    I: IntoIterator<Item = Example>,
{
    let path = path.as_ref();
    feature_inner_shape(schema)?;
    slot(schema, 1)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let tmp = partial_path(path);
    let written = write_frames(&tmp, examples, schema, compression)
        .with_context(|| format!("write records to {}", path.display()));
    match written {
        Ok(n) => {
            rename(&tmp, path)
                .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
            Ok(n)
        }
        Err(e) => {
            let _ = remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_frames<I>(
    tmp: &Path,
    examples: I,
    schema: &Schema,
    compression: Compression,
) -> anyhow::Result<usize>
where
    I: IntoIterator<Item = Example>,
{
    let file = File::create(tmp).with_context(|| format!("create {}", tmp.display()))?;
    let mut sink = RecordSink::new(file, compression)?;
    sink.write_all(MAGIC)?;
    let mut count = 0usize;
    for example in examples {
        let record = encode(&example, schema).with_context(|| format!("encode record #{count}"))?;
        let payload = postcard::to_allocvec(&record)
            .map_err(|e| anyhow!("serialize record #{count}: {e}"))?;
        sink.write_all(&(payload.len() as u64).to_le_bytes())?;
        sink.write_all(&payload)?;
        count += 1;
    }
    let file = sink.finish()?;
    file.sync_all()?;
    Ok(count)
}

/// Lazy reader over one record file.
///
/// Owns the open file; dropping the reader (including part way through)
/// closes it.
pub struct RecordReader {
    path: PathBuf,
    reader: Box<dyn Read + Send>,
    schema: Arc<Schema>,
    options: ReadOptions,
    offset: u64,
    finished: bool,
}

impl RecordReader {
    /// Open `path` and check its signature.
    ///
    /// # Errors
    /// I/O errors, or [`DatasetError::CorruptRecord`] if the signature is wrong.
    pub fn open(
        path: impl AsRef<Path>,
        schema: Arc<Schema>,
        options: ReadOptions,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let reader = open_reader(file, &path)
            .with_context(|| format!("setup decompression for {}", path.display()))?;
        let mut this = Self {
            path,
            reader,
            schema,
            options,
            offset: 0,
            finished: false,
        };
        let mut magic = [0u8; MAGIC.len()];
        if this.fill(&mut magic)? != MAGIC.len() || &magic != MAGIC {
            return Err(this.corrupt("missing record file signature").into());
        }
        Ok(this)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> DatasetError {
        DatasetError::CorruptRecord {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }
    }

    /// Read until `buf` is full or the stream ends; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("read {}", self.path.display()));
                }
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<SequenceRecord>> {
        let mut len = [0u8; 8];
        match self.fill(&mut len)? {
            0 => return Ok(None),
            8 => {}
            _ => return Err(self.corrupt("truncated frame header").into()),
        }
        let len = u64::from_le_bytes(len);
        if len > MAX_FRAME_LEN {
            return Err(self.corrupt(format!("frame length {len} out of range")).into());
        }
        // Grows with the bytes actually present, not with the claimed length.
        let mut payload = Vec::new();
        let read = (&mut self.reader)
            .take(len)
            .read_to_end(&mut payload)
            .with_context(|| format!("read {}", self.path.display()))?;
        self.offset += read as u64;
        if read as u64 != len {
            return Err(self.corrupt("truncated frame payload").into());
        }
        postcard::from_bytes(&payload)
            .map(Some)
            .map_err(|e| self.corrupt(format!("undecodable frame: {e}")).into())
    }
}

impl Iterator for RecordReader {
    type Item = anyhow::Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item: Option<anyhow::Result<Example>> = match self.read_frame() {
            Ok(None) => None,
            Ok(Some(record)) => Some(
                decode(record, &self.schema, &self.options)
                    .map_err(|reason| self.corrupt(reason).into()),
            ),
            Err(e) => Some(Err(e)),
        };
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

/// Open `path` for lazy reading with `schema`.
///
/// # Errors
/// See [`RecordReader::open`].
pub fn read_records(
    path: impl AsRef<Path>,
    schema: Arc<Schema>,
    options: ReadOptions,
) -> anyhow::Result<RecordReader> {
    RecordReader::open(path, schema, options)
}

/// Restartable handle on one record file: every [`iter`](Self::iter) call
/// opens a fresh reader from the start.
#[derive(Clone, Debug)]
pub struct RecordSource {
    path: PathBuf,
    schema: Arc<Schema>,
    options: ReadOptions,
}

impl RecordSource {
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        schema: impl Into<Arc<Schema>>,
        options: ReadOptions,
    ) -> Self {
        Self {
            path: path.into(),
            schema: schema.into(),
            options,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// # Errors
    /// See [`RecordReader::open`].
    pub fn iter(&self) -> anyhow::Result<RecordReader> {
        RecordReader::open(&self.path, Arc::clone(&self.schema), self.options.clone())
    }

    /// Read every record into memory.
    ///
    /// # Errors
    /// The first open, I/O or decode error.
    pub fn read_all(&self) -> anyhow::Result<Vec<Example>> {
        self.iter()?.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorSpec;

    fn schema_for(features: &[usize], labels: &[usize]) -> Schema {
        let mut schema = Schema::new();
        schema
            .observe(&[
                TensorSpec { dtype: DType::F32, shape: features.to_vec() },
                TensorSpec { dtype: DType::I64, shape: labels.to_vec() },
            ])
            .unwrap();
        schema
    }

    #[test]
    fn scalar_features_take_one_step() {
        let schema = schema_for(&[], &[1]);
        let example = Example::new(Tensor::scalar(2.5f32), Tensor::vector(vec![3i64]));
        let record = encode(&example, &schema).unwrap();
        assert_eq!(record.feature_list, vec![Feature::Float(vec![2.5])]);
        let back = decode(record, &schema, &ReadOptions::default()).unwrap();
        assert_eq!(back, example);
    }

    #[test]
    fn zero_width_steps_keep_outer_length() {
        let schema = schema_for(&[3, 0], &[1]);
        let example = Example::new(
            Tensor::new(Vec::<f32>::new(), vec![3, 0]).unwrap(),
            Tensor::vector(vec![0i64]),
        );
        let record = encode(&example, &schema).unwrap();
        assert_eq!(record.feature_list.len(), 3);
        let back = decode(record, &schema, &ReadOptions::default()).unwrap();
        assert_eq!(back.features.shape(), &[3, 0]);
    }

    #[test]
    fn wrong_step_length_is_reported() {
        let schema = schema_for(&[2, 2], &[1]);
        let record = SequenceRecord {
            context: Context { labels: Feature::Int64(vec![1]) },
            feature_list: vec![Feature::Float(vec![1.0, 2.0, 3.0])],
        };
        let err = decode(record, &schema, &ReadOptions::default()).unwrap_err();
        assert!(err.contains("expects 2"), "{err}");
    }

    #[test]
    fn labels_pad_to_width() {
        let schema = schema_for(&[1, 1], &[2]);
        let record = SequenceRecord {
            context: Context { labels: Feature::Int64(vec![4, 5]) },
            feature_list: vec![Feature::Float(vec![1.0])],
        };
        let options = ReadOptions { label_default: -1, label_width: Some(4) };
        let back = decode(record, &schema, &options).unwrap();
        assert_eq!(back.labels, Tensor::vector(vec![4i64, 5, -1, -1]));
    }
}
