//! Optional compression of split record files.
//!
//! The codec of a split file is part of its name (`training.records.gz`,
//! `training.records.zst`), so readers pick the decoder from the path alone.
//!
//! - **Gzip** (`.gz`) via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) via `zstd` (feature: `compression-zstd`)
//!
//! Writers are finished explicitly with [`RecordSink::finish`] so that a
//! failing trailer write is reported instead of being lost in `Drop`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Base extension of a split record file.
pub const RECORD_EXTENSION: &str = "records";

/// Codec applied to split files on dump.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// Full file extension for a split file, e.g. `records.gz`.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::None => "records",
            Self::Gzip => "records.gz",
            Self::Zstd => "records.zst",
        }
    }

    /// Infer the codec from a file name. Unknown suffixes mean no compression.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        if name.ends_with(".gz") || name.ends_with(".gzip") {
            Self::Gzip
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Whether this build can encode and decode the codec.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::None => true,
            Self::Gzip => cfg!(feature = "compression-gzip"),
            Self::Zstd => cfg!(feature = "compression-zstd"),
        }
    }

    fn ensure_available(self) -> Result<(), DatasetError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DatasetError::CompressionUnavailable { name: self.name() })
        }
    }
}

/// Writer for one split file, optionally compressing.
pub enum RecordSink {
    Plain(BufWriter<File>),
    #[cfg(feature = "compression-gzip")]
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    #[cfg(feature = "compression-zstd")]
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl RecordSink {
    /// Wrap `file` with the encoder for `compression`.
    ///
    /// # Errors
    /// [`DatasetError::CompressionUnavailable`] if the codec's feature is off,
    /// or an I/O error from the encoder.
    pub fn new(file: File, compression: Compression) -> anyhow::Result<Self> {
        compression.ensure_available()?;
        let inner = BufWriter::new(file);
        Ok(match compression {
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::default(),
            )),
            #[cfg(feature = "compression-zstd")]
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(inner, 3)?),
            _ => Self::Plain(inner),
        })
    }

    /// Flush codec trailers and buffers, returning the underlying file.
    ///
    /// # Errors
    /// Any I/O error raised while finishing the stream.
    pub fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Self::Plain(w) => w,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.finish()?,
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.finish()?,
        };
        buffered.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl Write for RecordSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.write(buf),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.flush(),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.flush(),
        }
    }
}

/// Open a decoding reader for `file`, choosing the codec from `path`.
///
/// # Errors
/// [`DatasetError::CompressionUnavailable`] if the codec's feature is off,
/// or an I/O error from the decoder.
pub fn open_reader(file: File, path: &Path) -> anyhow::Result<Box<dyn Read + Send>> {
    let compression = Compression::from_path(path);
    compression.ensure_available()?;
    Ok(match compression {
        #[cfg(feature = "compression-gzip")]
        Compression::Gzip => Box::new(BufReader::new(flate2::read::GzDecoder::new(file))),
        #[cfg(feature = "compression-zstd")]
        Compression::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?)),
        _ => Box::new(BufReader::new(file)),
    })
}
