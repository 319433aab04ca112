//! Codec selection for archived Parquet objects

use parquet::basic::{Compression as ParquetCodec, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Codec applied to every column chunk of a primary object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Snappy,
    /// Raw LZ4 block codec; the framed variant is deprecated in Parquet
    Lz4,
    Zstd,
}

impl Compression {
    fn codec(self) -> ParquetCodec {
        match self {
            Self::None => ParquetCodec::UNCOMPRESSED,
            Self::Snappy => ParquetCodec::SNAPPY,
            Self::Lz4 => ParquetCodec::LZ4_RAW,
            Self::Zstd => ParquetCodec::ZSTD(ZstdLevel::default()),
        }
    }

    /// Writer properties for one archived batch
    ///
    /// Each flush produces a single row group, so only the codec varies.
    pub fn writer_properties(self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.codec())
            .build()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
