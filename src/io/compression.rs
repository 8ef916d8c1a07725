//! Transparent decompression of event inputs.
//!
//! Event logs are often shipped compressed. [`open_decoded`] wraps a reader
//! with the right decoder so the map stage always sees plain JSON Lines.
//!
//! Detection is extension-first (`.gz`, `.gzip`, `.zst`, `.zstd`), falling
//! back to the stream's magic bytes when the extension says nothing. Codecs
//! are compiled in through the `compression-gzip` and `compression-zstd`
//! features; without them compressed input is read as-is.
//!
//! ```no_run
//! use event_counter::io::compression::open_decoded;
//! use std::fs::File;
//! use std::io::BufRead;
//! # fn main() -> anyhow::Result<()> {
//! let file = File::open("events.jsonl.gz")?;
//! let reader = open_decoded(file, "events.jsonl.gz")?;
//! for line in reader.lines() {
//!     let _line = line?;
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A supported input encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-zstd")]
    Zstd,
}

impl Codec {
    /// Every compressed codec compiled into this build.
    const COMPRESSED: &'static [Codec] = &[
        #[cfg(feature = "compression-gzip")]
        Codec::Gzip,
        #[cfg(feature = "compression-zstd")]
        Codec::Zstd,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => "gzip",
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => "zstd",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Plain => &[],
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => &[".gz", ".gzip"],
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => &[".zst", ".zstd"],
        }
    }

    fn magic_bytes(self) -> &'static [u8] {
        match self {
            Self::Plain => &[],
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => &[0x1f, 0x8b],
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
        }
    }

    /// Codec implied by the file name, if any.
    #[must_use]
    pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        Self::COMPRESSED
            .iter()
            .copied()
            .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
    }

    /// Codec implied by the first bytes of a stream, if any.
    #[must_use]
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        Self::COMPRESSED
            .iter()
            .copied()
            .find(|codec| head.starts_with(codec.magic_bytes()))
    }

    fn wrap<'a>(self, reader: Box<dyn BufRead + 'a>) -> Result<Box<dyn BufRead + 'a>> {
        Ok(match self {
            Self::Plain => reader,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Box::new(BufReader::new(flate2::bufread::MultiGzDecoder::new(reader))),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Box::new(BufReader::new(
                zstd::stream::read::Decoder::with_buffer(reader).context("start zstd decoder")?,
            )),
        })
    }
}

/// Wrap `reader` with decompression chosen from `path_hint` or the stream's
/// magic bytes.
///
/// # Errors
/// Returns an error if the stream head cannot be read or the decoder fails to
/// initialize.
pub fn open_decoded<'a, R: Read + 'a>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn BufRead + 'a>> {
    let mut reader = BufReader::new(reader);
    let codec = match Codec::from_extension(&path_hint) {
        Some(codec) => codec,
        None => {
            let head = reader.fill_buf().context("peek input head")?;
            Codec::from_magic(head).unwrap_or(Codec::Plain)
        }
    };
    codec
        .wrap(Box::new(reader))
        .with_context(|| format!("open {} input {}", codec.name(), path_hint.as_ref().display()))
}
