//! Compression adapter shared by the reader and the writer.
//!
//! Both directions are streaming transforms: [`Encoder`] is a [`Write`] that
//! forwards compressed bytes to an inner writer, [`Decoder`] is a [`Read`]
//! that pulls compressed bytes from an inner reader. Neither needs a whole
//! entry in memory.

use std::io::{self, BufRead, Read, Write};

use flate2::Compression;
use flate2::bufread::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::structures::CompressionMethod;
use crate::error::{FormatError, Result};

/// Default deflate level.
pub const DEFAULT_LEVEL: u32 = 6;

/// Fail early for methods without a codec.
pub fn ensure_supported(method: CompressionMethod) -> std::result::Result<(), FormatError> {
    match method {
        CompressionMethod::Stored | CompressionMethod::Deflate => Ok(()),
        CompressionMethod::Unknown(code) => Err(FormatError::UnsupportedMethod(code)),
    }
}

/// Compressing writer.
pub enum Encoder<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(
        method: CompressionMethod,
        inner: W,
        level: u32,
    ) -> std::result::Result<Self, FormatError> {
        ensure_supported(method)?;
        Ok(match method {
            CompressionMethod::Deflate => {
                Encoder::Deflate(DeflateEncoder::new(inner, Compression::new(level.min(9))))
            }
            _ => Encoder::Stored(inner),
        })
    }

    /// Flush the codec's trailing bytes and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Stored(inner) => Ok(inner),
            Encoder::Deflate(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Stored(inner) => inner.write(buf),
            Encoder::Deflate(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Stored(inner) => inner.flush(),
            Encoder::Deflate(encoder) => encoder.flush(),
        }
    }
}

/// Decompressing reader.
///
/// Malformed deflate data surfaces as an `io::Error` wrapping
/// [`FormatError::CodecError`].
pub enum Decoder<R: BufRead> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: BufRead> Decoder<R> {
    pub fn new(method: CompressionMethod, inner: R) -> std::result::Result<Self, FormatError> {
        ensure_supported(method)?;
        Ok(match method {
            CompressionMethod::Deflate => Decoder::Deflate(DeflateDecoder::new(inner)),
            _ => Decoder::Stored(inner),
        })
    }
}

impl<R: BufRead> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Stored(inner) => inner.read(buf),
            Decoder::Deflate(decoder) => decoder.read(buf).map_err(codec_error),
        }
    }
}

// flate2 reports corrupt streams as InvalidInput or InvalidData; anything
// else came from the channel underneath and stays an I/O error.
fn codec_error(err: io::Error) -> io::Error {
    let wraps_format = err.get_ref().is_some_and(|inner| inner.is::<FormatError>());
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData if !wraps_format => {
            FormatError::CodecError(err.to_string()).into()
        }
        _ => err,
    }
}

/// Compress a whole buffer.
pub fn compress(method: CompressionMethod, data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(method, Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a whole buffer.
pub fn decompress(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = Decoder::new(method, data)?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn stored_is_identity() {
        let data = b"stored bytes stay as they are";
        let compressed = compress(CompressionMethod::Stored, data, DEFAULT_LEVEL).unwrap();
        assert_eq!(compressed, data);
        assert_eq!(
            decompress(CompressionMethod::Stored, &compressed).unwrap(),
            data
        );
    }

    #[test]
    fn deflate_shrinks_repetitive_input() {
        let data = b"abcabcabc".repeat(1000);
        let compressed = compress(CompressionMethod::Deflate, &data, DEFAULT_LEVEL).unwrap();
        assert!(compressed.len() < data.len() / 10);
        assert_eq!(
            decompress(CompressionMethod::Deflate, &compressed).unwrap(),
            data
        );
    }

    #[test]
    fn malformed_deflate_is_a_codec_error() {
        // Block type 3 is reserved.
        let err = decompress(CompressionMethod::Deflate, &[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(
            matches!(err, Error::Format(FormatError::CodecError(_))),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = compress(CompressionMethod::Unknown(14), b"x", DEFAULT_LEVEL).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UnsupportedMethod(14))
        ));
        assert!(matches!(
            Decoder::new(CompressionMethod::Unknown(99), &b""[..]),
            Err(FormatError::UnsupportedMethod(99))
        ));
    }
}
