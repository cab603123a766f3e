//! Content-Encoding decoding over spooled response bodies.
//!
//! Decoding streams from one [`ResponseBody`] into a fresh one, so the same
//! code path serves in-memory and file-backed bodies.

mod body;

use std::fmt;
use std::io::{self, Read};

use flate2::read::GzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;
use tracing::{debug, instrument};

pub use body::ResponseBody;

const CHUNK_SIZE: usize = 32 * 1024;

/// Which decoder stage rejected the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Gunzip,
    Inflate,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gunzip => f.write_str("gunzip"),
            Self::Inflate => f.write_str("inflate"),
        }
    }
}

/// Errors raised while decoding a response body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The compressed stream is corrupt or truncated.
    #[error("{stage} failed for content-encoding {encoding:?}: {message}")]
    Corrupt {
        encoding: String,
        stage: DecodeStage,
        message: String,
    },

    /// No decoder exists for the encoding token.
    #[error("unsupported content-encoding {encoding:?}")]
    Unsupported { encoding: String },

    /// Reading the source body or writing the decoded one failed.
    #[error("I/O error while decoding body: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    fn corrupt(encoding: &str, stage: DecodeStage, message: impl Into<String>) -> Self {
        Self::Corrupt {
            encoding: encoding.to_string(),
            stage,
            message: message.into(),
        }
    }

    /// The failing stage, for corrupt streams.
    #[must_use]
    pub fn stage(&self) -> Option<DecodeStage> {
        match self {
            Self::Corrupt { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Decodes `body` according to a `Content-Encoding` value.
///
/// Comma-separated codings are undone last-applied first. Identity codings
/// return a copy of the input. Output larger than `threshold` bytes is spooled
/// to a temp file.
///
/// # Errors
///
/// [`DecodeError::Unsupported`] for unknown tokens and
/// [`DecodeError::Corrupt`] for damaged or truncated streams.
#[instrument(level = "debug", skip(body), fields(len = body.len()))]
pub fn decode_body(
    encoding: &str,
    body: &ResponseBody,
    threshold: usize,
) -> Result<ResponseBody, DecodeError> {
    let codings: Vec<String> = encoding
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !is_identity(c))
        .collect();

    let mut current: Option<ResponseBody> = None;
    for coding in codings.iter().rev() {
        let source = current.as_ref().unwrap_or(body);
        let decoded = decode_one(coding, source, threshold)?;
        debug!(coding = %coding, from = source.len(), to = decoded.len(), "decoded body");
        current = Some(decoded);
    }

    match current {
        Some(decoded) => Ok(decoded),
        None => copy_body(body, threshold),
    }
}

fn is_identity(coding: &str) -> bool {
    matches!(coding, "" | "identity" | "none" | "7bit" | "8bit" | "binary")
}

fn decode_one(coding: &str, body: &ResponseBody, threshold: usize) -> Result<ResponseBody, DecodeError> {
    match coding {
        "gzip" | "x-gzip" => gunzip(coding, body, threshold),
        "deflate" | "x-deflate" => inflate(coding, body, threshold),
        _ => Err(DecodeError::Unsupported {
            encoding: coding.to_string(),
        }),
    }
}

fn copy_body(body: &ResponseBody, threshold: usize) -> Result<ResponseBody, DecodeError> {
    let mut out = ResponseBody::new(threshold);
    body.with_reader(|reader| pump(reader, &mut out))?;
    Ok(out)
}

fn pump(reader: &mut dyn Read, out: &mut ResponseBody) -> io::Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        out.write_chunk(&buf[..n])?;
    }
}

fn gunzip(coding: &str, body: &ResponseBody, threshold: usize) -> Result<ResponseBody, DecodeError> {
    let mut out = ResponseBody::new(threshold);
    let mut write_failed = None;
    let result = body.with_reader(|reader| {
        let mut decoder = GzDecoder::new(reader);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = decoder.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if let Err(e) = out.write_chunk(&buf[..n]) {
                write_failed = Some(e);
                return Ok(());
            }
        }
    });
    if let Some(e) = write_failed {
        return Err(DecodeError::Io(e));
    }
    result.map_err(|e| DecodeError::corrupt(coding, DecodeStage::Gunzip, e.to_string()))?;
    Ok(out)
}

/// Inflates zlib-wrapped data, retrying as raw deflate when the zlib
/// attempt fails before producing any output.
fn inflate(coding: &str, body: &ResponseBody, threshold: usize) -> Result<ResponseBody, DecodeError> {
    match inflate_with(body, threshold, true)? {
        Inflated::Done(out) => Ok(out),
        Inflated::Failed { produced: 0, .. } => match inflate_with(body, threshold, false)? {
            Inflated::Done(out) => {
                debug!("deflate body had no zlib wrapper");
                Ok(out)
            }
            Inflated::Failed { message, .. } => {
                Err(DecodeError::corrupt(coding, DecodeStage::Inflate, message))
            }
        },
        Inflated::Failed { message, .. } => {
            Err(DecodeError::corrupt(coding, DecodeStage::Inflate, message))
        }
    }
}

enum Inflated {
    Done(ResponseBody),
    Failed { produced: u64, message: String },
}

fn inflate_with(body: &ResponseBody, threshold: usize, zlib: bool) -> io::Result<Inflated> {
    let mut out = ResponseBody::new(threshold);
    let mut inflater = Decompress::new(zlib);
    let mut pending: Vec<u8> = Vec::new();
    let mut output = vec![0u8; CHUNK_SIZE];
    let mut read_buf = vec![0u8; CHUNK_SIZE];

    let failure = body.with_reader(|reader| {
        let mut eof = false;
        loop {
            if pending.is_empty() && !eof {
                let n = reader.read(&mut read_buf)?;
                eof = n == 0;
                pending.extend_from_slice(&read_buf[..n]);
            }

            let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
            let status = match inflater.decompress(&pending, &mut output, FlushDecompress::None) {
                Ok(status) => status,
                Err(e) => return Ok(Some(format!("corrupt deflate stream: {e}"))),
            };
            let consumed = usize::try_from(inflater.total_in() - in_before).unwrap_or(pending.len());
            let produced = usize::try_from(inflater.total_out() - out_before).unwrap_or(0);
            pending.drain(..consumed.min(pending.len()));
            out.write_chunk(&output[..produced])?;

            if status == Status::StreamEnd {
                return Ok(None);
            }
            if consumed == 0 && produced == 0 {
                if eof {
                    return Ok(Some("truncated deflate stream".to_string()));
                }
                let n = reader.read(&mut read_buf)?;
                eof = n == 0;
                pending.extend_from_slice(&read_buf[..n]);
            }
        }
    })?;

    Ok(match failure {
        None => Inflated::Done(out),
        Some(message) => Inflated::Failed {
            produced: out.len(),
            message,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use std::io::Write;

    fn payload() -> Vec<u8> {
        (0..5000u32)
            .flat_map(|i| format!("line {i} of the payload\n").into_bytes())
            .collect()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn decode(encoding: &str, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let body = ResponseBody::from_bytes(bytes);
        Ok(decode_body(encoding, &body, 1024 * 1024)?.to_vec()?)
    }

    #[test]
    fn test_identity_tokens_pass_through() {
        for token in ["", "identity", "none", "7bit", " Identity "] {
            assert_eq!(decode(token, b"plain").unwrap(), b"plain", "token {token:?}");
        }
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = payload();
        assert_eq!(decode("gzip", &gzip(&data)).unwrap(), data);
        assert_eq!(decode("x-gzip", &gzip(&data)).unwrap(), data);
    }

    #[test]
    fn test_deflate_zlib_and_raw_round_trip() {
        let data = payload();
        assert_eq!(decode("deflate", &zlib(&data)).unwrap(), data);
        assert_eq!(decode("deflate", &raw_deflate(&data)).unwrap(), data);
    }

    #[test]
    fn test_truncated_gzip_is_gunzip_error() {
        let compressed = gzip(&payload());
        let err = decode("gzip", &compressed[..compressed.len() / 2]).unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Gunzip), "got: {err}");
        assert!(err.to_string().contains("gunzip"));
    }

    #[test]
    fn test_corrupt_gzip_checksum_is_error() {
        let mut compressed = gzip(b"hello world");
        let crc_at = compressed.len() - 8;
        compressed[crc_at] ^= 0xff;
        assert!(decode("gzip", &compressed).is_err());
    }

    #[test]
    fn test_truncated_deflate_is_inflate_error() {
        let compressed = zlib(&payload());
        let err = decode("deflate", &compressed[..compressed.len() / 2]).unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Inflate), "got: {err}");
    }

    #[test]
    fn test_unknown_encoding_is_unsupported() {
        let err = decode("br", b"data").unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { ref encoding } if encoding == "br"));
    }

    #[test]
    fn test_stacked_encodings_are_undone_in_reverse() {
        let data = b"stacked".to_vec();
        let doubly = gzip(&zlib(&data));
        assert_eq!(decode("deflate, gzip", &doubly).unwrap(), data);
    }

    #[test]
    fn test_large_output_is_file_backed() {
        let data = payload();
        let body = ResponseBody::from_bytes(&gzip(&data));
        let decoded = decode_body("gzip", &body, 1024).unwrap();
        assert!(decoded.is_file_backed());
        assert_eq!(decoded.to_vec().unwrap(), data);
    }
}
