//! Response body storage that spills to an anonymous temp file.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, PoisonError};

use tempfile::SpooledTempFile;

/// Response bytes, held in memory up to a threshold and in a temp file above it.
///
/// The temp file is unlinked on creation and closed when the value drops,
/// so every exit path releases it.
pub struct ResponseBody {
    inner: Mutex<SpooledTempFile>,
    len: u64,
}

impl ResponseBody {
    /// Empty body that rolls over to disk after `threshold` bytes.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            inner: Mutex::new(SpooledTempFile::new(threshold)),
            len: 0,
        }
    }

    /// In-memory body holding `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut body = Self::new(usize::MAX);
        // Writes to an in-memory spool cannot fail.
        let _ = body.write_chunk(bytes);
        body
    }

    /// Appends a chunk.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the temp file once the body has rolled over.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let spool = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        spool.seek(SeekFrom::End(0))?;
        spool.write_all(chunk)?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the body has rolled over to a temp file.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_rolled()
    }

    /// Copies the whole body into `writer`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the spool or the writer.
    pub fn copy_to(&self, writer: &mut impl Write) -> io::Result<u64> {
        let mut spool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        spool.seek(SeekFrom::Start(0))?;
        io::copy(&mut *spool, writer)
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from a file-backed spool.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.copy_to(&mut out)?;
        Ok(out)
    }

    /// Lossy UTF-8 view of the body.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from a file-backed spool.
    pub fn text(&self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(&self.to_vec()?).into_owned())
    }

    /// Runs `f` with a reader positioned at the start of the body.
    pub(crate) fn with_reader<T>(
        &self,
        f: impl FnOnce(&mut dyn Read) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut spool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        spool.seek(SeekFrom::Start(0))?;
        f(&mut *spool)
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::from_bytes(&[])
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("len", &self.len)
            .field("file_backed", &self.is_file_backed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_small_body_stays_in_memory() {
        let mut body = ResponseBody::new(16);
        body.write_chunk(b"hello ").unwrap();
        body.write_chunk(b"world").unwrap();
        assert_eq!(body.len(), 11);
        assert!(!body.is_file_backed());
        assert_eq!(body.text().unwrap(), "hello world");
    }

    #[test]
    fn test_large_body_rolls_over_to_file() {
        let mut body = ResponseBody::new(8);
        body.write_chunk(&[b'a'; 5]).unwrap();
        body.write_chunk(&[b'b'; 5]).unwrap();
        assert!(body.is_file_backed());
        assert_eq!(body.to_vec().unwrap(), b"aaaaabbbbb");
        // Reading twice yields the same bytes.
        assert_eq!(body.to_vec().unwrap().len(), 10);
    }

    #[test]
    fn test_copy_to_after_partial_read() {
        let body = ResponseBody::from_bytes(b"abcdef");
        let first = body.with_reader(|r| {
            let mut buf = [0u8; 3];
            r.read_exact(&mut buf)?;
            Ok(buf)
        });
        assert_eq!(&first.unwrap(), b"abc");
        let mut out = Vec::new();
        assert_eq!(body.copy_to(&mut out).unwrap(), 6);
        assert_eq!(out, b"abcdef");
    }
}
