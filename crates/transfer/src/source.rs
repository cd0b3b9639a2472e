//! Upload byte sources.
//!
//! Multipart uploads read disjoint ranges concurrently, which needs a
//! positional reader. Plain streams can only be buffered and sent whole.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::TransferError;
use crate::sniff::sniff_reader;

/// Positional reads that do not move a shared cursor, so several tasks can
/// read one source at once.
pub trait ReadAt: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`. Returns 0 at or
    /// past the end.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total length in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Fills `buf` completely or fails with [`io::ErrorKind::UnexpectedEof`].
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended at byte {offset}"),
                    ));
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for std::fs::File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

fn read_slice_at(data: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

impl ReadAt for Bytes {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(read_slice_at(self, buf, offset))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(read_slice_at(self, buf, offset))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

/// Where upload bytes come from.
pub enum ByteSource {
    /// Seekable content; eligible for multipart upload.
    RandomAccess(Arc<dyn ReadAt>),
    /// A forward-only stream; always buffered and sent in one request.
    Sequential(Box<dyn Read + Send>),
}

impl ByteSource {
    /// Opens a local file for positional reads.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::RandomAccess(Arc::new(file)))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::RandomAccess(Arc::new(data.into()))
    }

    pub fn sequential(reader: impl Read + Send + 'static) -> Self {
        Self::Sequential(Box::new(reader))
    }

    pub fn is_random_access(&self) -> bool {
        matches!(self, Self::RandomAccess(_))
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RandomAccess(_) => f.write_str("ByteSource::RandomAccess"),
            Self::Sequential(_) => f.write_str("ByteSource::Sequential"),
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> TransferError {
    TransferError::Io(io::Error::other(e))
}

/// Reads `len` bytes at `offset` on the blocking pool.
pub(crate) async fn read_range(
    source: &Arc<dyn ReadAt>,
    offset: u64,
    len: usize,
) -> Result<Bytes, TransferError> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; len];
        source.read_exact_at(&mut buf, offset)?;
        Ok::<_, TransferError>(Bytes::from(buf))
    })
    .await
    .map_err(join_error)?
}

/// Drains a sequential reader into memory and detects its content type on
/// the way. Runs on the blocking pool.
pub(crate) async fn buffer_sequential(
    reader: Box<dyn Read + Send>,
    name: String,
) -> Result<(String, Bytes), TransferError> {
    tokio::task::spawn_blocking(move || {
        let (mime, mut reader) = sniff_reader(reader, &name)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok::<_, TransferError>((mime, Bytes::from(data)))
    })
    .await
    .map_err(join_error)?
}

/// Queries the size of a random-access source on the blocking pool.
pub(crate) async fn source_size(source: &Arc<dyn ReadAt>) -> Result<u64, TransferError> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || source.size())
        .await
        .map_err(join_error)?
        .map_err(TransferError::from)
}
