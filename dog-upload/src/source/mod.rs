//! Random-access byte sources for part uploads.
//!
//! A [`PartSource`] is shared by every in-flight part task, so `read_at` must
//! tolerate concurrent callers. File-backed sources use positioned reads where
//! the platform has them and serialize internally where it does not.

mod direct;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ReadMode, UploadError, UploadResult};

pub use direct::{open_dontneed, AlignedBuffer, DirectFileSource};

/// Read-only random-access view over the bytes being uploaded
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Total number of bytes available
    fn size(&self) -> u64;

    /// Read exactly `length` bytes starting at `offset`
    async fn read_at(&self, offset: u64, length: u64) -> UploadResult<Bytes>;
}

/// Open `path` with the reader `mode` asks for
pub async fn open_source(path: impl AsRef<Path>, mode: ReadMode) -> UploadResult<Arc<dyn PartSource>> {
    let path = path.as_ref().to_path_buf();
    let source: Arc<dyn PartSource> = match mode {
        ReadMode::Buffered => Arc::new(FileSource::open(path).await?),
        ReadMode::DontNeed => Arc::new(FileSource::open_uncached(path).await?),
        ReadMode::Direct { block_size } => Arc::new(DirectFileSource::open(path, block_size).await?),
    };
    Ok(source)
}

/// Reject ranges that are not fully inside `[0, size)`
pub(crate) fn check_range(offset: u64, length: u64, size: u64) -> UploadResult<usize> {
    match offset.checked_add(length) {
        Some(end) if end <= size => usize::try_from(length)
            .map_err(|_| UploadError::invalid(format!("read length {} exceeds addressable memory", length))),
        _ => Err(UploadError::OutOfRange { offset, length, size }),
    }
}

/// Run blocking file work off the async runtime
pub(crate) async fn blocking<T, F>(work: F) -> UploadResult<T>
where
    F: FnOnce() -> UploadResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| UploadError::internal(format!("file task failed: {}", e)))?
}

/// Buffered file source backed by positioned reads
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    file: Arc<SharedFile>,
    size: u64,
}

impl FileSource {
    /// Open and stat `path`
    pub async fn open(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let opened = path.clone();
        let file = blocking(move || {
            std::fs::File::open(&opened)
                .map_err(|e| UploadError::io(format!("opening {}", opened.display()), e))
        })
        .await?;
        Self::from_std(path, file).await
    }

    /// Open `path` and advise the kernel not to keep its pages cached
    pub async fn open_uncached(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let opened = path.clone();
        let file = blocking(move || open_dontneed(&opened)).await?;
        Self::from_std(path, file).await
    }

    pub(crate) async fn from_std(path: PathBuf, file: std::fs::File) -> UploadResult<Self> {
        let stat_path = path.clone();
        let (file, size) = blocking(move || {
            let metadata = file
                .metadata()
                .map_err(|e| UploadError::io(format!("stat {}", stat_path.display()), e))?;
            Ok((file, metadata.len()))
        })
        .await?;

        Ok(Self {
            path,
            file: Arc::new(SharedFile::new(file)),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, offset: u64, length: u64) -> UploadResult<Bytes> {
        let len = check_range(offset, length, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let file = self.file.clone();
        let path = self.path.clone();
        blocking(move || {
            let mut buf = vec![0u8; len];
            file.read_exact_at(&mut buf, offset).map_err(|e| {
                UploadError::io(
                    format!("reading {} bytes at offset {} of {}", len, offset, path.display()),
                    e,
                )
            })?;
            Ok(Bytes::from(buf))
        })
        .await
    }
}

/// File handle safe to read from several threads at once
#[cfg(unix)]
#[derive(Debug)]
pub(crate) struct SharedFile(std::fs::File);

#[cfg(unix)]
impl SharedFile {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self(file)
    }

    pub(crate) fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(&self.0, buf, offset)
    }

    /// Positioned read that may return fewer bytes than asked for at end of file
    pub(crate) fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.0, buf, offset)
    }
}

/// Seek-then-read fallback; the lock serializes callers
#[cfg(not(unix))]
#[derive(Debug)]
pub(crate) struct SharedFile(parking_lot::Mutex<std::fs::File>);

#[cfg(not(unix))]
impl SharedFile {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self(parking_lot::Mutex::new(file))
    }

    pub(crate) fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    pub(crate) fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[tokio::test]
    async fn reads_exact_ranges() {
        let (file, data) = fixture(10_000);
        let source = FileSource::open(file.path()).await.unwrap();

        assert_eq!(source.size(), 10_000);
        assert_eq!(source.read_at(0, 10).await.unwrap(), &data[..10]);
        assert_eq!(source.read_at(9_990, 10).await.unwrap(), &data[9_990..]);
        assert!(source.read_at(10_000, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ranges_past_end_are_out_of_range() {
        let (file, _) = fixture(100);
        let source = FileSource::open(file.path()).await.unwrap();

        let err = source.read_at(95, 10).await.unwrap_err();
        assert!(matches!(err, UploadError::OutOfRange { offset: 95, length: 10, size: 100 }));

        let err = source.read_at(u64::MAX, 2).await.unwrap_err();
        assert!(matches!(err, UploadError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path().join("nope.bin")).await.unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }

    #[tokio::test]
    async fn shrunk_file_fails_loudly() {
        let (file, _) = fixture(4_096);
        let source = FileSource::open(file.path()).await.unwrap();
        file.as_file().set_len(1_000).unwrap();

        let err = source.read_at(2_000, 1_000).await.unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_handle() {
        let (file, data) = fixture(64 * 1024);
        let source: Arc<dyn PartSource> = Arc::new(FileSource::open(file.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                (i, source.read_at(i * 4_096, 4_096).await.unwrap())
            }));
        }
        for handle in handles {
            let (i, bytes) = handle.await.unwrap();
            let start = (i * 4_096) as usize;
            assert_eq!(bytes, &data[start..start + 4_096]);
        }
    }

    #[tokio::test]
    async fn open_source_honours_read_mode() {
        let (file, data) = fixture(8_192);
        for mode in [
            ReadMode::Buffered,
            ReadMode::DontNeed,
            ReadMode::Direct { block_size: 4_096 },
        ] {
            let source = open_source(file.path(), mode).await.unwrap();
            assert_eq!(source.size(), 8_192);
            assert_eq!(source.read_at(100, 5_000).await.unwrap(), &data[100..5_100]);
        }
    }
}
