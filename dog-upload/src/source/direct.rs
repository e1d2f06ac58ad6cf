//! Uncached file access: `O_DIRECT` reads through aligned buffers, and
//! page-cache eviction advice for ordinary handles.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{blocking, check_range, PartSource, SharedFile};
use crate::{UploadError, UploadResult};

/// Heap buffer whose first byte sits on an `align`-byte boundary.
///
/// `O_DIRECT` needs the memory, not just the file offset, to be aligned, so
/// the backing allocation is over-sized by one alignment unit and the usable
/// window starts at the first aligned address inside it.
pub struct AlignedBuffer {
    raw: Vec<u8>,
    start: usize,
    len: usize,
}

impl AlignedBuffer {
    pub fn new(size: usize, align: usize) -> UploadResult<Self> {
        if align == 0 || !align.is_power_of_two() {
            return Err(UploadError::invalid(format!(
                "alignment must be a power of two, got {}",
                align
            )));
        }
        let capacity = size
            .checked_add(align)
            .ok_or_else(|| UploadError::invalid(format!("aligned buffer of {} bytes is too large", size)))?;

        let raw = vec![0u8; capacity];
        let misalignment = (raw.as_ptr() as usize) & (align - 1);
        let start = if misalignment == 0 { 0 } else { align - misalignment };

        Ok(Self { raw, start, len: size })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.raw[self.start..self.start + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[self.start..self.start + self.len]
    }
}

/// Open `path` read-only and advise the kernel to drop its cached pages
#[cfg(target_os = "linux")]
pub fn open_dontneed(path: &Path) -> UploadResult<File> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path).map_err(|e| UploadError::io(format!("opening {}", path.display()), e))?;

    // The descriptor stays owned by `file` for the whole call.
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
    if rc != 0 {
        return Err(UploadError::io(
            format!("setting FADV_DONTNEED on {}", path.display()),
            std::io::Error::from_raw_os_error(rc),
        ));
    }

    Ok(file)
}

/// Open `path` read-only; cache advice is unavailable on this platform
#[cfg(not(target_os = "linux"))]
pub fn open_dontneed(path: &Path) -> UploadResult<File> {
    File::open(path).map_err(|e| UploadError::io(format!("opening {}", path.display()), e))
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_direct(_path: &Path) -> std::io::Result<File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "O_DIRECT is not available on this platform",
    ))
}

/// File source that bypasses the page cache when the platform allows it.
///
/// When `O_DIRECT` cannot be used the file is opened normally and reads
/// behave exactly like [`FileSource`](super::FileSource).
#[derive(Debug, Clone)]
pub struct DirectFileSource {
    path: PathBuf,
    file: Arc<SharedFile>,
    size: u64,
    block_size: usize,
    direct: bool,
}

impl DirectFileSource {
    pub async fn open(path: impl AsRef<Path>, block_size: usize) -> UploadResult<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(UploadError::invalid(format!(
                "direct I/O block size must be a power of two, got {}",
                block_size
            )));
        }

        let path = path.as_ref().to_path_buf();
        let opened = path.clone();
        let (file, direct, size) = blocking(move || {
            let (file, direct) = match open_direct(&opened) {
                Ok(file) => (file, true),
                Err(_) => {
                    let file = File::open(&opened)
                        .map_err(|e| UploadError::io(format!("opening {}", opened.display()), e))?;
                    (file, false)
                }
            };
            let size = file
                .metadata()
                .map_err(|e| UploadError::io(format!("stat {}", opened.display()), e))?
                .len();
            Ok((file, direct, size))
        })
        .await?;

        Ok(Self {
            path,
            file: Arc::new(SharedFile::new(file)),
            size,
            block_size,
            direct,
        })
    }

    /// Whether reads actually bypass the page cache
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Block-aligned window `(aligned_offset, lead, aligned_len)` covering `[offset, offset + len)`
fn aligned_window(offset: u64, len: usize, block_size: usize) -> (u64, usize, usize) {
    let block = block_size as u64;
    let aligned_offset = (offset / block) * block;
    let lead = (offset - aligned_offset) as usize;
    let aligned_len = (len + lead).div_ceil(block_size) * block_size;
    (aligned_offset, lead, aligned_len)
}

#[async_trait]
impl PartSource for DirectFileSource {
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

        if !self.direct {
            return blocking(move || {
                let mut buf = vec![0u8; len];
                file.read_exact_at(&mut buf, offset).map_err(|e| {
                    UploadError::io(format!("reading {} at offset {}", path.display(), offset), e)
                })?;
                Ok(Bytes::from(buf))
            })
            .await;
        }

        let block_size = self.block_size;
        blocking(move || {
            let (aligned_offset, lead, aligned_len) = aligned_window(offset, len, block_size);
            let mut buf = AlignedBuffer::new(aligned_len, block_size)?;

            // A short read means end of file; the final block is usually partial.
            let mut filled = 0;
            while filled < aligned_len {
                let want = aligned_len - filled;
                let n = file
                    .read_at(&mut buf.as_mut_slice()[filled..], aligned_offset + filled as u64)
                    .map_err(|e| {
                        UploadError::io(format!("direct read of {} at offset {}", path.display(), offset), e)
                    })?;
                filled += n;
                if n < want {
                    break;
                }
            }

            if filled < lead + len {
                return Err(UploadError::io(
                    format!("direct read of {} at offset {}", path.display(), offset),
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("read beyond end of file: wanted {} bytes, got {}", len, filled.saturating_sub(lead)),
                    ),
                ));
            }

            Ok(Bytes::copy_from_slice(&buf.as_slice()[lead..lead + len]))
        })
        .await
    }
}
