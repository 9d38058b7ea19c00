//! File-backed shared memory region

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use memmap2::{MmapOptions, MmapRaw};

use crate::error::{Result, VchanError};

use super::config::RegionConfig;

/// A mapped shared memory region
///
/// The mapping is shared with the peer, which may change any byte at any
/// time. Access goes through raw pointers handed out by [`ptr_at`]; no
/// Rust reference to the contents is ever created except to atomics.
///
/// [`ptr_at`]: SharedMemoryRegion::ptr_at
#[derive(Debug)]
pub struct SharedMemoryRegion {
    /// Memory-mapped region
    mmap: MmapRaw,
    /// Path the region was created or opened at
    path: PathBuf,
    /// Keeps the backing file open for the lifetime of the mapping
    _file: File,
}

impl SharedMemoryRegion {
    /// Create (or truncate) the backing file and map it
    pub fn create(config: &RegionConfig) -> Result<Self> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(config.permissions)
            .open(&config.path)
            .map_err(|e| VchanError::from_io(e, "Failed to create region file"))?;

        file.set_len(config.size as u64)
            .map_err(|e| VchanError::from_io(e, "Failed to set region size"))?;

        let mmap = Self::map(&file, config.size)?;
        tracing::debug!(size = config.size, path = %config.path.display(), "created shared region");

        Ok(Self {
            mmap,
            path: config.path.clone(),
            _file: file,
        })
    }

    /// Open and map an existing region published by someone else
    ///
    /// The size is whatever the file currently holds; anything empty or
    /// larger than `max_size` is refused before mapping.
    pub fn open(path: &Path, max_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| VchanError::from_io(e, "Failed to open region file"))?;

        let len = file
            .metadata()
            .map_err(|e| VchanError::from_io(e, "Failed to stat region file"))?
            .len();
        if len == 0 || len > max_size as u64 {
            return Err(VchanError::protocol(format!(
                "region size {} outside (0, {}]",
                len, max_size
            )));
        }

        let mmap = Self::map(&file, len as usize)?;
        tracing::debug!(size = len, path = %path.display(), "opened shared region");

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            _file: file,
        })
    }

    fn map(file: &File, size: usize) -> Result<MmapRaw> {
        MmapOptions::new()
            .len(size)
            .map_raw(file)
            .map_err(|e| VchanError::from_io(e, "Failed to create memory mapping"))
    }

    /// Pointer to `len` bytes at `offset`, bounds-checked against the mapping
    pub fn ptr_at(&self, offset: usize, len: usize) -> Result<NonNull<u8>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| VchanError::memory("region offset overflow"))?;
        if end > self.size() {
            return Err(VchanError::memory(format!(
                "range {}..{} outside region of {} bytes",
                offset,
                end,
                self.size()
            )));
        }
        // mmap never returns null
        NonNull::new(unsafe { self.mmap.as_mut_ptr().add(offset) })
            .ok_or_else(|| VchanError::memory("null region mapping"))
    }

    /// Get the size of the region
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Get the path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        tracing::debug!(size = self.size(), path = %self.path.display(), "unmapped shared region");
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reopen_share_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region");

        let created = SharedMemoryRegion::create(&RegionConfig::new(&path, 8192)).unwrap();
        assert_eq!(created.size(), 8192);

        let opened = SharedMemoryRegion::open(&path, 1 << 20).unwrap();
        assert_eq!(opened.size(), 8192);

        unsafe {
            created.ptr_at(100, 1).unwrap().as_ptr().write_volatile(0xAB);
            assert_eq!(opened.ptr_at(100, 1).unwrap().as_ptr().read_volatile(), 0xAB);
        }
    }

    #[test]
    fn test_ptr_at_bounds() {
        let dir = TempDir::new().unwrap();
        let region =
            SharedMemoryRegion::create(&RegionConfig::new(dir.path().join("r"), 4096)).unwrap();

        assert!(region.ptr_at(0, 4096).is_ok());
        assert!(region.ptr_at(4095, 1).is_ok());
        assert!(region.ptr_at(4095, 2).is_err());
        assert!(region.ptr_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_open_refuses_oversized_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big");
        SharedMemoryRegion::create(&RegionConfig::new(&path, 16384)).unwrap();

        let err = SharedMemoryRegion::open(&path, 8192).unwrap_err();
        assert!(matches!(err, VchanError::Protocol { .. }));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SharedMemoryRegion::open(&dir.path().join("nope"), 4096).unwrap_err();
        assert!(err.is_not_found());
    }
}
