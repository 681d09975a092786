//! Filesystem collaborator
//!
//! The pipeline only needs a handful of whole-file operations, so the seam is
//! a small handle-based trait rather than a full VFS. The SD card backend in
//! the firmware maps it onto `embedded-sdmmc` raw handles; tests use an
//! in-memory map.

use core::fmt::Write as FmtWrite;

use heapless::String;

/// Longest path the pipeline builds (temp siblings, parent directories)
pub const MAX_PATH_LEN: usize = 64;

/// Storage error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// No such file or directory
    NotFound,
    /// Target already exists
    AlreadyExists,
    /// Path can't be represented on the medium
    InvalidPath,
    /// Read failed
    Read,
    /// Write failed
    Write,
    /// File doesn't fit the caller's buffer
    TooLarge,
    /// Medium or filesystem failure
    Filesystem,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "not found"),
            StorageError::AlreadyExists => write!(f, "already exists"),
            StorageError::InvalidPath => write!(f, "invalid path"),
            StorageError::Read => write!(f, "read failed"),
            StorageError::Write => write!(f, "write failed"),
            StorageError::TooLarge => write!(f, "file too large"),
            StorageError::Filesystem => write!(f, "filesystem error"),
        }
    }
}

impl core::error::Error for StorageError {}

impl embedded_io::Error for StorageError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            StorageError::NotFound => embedded_io::ErrorKind::NotFound,
            StorageError::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            StorageError::InvalidPath => embedded_io::ErrorKind::InvalidInput,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Create, or truncate an existing file, for writing
    Truncate,
}

/// Persistent storage with absolute, `/`-separated paths
pub trait Storage {
    /// Open file handle
    type File;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, StorageError>;

    /// Read into `buf`, returning 0 at end of file
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Append all of `data`
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<(), StorageError>;

    /// Flush and release the handle
    fn close(&mut self, file: Self::File) -> Result<(), StorageError>;

    fn remove(&mut self, path: &str) -> Result<(), StorageError>;

    /// Move `from` to `to`. `to` must not exist.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Create a single directory. Fails with `AlreadyExists` if present.
    fn make_dir(&mut self, path: &str) -> Result<(), StorageError>;
}

/// Read-only file that closes itself when dropped
pub struct FileReader<'s, S: Storage> {
    storage: &'s mut S,
    file: Option<S::File>,
}

impl<'s, S: Storage> FileReader<'s, S> {
    pub fn open(storage: &'s mut S, path: &str) -> Result<Self, StorageError> {
        let file = storage.open(path, OpenMode::Read)?;
        Ok(Self {
            storage,
            file: Some(file),
        })
    }
}

impl<S: Storage> Drop for FileReader<'_, S> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = self.storage.close(file);
        }
    }
}

impl<S: Storage> embedded_io::ErrorType for FileReader<'_, S> {
    type Error = StorageError;
}

impl<S: Storage> embedded_io::Read for FileReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.file.as_mut() {
            Some(file) => self.storage.read(file, buf),
            None => Ok(0),
        }
    }
}

/// Read a whole file into `buf`.
///
/// Returns the number of bytes read. A file that fills `buf` completely and
/// still has data left fails with `TooLarge` rather than being cut short.
pub fn read_file<S: Storage>(
    storage: &mut S,
    path: &str,
    buf: &mut [u8],
) -> Result<usize, StorageError> {
    let mut file = storage.open(path, OpenMode::Read)?;
    let result = read_to_fill(storage, &mut file, buf);
    let closed = storage.close(file);
    let len = result?;
    closed?;
    Ok(len)
}

fn read_to_fill<S: Storage>(
    storage: &mut S,
    file: &mut S::File,
    buf: &mut [u8],
) -> Result<usize, StorageError> {
    let mut total = 0;
    while total < buf.len() {
        match storage.read(file, &mut buf[total..])? {
            0 => return Ok(total),
            n => total += n,
        }
    }
    // Buffer full: make sure nothing is left behind
    let mut probe = [0u8; 1];
    match storage.read(file, &mut probe)? {
        0 => Ok(total),
        _ => Err(StorageError::TooLarge),
    }
}

/// Create or replace a file with `data`, closing it on every path
pub fn write_file<S: Storage>(storage: &mut S, path: &str, data: &[u8]) -> Result<(), StorageError> {
    let mut file = storage.open(path, OpenMode::Truncate)?;
    let written = storage.write(&mut file, data);
    let closed = storage.close(file);
    written?;
    closed
}

/// Sibling path used while replacing `path`.
///
/// The extension is swapped for `tmp` so the name stays within FAT 8.3
/// limits: `/config.jsn` becomes `/config.tmp`.
pub fn temp_path_for(path: &str) -> Result<String<MAX_PATH_LEN>, StorageError> {
    let (dir, name) = split_parent(path);
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    let ext = if name.len() > stem.len() && name[stem.len() + 1..].eq_ignore_ascii_case("tmp") {
        "tm~"
    } else {
        "tmp"
    };

    let mut tmp: String<MAX_PATH_LEN> = String::new();
    write!(tmp, "{}/{}.{}", dir, stem, ext).map_err(|_| StorageError::InvalidPath)?;
    Ok(tmp)
}

/// Make sure every directory above `path` exists.
///
/// Idempotent: directories that are already present are left alone.
pub fn ensure_dir_for<S: Storage>(storage: &mut S, path: &str) -> Result<(), StorageError> {
    let (dir, _) = split_parent(path);
    let mut prefix: String<MAX_PATH_LEN> = String::new();
    for part in dir.split('/').filter(|part| !part.is_empty()) {
        prefix.push('/').map_err(|_| StorageError::InvalidPath)?;
        prefix.push_str(part).map_err(|_| StorageError::InvalidPath)?;
        match storage.make_dir(&prefix) {
            Ok(()) => log::info!("Created directory {}", prefix),
            Err(StorageError::AlreadyExists) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Split `/a/b/c.txt` into (`/a/b`, `c.txt`). Root-level files give an empty
/// directory part.
fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemStorage;

    #[test]
    fn test_temp_path_for() {
        assert_eq!(temp_path_for("/config.jsn").unwrap().as_str(), "/config.tmp");
        assert_eq!(temp_path_for("/sub/dir/image.bin").unwrap().as_str(), "/sub/dir/image.tmp");
        assert_eq!(temp_path_for("/noext").unwrap().as_str(), "/noext.tmp");
        assert_eq!(temp_path_for("/state.tmp").unwrap().as_str(), "/state.tm~");
        assert_ne!(temp_path_for("/a.tmp").unwrap().as_str(), "/a.tmp");
    }

    #[test]
    fn test_ensure_dir_for_is_idempotent() {
        let mut storage = MemStorage::new();
        ensure_dir_for(&mut storage, "/images/daily/display.pbm").unwrap();
        assert!(storage.has_dir("/images"));
        assert!(storage.has_dir("/images/daily"));

        ensure_dir_for(&mut storage, "/images/daily/display.pbm").unwrap();
        assert!(storage.has_dir("/images/daily"));

        // Root-level files need nothing
        ensure_dir_for(&mut storage, "/image.bin").unwrap();
    }

    #[test]
    fn test_read_file_rejects_oversized() {
        let mut storage = MemStorage::new();
        storage.insert("/big.txt", &[b'x'; 16]);

        let mut buf = [0u8; 16];
        assert_eq!(read_file(&mut storage, "/big.txt", &mut buf), Ok(16));

        let mut small = [0u8; 8];
        assert_eq!(
            read_file(&mut storage, "/big.txt", &mut small),
            Err(StorageError::TooLarge)
        );
        assert_eq!(storage.open_handles(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let mut storage = MemStorage::new();
        write_file(&mut storage, "/note.txt", b"hello").unwrap();
        let mut buf = [0u8; 32];
        let len = read_file(&mut storage, "/note.txt", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(storage.open_handles(), 0);
    }

    #[test]
    fn test_reader_closes_on_drop() {
        use embedded_io::Read;

        let mut storage = MemStorage::new();
        storage.insert("/a.bin", b"abc");
        {
            let mut reader = FileReader::open(&mut storage, "/a.bin").unwrap();
            let mut buf = [0u8; 2];
            assert_eq!(reader.read(&mut buf).unwrap(), 2);
        }
        assert_eq!(storage.open_handles(), 0);
        assert!(matches!(
            FileReader::open(&mut storage, "/missing.bin"),
            Err(StorageError::NotFound)
        ));
    }
}
