#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::types::{Result, StoreError};

/// Positioned file I/O used by block files, metaroot files and free-list sidecars.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file when needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn pread_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !dst.is_empty() {
        let read = file.read_at(dst, off)?;
        if read == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read_at reached EOF",
            ));
        }
        let (_, tail) = dst.split_at_mut(read);
        dst = tail;
        off += read as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn pwrite_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !src.is_empty() {
        let written = file.write_at(src, off)?;
        if written == 0 {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                "write_at wrote zero bytes",
            ));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pread_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !dst.is_empty() {
        let read = file.seek_read(dst, off)?;
        if read == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "seek_read reached EOF",
            ));
        }
        let (_, tail) = dst.split_at_mut(read);
        dst = tail;
        off += read as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pwrite_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !src.is_empty() {
        let written = file.seek_write(src, off)?;
        if written == 0 {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                "seek_write wrote zero bytes",
            ));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

/// File-backed I/O sharing one handle between clones.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        pread_exact(&self.inner, off, dst).map_err(StoreError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        pwrite_all(&self.inner, off, src).map_err(StoreError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(StoreError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(StoreError::from)
    }
}

/// In-memory file. Clones share the same bytes, so dropping a store and reopening it on a
/// clone models a process crash without touching the filesystem.
#[derive(Clone, Default)]
pub struct MemFileIo {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemFileIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Overwrites bytes in place, for corruption tests.
    pub fn poke(&self, off: usize, src: &[u8]) {
        let mut bytes = self.bytes.lock();
        if bytes.len() < off + src.len() {
            bytes.resize(off + src.len(), 0);
        }
        bytes[off..off + src.len()].copy_from_slice(src);
    }
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let start = off as usize;
        let end = start + dst.len();
        if end > bytes.len() {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of memory file",
            )));
        }
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = off as usize;
        let end = start + src.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.bytes.lock().resize(len as usize, 0);
        Ok(())
    }
}

/// Wrapper that starts failing writes and syncs once armed. Used to exercise the prepare and
/// commit failure paths.
#[derive(Clone)]
pub struct FailpointIo {
    inner: Arc<dyn FileIo>,
    armed: Arc<AtomicBool>,
    once: Arc<AtomicBool>,
    writes_before_failure: Arc<AtomicU64>,
}

impl FailpointIo {
    /// Wraps `inner` with a disarmed failpoint.
    pub fn new(inner: Arc<dyn FileIo>) -> Self {
        Self {
            inner,
            armed: Arc::new(AtomicBool::new(false)),
            once: Arc::new(AtomicBool::new(false)),
            writes_before_failure: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arms the failpoint: after `allowed_writes` more successful writes every write and
    /// sync fails.
    pub fn arm(&self, allowed_writes: u64) {
        self.writes_before_failure
            .store(allowed_writes, Ordering::SeqCst);
        self.once.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Like [`FailpointIo::arm`], but only the first failing write or sync fails; the
    /// failpoint disarms itself afterwards.
    pub fn arm_once(&self, allowed_writes: u64) {
        self.arm(allowed_writes);
        self.once.store(true, Ordering::SeqCst);
    }

    /// Disarms the failpoint.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn fail(&self, what: &'static str) -> StoreError {
        if self.once.load(Ordering::SeqCst) {
            self.armed.store(false, Ordering::SeqCst);
        }
        StoreError::Io(io::Error::new(ErrorKind::Other, what))
    }

    fn check(&self, what: &'static str) -> Result<()> {
        if !self.armed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let remaining = self.writes_before_failure.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(self.fail(what));
        }
        self.writes_before_failure
            .store(remaining - 1, Ordering::SeqCst);
        Ok(())
    }
}

impl FileIo for FailpointIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.check("injected write failure")?;
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        if self.armed.load(Ordering::SeqCst)
            && self.writes_before_failure.load(Ordering::SeqCst) == 0
        {
            return Err(self.fail("injected sync failure"));
        }
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.check("injected truncate failure")?;
        self.inner.truncate(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::open(&path).unwrap();

        let payload = b"hello quads";
        io.write_at(0, payload).unwrap();
        io.sync_all().unwrap();

        let mut buf = vec![0u8; payload.len()];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, payload);
        assert!(io.len().unwrap() >= payload.len() as u64);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf).unwrap_err() {
            StoreError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn mem_file_clones_share_contents() {
        let io = MemFileIo::new();
        let clone = io.clone();
        io.write_at(4, &[7, 7]).unwrap();
        assert_eq!(clone.len().unwrap(), 6);
        let mut buf = [0u8; 2];
        clone.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [7, 7]);
        clone.truncate(2).unwrap();
        assert!(io.read_at(4, &mut buf).is_err());
    }

    #[test]
    fn failpoint_allows_budgeted_writes_then_fails() {
        let io = FailpointIo::new(Arc::new(MemFileIo::new()));
        io.arm(1);
        io.write_at(0, b"a").unwrap();
        assert!(io.write_at(1, b"b").is_err());
        assert!(io.sync_all().is_err());
        io.disarm();
        io.write_at(1, b"b").unwrap();
        io.sync_all().unwrap();
    }

    #[test]
    fn one_shot_failpoint_fails_a_single_operation() {
        let io = FailpointIo::new(Arc::new(MemFileIo::new()));
        io.arm_once(1);
        io.write_at(0, b"a").unwrap();
        assert!(io.sync_all().is_err());
        io.sync_all().unwrap();
        io.write_at(1, b"b").unwrap();
    }
}
