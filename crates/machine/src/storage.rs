//! Host-file storage layer.
//!
//! Executables and swap files live as ordinary files under a root
//! directory on the host. The kernel sees only named creation, opening,
//! removal, and offset-addressed reads and writes.

use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use log::trace;

/// A directory-rooted view of host storage.
///
/// Cloning is cheap; clones refer to the same root directory.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    /// Opens a filesystem rooted at the given host directory, creating the
    /// directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Creates (or truncates) a file of the given size and opens it.
    pub fn create(&self, name: &str, size: usize) -> io::Result<OpenFile> {
        let path = self.root.join(name);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size as u64)?;
        trace!("created {} ({size} bytes)", path.display());
        Ok(OpenFile {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Opens an existing file for reading and writing.
    pub fn open(&self, name: &str) -> io::Result<OpenFile> {
        let file = File::options().read(true).write(true).open(self.root.join(name))?;
        Ok(OpenFile {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Removes a file by name.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.root.join(name))
    }
}

/// An open, random-access file handle.
///
/// Cloning is cheap; clones share one host file and seek position, so all
/// access goes through the offset-addressed methods.
#[derive(Debug, Clone)]
pub struct OpenFile {
    file: Arc<Mutex<File>>,
}

impl OpenFile {
    /// Reads into `buf` starting at `offset`, returning the number of
    /// bytes read. Short reads happen only at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut total = 0;
        while total < buf.len() {
            let read = file.read(&mut buf[total..])?;
            if read == 0 {
                break;
            }
            total += read;
        }
        Ok(total)
    }

    /// Writes all of `buf` starting at `offset`.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(buf)
    }

    /// Returns the file's length in bytes.
    pub fn length(&self) -> io::Result<usize> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fs(tag: &str) -> FileSystem {
        let root = std::env::temp_dir().join(format!("altair-storage-{tag}-{}", std::process::id()));
        FileSystem::new(root).unwrap()
    }

    #[test]
    fn create_sets_length() {
        let fs = test_fs("create");
        let file = fs.create("image", 256).unwrap();
        assert_eq!(file.length().unwrap(), 256);
    }

    #[test]
    fn write_then_read_at_offset() {
        let fs = test_fs("rw");
        let file = fs.create("scratch", 512).unwrap();

        file.write_at(b"paged out", 128).unwrap();

        let mut buf = [0u8; 9];
        let read = file.read_at(&mut buf, 128).unwrap();
        assert_eq!(read, 9);
        assert_eq!(&buf, b"paged out");
    }

    #[test]
    fn read_past_end_is_short() {
        let fs = test_fs("short");
        let file = fs.create("tiny", 4).unwrap();

        let mut buf = [0xFFu8; 8];
        let read = file.read_at(&mut buf, 0).unwrap();
        assert_eq!(read, 4);
    }

    #[test]
    fn open_sees_created_content() {
        let fs = test_fs("reopen");
        fs.create("named", 16).unwrap().write_at(&[7; 16], 0).unwrap();

        let reopened = fs.open("named").unwrap();
        let mut buf = [0u8; 16];
        reopened.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [7; 16]);
    }

    #[test]
    fn remove_deletes_file() {
        let fs = test_fs("remove");
        fs.create("doomed", 8).unwrap();
        fs.remove("doomed").unwrap();
        assert!(fs.open("doomed").is_err());
    }
}
