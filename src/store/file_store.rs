use super::{Store, StoreError};
use crate::hash::canonical_path_from_base;
use std::{fs, io};

/// Loads resources straight from a directory tree.
pub struct FileStore {
    base: String,
}

impl FileStore {
    pub fn open(path: &str) -> FileStore {
        FileStore {
            base: path.to_string(),
        }
    }
}

impl Store for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
        let path = canonical_path_from_base(&self.base, name);
        match fs::read(&path) {
            Ok(bytes) => {
                *buf = bytes;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), "hello").unwrap();

        let mut store = FileStore::open(dir.path().to_str().unwrap());
        let mut buf = Vec::new();
        store.load("/sub//a.txt", &mut buf).unwrap();
        assert_eq!(buf, b"hello");

        assert!(matches!(
            store.load("/sub/missing.txt", &mut buf),
            Err(StoreError::NotFound(_))
        ));
    }
}
