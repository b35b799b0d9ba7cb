use crate::hash::murmur64a;
use osrs_bytes::{ReadExt, WriteExt};
use std::{
    fs,
    io::{self, Cursor, Read, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{trace, warn};

const ENTRY_MAGIC: u32 = 0x4843_4531;

#[derive(Error, Debug)]
pub enum HttpCacheError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub etag: String,
    pub body: Vec<u8>,
}

/// On-disk cache of HTTP responses keyed by url.
///
/// Each entry is one file named after the hash of the url, holding the ETag and the
/// body together with a CRC32 of the body. Entries that fail the check are dropped.
pub struct HttpCache {
    dir: PathBuf,
}

impl HttpCache {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<HttpCache, HttpCacheError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(HttpCache {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{:016x}", murmur64a(url)))
    }

    pub fn get(&self, url: &str) -> Result<Option<CacheEntry>, HttpCacheError> {
        let path = self.entry_path(url);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode_entry(&bytes) {
            Some(entry) => {
                trace!("http cache hit {url}");
                Ok(Some(entry))
            }
            None => {
                warn!("dropping corrupt http cache entry for {url}");
                fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }

    pub fn put(&self, url: &str, etag: &str, body: &[u8]) -> Result<(), HttpCacheError> {
        let mut buf = Vec::with_capacity(16 + etag.len() + body.len());
        buf.write_u32(ENTRY_MAGIC)?;
        buf.write_u32(etag.len() as u32)?;
        buf.write_all(etag.as_bytes())?;
        buf.write_u32(crc32fast::hash(body))?;
        buf.write_u32(body.len() as u32)?;
        buf.write_all(body)?;

        let path = self.entry_path(url);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, buf)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, url: &str) -> Result<(), HttpCacheError> {
        match fs::remove_file(self.entry_path(url)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn decode_entry(bytes: &[u8]) -> Option<CacheEntry> {
    let mut csr = Cursor::new(bytes);
    if csr.read_u32().ok()? != ENTRY_MAGIC {
        return None;
    }
    let etag_len = csr.read_u32().ok()? as usize;
    if etag_len > bytes.len() {
        return None;
    }
    let mut etag = vec![0; etag_len];
    csr.read_exact(&mut etag).ok()?;
    let crc = csr.read_u32().ok()?;
    let body_len = csr.read_u32().ok()? as usize;
    if body_len > bytes.len() {
        return None;
    }
    let mut body = vec![0; body_len];
    csr.read_exact(&mut body).ok()?;

    if crc32fast::hash(&body) != crc || (csr.position() as usize) != bytes.len() {
        return None;
    }

    Some(CacheEntry {
        etag: String::from_utf8(etag).ok()?,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::open(dir.path()).unwrap();
        assert!(cache.get("http://host/a").unwrap().is_none());

        cache.put("http://host/a", "\"v1\"", b"body").unwrap();
        let entry = cache.get("http://host/a").unwrap().unwrap();
        assert_eq!(entry.etag, "\"v1\"");
        assert_eq!(entry.body, b"body");

        cache.remove("http://host/a").unwrap();
        assert!(cache.get("http://host/a").unwrap().is_none());
        cache.remove("http://host/a").unwrap();
    }

    #[test]
    fn test_corrupt_entry_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::open(dir.path()).unwrap();
        cache.put("http://host/b", "etag", b"0123456789").unwrap();

        let path = cache.entry_path("http://host/b");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(cache.get("http://host/b").unwrap().is_none());
        assert!(!path.exists());
    }
}
