use self::{
    codec::{CodecError, EntryCodec},
    index::{ArchiveIndex, EntryData, FLAG_COMPRESSED, FLAG_ENCRYPTED, FLAG_LIVEUPDATE, UNCOMPRESSED},
};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, trace};

pub mod codec;
pub mod index;

pub const INDEX_EXTENSION: &str = "arci";
pub const DATA_EXTENSION: &str = "arcd";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("archive version mismatch: {0}")]
    VersionMismatch(u32),
    #[error("archive index truncated ({0} bytes)")]
    Truncated(usize),
    #[error("invalid hash length {0}")]
    InvalidHashLength(u32),
    #[error("hash of {0} bytes is shorter than the index hash length {1}")]
    InvalidHash(usize, u32),
    #[error("entry already stored")]
    AlreadyStored,
    #[error("insertion index {0} out of range for {1} entries")]
    InsertionOutOfRange(usize, usize),
    #[error("entry at {offset}+{len} outside data file of {data_len} bytes")]
    OutsideDataFile {
        offset: usize,
        len: usize,
        data_len: usize,
    },
    #[error("no live update data file mounted")]
    NoLiveUpdateData,
}

/// Backing bytes of a data file.
pub enum DataFile {
    Mapped(Mmap),
    Bytes(Vec<u8>),
    File(Mutex<File>),
}

impl DataFile {
    pub fn map<P: AsRef<Path>>(path: P) -> Result<DataFile, ArchiveError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            // Empty files cannot be mapped on every platform.
            return Ok(DataFile::Bytes(Vec::new()));
        }
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(DataFile::Mapped(mmap))
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, ArchiveError> {
        let slice = |data: &[u8]| -> Result<Vec<u8>, ArchiveError> {
            if offset + len > data.len() {
                return Err(ArchiveError::OutsideDataFile {
                    offset,
                    len,
                    data_len: data.len(),
                });
            }
            Ok(data[offset..offset + len].to_vec())
        };

        match self {
            DataFile::Mapped(mmap) => slice(mmap),
            DataFile::Bytes(bytes) => slice(bytes),
            DataFile::File(file) => {
                let mut file = file.lock();
                let data_len = file.metadata()?.len() as usize;
                if offset + len > data_len {
                    return Err(ArchiveError::OutsideDataFile {
                        offset,
                        len,
                        data_len,
                    });
                }
                let mut buf = vec![0; len];
                file.seek(SeekFrom::Start(offset as u64))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

/// Live-update data file, opened for reading and appending.
pub struct LiveUpdateData {
    path: PathBuf,
    file: DataFile,
}

impl LiveUpdateData {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LiveUpdateData, ArchiveError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path.as_ref())?;
        Ok(LiveUpdateData {
            path: path.as_ref().to_path_buf(),
            file: DataFile::File(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a payload, returning its offset in the file.
    pub fn append(&self, buf: &[u8]) -> Result<u32, ArchiveError> {
        let DataFile::File(file) = &self.file else {
            return Err(ArchiveError::NoLiveUpdateData);
        };
        let mut file = file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(offset as u32)
    }
}

/// An archive index together with the data files its entries point into.
pub struct ArchiveContainer {
    index: ArchiveIndex,
    data: DataFile,
    liveupdate: Option<LiveUpdateData>,
}

impl ArchiveContainer {
    /// Map an index and data file pair, and optionally a live-update data file.
    ///
    /// # Arguments
    ///
    /// * `index_path` - Path to the `.arci` file
    /// * `data_path` - Path to the bundled `.arcd` file
    /// * `liveupdate_data_path` - Path to `liveupdate.arcd`, if live update is in use
    pub fn mount<P: AsRef<Path>>(
        index_path: P,
        data_path: P,
        liveupdate_data_path: Option<P>,
    ) -> Result<ArchiveContainer, ArchiveError> {
        let index_file = File::open(index_path.as_ref())?;
        let index_map = unsafe { Mmap::map(&index_file) }?;
        let index = ArchiveIndex::read(&index_map)?;

        let data = DataFile::map(data_path.as_ref())?;
        let liveupdate = liveupdate_data_path
            .map(LiveUpdateData::open)
            .transpose()?;

        debug!(
            "mounted archive {} ({} entries)",
            index_path.as_ref().display(),
            index.len()
        );

        Ok(ArchiveContainer {
            index,
            data,
            liveupdate,
        })
    }

    /// Wrap an index and data already in memory.
    pub fn wrap(index: &[u8], data: Vec<u8>) -> Result<ArchiveContainer, ArchiveError> {
        Ok(ArchiveContainer {
            index: ArchiveIndex::read(index)?,
            data: DataFile::Bytes(data),
            liveupdate: None,
        })
    }

    pub fn from_parts(
        index: ArchiveIndex,
        data: DataFile,
        liveupdate: Option<LiveUpdateData>,
    ) -> ArchiveContainer {
        ArchiveContainer {
            index,
            data,
            liveupdate,
        }
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Replace the runtime index; used after a live-update insertion.
    pub fn set_index(&mut self, index: ArchiveIndex) {
        self.index = index;
    }

    pub fn liveupdate(&self) -> Option<&LiveUpdateData> {
        self.liveupdate.as_ref()
    }

    pub fn set_liveupdate(&mut self, liveupdate: LiveUpdateData) {
        self.liveupdate = Some(liveupdate);
    }

    pub fn find(&self, hash: &[u8]) -> Result<Option<EntryData>, ArchiveError> {
        let entry = self.index.find(hash)?;
        trace!("archive lookup {} -> {:?}", hex::encode(hash), entry);
        Ok(entry)
    }

    /// Read and decode one entry into a freshly sized buffer.
    pub fn read(&self, entry: &EntryData) -> Result<Vec<u8>, ArchiveError> {
        let source = if entry.is_liveupdate() {
            &self
                .liveupdate
                .as_ref()
                .ok_or(ArchiveError::NoLiveUpdateData)?
                .file
        } else {
            &self.data
        };

        let raw = source.read(entry.offset as usize, entry.stored_size() as usize)?;
        Ok(EntryCodec::decode(
            raw,
            entry.is_encrypted(),
            entry.is_compressed(),
            entry.size as usize,
        )?)
    }

    pub fn read_into(&self, entry: &EntryData, dst: &mut Vec<u8>) -> Result<(), ArchiveError> {
        let buf = self.read(entry)?;
        dst.clear();
        dst.extend_from_slice(&buf);
        Ok(())
    }
}

/// Assembles an index/data pair. Entries can be added in any order.
pub struct ArchiveBuilder {
    index: ArchiveIndex,
    data: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new(hash_length: u32) -> ArchiveBuilder {
        ArchiveBuilder {
            index: ArchiveIndex::new(hash_length, [0; index::ARCHIVE_ID_SIZE]),
            data: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        hash: &[u8],
        payload: &[u8],
        compress: bool,
        encrypt: bool,
        extra_flags: u32,
    ) -> Result<&mut Self, ArchiveError> {
        let (stored, compressed) = EntryCodec::encode(payload, encrypt, compress)?;
        let mut flags = extra_flags & !FLAG_LIVEUPDATE;
        if compressed {
            flags |= FLAG_COMPRESSED;
        }
        if encrypt {
            flags |= FLAG_ENCRYPTED;
        }
        let entry = EntryData {
            offset: self.data.len() as u32,
            size: payload.len() as u32,
            compressed_size: if compressed {
                stored.len() as u32
            } else {
                UNCOMPRESSED
            },
            flags,
        };
        self.index.insert_sorted(hash, entry)?;
        self.data.extend_from_slice(&stored);
        Ok(self)
    }

    /// Finish the archive. The archive identifier is the MD5 of the entry table.
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<u8>), ArchiveError> {
        use md5::{Digest, Md5};

        let mut hasher = Md5::new();
        for (hash, entry) in self.index.iter() {
            hasher.update(hash);
            hasher.update(entry.offset.to_be_bytes());
            hasher.update(entry.size.to_be_bytes());
        }
        self.index.archive_id.copy_from_slice(&hasher.finalize());

        Ok((self.index.to_bytes()?, self.data))
    }

    pub fn write<P: AsRef<Path>>(self, index_path: P, data_path: P) -> Result<[u8; 16], ArchiveError> {
        let (index, data) = self.finish()?;
        let id = ArchiveIndex::read(&index)?.archive_id;
        std::fs::write(index_path, index)?;
        std::fs::write(data_path, data)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(s: &str) -> Vec<u8> {
        use md5::{Digest, Md5};
        Md5::digest(s.as_bytes()).to_vec()
    }

    #[test]
    fn test_wrap_read_roundtrip() {
        let payloads = [
            ("plain", false, false),
            ("compressed compressed compressed compressed", true, false),
            ("encrypted", false, true),
            ("both both both both both both both both", true, true),
        ];

        let mut builder = ArchiveBuilder::new(16);
        for (p, c, e) in payloads {
            builder.add(&digest(p), p.as_bytes(), c, e, 0).unwrap();
        }
        let (index, data) = builder.finish().unwrap();
        let archive = ArchiveContainer::wrap(&index, data).unwrap();

        for (p, _, _) in payloads {
            let entry = archive.find(&digest(p)).unwrap().unwrap();
            assert_eq!(archive.read(&entry).unwrap(), p.as_bytes());
        }
        assert!(archive.find(&digest("missing")).unwrap().is_none());
    }

    #[test]
    fn test_liveupdate_entry_without_data_file() {
        let mut index = ArchiveIndex::new(16, [0; 16]);
        index
            .insert_sorted(
                &digest("x"),
                EntryData {
                    offset: 0,
                    size: 1,
                    compressed_size: UNCOMPRESSED,
                    flags: FLAG_LIVEUPDATE,
                },
            )
            .unwrap();
        let archive = ArchiveContainer::from_parts(index, DataFile::Bytes(Vec::new()), None);
        let entry = archive.find(&digest("x")).unwrap().unwrap();
        assert!(matches!(
            archive.read(&entry),
            Err(ArchiveError::NoLiveUpdateData)
        ));
    }

    #[test]
    fn test_outside_data_file() {
        let mut builder = ArchiveBuilder::new(16);
        builder.add(&digest("a"), b"0123456789", false, false, 0).unwrap();
        let (index, mut data) = builder.finish().unwrap();
        data.truncate(4);
        let archive = ArchiveContainer::wrap(&index, data).unwrap();
        let entry = archive.find(&digest("a")).unwrap().unwrap();
        assert!(matches!(
            archive.read(&entry),
            Err(ArchiveError::OutsideDataFile { .. })
        ));
    }
}
