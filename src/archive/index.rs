use super::ArchiveError;
use osrs_bytes::{ReadExt, WriteExt};
use std::{
    cmp::Ordering,
    io::{Cursor, Read, Write},
};

pub const VERSION: u32 = 4;
pub const HEADER_SIZE: usize = 48;
pub const MAX_HASH: usize = 64;
pub const ENTRY_SIZE: usize = 16;
pub const ARCHIVE_ID_SIZE: usize = 16;
pub const UNCOMPRESSED: u32 = 0xFFFF_FFFF;

pub const FLAG_ENCRYPTED: u32 = 1 << 0;
pub const FLAG_COMPRESSED: u32 = 1 << 1;
pub const FLAG_LIVEUPDATE: u32 = 1 << 2;
pub const FLAG_BUNDLED: u32 = 1 << 3;

/// Location of one payload inside a data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryData {
    pub offset: u32,
    pub size: u32,
    pub compressed_size: u32,
    pub flags: u32,
}

impl EntryData {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != UNCOMPRESSED
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_liveupdate(&self) -> bool {
        self.flags & FLAG_LIVEUPDATE != 0
    }

    /// Number of bytes the entry occupies in its data file.
    pub fn stored_size(&self) -> u32 {
        if self.is_compressed() {
            self.compressed_size
        } else {
            self.size
        }
    }
}

/// Sorted content-hash to entry table of an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub version: u32,
    pub userdata: u64,
    pub hash_length: u32,
    pub archive_id: [u8; ARCHIVE_ID_SIZE],
    hashes: Vec<[u8; MAX_HASH]>,
    entries: Vec<EntryData>,
}

impl ArchiveIndex {
    pub fn new(hash_length: u32, archive_id: [u8; ARCHIVE_ID_SIZE]) -> Self {
        Self {
            version: VERSION,
            userdata: 0,
            hash_length,
            archive_id,
            hashes: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Parse an index from the bytes of an index file.
    pub fn read<T: AsRef<[u8]>>(buf: T) -> Result<ArchiveIndex, ArchiveError> {
        let buf = buf.as_ref();
        if buf.len() < HEADER_SIZE {
            return Err(ArchiveError::Truncated(buf.len()));
        }

        let mut csr = Cursor::new(buf);
        let version = csr.read_u32()?;
        if version != VERSION {
            return Err(ArchiveError::VersionMismatch(version));
        }
        let _pad = csr.read_u32()?;
        let userdata = csr.read_u64()?;
        let entry_count = csr.read_u32()? as usize;
        let entry_offset = csr.read_u32()? as usize;
        let hash_offset = csr.read_u32()? as usize;
        let hash_length = csr.read_u32()?;
        let mut archive_id = [0u8; ARCHIVE_ID_SIZE];
        csr.read_exact(&mut archive_id)?;

        if hash_length == 0 || hash_length as usize > MAX_HASH {
            return Err(ArchiveError::InvalidHashLength(hash_length));
        }
        if hash_offset + entry_count * MAX_HASH > buf.len()
            || entry_offset + entry_count * ENTRY_SIZE > buf.len()
        {
            return Err(ArchiveError::Truncated(buf.len()));
        }

        let mut hashes = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let start = hash_offset + i * MAX_HASH;
            let mut hash = [0u8; MAX_HASH];
            hash.copy_from_slice(&buf[start..start + MAX_HASH]);
            hashes.push(hash);
        }

        let mut entries = Vec::with_capacity(entry_count);
        csr.set_position(entry_offset as u64);
        for _ in 0..entry_count {
            entries.push(EntryData {
                offset: csr.read_u32()?,
                size: csr.read_u32()?,
                compressed_size: csr.read_u32()?,
                flags: csr.read_u32()?,
            });
        }

        Ok(ArchiveIndex {
            version,
            userdata,
            hash_length,
            archive_id,
            hashes,
            entries,
        })
    }

    /// Serialize the index, laying out header, hashes and entries back to back.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ArchiveError> {
        let count = self.entries.len() as u32;
        let hash_offset = HEADER_SIZE as u32;
        let entry_offset = hash_offset + count * MAX_HASH as u32;

        w.write_u32(self.version)?;
        w.write_u32(0)?;
        w.write_u64(self.userdata)?;
        w.write_u32(count)?;
        w.write_u32(entry_offset)?;
        w.write_u32(hash_offset)?;
        w.write_u32(self.hash_length)?;
        w.write_all(&self.archive_id)?;

        for hash in &self.hashes {
            w.write_all(hash)?;
        }
        for entry in &self.entries {
            w.write_u32(entry.offset)?;
            w.write_u32(entry.size)?;
            w.write_u32(entry.compressed_size)?;
            w.write_u32(entry.flags)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut buf =
            Vec::with_capacity(HEADER_SIZE + self.entries.len() * (MAX_HASH + ENTRY_SIZE));
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hash(&self, i: usize) -> &[u8] {
        &self.hashes[i][..self.hash_length as usize]
    }

    pub fn entry(&self, i: usize) -> &EntryData {
        &self.entries[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &EntryData)> {
        let len = self.hash_length as usize;
        self.hashes
            .iter()
            .map(move |h| &h[..len])
            .zip(self.entries.iter())
    }

    pub fn archive_id_matches(&self, id: &[u8]) -> bool {
        let len = id.len().min(ARCHIVE_ID_SIZE);
        self.archive_id[..len] == id[..len]
    }

    fn compare(&self, i: usize, hash: &[u8]) -> Ordering {
        let len = self.hash_length as usize;
        self.hashes[i][..len].cmp(&hash[..len])
    }

    fn check_hash(&self, hash: &[u8]) -> Result<(), ArchiveError> {
        if hash.len() < self.hash_length as usize {
            return Err(ArchiveError::InvalidHash(hash.len(), self.hash_length));
        }
        Ok(())
    }

    /// Binary search for a content hash.
    pub fn find(&self, hash: &[u8]) -> Result<Option<EntryData>, ArchiveError> {
        self.check_hash(hash)?;

        let mut first = 0usize;
        let mut last = self.entries.len();
        while first < last {
            let mid = first + (last - first) / 2;
            match self.compare(mid, hash) {
                Ordering::Equal => return Ok(Some(self.entries[mid])),
                Ordering::Greater => last = mid,
                Ordering::Less => first = mid + 1,
            }
        }

        Ok(None)
    }

    /// Index at which `hash` must be inserted to keep the table sorted.
    pub fn insertion_index(&self, hash: &[u8]) -> Result<usize, ArchiveError> {
        self.check_hash(hash)?;

        let mut first = 0usize;
        let mut last = self.entries.len();
        while first < last {
            let mid = first + (last - first) / 2;
            match self.compare(mid, hash) {
                Ordering::Equal => return Err(ArchiveError::AlreadyStored),
                Ordering::Greater => last = mid,
                Ordering::Less => first = mid + 1,
            }
        }

        Ok(first)
    }

    /// Move the tail of the table one slot down and write the entry at `index`.
    pub fn shift_and_insert(
        &mut self,
        index: usize,
        hash: &[u8],
        entry: EntryData,
    ) -> Result<(), ArchiveError> {
        self.check_hash(hash)?;
        if index > self.entries.len() {
            return Err(ArchiveError::InsertionOutOfRange(index, self.entries.len()));
        }

        let mut slot = [0u8; MAX_HASH];
        let len = self.hash_length as usize;
        slot[..len].copy_from_slice(&hash[..len]);

        self.hashes.insert(index, slot);
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Insert keeping the sort order; fails if the hash is already present.
    pub fn insert_sorted(&mut self, hash: &[u8], entry: EntryData) -> Result<usize, ArchiveError> {
        let index = self.insertion_index(hash)?;
        self.shift_and_insert(index, hash, entry)?;
        Ok(index)
    }

    /// Deep copy with room reserved for `extra` more entries.
    pub fn copy_with_capacity(&self, extra: usize) -> ArchiveIndex {
        let mut copy = ArchiveIndex {
            version: self.version,
            userdata: self.userdata,
            hash_length: self.hash_length,
            archive_id: self.archive_id,
            hashes: Vec::with_capacity(self.hashes.len() + extra),
            entries: Vec::with_capacity(self.entries.len() + extra),
        };
        copy.hashes.extend_from_slice(&self.hashes);
        copy.entries.extend_from_slice(&self.entries);
        copy
    }

    /// Live-update entries of `self` whose hash is absent from `bundled`.
    pub fn liveupdate_entries_missing_from(
        &self,
        bundled: &ArchiveIndex,
    ) -> Result<Vec<(Vec<u8>, EntryData)>, ArchiveError> {
        let mut cached = Vec::new();
        for (hash, entry) in self.iter() {
            if !entry.is_liveupdate() {
                continue;
            }
            match bundled.insertion_index(hash) {
                Ok(_) => cached.push((hash.to_vec(), *entry)),
                Err(ArchiveError::AlreadyStored) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u32) -> EntryData {
        EntryData {
            offset,
            size: 4,
            compressed_size: UNCOMPRESSED,
            flags: 0,
        }
    }

    fn hash(b: u8) -> [u8; 16] {
        [b; 16]
    }

    fn index_of(hashes: &[u8]) -> ArchiveIndex {
        let mut index = ArchiveIndex::new(16, [7; 16]);
        for (i, b) in hashes.iter().enumerate() {
            index.insert_sorted(&hash(*b), entry(i as u32)).unwrap();
        }
        index
    }

    fn assert_sorted(index: &ArchiveIndex) {
        for i in 1..index.len() {
            assert!(index.hash(i - 1) < index.hash(i));
        }
    }

    #[test]
    fn test_insertion_index() {
        let index = index_of(&[10, 20, 30]);
        assert_eq!(index.insertion_index(&hash(5)).unwrap(), 0);
        assert_eq!(index.insertion_index(&hash(15)).unwrap(), 1);
        assert_eq!(index.insertion_index(&hash(25)).unwrap(), 2);
        assert_eq!(index.insertion_index(&hash(35)).unwrap(), 3);
        assert!(matches!(
            index.insertion_index(&hash(20)),
            Err(ArchiveError::AlreadyStored)
        ));
    }

    #[test]
    fn test_insert_keeps_sorted() {
        let index = index_of(&[200, 3, 77, 150, 1, 99, 42, 128, 255, 0]);
        assert_eq!(index.len(), 10);
        assert_sorted(&index);
        for b in [200, 3, 77, 150, 1, 99, 42, 128, 255, 0] {
            assert!(index.find(&hash(b)).unwrap().is_some());
        }
        assert!(index.find(&hash(2)).unwrap().is_none());
    }

    #[test]
    fn test_find_short_hash() {
        let index = index_of(&[1]);
        assert!(matches!(
            index.find(&[1; 4]),
            Err(ArchiveError::InvalidHash(4, 16))
        ));
    }

    #[test]
    fn test_write_read() {
        let mut index = index_of(&[9, 4, 6]);
        index.userdata = 0xdead_beef;
        let bytes = index.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 3 * (MAX_HASH + ENTRY_SIZE));
        assert_eq!(ArchiveIndex::read(&bytes).unwrap(), index);
    }

    #[test]
    fn test_read_version_mismatch() {
        let mut bytes = index_of(&[1]).to_bytes().unwrap();
        bytes[3] = 5;
        assert!(matches!(
            ArchiveIndex::read(&bytes),
            Err(ArchiveError::VersionMismatch(5))
        ));
    }

    #[test]
    fn test_read_truncated() {
        let bytes = index_of(&[1, 2]).to_bytes().unwrap();
        assert!(matches!(
            ArchiveIndex::read(&bytes[..bytes.len() - 1]),
            Err(ArchiveError::Truncated(_))
        ));
        assert!(matches!(
            ArchiveIndex::read(&bytes[..10]),
            Err(ArchiveError::Truncated(10))
        ));
    }

    #[test]
    fn test_liveupdate_entries_missing_from() {
        let bundled = index_of(&[1, 2, 3]);
        let mut lu = bundled.copy_with_capacity(2);
        let mut e = entry(0);
        e.flags = FLAG_LIVEUPDATE;
        lu.insert_sorted(&hash(4), e).unwrap();
        lu.insert_sorted(&hash(0), e).unwrap();

        let mut newer = index_of(&[1, 2, 3]);
        newer.insert_sorted(&hash(4), entry(9)).unwrap();

        let cached = lu.liveupdate_entries_missing_from(&newer).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].0, hash(0).to_vec());
    }
}
