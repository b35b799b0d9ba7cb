//! Signed resource manifest.
//!
//! A manifest file is an envelope around a serialized [`ManifestData`] block, the
//! detached signature of that block and the identifier of the archive it was built
//! against. All integers are big-endian; byte strings are prefixed by a `u32` length.
//!
//! ```text
//! ManifestFile  := bytes(data) bytes(signature) bytes(archive_identifier)
//! ManifestData  := magic:u32 version:u32 bytes(project_identifier)
//!                  resource_hash_algorithm:u8 signature_hash_algorithm:u8
//!                  count:u32 bytes(engine_version)*
//!                  count:u32 entry*
//! entry         := bytes(url) url_hash:u64 bytes(hash) flags:u32 count:u32 bytes(dependant)*
//! ```

use crate::hash::hash_path;
use osrs_bytes::{ReadExt, WriteExt};
use std::io::{Cursor, Read, Write};
use thiserror::Error;

pub const MAGIC_NUMBER: u32 = 0x43cb_6d06;
pub const VERSION: u32 = 0x03;

pub const ENTRY_FLAG_BUNDLED: u32 = 1 << 0;
pub const ENTRY_FLAG_EXCLUDED: u32 = 1 << 1;

/// Largest byte string the decoder accepts.
const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Ddf(String),
    #[error("manifest format mismatch (expected {expected:#x}, actual {actual:#x})")]
    Format { expected: u32, actual: u32 },
    #[error("manifest version mismatch (expected {expected}, actual {actual})")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("unknown hash algorithm {0}")]
    UnknownHashAlgorithm(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    None = 0,
    Md5 = 1,
    Sha1 = 2,
    Sha256 = 3,
    Sha512 = 4,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn len(self) -> usize {
        match self {
            HashAlgorithm::None => 0,
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn is_empty(self) -> bool {
        self == HashAlgorithm::None
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = ManifestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HashAlgorithm::None),
            1 => Ok(HashAlgorithm::Md5),
            2 => Ok(HashAlgorithm::Sha1),
            3 => Ok(HashAlgorithm::Sha256),
            4 => Ok(HashAlgorithm::Sha512),
            _ => Err(ManifestError::UnknownHashAlgorithm(value)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestHeader {
    pub magic_number: u32,
    pub version: u32,
    pub project_identifier: Vec<u8>,
    pub resource_hash_algorithm: HashAlgorithm,
    pub signature_hash_algorithm: HashAlgorithm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceEntry {
    pub url: String,
    pub url_hash: u64,
    pub hash: Vec<u8>,
    pub flags: u32,
    pub dependants: Vec<Vec<u8>>,
}

impl ResourceEntry {
    pub fn new<T: Into<String>>(url: T, hash: Vec<u8>, flags: u32) -> Self {
        let url = url.into();
        ResourceEntry {
            url_hash: hash_path(&url),
            url,
            hash,
            flags,
            dependants: Vec::new(),
        }
    }

    pub fn is_bundled(&self) -> bool {
        self.flags & ENTRY_FLAG_BUNDLED != 0
    }

    /// Left out of the bundle, to be delivered by live update.
    pub fn is_excluded(&self) -> bool {
        self.flags & ENTRY_FLAG_EXCLUDED != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestData {
    pub header: ManifestHeader,
    pub engine_versions: Vec<Vec<u8>>,
    pub resources: Vec<ResourceEntry>,
}

impl ManifestData {
    pub fn new(
        project_identifier: Vec<u8>,
        resource_hash_algorithm: HashAlgorithm,
        signature_hash_algorithm: HashAlgorithm,
    ) -> Self {
        ManifestData {
            header: ManifestHeader {
                magic_number: MAGIC_NUMBER,
                version: VERSION,
                project_identifier,
                resource_hash_algorithm,
                signature_hash_algorithm,
            },
            engine_versions: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn read(buf: &[u8]) -> Result<ManifestData, ManifestError> {
        let mut csr = Cursor::new(buf);

        let magic_number = csr.read_u32()?;
        let version = csr.read_u32()?;
        let project_identifier = read_bytes(&mut csr)?;
        let resource_hash_algorithm = HashAlgorithm::try_from(csr.read_u8()?)?;
        let signature_hash_algorithm = HashAlgorithm::try_from(csr.read_u8()?)?;

        let engine_count = read_count(&mut csr)?;
        let mut engine_versions = Vec::with_capacity(engine_count);
        for _ in 0..engine_count {
            engine_versions.push(read_bytes(&mut csr)?);
        }

        let resource_count = read_count(&mut csr)?;
        let mut resources = Vec::with_capacity(resource_count);
        for _ in 0..resource_count {
            let url = String::from_utf8(read_bytes(&mut csr)?)
                .map_err(|e| ManifestError::Ddf(format!("url is not utf-8: {e}")))?;
            let url_hash = csr.read_u64()?;
            let hash = read_bytes(&mut csr)?;
            let flags = csr.read_u32()?;
            let dependant_count = read_count(&mut csr)?;
            let mut dependants = Vec::with_capacity(dependant_count);
            for _ in 0..dependant_count {
                dependants.push(read_bytes(&mut csr)?);
            }
            resources.push(ResourceEntry {
                url,
                url_hash,
                hash,
                flags,
                dependants,
            });
        }

        if (csr.position() as usize) != buf.len() {
            return Err(ManifestError::Ddf(format!(
                "{} trailing bytes",
                buf.len() - csr.position() as usize
            )));
        }

        Ok(ManifestData {
            header: ManifestHeader {
                magic_number,
                version,
                project_identifier,
                resource_hash_algorithm,
                signature_hash_algorithm,
            },
            engine_versions,
            resources,
        })
    }

    /// Encode the data block. Entries are written sorted by url hash.
    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        let mut buf = Vec::new();
        buf.write_u32(self.header.magic_number)?;
        buf.write_u32(self.header.version)?;
        write_bytes(&mut buf, &self.header.project_identifier)?;
        buf.write_u8(self.header.resource_hash_algorithm as u8)?;
        buf.write_u8(self.header.signature_hash_algorithm as u8)?;

        buf.write_u32(self.engine_versions.len() as u32)?;
        for version in &self.engine_versions {
            write_bytes(&mut buf, version)?;
        }

        let mut sorted: Vec<&ResourceEntry> = self.resources.iter().collect();
        sorted.sort_by_key(|e| e.url_hash);

        buf.write_u32(sorted.len() as u32)?;
        for entry in sorted {
            write_bytes(&mut buf, entry.url.as_bytes())?;
            buf.write_u64(entry.url_hash)?;
            write_bytes(&mut buf, &entry.hash)?;
            buf.write_u32(entry.flags)?;
            buf.write_u32(entry.dependants.len() as u32)?;
            for dependant in &entry.dependants {
                write_bytes(&mut buf, dependant)?;
            }
        }

        Ok(buf)
    }

    /// Binary search the entries by url hash.
    pub fn find_entry_index(&self, url_hash: u64) -> Option<usize> {
        self.resources
            .binary_search_by_key(&url_hash, |e| e.url_hash)
            .ok()
    }

    pub fn entry_for_path(&self, path: &str) -> Option<&ResourceEntry> {
        self.find_entry_index(hash_path(path))
            .map(|i| &self.resources[i])
    }
}

/// A loaded manifest: the outer envelope plus its decoded data block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub data_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    pub archive_identifier: Vec<u8>,
    pub data: ManifestData,
}

impl Manifest {
    /// Decode a manifest file and validate its header.
    pub fn load(buf: &[u8]) -> Result<Manifest, ManifestError> {
        let mut csr = Cursor::new(buf);
        let data_bytes = read_bytes(&mut csr).map_err(ddf)?;
        let signature = read_bytes(&mut csr).map_err(ddf)?;
        let archive_identifier = read_bytes(&mut csr).map_err(ddf)?;

        let mut data = ManifestData::read(&data_bytes).map_err(ddf)?;

        if data.header.magic_number != MAGIC_NUMBER {
            return Err(ManifestError::Format {
                expected: MAGIC_NUMBER,
                actual: data.header.magic_number,
            });
        }
        if data.header.version != VERSION {
            return Err(ManifestError::VersionMismatch {
                expected: VERSION,
                actual: data.header.version,
            });
        }

        // Older writers did not guarantee ordering.
        if !data
            .resources
            .windows(2)
            .all(|w| w[0].url_hash <= w[1].url_hash)
        {
            data.resources.sort_by_key(|e| e.url_hash);
        }

        Ok(Manifest {
            data_bytes,
            signature,
            archive_identifier,
            data,
        })
    }

    pub fn load_file<P: AsRef<std::path::Path>>(path: P) -> Result<Manifest, ManifestError> {
        Self::load(&std::fs::read(path)?)
    }

    /// Build a manifest around already encoded data bytes.
    pub fn from_parts(
        data: ManifestData,
        signature: Vec<u8>,
        archive_identifier: Vec<u8>,
    ) -> Result<Manifest, ManifestError> {
        Ok(Manifest {
            data_bytes: data.encode()?,
            signature,
            archive_identifier,
            data,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        let mut buf = Vec::with_capacity(
            12 + self.data_bytes.len() + self.signature.len() + self.archive_identifier.len(),
        );
        write_bytes(&mut buf, &self.data_bytes)?;
        write_bytes(&mut buf, &self.signature)?;
        write_bytes(&mut buf, &self.archive_identifier)?;
        Ok(buf)
    }

    pub fn project_id_hex(&self) -> String {
        hex::encode(&self.data.header.project_identifier)
    }
}

fn ddf(e: ManifestError) -> ManifestError {
    match e {
        ManifestError::Io(e) => ManifestError::Ddf(e.to_string()),
        other => other,
    }
}

fn read_count<R: Read>(r: &mut R) -> Result<usize, ManifestError> {
    let count = r.read_u32()?;
    if count > MAX_FIELD_LEN {
        return Err(ManifestError::Ddf(format!("count {count} too large")));
    }
    Ok(count as usize)
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, ManifestError> {
    let len = read_count(r)?;
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), ManifestError> {
    w.write_u32(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}
