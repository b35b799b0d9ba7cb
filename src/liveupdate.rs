//! Live update: patching shipped content at runtime.
//!
//! Patched resources are appended to `liveupdate.arcd` and indexed by
//! `liveupdate.arci`, a copy of the bundled index with the new entries inserted.
//! A downloaded manifest is stored as `liveupdate.dmanifest` and replaces the bundled
//! manifest on the next start, provided `bundle.ver` still matches the bundled
//! manifest signature.

use crate::{
    archive::{
        index::{ArchiveIndex, EntryData, FLAG_COMPRESSED, FLAG_LIVEUPDATE, UNCOMPRESSED},
        ArchiveContainer, ArchiveError, LiveUpdateData,
    },
    manifest::{Manifest, ManifestError},
    verify::{self, VerifyError},
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const MANIFEST_FILENAME: &str = "liveupdate.dmanifest";
pub const BUNDLE_VER_FILENAME: &str = "bundle.ver";
pub const INDEX_FILENAME: &str = "liveupdate.arci";
pub const DATA_FILENAME: &str = "liveupdate.arcd";

const TMP_SUFFIX: &str = ".tmp";
const RESOURCE_HEADER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum LiveUpdateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("resource header truncated ({0} bytes)")]
    InvalidHeader(usize),
    #[error("no public key available for manifest verification")]
    MissingPublicKey,
    #[error("live update is only available for archive backed factories")]
    SchemeMismatch,
    #[error("live update is not enabled")]
    NotEnabled,
    #[error("invalid live update transition {from} -> {to}")]
    InvalidTransition {
        from: LiveUpdateState,
        to: LiveUpdateState,
    },
}

/// Result codes reported to live-update callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveUpdateResult {
    Ok,
    InvalidHeader,
    InvalidResource,
    VersionMismatch,
    EngineVersionMismatch,
    SignatureMismatch,
    SchemeMismatch,
    BundledResourceMismatch,
    FormatError,
}

impl LiveUpdateResult {
    pub fn as_str(self) -> &'static str {
        match self {
            LiveUpdateResult::Ok => "LIVEUPDATE_OK",
            LiveUpdateResult::InvalidHeader => "LIVEUPDATE_INVALID_HEADER",
            LiveUpdateResult::InvalidResource => "LIVEUPDATE_INVALID_RESOURCE",
            LiveUpdateResult::VersionMismatch => "LIVEUPDATE_VERSION_MISMATCH",
            LiveUpdateResult::EngineVersionMismatch => "LIVEUPDATE_ENGINE_VERSION_MISMATCH",
            LiveUpdateResult::SignatureMismatch => "LIVEUPDATE_SIGNATURE_MISMATCH",
            LiveUpdateResult::SchemeMismatch => "LIVEUPDATE_SCHEME_MISMATCH",
            LiveUpdateResult::BundledResourceMismatch => "LIVEUPDATE_BUNDLED_RESOURCE_MISMATCH",
            LiveUpdateResult::FormatError => "LIVEUPDATE_FORMAT_ERROR",
        }
    }
}

impl fmt::Display for LiveUpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LiveUpdateError {
    pub fn result(&self) -> LiveUpdateResult {
        match self {
            LiveUpdateError::InvalidHeader(_) => LiveUpdateResult::InvalidHeader,
            LiveUpdateError::SchemeMismatch | LiveUpdateError::NotEnabled => {
                LiveUpdateResult::SchemeMismatch
            }
            LiveUpdateError::MissingPublicKey => LiveUpdateResult::SignatureMismatch,
            LiveUpdateError::Manifest(ManifestError::VersionMismatch { .. }) => {
                LiveUpdateResult::VersionMismatch
            }
            LiveUpdateError::Manifest(_) => LiveUpdateResult::FormatError,
            LiveUpdateError::Verify(e) => verify_result(e),
            _ => LiveUpdateResult::InvalidResource,
        }
    }
}

pub(crate) fn verify_result(e: &VerifyError) -> LiveUpdateResult {
    match e {
        VerifyError::EngineVersionMismatch => LiveUpdateResult::EngineVersionMismatch,
        VerifyError::BundledResourceMismatch(_) => LiveUpdateResult::BundledResourceMismatch,
        VerifyError::LengthMismatch { .. }
        | VerifyError::Mismatch
        | VerifyError::InvalidKey(_)
        | VerifyError::InvalidSignature(_) => LiveUpdateResult::SignatureMismatch,
        _ => LiveUpdateResult::InvalidResource,
    }
}

/// Live-update progress of one factory, decided when the archive is mounted.
/// Transitions only move forward.
///
/// `Active` means live-update content is in use: either a validated live-update
/// manifest, or resources stored earlier (kept across a bundle change) served under
/// the bundled manifest. Resources stored during this run take effect immediately but
/// leave the state unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveUpdateState {
    BundledOnly,
    PendingValidation,
    Active,
    RollbackToBundled,
}

impl LiveUpdateState {
    fn can_transition(self, to: LiveUpdateState) -> bool {
        use LiveUpdateState::*;
        matches!(
            (self, to),
            (BundledOnly, PendingValidation)
                | (PendingValidation, Active)
                | (PendingValidation, RollbackToBundled)
                | (BundledOnly, Active)
        )
    }
}

impl fmt::Display for LiveUpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiveUpdateState::BundledOnly => "BUNDLED_ONLY",
            LiveUpdateState::PendingValidation => "LIVEUPDATE_PENDING_VALIDATION",
            LiveUpdateState::Active => "LIVEUPDATE_ACTIVE",
            LiveUpdateState::RollbackToBundled => "ROLLBACK_TO_BUNDLED",
        };
        f.write_str(s)
    }
}

/// Files of one project in the application support directory.
#[derive(Clone, Debug)]
pub struct LiveUpdatePaths {
    dir: PathBuf,
}

impl LiveUpdatePaths {
    pub fn new<P: AsRef<Path>>(support_root: P, project_id_hex: &str) -> Self {
        LiveUpdatePaths {
            dir: support_root.as_ref().join(project_id_hex),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILENAME)
    }

    pub fn bundle_ver(&self) -> PathBuf {
        self.dir.join(BUNDLE_VER_FILENAME)
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join(INDEX_FILENAME)
    }

    pub fn data(&self) -> PathBuf {
        self.dir.join(DATA_FILENAME)
    }

    pub fn tmp(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Remove every live-update file of the project.
    fn discard(&self) {
        for path in [
            self.manifest(),
            Self::tmp(&self.manifest()),
            self.bundle_ver(),
            self.index(),
            Self::tmp(&self.index()),
            self.data(),
        ] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("failed removing {}: {e}", path.display());
                }
            }
        }
    }
}

/// A payload pushed through [`LiveUpdate::store_resource`].
///
/// The 16 byte header holds the uncompressed size (`u32`, little-endian) and the
/// archive entry flags of the payload.
pub struct LiveUpdateResource<'a> {
    pub size: u32,
    pub flags: u8,
    pub data: &'a [u8],
}

impl<'a> LiveUpdateResource<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, LiveUpdateError> {
        if buf.len() < RESOURCE_HEADER_SIZE {
            return Err(LiveUpdateError::InvalidHeader(buf.len()));
        }
        Ok(LiveUpdateResource {
            size: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            flags: buf[4],
            data: &buf[RESOURCE_HEADER_SIZE..],
        })
    }

    /// Prefix `data` with a resource header.
    pub fn encode(size: u32, flags: u8, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESOURCE_HEADER_SIZE + data.len());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.push(flags);
        buf.extend_from_slice(&[0; RESOURCE_HEADER_SIZE - 5]);
        buf.extend_from_slice(data);
        buf
    }
}

/// Paths of the bundled archive pair.
#[derive(Clone, Debug)]
pub struct BundledArchive {
    pub index: PathBuf,
    pub data: PathBuf,
}

/// The manifest and archive chosen at startup, with the live-update bookkeeping.
pub struct Mounted {
    pub manifest: Manifest,
    pub archive: ArchiveContainer,
    pub live_update: LiveUpdate,
}

pub struct LiveUpdate {
    state: LiveUpdateState,
    paths: LiveUpdatePaths,
    bundled_signature: Vec<u8>,
    engine_version: String,
    public_key: Option<Vec<u8>>,
}

impl LiveUpdate {
    pub fn new(
        paths: LiveUpdatePaths,
        bundled: &Manifest,
        engine_version: String,
        public_key: Option<Vec<u8>>,
    ) -> Self {
        LiveUpdate {
            state: LiveUpdateState::BundledOnly,
            paths,
            bundled_signature: bundled.signature.clone(),
            engine_version,
            public_key,
        }
    }

    /// Pick the manifest and archive to run with.
    ///
    /// # Arguments
    ///
    /// * `bundled` - The manifest shipped with the application
    /// * `archive` - Paths of the bundled archive pair
    /// * `paths` - Live-update files of this project
    /// * `engine_version` - Version string checked against stored manifests
    /// * `public_key` - DER public key for manifest signatures, if available
    pub fn mount(
        bundled: Manifest,
        archive: &BundledArchive,
        paths: LiveUpdatePaths,
        engine_version: String,
        public_key: Option<Vec<u8>>,
    ) -> Result<Mounted, LiveUpdateError> {
        let mut lu = LiveUpdate::new(paths, &bundled, engine_version, public_key);
        let mut manifest = bundled.clone();

        let lu_manifest_path = lu.paths.manifest();
        if lu_manifest_path.exists() {
            lu.transition(LiveUpdateState::PendingValidation)?;

            match lu.bundle_version_valid() {
                Ok(true) => match Manifest::load_file(&lu_manifest_path) {
                    Ok(m) => manifest = m,
                    Err(e) => {
                        warn!(
                            "failed to load live update manifest {}: {e}, falling back to bundled manifest",
                            lu_manifest_path.display()
                        );
                        lu.transition(LiveUpdateState::RollbackToBundled)?;
                    }
                },
                Ok(false) => {
                    warn!("bundle changed since last live update, discarding live update content");
                    lu.paths.discard();
                    lu.transition(LiveUpdateState::RollbackToBundled)?;
                }
                Err(e) => {
                    warn!("failed checking bundle version: {e}");
                    lu.transition(LiveUpdateState::RollbackToBundled)?;
                }
            }
        }

        let mounted = lu.mount_archive(&manifest, archive)?;

        if lu.state == LiveUpdateState::PendingValidation {
            match verify::verify_resources_bundled(&manifest.data, &mounted) {
                Ok(()) => {
                    lu.transition(LiveUpdateState::Active)?;
                    return Ok(Mounted {
                        manifest,
                        archive: mounted,
                        live_update: lu,
                    });
                }
                Err(e) => {
                    warn!("live update manifest rejected: {e}");
                    lu.transition(LiveUpdateState::RollbackToBundled)?;
                    let archive = ArchiveContainer::mount(&archive.index, &archive.data, None)?;
                    return Ok(Mounted {
                        manifest: bundled,
                        archive,
                        live_update: lu,
                    });
                }
            }
        }

        // stored resources served under the bundled manifest
        if lu.state == LiveUpdateState::BundledOnly
            && mounted.index().iter().any(|(_, e)| e.is_liveupdate())
        {
            lu.transition(LiveUpdateState::Active)?;
        }

        Ok(Mounted {
            manifest,
            archive: mounted,
            live_update: lu,
        })
    }

    pub fn state(&self) -> LiveUpdateState {
        self.state
    }

    pub fn paths(&self) -> &LiveUpdatePaths {
        &self.paths
    }

    fn transition(&mut self, to: LiveUpdateState) -> Result<(), LiveUpdateError> {
        if !self.state.can_transition(to) {
            error!("invalid live update transition {} -> {to}", self.state);
            return Err(LiveUpdateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!("live update state {} -> {to}", self.state);
        self.state = to;
        Ok(())
    }

    /// Compare `bundle.ver` with the bundled manifest signature, creating it if absent.
    pub fn bundle_version_valid(&self) -> Result<bool, LiveUpdateError> {
        let path = self.paths.bundle_ver();
        if path.exists() {
            let stored = fs::read(&path)?;
            return Ok(stored == self.bundled_signature);
        }

        fs::create_dir_all(self.paths.dir())?;
        fs::write(&path, &self.bundled_signature)?;
        Ok(true)
    }

    fn mount_archive(
        &self,
        manifest: &Manifest,
        bundled: &BundledArchive,
    ) -> Result<ArchiveContainer, LiveUpdateError> {
        let index_path = self.paths.index();
        let index_tmp = LiveUpdatePaths::tmp(&index_path);
        if index_tmp.exists() {
            debug!("promoting {}", index_tmp.display());
            fs::rename(&index_tmp, &index_path)?;
        }

        let has_index = fs::metadata(&index_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !has_index {
            return Ok(ArchiveContainer::mount(&bundled.index, &bundled.data, None)?);
        }

        let data_path = self.paths.data();
        let archive = ArchiveContainer::mount(
            index_path.as_path(),
            bundled.data.as_path(),
            Some(data_path.as_path()),
        )?;

        if archive
            .index()
            .archive_id_matches(&manifest.archive_identifier)
        {
            return Ok(archive);
        }

        info!("bundled archive changed, merging live update entries");
        self.reload_bundled_index(&archive, bundled)
    }

    /// Build the union of the current bundled index and the live-update entries it lacks.
    fn reload_bundled_index(
        &self,
        lu_archive: &ArchiveContainer,
        bundled: &BundledArchive,
    ) -> Result<ArchiveContainer, LiveUpdateError> {
        let data_path = self.paths.data();
        let mut archive = ArchiveContainer::mount(
            bundled.index.as_path(),
            bundled.data.as_path(),
            Some(data_path.as_path()),
        )?;

        let cached = lu_archive
            .index()
            .liveupdate_entries_missing_from(archive.index())?;
        let mut reloaded = archive.index().copy_with_capacity(cached.len());
        for (hash, entry) in &cached {
            reloaded.insert_sorted(hash, *entry)?;
        }
        debug!("kept {} live update entries", cached.len());

        self.write_index(&reloaded)?;
        archive.set_index(reloaded);
        Ok(archive)
    }

    /// Write an index to `liveupdate.arci.tmp`, picked up on the next start.
    fn write_index(&self, index: &ArchiveIndex) -> Result<(), LiveUpdateError> {
        fs::create_dir_all(self.paths.dir())?;
        let tmp = LiveUpdatePaths::tmp(&self.paths.index());
        fs::write(&tmp, index.to_bytes()?)?;
        Ok(())
    }

    /// Verify, append and index a live-update resource.
    ///
    /// # Arguments
    ///
    /// * `manifest` - The manifest currently in use
    /// * `archive` - The mounted archive, updated in place
    /// * `expected_hex` - Lowercase hex digest the payload must hash to
    /// * `resource` - Resource header followed by the payload
    pub fn store_resource(
        &self,
        manifest: &Manifest,
        archive: &mut ArchiveContainer,
        expected_hex: &str,
        resource: &[u8],
    ) -> Result<(), LiveUpdateError> {
        let resource = LiveUpdateResource::parse(resource)?;
        let algorithm = manifest.data.header.resource_hash_algorithm;

        if let Err(e) = verify::verify_resource(algorithm, expected_hex, resource.data) {
            error!("verification failure for live update resource {expected_hex}");
            return Err(e.into());
        }
        let digest = verify::create_resource_hash(algorithm, resource.data)?;
        let index = archive.index().insertion_index(&digest)?;

        fs::create_dir_all(self.paths.dir())?;
        let index_path = self.paths.index();
        if !index_path.exists() {
            fs::File::create(&index_path)?;
        }
        if archive.liveupdate().is_none() {
            let data = LiveUpdateData::open(self.paths.data())?;
            info!("live update archive: {}", data.path().display());
            archive.set_liveupdate(data);
        }
        let data = archive.liveupdate().ok_or(ArchiveError::NoLiveUpdateData)?;
        let offset = data.append(resource.data)?;

        let flags = resource.flags as u32;
        let compressed = flags & FLAG_COMPRESSED != 0;
        let entry = EntryData {
            offset,
            size: if compressed {
                resource.size
            } else {
                resource.data.len() as u32
            },
            compressed_size: if compressed {
                resource.data.len() as u32
            } else {
                UNCOMPRESSED
            },
            flags: flags | FLAG_LIVEUPDATE,
        };

        let mut new_index = archive.index().copy_with_capacity(1);
        new_index.shift_and_insert(index, &digest, entry)?;
        self.write_index(&new_index)?;
        archive.set_index(new_index);

        debug!("stored live update resource {expected_hex} at {offset}");
        Ok(())
    }

    /// Engine version, signature and bundled resources, in that order.
    pub fn verify_manifest(
        &self,
        manifest: &Manifest,
        archive: &ArchiveContainer,
    ) -> Result<(), LiveUpdateError> {
        verify::verify_engine_version(&manifest.data, &self.engine_version)?;
        let key = self
            .public_key
            .as_deref()
            .ok_or(LiveUpdateError::MissingPublicKey)?;
        verify::verify_manifest_signature(manifest, key)?;
        verify::verify_resources_bundled(&manifest.data, archive)?;
        Ok(())
    }

    /// Verify and persist a downloaded manifest. It is used from the next start.
    pub fn store_manifest(
        &self,
        bytes: &[u8],
        archive: &ArchiveContainer,
    ) -> Result<(), LiveUpdateError> {
        let manifest = Manifest::load(bytes)?;
        self.verify_manifest(&manifest, archive)?;

        fs::create_dir_all(self.paths.dir())?;
        let path = self.paths.manifest();
        let tmp = LiveUpdatePaths::tmp(&path);
        fs::write(&tmp, manifest.encode()?)?;
        fs::rename(&tmp, &path)?;

        if !self.paths.bundle_ver().exists() {
            fs::write(self.paths.bundle_ver(), &self.bundled_signature)?;
        }

        info!("stored live update manifest {}", path.display());
        Ok(())
    }
}

/// Hex digests of the dependants of `path` that the archive does not hold.
pub fn missing_resources(
    manifest: &Manifest,
    archive: &ArchiveContainer,
    path: &str,
) -> Result<Vec<String>, LiveUpdateError> {
    let Some(entry) = manifest.data.entry_for_path(path) else {
        return Ok(Vec::new());
    };

    let mut missing: Vec<String> = Vec::new();
    for dependant in &entry.dependants {
        if archive.find(dependant)?.is_none() {
            let digest = hex::encode(dependant);
            if !missing.contains(&digest) {
                missing.push(digest);
            }
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use LiveUpdateState::*;
        assert!(BundledOnly.can_transition(PendingValidation));
        assert!(PendingValidation.can_transition(Active));
        assert!(PendingValidation.can_transition(RollbackToBundled));
        assert!(BundledOnly.can_transition(Active));
        assert!(!BundledOnly.can_transition(RollbackToBundled));
        assert!(!RollbackToBundled.can_transition(Active));
        assert!(!Active.can_transition(PendingValidation));
        assert!(!RollbackToBundled.can_transition(PendingValidation));
    }

    #[test]
    fn test_resource_header() {
        let buf = LiveUpdateResource::encode(42, 2, b"payload");
        let resource = LiveUpdateResource::parse(&buf).unwrap();
        assert_eq!(resource.size, 42);
        assert_eq!(resource.flags, 2);
        assert_eq!(resource.data, b"payload");
        assert!(matches!(
            LiveUpdateResource::parse(&buf[..10]),
            Err(LiveUpdateError::InvalidHeader(10))
        ));
    }

    #[test]
    fn test_tmp_path() {
        let paths = LiveUpdatePaths::new("/support", "abcd");
        assert_eq!(
            LiveUpdatePaths::tmp(&paths.index()),
            PathBuf::from("/support/abcd/liveupdate.arci.tmp")
        );
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(
            LiveUpdateError::Verify(VerifyError::EngineVersionMismatch).result(),
            LiveUpdateResult::EngineVersionMismatch
        );
        assert_eq!(
            LiveUpdateError::Verify(VerifyError::Mismatch).result(),
            LiveUpdateResult::SignatureMismatch
        );
        assert_eq!(
            LiveUpdateError::Archive(ArchiveError::AlreadyStored).result(),
            LiveUpdateResult::InvalidResource
        );
    }
}
