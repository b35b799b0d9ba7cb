use super::{Store, StoreError};
use crate::{
    archive::{ArchiveContainer, DATA_EXTENSION, INDEX_EXTENSION},
    config::{BuiltinsArchive, FactoryParams},
    liveupdate::{BundledArchive, LiveUpdate, LiveUpdatePaths, Mounted},
    manifest::Manifest,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub const PUBLIC_KEY_FILENAME: &str = "game.public.der";

/// Resources addressed through a manifest and read from its archive.
pub struct ArchiveStore {
    name: &'static str,
    manifest: Manifest,
    archive: ArchiveContainer,
    live_update: Option<LiveUpdate>,
    public_key: Option<Vec<u8>>,
}

impl ArchiveStore {
    /// Open the bundled manifest at `manifest_path` and the archive next to it.
    pub fn open<P: AsRef<Path>>(manifest_path: P, params: &FactoryParams) -> Result<ArchiveStore, StoreError> {
        let manifest_path = manifest_path.as_ref();
        let bundled = Manifest::load_file(manifest_path)?;

        let archive_paths = BundledArchive {
            index: manifest_path.with_extension(INDEX_EXTENSION),
            data: manifest_path.with_extension(DATA_EXTENSION),
        };

        let public_key_path = params.public_key_path.clone().unwrap_or_else(|| {
            manifest_path
                .parent()
                .map(|p| p.join(PUBLIC_KEY_FILENAME))
                .unwrap_or_else(|| PathBuf::from(PUBLIC_KEY_FILENAME))
        });
        let public_key = match fs::read(&public_key_path) {
            Ok(key) => Some(key),
            Err(_) => {
                debug!("no public key at {}", public_key_path.display());
                None
            }
        };

        if !params.live_update {
            let archive = ArchiveContainer::mount(&archive_paths.index, &archive_paths.data, None)?;
            return Ok(ArchiveStore {
                name: "archive",
                manifest: bundled,
                archive,
                live_update: None,
                public_key,
            });
        }

        let paths = LiveUpdatePaths::new(&params.support_root, &bundled.project_id_hex());
        let Mounted {
            manifest,
            archive,
            live_update,
        } = LiveUpdate::mount(
            bundled,
            &archive_paths,
            paths,
            params.engine_version.clone(),
            public_key.clone(),
        )?;

        Ok(ArchiveStore {
            name: "archive",
            manifest,
            archive,
            live_update: Some(live_update),
            public_key,
        })
    }

    /// Wrap a builtins archive held in memory.
    pub fn builtins(builtins: &BuiltinsArchive) -> Result<ArchiveStore, StoreError> {
        let manifest = Manifest::load(&builtins.manifest)?;
        let archive = ArchiveContainer::wrap(&builtins.index, builtins.data.clone())?;
        Ok(ArchiveStore {
            name: "builtins",
            manifest,
            archive,
            live_update: None,
            public_key: None,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn archive(&self) -> &ArchiveContainer {
        &self.archive
    }

    pub fn live_update(&self) -> Option<&LiveUpdate> {
        self.live_update.as_ref()
    }

    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// Split borrows for live-update operations that mutate the archive.
    pub fn parts_mut(&mut self) -> (&Manifest, &mut ArchiveContainer, Option<&LiveUpdate>) {
        (&self.manifest, &mut self.archive, self.live_update.as_ref())
    }

    fn load_from_manifest(&self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
        let entry = self
            .manifest
            .data
            .entry_for_path(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        match self.archive.find(&entry.hash)? {
            Some(data) => {
                self.archive.read_into(&data, buf)?;
                Ok(())
            }
            None => {
                if entry.is_excluded() {
                    debug!("{name} is excluded from the bundle and not yet stored");
                } else if self.name != "builtins" {
                    warn!("{name} is listed in the manifest but missing from the archive");
                }
                Err(StoreError::NotFound(name.to_string()))
            }
        }
    }
}

impl Store for ArchiveStore {
    fn name(&self) -> &'static str {
        self.name
    }

    fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
        self.load_from_manifest(name, buf)
    }

    fn as_archive(&self) -> Option<&ArchiveStore> {
        Some(self)
    }

    fn as_archive_mut(&mut self) -> Option<&mut ArchiveStore> {
        Some(self)
    }
}
