#![allow(dead_code)]

use resstore::{
    archive::{index::FLAG_BUNDLED, ArchiveBuilder},
    config::init_logging,
    manifest::{HashAlgorithm, Manifest, ManifestData, ResourceEntry, ENTRY_FLAG_BUNDLED, ENTRY_FLAG_EXCLUDED},
    verify, Created, FactoryParams, Recreated, ResourceError, TypeCallbacks,
};
use rsa::{pkcs8::DecodePrivateKey, Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::Level;

pub const ENGINE_VERSION: &str = "1.6.0-test";
pub const PROJECT_ID: &[u8] = b"resource-store-tests";

pub fn setup() {
    init_logging(Level::TRACE);
}

pub fn data_path<P: AsRef<Path>>(rel: P) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(rel)
}

pub fn resource_hash(content: &[u8]) -> Vec<u8> {
    verify::create_resource_hash(HashAlgorithm::Sha1, content).unwrap()
}

pub fn resource_hex(content: &[u8]) -> String {
    hex::encode(resource_hash(content))
}

/// Sign the SHA-256 of `data_bytes` with the test private key.
pub fn sign(data_bytes: &[u8]) -> Vec<u8> {
    let der = fs::read(data_path("keys/game.private.der")).unwrap();
    let key = RsaPrivateKey::from_pkcs8_der(&der).unwrap();
    let digest = verify::create_manifest_hash(HashAlgorithm::Sha256, data_bytes).unwrap();
    key.sign(Pkcs1v15Sign::new_unprefixed(), &digest).unwrap()
}

#[derive(Clone)]
pub struct FixtureEntry {
    pub url: &'static str,
    pub content: Vec<u8>,
    /// Bundled entries are written to the archive, the others only listed in the manifest.
    pub bundled: bool,
    pub compress: bool,
    pub encrypt: bool,
    pub dependants: Vec<&'static str>,
}

impl FixtureEntry {
    pub fn bundled(url: &'static str, content: &[u8]) -> FixtureEntry {
        FixtureEntry {
            url,
            content: content.to_vec(),
            bundled: true,
            compress: false,
            encrypt: false,
            dependants: Vec::new(),
        }
    }

    pub fn excluded(url: &'static str, content: &[u8]) -> FixtureEntry {
        FixtureEntry {
            bundled: false,
            ..FixtureEntry::bundled(url, content)
        }
    }

    pub fn compressed(mut self) -> FixtureEntry {
        self.compress = true;
        self
    }

    pub fn encrypted(mut self) -> FixtureEntry {
        self.encrypt = true;
        self
    }

    pub fn depends_on(mut self, url: &'static str) -> FixtureEntry {
        self.dependants.push(url);
        self
    }
}

/// A signed manifest with its archive pair and public key, written to a scratch directory.
pub struct Fixture {
    pub dir: TempDir,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    pub entries: Vec<FixtureEntry>,
}

impl Fixture {
    pub fn uri(&self) -> String {
        format!("dmanif:{}", self.manifest_path.display())
    }

    pub fn support_root(&self) -> PathBuf {
        self.dir.path().join("support")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.support_root().join(self.manifest.project_id_hex())
    }

    pub fn params(&self) -> FactoryParams {
        FactoryParams {
            support_root: self.support_root(),
            engine_version: ENGINE_VERSION.to_string(),
            ..FactoryParams::default()
        }
    }

    pub fn live_update_params(&self) -> FactoryParams {
        FactoryParams {
            live_update: true,
            ..self.params()
        }
    }

    pub fn entry(&self, url: &str) -> &FixtureEntry {
        self.entries.iter().find(|e| e.url == url).unwrap()
    }
}

pub fn build_manifest(entries: &[FixtureEntry], archive_id: &[u8]) -> Manifest {
    let mut data = ManifestData::new(PROJECT_ID.to_vec(), HashAlgorithm::Sha1, HashAlgorithm::Sha256);
    data.engine_versions
        .push(Sha1::digest(ENGINE_VERSION.as_bytes()).to_vec());
    for e in entries {
        let flags = if e.bundled { ENTRY_FLAG_BUNDLED } else { ENTRY_FLAG_EXCLUDED };
        let mut entry = ResourceEntry::new(e.url, resource_hash(&e.content), flags);
        for dependant in &e.dependants {
            let content = &entries.iter().find(|d| d.url == *dependant).unwrap().content;
            entry.dependants.push(resource_hash(content));
        }
        data.resources.push(entry);
    }
    data.resources.sort_by_key(|e| e.url_hash);

    let signature = sign(&data.encode().unwrap());
    Manifest::from_parts(data, signature, archive_id.to_vec()).unwrap()
}

/// Write `game.dmanifest`, `game.arci`, `game.arcd` and `game.public.der` to a new directory.
pub fn build_fixture(entries: &[FixtureEntry]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_bundle(dir.path(), entries);
    let manifest = Manifest::load_file(&manifest_path).unwrap();
    Fixture {
        dir,
        manifest_path,
        manifest,
        entries: entries.to_vec(),
    }
}

/// Write a bundle into `dir`, replacing any previous one. Returns the manifest path.
pub fn write_bundle(dir: &Path, entries: &[FixtureEntry]) -> PathBuf {
    let mut builder = ArchiveBuilder::new(20);
    for e in entries.iter().filter(|e| e.bundled) {
        builder
            .add(&resource_hash(&e.content), &e.content, e.compress, e.encrypt, FLAG_BUNDLED)
            .unwrap();
    }
    let archive_id = builder
        .write(dir.join("game.arci"), dir.join("game.arcd"))
        .unwrap();

    let manifest = build_manifest(entries, &archive_id);
    let manifest_path = dir.join("game.dmanifest");
    fs::write(&manifest_path, manifest.encode().unwrap()).unwrap();
    fs::copy(data_path("keys/game.public.der"), dir.join("game.public.der")).unwrap();
    manifest_path
}

/// Five bundled resources and two that only exist as live-update content.
pub fn seven_entries() -> Vec<FixtureEntry> {
    vec![
        FixtureEntry::bundled("/main/main.collectionc", b"main collection"),
        FixtureEntry::bundled("/main/player.goc", b"player game object").depends_on("/main/level2.texturec"),
        FixtureEntry::bundled("/main/player.scriptc", &b"function init(self) end\n".repeat(32)).compressed(),
        FixtureEntry::bundled("/main/logo.texturec", b"logo texture bytes").encrypted(),
        FixtureEntry::bundled("/main/music.oggc", &b"ogg".repeat(400))
            .compressed()
            .encrypted(),
        FixtureEntry::excluded("/main/level2.texturec", b"level two texture"),
        FixtureEntry::excluded("/main/level2.collectionc", b"level two collection"),
    ]
}

/// A type whose payload is a copy of the loaded bytes.
pub fn bytes_type() -> TypeCallbacks {
    TypeCallbacks::new()
        .create(|_, params| Ok(Created::new(params.buffer.to_vec()).with_size(params.buffer.len())))
        .destroy(|_, _| {})
        .recreate(|_, resource, params| {
            let bytes = resource
                .downcast_mut::<Vec<u8>>()
                .ok_or_else(|| ResourceError::Inval("not a byte resource".into()))?;
            bytes.clear();
            bytes.extend_from_slice(params.buffer);
            Ok(Recreated::InPlace(Some(bytes.len())))
        })
}
