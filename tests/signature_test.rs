use common::{build_fixture, data_path, seven_entries};
use resstore::{
    error::ResourceError,
    manifest::{HashAlgorithm, Manifest, ManifestData},
    verify::{self, VerifyError},
    Factory, FactoryParams, ResultCode,
};
use std::fs;

mod common;

struct SignatureFixture {
    manifest: Manifest,
    public_key: Vec<u8>,
    expected_digest: Vec<u8>,
}

/// A manifest wrapped around the fixed test blob and its detached signature.
fn signature_fixture() -> SignatureFixture {
    let data = ManifestData::new(b"signature".to_vec(), HashAlgorithm::Sha1, HashAlgorithm::Sha256);
    let mut manifest = Manifest::from_parts(
        data,
        fs::read(data_path("signature/manifest.signature")).unwrap(),
        Vec::new(),
    )
    .unwrap();
    manifest.data_bytes = fs::read(data_path("signature/manifest.data")).unwrap();

    SignatureFixture {
        manifest,
        public_key: fs::read(data_path("keys/game.public.der")).unwrap(),
        expected_digest: fs::read(data_path("signature/expected.digest")).unwrap(),
    }
}

#[test]
fn test_verify_known_digest() {
    common::setup();
    let f = signature_fixture();
    verify::verify_manifest_hash(&f.manifest, &f.public_key, &f.expected_digest).unwrap();

    // the digest is the SHA-256 of the signed blob
    let digest = verify::create_manifest_hash(HashAlgorithm::Sha256, &f.manifest.data_bytes).unwrap();
    assert_eq!(digest, f.expected_digest);
    verify::verify_manifest_signature(&f.manifest, &f.public_key).unwrap();
}

#[test]
fn test_flipped_public_key_byte_fails() {
    common::setup();
    let f = signature_fixture();
    for i in 0..f.public_key.len() {
        let mut key = f.public_key.clone();
        key[i] ^= 0x01;
        assert!(
            verify::verify_manifest_hash(&f.manifest, &key, &f.expected_digest).is_err(),
            "flipped byte {i} verified"
        );
    }
}

#[test]
fn test_truncated_digest_fails() {
    common::setup();
    let f = signature_fixture();
    let half = &f.expected_digest[..f.expected_digest.len() / 2];
    let err = verify::verify_manifest_hash(&f.manifest, &f.public_key, half).unwrap_err();
    assert!(matches!(err, VerifyError::LengthMismatch { expected: 16, actual: 32 }));
    assert_eq!(ResourceError::from(err).code(), ResultCode::FormatError);
}

#[test]
fn test_wrong_key_fails() {
    common::setup();
    let f = signature_fixture();
    let other = fs::read(data_path("keys/other.public.der")).unwrap();
    let err = verify::verify_manifest_hash(&f.manifest, &other, &f.expected_digest).unwrap_err();
    assert!(matches!(
        err,
        VerifyError::InvalidSignature(_) | VerifyError::Mismatch | VerifyError::LengthMismatch { .. }
    ));
}

#[test]
fn test_altered_digest_fails() {
    common::setup();
    let f = signature_fixture();
    let mut digest = f.expected_digest.clone();
    digest[7] ^= 0x80;
    let err = verify::verify_manifest_hash(&f.manifest, &f.public_key, &digest).unwrap_err();
    assert!(matches!(err, VerifyError::Mismatch));
    assert_eq!(ResourceError::from(err).code(), ResultCode::SignatureMismatch);
}

#[test]
fn test_factory_verify_manifest_hash() {
    common::setup();
    let fixture = build_fixture(&seven_entries());
    let factory = Factory::new(&fixture.uri(), fixture.params()).unwrap();

    let manifest = &fixture.manifest;
    let digest = verify::create_manifest_hash(HashAlgorithm::Sha256, &manifest.data_bytes).unwrap();
    factory.verify_manifest_hash(&digest).unwrap();

    let err = factory.verify_manifest_hash(&digest[..16]).unwrap_err();
    assert_eq!(err.code(), ResultCode::FormatError);

    let mut wrong = digest.clone();
    wrong[0] ^= 0xff;
    assert_eq!(
        factory.verify_manifest_hash(&wrong).unwrap_err().code(),
        ResultCode::SignatureMismatch
    );
}

#[test]
fn test_verify_manifest_hash_requires_archive() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let factory = Factory::new(&format!("file:{}", dir.path().display()), FactoryParams::default()).unwrap();
    assert_eq!(
        factory.verify_manifest_hash(&[0; 32]).unwrap_err().code(),
        ResultCode::NotSupported
    );
}

#[test]
fn test_bundled_resources_present() {
    common::setup();
    let fixture = build_fixture(&seven_entries());
    let factory = Factory::new(&fixture.uri(), fixture.params()).unwrap();
    assert_eq!(factory.archive_entry_count(), Some(5));

    let mut data = fixture.manifest.data.clone();
    for entry in data.resources.iter_mut() {
        entry.flags |= resstore::manifest::ENTRY_FLAG_BUNDLED;
    }
    let archive = resstore::archive::ArchiveContainer::mount(
        fixture.dir.path().join("game.arci"),
        fixture.dir.path().join("game.arcd"),
        None,
    )
    .unwrap();
    verify::verify_resources_bundled(&fixture.manifest.data, &archive).unwrap();
    assert!(matches!(
        verify::verify_resources_bundled(&data, &archive),
        Err(VerifyError::BundledResourceMismatch(_))
    ));
}
