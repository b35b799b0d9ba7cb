use crate::{
    archive::{ArchiveContainer, ArchiveError},
    manifest::{HashAlgorithm, Manifest, ManifestData},
};
use md5::Md5;
use rsa::{pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("hash length mismatch (expected {expected}, got {actual})")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("hash mismatch")]
    Mismatch,
    #[error("unsupported hash algorithm {0:?}")]
    UnsupportedAlgorithm(HashAlgorithm),
    #[error("resource '{0}' is flagged bundled but missing from the archive")]
    BundledResourceMismatch(String),
    #[error("engine version not supported by manifest")]
    EngineVersionMismatch,
}

/// Digest of manifest data, using the signature hash algorithm.
pub fn create_manifest_hash(algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, VerifyError> {
    match algorithm {
        HashAlgorithm::Sha1 => Ok(Sha1::digest(data).to_vec()),
        HashAlgorithm::Sha256 => Ok(Sha256::digest(data).to_vec()),
        HashAlgorithm::Sha512 => Ok(Sha512::digest(data).to_vec()),
        other => Err(VerifyError::UnsupportedAlgorithm(other)),
    }
}

/// Digest of a resource payload, using the resource hash algorithm.
pub fn create_resource_hash(algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, VerifyError> {
    match algorithm {
        HashAlgorithm::Md5 => Ok(Md5::digest(data).to_vec()),
        HashAlgorithm::Sha1 => Ok(Sha1::digest(data).to_vec()),
        other => Err(VerifyError::UnsupportedAlgorithm(other)),
    }
}

/// Compare a computed digest against the expected one.
pub fn hash_compare(digest: &[u8], expected: &[u8]) -> Result<(), VerifyError> {
    if digest.len() != expected.len() {
        error!(
            "length mismatch in hash comparison, expected {}, got {}",
            expected.len(),
            digest.len()
        );
        return Err(VerifyError::LengthMismatch {
            expected: expected.len(),
            actual: digest.len(),
        });
    }
    if digest != expected {
        error!("byte mismatch in hash comparison");
        return Err(VerifyError::Mismatch);
    }
    Ok(())
}

fn public_key(public_key_der: &[u8]) -> Result<RsaPublicKey, VerifyError> {
    RsaPublicKey::from_public_key_der(public_key_der).map_err(|e| VerifyError::InvalidKey(e.to_string()))
}

/// Check a manifest signature against a public key.
pub fn verify_manifest_signature(manifest: &Manifest, public_key_der: &[u8]) -> Result<(), VerifyError> {
    let digest = create_manifest_hash(
        manifest.data.header.signature_hash_algorithm,
        &manifest.data_bytes,
    )?;
    verify_manifest_hash(manifest, public_key_der, &digest)
}

/// Check that the manifest signature signs `expected_digest`.
///
/// The signature is an unprefixed PKCS#1 v1.5 signature over the raw digest. A digest
/// whose length does not fit the signature hash algorithm is a format error.
pub fn verify_manifest_hash(
    manifest: &Manifest,
    public_key_der: &[u8],
    expected_digest: &[u8],
) -> Result<(), VerifyError> {
    let digest_len = manifest.data.header.signature_hash_algorithm.len();
    if expected_digest.len() != digest_len {
        error!(
            "length mismatch in hash comparison, expected {}, got {digest_len}",
            expected_digest.len()
        );
        return Err(VerifyError::LengthMismatch {
            expected: expected_digest.len(),
            actual: digest_len,
        });
    }

    let key = public_key(public_key_der)?;
    if manifest.signature.len() != key.size() {
        return Err(VerifyError::InvalidSignature(format!(
            "signature is {} bytes, key is {}",
            manifest.signature.len(),
            key.size()
        )));
    }

    key.verify(Pkcs1v15Sign::new_unprefixed(), expected_digest, &manifest.signature)
        .map_err(|e| {
            error!("manifest signature does not match: {e}");
            VerifyError::Mismatch
        })
}

/// Every entry flagged bundled must be present in the archive.
pub fn verify_resources_bundled(data: &ManifestData, archive: &ArchiveContainer) -> Result<(), VerifyError> {
    for entry in data.resources.iter().filter(|e| e.is_bundled()) {
        if archive.find(&entry.hash)?.is_none() {
            error!(
                "resource '{}' is expected to be in the bundle but was not found",
                entry.url
            );
            return Err(VerifyError::BundledResourceMismatch(entry.url.clone()));
        }
    }
    Ok(())
}

/// The SHA1 of the running engine version must be listed by the manifest.
pub fn verify_engine_version(data: &ManifestData, engine_version: &str) -> Result<(), VerifyError> {
    let digest = Sha1::digest(engine_version.as_bytes());
    if data
        .engine_versions
        .iter()
        .any(|v| v.as_slice() == digest.as_slice())
    {
        Ok(())
    } else {
        Err(VerifyError::EngineVersionMismatch)
    }
}

/// Hash a payload and compare it to an expected lowercase hex digest.
pub fn verify_resource(algorithm: HashAlgorithm, expected_hex: &str, payload: &[u8]) -> Result<(), VerifyError> {
    let digest = hex::encode(create_resource_hash(algorithm, payload)?);
    hash_compare(digest.as_bytes(), expected_hex.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_compare() {
        assert!(hash_compare(&[1, 2, 3], &[1, 2, 3]).is_ok());
        assert!(matches!(
            hash_compare(&[1, 2, 3], &[1, 2]),
            Err(VerifyError::LengthMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            hash_compare(&[1, 2, 3], &[1, 2, 4]),
            Err(VerifyError::Mismatch)
        ));
    }

    #[test]
    fn test_resource_hash_algorithms() {
        assert_eq!(
            hex::encode(create_resource_hash(HashAlgorithm::Md5, b"abc").unwrap()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex::encode(create_resource_hash(HashAlgorithm::Sha1, b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert!(create_resource_hash(HashAlgorithm::Sha256, b"abc").is_err());
        assert!(create_manifest_hash(HashAlgorithm::Md5, b"abc").is_err());
        assert_eq!(create_manifest_hash(HashAlgorithm::Sha512, b"").unwrap().len(), 64);
    }

    #[test]
    fn test_verify_resource() {
        assert!(verify_resource(HashAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f72", b"abc").is_ok());
        assert!(verify_resource(HashAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f73", b"abc").is_err());
        assert!(verify_resource(HashAlgorithm::Md5, "9001", b"abc").is_err());
    }

    #[test]
    fn test_engine_version() {
        let mut data = ManifestData::new(vec![], HashAlgorithm::Sha1, HashAlgorithm::Sha256);
        data.engine_versions.push(Sha1::digest(b"1.2.3").to_vec());
        assert!(verify_engine_version(&data, "1.2.3").is_ok());
        assert!(matches!(
            verify_engine_version(&data, "1.2.4"),
            Err(VerifyError::EngineVersionMismatch)
        ));
    }

    #[test]
    fn test_bad_public_key() {
        assert!(matches!(
            public_key(&[0x30, 0x01, 0x00]),
            Err(VerifyError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_digest_length_checked_first() {
        let data = ManifestData::new(vec![], HashAlgorithm::Sha1, HashAlgorithm::Sha256);
        let manifest = Manifest::from_parts(data, vec![0; 128], Vec::new()).unwrap();
        assert!(matches!(
            verify_manifest_hash(&manifest, &[0x30, 0x01, 0x00], &[0; 20]),
            Err(VerifyError::LengthMismatch { expected: 20, actual: 32 })
        ));
        assert!(matches!(
            verify_manifest_hash(&manifest, &[0x30, 0x01, 0x00], &[0; 32]),
            Err(VerifyError::InvalidKey(_))
        ));
    }
}
