use crate::{
    archive::ArchiveError,
    config::ConfigError,
    liveupdate::{self, LiveUpdateError, LiveUpdateResult},
    manifest::ManifestError,
    store::StoreError,
    verify::VerifyError,
};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("live update error: {0}")]
    LiveUpdate(#[from] LiveUpdateError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("missing file extension: {0}")]
    MissingFileExtension(String),
    #[error("resource type already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid argument: {0}")]
    Inval(String),
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("resource not loaded")]
    NotLoaded,
    #[error("out of resources (capacity {0})")]
    OutOfResources(usize),
    #[error("operation not supported: {0}")]
    NotSupported(String),
    #[error("resource loop detected while loading {0}")]
    Loop(String),
    #[error("invalid file extension: {0}")]
    InvalidFileExtension(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<StoreError> for ResourceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => ResourceError::NotFound(path),
            other => ResourceError::Store(other),
        }
    }
}

/// Flat result codes, one per failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    InvalidData,
    DdfError,
    ResourceNotFound,
    MissingFileExtension,
    AlreadyRegistered,
    Inval,
    UnknownResourceType,
    IoError,
    NotLoaded,
    OutOfResources,
    FormatError,
    NotSupported,
    ResourceLoopError,
    InvalidFileExtension,
    VersionMismatch,
    SignatureMismatch,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Ok => "RESULT_OK",
            ResultCode::InvalidData => "RESULT_INVALID_DATA",
            ResultCode::DdfError => "RESULT_DDF_ERROR",
            ResultCode::ResourceNotFound => "RESULT_RESOURCE_NOT_FOUND",
            ResultCode::MissingFileExtension => "RESULT_MISSING_FILE_EXTENSION",
            ResultCode::AlreadyRegistered => "RESULT_ALREADY_REGISTERED",
            ResultCode::Inval => "RESULT_INVAL",
            ResultCode::UnknownResourceType => "RESULT_UNKNOWN_RESOURCE_TYPE",
            ResultCode::IoError => "RESULT_IO_ERROR",
            ResultCode::NotLoaded => "RESULT_NOT_LOADED",
            ResultCode::OutOfResources => "RESULT_OUT_OF_RESOURCES",
            ResultCode::FormatError => "RESULT_FORMAT_ERROR",
            ResultCode::NotSupported => "RESULT_NOT_SUPPORTED",
            ResultCode::ResourceLoopError => "RESULT_RESOURCE_LOOP_ERROR",
            ResultCode::InvalidFileExtension => "RESULT_INVALID_FILE_EXTENSION",
            ResultCode::VersionMismatch => "RESULT_VERSION_MISMATCH",
            ResultCode::SignatureMismatch => "RESULT_SIGNATURE_MISMATCH",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn result_to_string(result: Result<(), &ResourceError>) -> &'static str {
    match result {
        Ok(()) => ResultCode::Ok.as_str(),
        Err(e) => e.code().as_str(),
    }
}

/// Live-update code for the outcome of a live-update operation.
pub fn live_update_result(result: Result<(), &ResourceError>) -> LiveUpdateResult {
    match result {
        Ok(()) => LiveUpdateResult::Ok,
        Err(ResourceError::LiveUpdate(e)) => e.result(),
        Err(ResourceError::Verify(e)) => liveupdate::verify_result(e),
        Err(ResourceError::NotSupported(_)) => LiveUpdateResult::SchemeMismatch,
        Err(_) => LiveUpdateResult::InvalidResource,
    }
}

impl ResourceError {
    pub fn code(&self) -> ResultCode {
        match self {
            ResourceError::Io(_) => ResultCode::IoError,
            ResourceError::Archive(e) => archive_code(e),
            ResourceError::Manifest(e) => manifest_code(e),
            ResourceError::Verify(e) => verify_code(e),
            ResourceError::LiveUpdate(e) => match e {
                LiveUpdateError::Archive(e) => archive_code(e),
                LiveUpdateError::Manifest(e) => manifest_code(e),
                LiveUpdateError::Verify(e) => verify_code(e),
                LiveUpdateError::SchemeMismatch | LiveUpdateError::NotEnabled => ResultCode::NotSupported,
                LiveUpdateError::MissingPublicKey => ResultCode::SignatureMismatch,
                LiveUpdateError::InvalidHeader(_) => ResultCode::InvalidData,
                _ => ResultCode::IoError,
            },
            ResourceError::Config(_) => ResultCode::Inval,
            ResourceError::Store(e) => match e {
                StoreError::NotFound(_) => ResultCode::ResourceNotFound,
                StoreError::Archive(e) => archive_code(e),
                StoreError::Manifest(e) => manifest_code(e),
                StoreError::InvalidUri(_) => ResultCode::Inval,
                _ => ResultCode::IoError,
            },
            ResourceError::NotFound(_) => ResultCode::ResourceNotFound,
            ResourceError::MissingFileExtension(_) => ResultCode::MissingFileExtension,
            ResourceError::AlreadyRegistered(_) => ResultCode::AlreadyRegistered,
            ResourceError::Inval(_) => ResultCode::Inval,
            ResourceError::UnknownResourceType(_) => ResultCode::UnknownResourceType,
            ResourceError::NotLoaded => ResultCode::NotLoaded,
            ResourceError::OutOfResources(_) => ResultCode::OutOfResources,
            ResourceError::NotSupported(_) => ResultCode::NotSupported,
            ResourceError::Loop(_) => ResultCode::ResourceLoopError,
            ResourceError::InvalidFileExtension(_) => ResultCode::InvalidFileExtension,
            ResourceError::InvalidData(_) => ResultCode::InvalidData,
        }
    }
}

fn archive_code(e: &ArchiveError) -> ResultCode {
    match e {
        ArchiveError::VersionMismatch(_) => ResultCode::VersionMismatch,
        ArchiveError::Truncated(_) | ArchiveError::InvalidHashLength(_) | ArchiveError::Codec(_) => {
            ResultCode::FormatError
        }
        ArchiveError::InvalidHash(..) | ArchiveError::InsertionOutOfRange(..) => ResultCode::Inval,
        ArchiveError::AlreadyStored => ResultCode::AlreadyRegistered,
        _ => ResultCode::IoError,
    }
}

fn manifest_code(e: &ManifestError) -> ResultCode {
    match e {
        ManifestError::Io(_) => ResultCode::IoError,
        ManifestError::Ddf(_) | ManifestError::UnknownHashAlgorithm(_) => ResultCode::DdfError,
        ManifestError::Format { .. } => ResultCode::FormatError,
        ManifestError::VersionMismatch { .. } => ResultCode::VersionMismatch,
    }
}

fn verify_code(e: &VerifyError) -> ResultCode {
    match e {
        VerifyError::LengthMismatch { .. } => ResultCode::FormatError,
        VerifyError::Mismatch | VerifyError::EngineVersionMismatch => ResultCode::SignatureMismatch,
        VerifyError::InvalidKey(_) | VerifyError::InvalidSignature(_) => ResultCode::InvalidData,
        VerifyError::BundledResourceMismatch(_) => ResultCode::InvalidData,
        VerifyError::UnsupportedAlgorithm(_) => ResultCode::NotSupported,
        VerifyError::Io(_) | VerifyError::Archive(_) => ResultCode::IoError,
    }
}
