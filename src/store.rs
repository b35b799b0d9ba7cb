use self::{archive_store::ArchiveStore, file_store::FileStore, http_cache::HttpCacheError, http_store::HttpStore};
use crate::{
    archive::ArchiveError, config::FactoryParams, liveupdate::LiveUpdateError, manifest::ManifestError,
};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, trace};

pub mod archive_store;
pub mod file_store;
pub mod http_cache;
pub mod http_store;

pub const SCHEME_ARCHIVE: &str = "dmanif";
pub const SCHEME_FILE: &str = "file";
pub const SCHEME_HTTP: &str = "http";
pub const SCHEME_HTTPS: &str = "https";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("live update error: {0}")]
    LiveUpdate(#[from] LiveUpdateError),
    #[error("http cache error: {0}")]
    HttpCache(#[from] HttpCacheError),
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("content length mismatch for {url} (expected {expected}, got {actual})")]
    ContentLength {
        url: String,
        expected: u64,
        actual: u64,
    },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(e.to_string())
    }
}

/// A source of resource bytes, addressed by canonical resource name.
pub trait Store: Send {
    fn name(&self) -> &'static str;

    /// Load `name` into `buf`, replacing its contents.
    fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError>;

    fn as_archive(&self) -> Option<&ArchiveStore> {
        None
    }

    fn as_archive_mut(&mut self) -> Option<&mut ArchiveStore> {
        None
    }
}

/// Components of a factory uri such as `dmanif:build/game.dmanifest` or
/// `http://localhost:8080/base`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriParts {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl UriParts {
    pub fn parse(uri: &str) -> Result<UriParts, StoreError> {
        let invalid = || StoreError::InvalidUri(uri.to_string());
        let (scheme, rest) = uri.split_once(':').ok_or_else(invalid)?;

        match scheme {
            SCHEME_HTTP | SCHEME_HTTPS => {
                let url = Url::parse(uri).map_err(|_| invalid())?;
                let host = url.host_str().ok_or_else(invalid)?;
                Ok(UriParts {
                    scheme: url.scheme().to_string(),
                    host: host.to_string(),
                    port: url.port(),
                    path: url.path().trim_end_matches('/').to_string(),
                })
            }
            // archive and directory paths may be relative, so they are kept verbatim
            "" => Err(invalid()),
            _ => Ok(UriParts {
                scheme: scheme.to_string(),
                host: String::new(),
                port: None,
                path: rest.to_string(),
            }),
        }
    }
}

/// Stores tried in priority order. A store answering "not found" passes the request
/// to the next one; any other failure is final.
pub struct StoreChain {
    stores: Vec<Box<dyn Store>>,
}

impl StoreChain {
    pub fn new(stores: Vec<Box<dyn Store>>) -> StoreChain {
        StoreChain { stores }
    }

    pub fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
        for store in self.stores.iter_mut() {
            match store.load(name, buf) {
                Ok(()) => {
                    trace!("loaded {name} from {} ({} bytes)", store.name(), buf.len());
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stores.iter().map(|s| s.name()).collect()
    }

    /// The scheme backend, always last in the chain.
    pub fn primary(&self) -> Option<&dyn Store> {
        self.stores.last().map(|s| s.as_ref())
    }

    pub fn primary_mut(&mut self) -> Option<&mut Box<dyn Store>> {
        self.stores.last_mut()
    }

    pub fn archive(&self) -> Option<&ArchiveStore> {
        self.primary().and_then(|s| s.as_archive())
    }

    pub fn archive_mut(&mut self) -> Option<&mut ArchiveStore> {
        self.primary_mut().and_then(|s| s.as_archive_mut())
    }
}

/// Open the stores for a factory uri.
///
/// # Arguments
///
/// * `uri` - The factory uri, selecting exactly one scheme backend
/// * `params` - Factory parameters, including an optional builtins archive
pub fn store_open(uri: &str, params: &FactoryParams) -> Result<StoreChain, StoreError> {
    let parts = UriParts::parse(uri)?;

    let mut stores: Vec<Box<dyn Store>> = Vec::new();
    if let Some(builtins) = &params.builtins {
        stores.push(Box::new(ArchiveStore::builtins(builtins)?));
    }

    match parts.scheme.as_str() {
        SCHEME_ARCHIVE => stores.push(Box::new(ArchiveStore::open(&parts.path, params)?)),
        SCHEME_FILE => stores.push(Box::new(FileStore::open(&parts.path))),
        SCHEME_HTTP | SCHEME_HTTPS => stores.push(Box::new(HttpStore::open(&parts, params)?)),
        _ => return Err(StoreError::InvalidUri(uri.to_string())),
    }

    let chain = StoreChain::new(stores);
    debug!("opened {uri} with stores {:?}", chain.names());
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_uri() {
        let parts = UriParts::parse("dmanif:build/default/game.dmanifest").unwrap();
        assert_eq!(parts.scheme, "dmanif");
        assert_eq!(parts.path, "build/default/game.dmanifest");
        assert_eq!(parts.port, None);
    }

    #[test]
    fn test_parse_http_uri() {
        let parts = UriParts::parse("http://localhost:8001/base").unwrap();
        assert_eq!(parts.scheme, "http");
        assert_eq!(parts.host, "localhost");
        assert_eq!(parts.port, Some(8001));
        assert_eq!(parts.path, "/base");

        let parts = UriParts::parse("https://example.com").unwrap();
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, None);
        assert_eq!(parts.path, "");
    }

    #[test]
    fn test_parse_relative_paths_kept() {
        let parts = UriParts::parse("file:build/../assets").unwrap();
        assert_eq!(parts.path, "build/../assets");
        let parts = UriParts::parse("http://localhost:8001/base/").unwrap();
        assert_eq!(parts.path, "/base");
    }

    #[test]
    fn test_parse_invalid_uri() {
        assert!(UriParts::parse("no-scheme").is_err());
        assert!(UriParts::parse(":path").is_err());
        assert!(UriParts::parse("http://host:port/").is_err());
        assert!(UriParts::parse("http://[::1/").is_err());
    }

    struct Fixed(&'static str, Option<&'static [u8]>);

    impl Store for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
            match self.1 {
                Some(bytes) => {
                    buf.clear();
                    buf.extend_from_slice(bytes);
                    Ok(())
                }
                None => Err(StoreError::NotFound(name.to_string())),
            }
        }
    }

    #[test]
    fn test_chain_priority() {
        let mut chain = StoreChain::new(vec![
            Box::new(Fixed("first", None)),
            Box::new(Fixed("second", Some(b"second"))),
            Box::new(Fixed("third", Some(b"third"))),
        ]);
        let mut buf = Vec::new();
        chain.load("/x", &mut buf).unwrap();
        assert_eq!(buf, b"second");
        assert_eq!(chain.names(), vec!["first", "second", "third"]);
        assert!(chain.archive().is_none());
    }

    #[test]
    fn test_chain_not_found() {
        let mut chain = StoreChain::new(vec![Box::new(Fixed("only", None))]);
        let mut buf = Vec::new();
        assert!(matches!(
            chain.load("/x", &mut buf),
            Err(StoreError::NotFound(_))
        ));
    }
}
