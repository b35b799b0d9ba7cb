use super::{http_cache::HttpCache, Store, StoreError, UriParts};
use crate::{config::FactoryParams, hash::canonical_path_from_base};
use reqwest::{
    blocking::Client,
    header::{ETAG, IF_NONE_MATCH},
    StatusCode,
};
use tracing::{error, trace, warn};

/// Loads resources from an HTTP server, optionally backed by a disk cache.
pub struct HttpStore {
    client: Client,
    base_url: String,
    base_path: String,
    cache: Option<HttpCache>,
}

impl HttpStore {
    pub fn open(parts: &UriParts, params: &FactoryParams) -> Result<HttpStore, StoreError> {
        let base_url = match parts.port {
            Some(port) => format!("{}://{}:{}", parts.scheme, parts.host, port),
            None => format!("{}://{}", parts.scheme, parts.host),
        };

        let cache = if params.http_cache {
            match HttpCache::open(&params.http_cache_dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("unable to open http cache: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(HttpStore {
            client: Client::builder().build()?,
            base_url,
            base_path: parts.path.clone(),
            cache,
        })
    }

    fn drop_cached(&self, url: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(url) {
                warn!("failed removing cached {url}: {e}");
            }
        }
    }

    fn url(&self, name: &str) -> String {
        let path = canonical_path_from_base(&self.base_path, name);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl Store for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    fn load(&mut self, name: &str, buf: &mut Vec<u8>) -> Result<(), StoreError> {
        let url = self.url(name);

        let cached = match &self.cache {
            Some(cache) => cache.get(&url)?,
            None => None,
        };

        let mut request = self.client.get(&url);
        if let Some(entry) = &cached {
            request = request.header(IF_NONE_MATCH, entry.etag.as_str());
        }

        let response = request.send()?;
        let status = response.status();
        trace!("GET {url} -> {status}");

        match status {
            StatusCode::OK => {}
            StatusCode::NOT_MODIFIED => {
                let entry = cached.ok_or(StoreError::HttpStatus(status.as_u16()))?;
                *buf = entry.body;
                return Ok(());
            }
            StatusCode::NOT_FOUND => {
                if cached.is_some() {
                    self.drop_cached(&url);
                }
                return Err(StoreError::NotFound(url));
            }
            _ => {
                warn!("unexpected http status code: {status}");
                return Err(StoreError::HttpStatus(status.as_u16()));
            }
        }

        let expected = response.content_length();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes()?;

        if let Some(expected) = expected {
            if expected != body.len() as u64 {
                error!(
                    "expected content length differs from actually streamed for {url} ({expected} != {})",
                    body.len()
                );
                return Err(StoreError::ContentLength {
                    url,
                    expected,
                    actual: body.len() as u64,
                });
            }
        }

        match (&self.cache, etag) {
            (Some(cache), Some(etag)) => {
                if let Err(e) = cache.put(&url, &etag, &body) {
                    warn!("failed caching {url}: {e}");
                }
            }
            // no validator anymore, so the cached copy can never be revalidated
            (Some(_), None) if cached.is_some() => self.drop_cached(&url),
            _ => {}
        }

        buf.clear();
        buf.extend_from_slice(&body);
        Ok(())
    }
}
