use crate::{
    config::FactoryParams,
    error::ResourceError,
    hash::{canonical_path, hash_path},
    liveupdate::{self, LiveUpdateError, LiveUpdateState},
    store::{self, archive_store::ArchiveStore, StoreChain, StoreError},
    types::{
        CreateParams, Created, PostCreate, PostCreateParams, PreloadParams, Recreated, RecreateParams, Resource,
        ResourceType, ResourceTypeId, TypeCallbacks, TypeRegistry,
    },
    verify,
};
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use std::{any::Any, collections::HashMap, mem, sync::Arc, thread, time::Duration};
use tracing::{debug, error, info, trace, warn};

new_key_type! {
    /// Handle of a cached resource. A released handle never aliases a later resource.
    pub struct ResourceHandle;
}

const POST_CREATE_RETRY: Duration = Duration::from_millis(1);

pub type ReloadedFn = Arc<dyn Fn(&mut LoadContext, &ResourceReloaded) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReloadCallbackId(u64);

/// Passed to reload callbacks after a successful reload or set.
pub struct ResourceReloaded<'a> {
    pub handle: ResourceHandle,
    pub name: &'a str,
    pub path_hash: u64,
}

/// Snapshot of a cached resource's bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub handle: ResourceHandle,
    pub path_hash: u64,
    /// Only known with reload support enabled.
    pub path: Option<String>,
    pub resource_type: ResourceTypeId,
    pub extension: String,
    pub size: usize,
    pub size_on_disk: usize,
    pub ref_count: u32,
}

struct Descriptor {
    path_hash: u64,
    /// Empty only while a callback operates on the payload.
    resource: Option<Resource>,
    resource_type: ResourceTypeId,
    size: usize,
    size_on_disk: usize,
    ref_count: u32,
}

struct FactoryInner {
    uri: String,
    max_resources: usize,
    buffer_size: usize,
    reload_support: bool,
    stores: StoreChain,
    types: TypeRegistry,
    resources: SlotMap<ResourceHandle, Descriptor>,
    by_hash: HashMap<u64, ResourceHandle>,
    paths: HashMap<u64, String>,
    buffer: Vec<u8>,
    reload_callbacks: Vec<(ReloadCallbackId, ReloadedFn)>,
    next_callback_id: u64,
}

impl FactoryInner {
    fn take_buffer(&mut self) -> Vec<u8> {
        let mut buffer = mem::take(&mut self.buffer);
        buffer.clear();
        buffer
    }

    fn restore_buffer(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();
        if buffer.capacity() > self.buffer_size {
            buffer.shrink_to(self.buffer_size);
        }
        if buffer.capacity() > self.buffer.capacity() {
            self.buffer = buffer;
        }
    }

    fn descriptor(&self, handle: ResourceHandle) -> Result<&Descriptor, ResourceError> {
        self.resources.get(handle).ok_or(ResourceError::NotLoaded)
    }

    fn resource_type(&self, id: ResourceTypeId) -> Result<Arc<ResourceType>, ResourceError> {
        self.types
            .get(id)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownResourceType(format!("{id:?}")))
    }

    /// Type of a cached resource, provided it can be recreated.
    fn recreatable_type(&self, handle: ResourceHandle) -> Result<Arc<ResourceType>, ResourceError> {
        let rtype = self.resource_type(self.descriptor(handle)?.resource_type)?;
        if rtype.recreate.is_none() {
            return Err(ResourceError::NotSupported(format!(
                "resource type '{}' cannot be recreated",
                rtype.extension
            )));
        }
        Ok(rtype)
    }

    fn info(&self, handle: ResourceHandle, d: &Descriptor) -> ResourceInfo {
        ResourceInfo {
            handle,
            path_hash: d.path_hash,
            path: self.paths.get(&d.path_hash).cloned(),
            resource_type: d.resource_type,
            extension: self
                .types
                .get(d.resource_type)
                .map(|t| t.extension.clone())
                .unwrap_or_default(),
            size: if d.size == 0 { d.size_on_disk } else { d.size },
            size_on_disk: d.size_on_disk,
            ref_count: d.ref_count,
        }
    }

    fn archive_store(&self) -> Result<&ArchiveStore, ResourceError> {
        self.stores
            .archive()
            .ok_or_else(|| ResourceError::NotSupported(format!("'{}' is not archive backed", self.uri)))
    }
}

/// Names must be absolute.
fn check_path(name: &str) -> Result<(), ResourceError> {
    if name.is_empty() || !name.starts_with('/') {
        warn!("resource path is not absolute: '{name}'");
        return Err(ResourceError::NotFound(name.to_string()));
    }
    Ok(())
}

/// Extension of the last path component, without the dot.
fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(_, ext)| ext)
}

/// Exclusive access to the factory for the length of one call chain.
///
/// Type callbacks receive the context and use it to load or release other resources
/// while the outer load is still in progress. The context tracks the names being loaded
/// so that a resource depending on itself fails instead of recursing.
pub struct LoadContext<'a> {
    inner: &'a mut FactoryInner,
    stack: Vec<(u64, String)>,
}

impl<'a> LoadContext<'a> {
    fn new(inner: &'a mut FactoryInner) -> Self {
        LoadContext {
            inner,
            stack: Vec::new(),
        }
    }

    /// Get a resource, loading it if it is not cached. Increments the reference count.
    pub fn get(&mut self, name: &str) -> Result<ResourceHandle, ResourceError> {
        check_path(name)?;
        let canonical = canonical_path(name);
        let path_hash = hash_path(&canonical);

        if self.stack.iter().any(|(hash, _)| *hash == path_hash) {
            error!("self referring resource detected, reference chain:");
            for (i, (_, path)) in self.stack.iter().enumerate() {
                error!("{i}: {path}");
            }
            error!("{}: {canonical}", self.stack.len());
            return Err(ResourceError::Loop(canonical));
        }

        self.stack.push((path_hash, canonical.clone()));
        let result = self.get_locked(&canonical, path_hash);
        self.stack.pop();
        result
    }

    fn get_locked(&mut self, canonical: &str, path_hash: u64) -> Result<ResourceHandle, ResourceError> {
        if let Some(&handle) = self.inner.by_hash.get(&path_hash) {
            if let Some(descriptor) = self.inner.resources.get_mut(handle) {
                descriptor.ref_count += 1;
                return Ok(handle);
            }
        }

        if self.inner.resources.len() >= self.inner.max_resources {
            error!("the max number of resources ({}) has been passed", self.inner.max_resources);
            return Err(ResourceError::OutOfResources(self.inner.max_resources));
        }

        let Some(ext) = extension(canonical) else {
            warn!("unable to load resource '{canonical}', missing file extension");
            return Err(ResourceError::MissingFileExtension(canonical.to_string()));
        };
        let Some(rtype) = self.inner.types.find(ext).cloned() else {
            error!("unknown resource type: {ext}");
            return Err(ResourceError::UnknownResourceType(ext.to_string()));
        };

        let mut buffer = self.inner.take_buffer();
        let created = self.create(&rtype, canonical, path_hash, &mut buffer);
        let size_on_disk = buffer.len();
        self.inner.restore_buffer(buffer);
        let (resource, size) = created?;

        if self.inner.resources.len() >= self.inner.max_resources {
            error!("the max number of resources ({}) has been passed", self.inner.max_resources);
            (rtype.destroy)(self, resource);
            return Err(ResourceError::OutOfResources(self.inner.max_resources));
        }

        let handle = self.inner.resources.insert(Descriptor {
            path_hash,
            resource: Some(resource),
            resource_type: rtype.id,
            size,
            size_on_disk,
            ref_count: 1,
        });
        self.inner.by_hash.insert(path_hash, handle);
        if self.inner.reload_support {
            self.inner.paths.insert(path_hash, canonical.to_string());
        }
        trace!("created {canonical} ({size_on_disk} bytes on disk)");
        Ok(handle)
    }

    /// Load, preload, create and post-create, in that order.
    fn create(
        &mut self,
        rtype: &ResourceType,
        canonical: &str,
        path_hash: u64,
        buffer: &mut Vec<u8>,
    ) -> Result<(Resource, usize), ResourceError> {
        if let Err(e) = self.inner.stores.load(canonical, buffer) {
            if matches!(e, StoreError::NotFound(_)) {
                warn!("resource not found: {canonical}");
            }
            return Err(e.into());
        }

        let preload_data = match &rtype.preload {
            Some(preload) => preload(&PreloadParams {
                name: canonical,
                path_hash,
                buffer: buffer.as_slice(),
            })?,
            None => None,
        };

        let Created { mut resource, size } = (rtype.create)(
            self,
            &CreateParams {
                name: canonical,
                path_hash,
                buffer: buffer.as_slice(),
                preload_data: preload_data.as_deref(),
            },
        )
        .map_err(|e| {
            warn!("unable to create resource {canonical}: {e}");
            e
        })?;

        if let Some(post_create) = &rtype.post_create {
            let params = PostCreateParams {
                name: canonical,
                path_hash,
                preload_data: preload_data.as_deref(),
            };
            loop {
                match post_create(self, &mut resource, &params) {
                    Ok(PostCreate::Done) => break,
                    Ok(PostCreate::Pending) => thread::sleep(POST_CREATE_RETRY),
                    Err(e) => {
                        warn!("post create failed for {canonical}: {e}");
                        (rtype.destroy)(self, resource);
                        return Err(e);
                    }
                }
            }
        }

        Ok((resource, size))
    }

    /// Read a resource's bytes without creating it.
    pub fn get_raw(&mut self, name: &str) -> Result<Vec<u8>, ResourceError> {
        check_path(name)?;
        let canonical = canonical_path(name);
        let mut buf = Vec::new();
        self.inner.stores.load(&canonical, &mut buf)?;
        Ok(buf)
    }

    /// Decrement the reference count, destroying the resource when it reaches zero.
    pub fn release(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        let descriptor = self
            .inner
            .resources
            .get_mut(handle)
            .ok_or(ResourceError::NotLoaded)?;
        descriptor.ref_count -= 1;
        if descriptor.ref_count > 0 {
            return Ok(());
        }

        let Some(descriptor) = self.inner.resources.remove(handle) else {
            return Err(ResourceError::NotLoaded);
        };
        self.inner.by_hash.remove(&descriptor.path_hash);
        self.inner.paths.remove(&descriptor.path_hash);

        let rtype = self.inner.resource_type(descriptor.resource_type)?;
        if let Some(resource) = descriptor.resource {
            (rtype.destroy)(self, resource);
        }
        trace!("destroyed resource {:#018x}", descriptor.path_hash);
        Ok(())
    }

    pub fn inc_ref(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        let descriptor = self
            .inner
            .resources
            .get_mut(handle)
            .ok_or(ResourceError::NotLoaded)?;
        descriptor.ref_count += 1;
        Ok(())
    }

    pub fn path_hash(&self, handle: ResourceHandle) -> Result<u64, ResourceError> {
        Ok(self.inner.descriptor(handle)?.path_hash)
    }

    /// Borrow the payload of `handle` as a `T`.
    pub fn with_resource<T: Any, R>(&self, handle: ResourceHandle, f: impl FnOnce(&T) -> R) -> Result<R, ResourceError> {
        let resource = self
            .inner
            .descriptor(handle)?
            .resource
            .as_ref()
            .ok_or(ResourceError::NotLoaded)?;
        let resource = resource
            .downcast_ref::<T>()
            .ok_or_else(|| ResourceError::Inval(format!("resource is not a {}", std::any::type_name::<T>())))?;
        Ok(f(resource))
    }

    pub fn reload(&mut self, name: &str) -> Result<ResourceHandle, ResourceError> {
        check_path(name)?;
        let canonical = canonical_path(name);
        let path_hash = hash_path(&canonical);
        let handle = *self
            .inner
            .by_hash
            .get(&path_hash)
            .ok_or_else(|| ResourceError::NotFound(canonical.clone()))?;
        self.inner.recreatable_type(handle)?;

        let mut buffer = self.inner.take_buffer();
        let result = match self.inner.stores.load(&canonical, &mut buffer) {
            Ok(()) => self.recreate(handle, &canonical, path_hash, &buffer, None),
            Err(e) => Err(e.into()),
        };
        self.inner.restore_buffer(buffer);
        result?;

        info!("reloaded {canonical}");
        self.notify_reloaded(handle, &canonical, path_hash);
        Ok(handle)
    }

    pub fn set_resource(&mut self, path_hash: u64, buffer: &[u8]) -> Result<(), ResourceError> {
        let (handle, name) = self.cached(path_hash)?;
        self.recreate(handle, &name, path_hash, buffer, None)?;
        self.notify_reloaded(handle, &name, path_hash);
        Ok(())
    }

    pub fn set_resource_message(&mut self, path_hash: u64, message: &(dyn Any + Send)) -> Result<(), ResourceError> {
        let (handle, name) = self.cached(path_hash)?;
        self.recreate(handle, &name, path_hash, &[], Some(message))?;
        self.notify_reloaded(handle, &name, path_hash);
        Ok(())
    }

    fn cached(&self, path_hash: u64) -> Result<(ResourceHandle, String), ResourceError> {
        let handle = *self
            .inner
            .by_hash
            .get(&path_hash)
            .ok_or_else(|| ResourceError::NotFound(format!("{path_hash:#018x}")))?;
        let name = self.inner.paths.get(&path_hash).cloned().unwrap_or_default();
        Ok((handle, name))
    }

    /// Run the type's recreate callback on a cached payload. On failure the previous
    /// payload stays in place.
    fn recreate(
        &mut self,
        handle: ResourceHandle,
        name: &str,
        path_hash: u64,
        buffer: &[u8],
        message: Option<&(dyn Any + Send)>,
    ) -> Result<(), ResourceError> {
        let rtype = self.inner.recreatable_type(handle)?;
        let Some(recreate) = &rtype.recreate else {
            return Err(ResourceError::NotSupported(rtype.extension.clone()));
        };

        let mut resource = self
            .inner
            .resources
            .get_mut(handle)
            .and_then(|d| d.resource.take())
            .ok_or(ResourceError::NotLoaded)?;

        let result = recreate(
            self,
            &mut resource,
            &RecreateParams {
                name,
                path_hash,
                buffer,
                message,
            },
        );

        let Some(descriptor) = self.inner.resources.get_mut(handle) else {
            (rtype.destroy)(self, resource);
            return Err(ResourceError::NotLoaded);
        };

        match result {
            Ok(Recreated::InPlace(size)) => {
                descriptor.resource = Some(resource);
                if let Some(size) = size {
                    descriptor.size = size;
                }
                if message.is_none() {
                    descriptor.size_on_disk = buffer.len();
                }
                Ok(())
            }
            Ok(Recreated::Replaced(created)) => {
                descriptor.resource = Some(created.resource);
                descriptor.size = created.size;
                if message.is_none() {
                    descriptor.size_on_disk = buffer.len();
                }
                (rtype.destroy)(self, resource);
                Ok(())
            }
            Err(e) => {
                descriptor.resource = Some(resource);
                warn!("unable to recreate resource {name}: {e}");
                Err(e)
            }
        }
    }

    fn notify_reloaded(&mut self, handle: ResourceHandle, name: &str, path_hash: u64) {
        let callbacks: Vec<ReloadedFn> = self
            .inner
            .reload_callbacks
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        let reloaded = ResourceReloaded {
            handle,
            name,
            path_hash,
        };
        for callback in callbacks {
            callback(self, &reloaded);
        }
    }
}

/// Cache of typed, reference counted resources loaded through one backend.
pub struct Factory {
    inner: Mutex<FactoryInner>,
}

impl Factory {
    /// Create a factory for `uri`.
    ///
    /// # Arguments
    ///
    /// * `uri` - `dmanif:<manifest path>`, `file:<directory>`, `http://host[:port]/base` or `https://...`
    /// * `params` - Capacity, reload support, live update and cache settings
    pub fn new(uri: &str, params: FactoryParams) -> Result<Factory, ResourceError> {
        let stores = store::store_open(uri, &params).map_err(|e| match e {
            StoreError::InvalidUri(uri) => ResourceError::Inval(format!("unsupported uri '{uri}'")),
            e => e.into(),
        })?;

        debug!("created factory for {uri}");
        Ok(Factory {
            inner: Mutex::new(FactoryInner {
                uri: uri.to_string(),
                max_resources: params.max_resources,
                buffer_size: params.buffer_size,
                reload_support: params.reload_support,
                stores,
                types: TypeRegistry::new(),
                resources: SlotMap::with_capacity_and_key(params.max_resources),
                by_hash: HashMap::with_capacity(params.max_resources),
                paths: HashMap::new(),
                buffer: Vec::with_capacity(params.buffer_size),
                reload_callbacks: Vec::new(),
                next_callback_id: 0,
            }),
        })
    }

    /// Run `f` with exclusive access to the factory. Several loads can share one context.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut LoadContext) -> R) -> R {
        let mut inner = self.inner.lock();
        let mut ctx = LoadContext::new(&mut inner);
        f(&mut ctx)
    }

    pub fn uri(&self) -> String {
        self.inner.lock().uri.clone()
    }

    pub fn register_type(&self, extension: &str, callbacks: TypeCallbacks) -> Result<ResourceTypeId, ResourceError> {
        self.inner.lock().types.register(extension, callbacks)
    }

    pub fn type_from_extension(&self, extension: &str) -> Result<ResourceTypeId, ResourceError> {
        self.inner
            .lock()
            .types
            .find(extension)
            .map(|t| t.id)
            .ok_or_else(|| ResourceError::UnknownResourceType(extension.to_string()))
    }

    pub fn extension_from_type(&self, id: ResourceTypeId) -> Result<String, ResourceError> {
        Ok(self.inner.lock().resource_type(id)?.extension.clone())
    }

    pub fn resource_type(&self, handle: ResourceHandle) -> Result<ResourceTypeId, ResourceError> {
        Ok(self.inner.lock().descriptor(handle)?.resource_type)
    }

    pub fn get(&self, name: &str) -> Result<ResourceHandle, ResourceError> {
        self.with_context(|ctx| ctx.get(name))
    }

    pub fn get_raw(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        self.with_context(|ctx| ctx.get_raw(name))
    }

    pub fn release(&self, handle: ResourceHandle) -> Result<(), ResourceError> {
        self.with_context(|ctx| ctx.release(handle))
    }

    /// Reload a cached resource from the backend, keeping its handle.
    pub fn reload(&self, name: &str) -> Result<ResourceHandle, ResourceError> {
        self.with_context(|ctx| ctx.reload(name))
    }

    /// Recreate a cached resource from `buffer` instead of the backend.
    pub fn set_resource(&self, path_hash: u64, buffer: &[u8]) -> Result<(), ResourceError> {
        self.with_context(|ctx| ctx.set_resource(path_hash, buffer))
    }

    pub fn set_resource_message(&self, path_hash: u64, message: &(dyn Any + Send)) -> Result<(), ResourceError> {
        self.with_context(|ctx| ctx.set_resource_message(path_hash, message))
    }

    pub fn inc_ref(&self, handle: ResourceHandle) -> Result<(), ResourceError> {
        self.with_context(|ctx| ctx.inc_ref(handle))
    }

    pub fn ref_count(&self, handle: ResourceHandle) -> Result<u32, ResourceError> {
        Ok(self.inner.lock().descriptor(handle)?.ref_count)
    }

    pub fn path_hash(&self, handle: ResourceHandle) -> Result<u64, ResourceError> {
        Ok(self.inner.lock().descriptor(handle)?.path_hash)
    }

    /// Original path of a cached resource. Requires reload support.
    pub fn path_of(&self, path_hash: u64) -> Option<String> {
        self.inner.lock().paths.get(&path_hash).cloned()
    }

    pub fn with_resource<T: Any, R>(&self, handle: ResourceHandle, f: impl FnOnce(&T) -> R) -> Result<R, ResourceError> {
        self.with_context(|ctx| ctx.with_resource(handle, f))
    }

    pub fn descriptor(&self, name: &str) -> Result<ResourceInfo, ResourceError> {
        let inner = self.inner.lock();
        let path_hash = hash_path(canonical_path(name));
        let handle = *inner.by_hash.get(&path_hash).ok_or(ResourceError::NotLoaded)?;
        let descriptor = inner.descriptor(handle)?;
        Ok(inner.info(handle, descriptor))
    }

    /// Like [`Factory::descriptor`] but by path hash, restricted to the given extensions.
    pub fn descriptor_with_ext(&self, path_hash: u64, extensions: &[&str]) -> Result<ResourceInfo, ResourceError> {
        let inner = self.inner.lock();
        let handle = *inner.by_hash.get(&path_hash).ok_or(ResourceError::NotLoaded)?;
        let descriptor = inner.descriptor(handle)?;
        let info = inner.info(handle, descriptor);
        if !extensions.iter().any(|ext| *ext == info.extension) {
            return Err(ResourceError::InvalidFileExtension(info.extension));
        }
        Ok(info)
    }

    /// Visit every cached resource until `f` returns false.
    pub fn iterate_resources(&self, mut f: impl FnMut(&ResourceInfo) -> bool) {
        let inner = self.inner.lock();
        for (handle, descriptor) in inner.resources.iter() {
            if !f(&inner.info(handle, descriptor)) {
                break;
            }
        }
    }

    pub fn resource_count(&self) -> usize {
        self.inner.lock().resources.len()
    }

    pub fn register_reloaded_callback<F>(&self, f: F) -> ReloadCallbackId
    where
        F: Fn(&mut LoadContext, &ResourceReloaded) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = ReloadCallbackId(inner.next_callback_id);
        inner.next_callback_id += 1;
        let callback: ReloadedFn = Arc::new(f);
        inner.reload_callbacks.push((id, callback));
        id
    }

    /// Returns false if no callback with `id` is registered.
    pub fn unregister_reloaded_callback(&self, id: ReloadCallbackId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.reload_callbacks.len();
        inner.reload_callbacks.retain(|(cb_id, _)| *cb_id != id);
        inner.reload_callbacks.len() != before
    }

    /// Check the manifest signature against a known digest.
    pub fn verify_manifest_hash(&self, expected_digest: &[u8]) -> Result<(), ResourceError> {
        let inner = self.inner.lock();
        let store = inner.archive_store()?;
        let key = store
            .public_key()
            .ok_or(LiveUpdateError::MissingPublicKey)?;
        verify::verify_manifest_hash(store.manifest(), key, expected_digest)?;
        Ok(())
    }

    /// Verify and store a live-update resource. It is readable immediately.
    pub fn store_resource(&self, expected_hex: &str, resource: &[u8]) -> Result<(), ResourceError> {
        let mut inner = self.inner.lock();
        let store = inner.stores.archive_mut().ok_or(LiveUpdateError::SchemeMismatch)?;
        let (manifest, archive, live_update) = store.parts_mut();
        let live_update = live_update.ok_or(LiveUpdateError::NotEnabled)?;
        live_update
            .store_resource(manifest, archive, expected_hex, resource)
            .map_err(|e| {
                warn!("failed storing live update resource {expected_hex}: {}", e.result());
                e
            })?;
        Ok(())
    }

    /// Verify and store a live-update manifest, used from the next start.
    pub fn store_manifest(&self, manifest: &[u8]) -> Result<(), ResourceError> {
        let inner = self.inner.lock();
        let store = inner.stores.archive().ok_or(LiveUpdateError::SchemeMismatch)?;
        let live_update = store.live_update().ok_or(LiveUpdateError::NotEnabled)?;
        live_update.store_manifest(manifest, store.archive()).map_err(|e| {
            warn!("failed storing live update manifest: {}", e.result());
            e
        })?;
        Ok(())
    }

    /// Hex digests of the dependants of `path` that still have to be fetched.
    pub fn missing_resources(&self, path: &str) -> Result<Vec<String>, ResourceError> {
        let inner = self.inner.lock();
        let store = inner.stores.archive().ok_or(LiveUpdateError::SchemeMismatch)?;
        Ok(liveupdate::missing_resources(
            store.manifest(),
            store.archive(),
            &canonical_path(path),
        )?)
    }

    /// Check `payload` against a hex digest using the manifest's resource hash algorithm.
    pub fn verify_resource(&self, expected_hex: &str, payload: &[u8]) -> Result<(), ResourceError> {
        let inner = self.inner.lock();
        let store = inner.stores.archive().ok_or(LiveUpdateError::SchemeMismatch)?;
        let algorithm = store.manifest().data.header.resource_hash_algorithm;
        verify::verify_resource(algorithm, expected_hex, payload)?;
        Ok(())
    }

    /// `BundledOnly` unless live update is enabled on an archive backed factory.
    pub fn live_update_state(&self) -> LiveUpdateState {
        self.inner
            .lock()
            .stores
            .archive()
            .and_then(|s| s.live_update())
            .map(|lu| lu.state())
            .unwrap_or(LiveUpdateState::BundledOnly)
    }

    pub fn archive_entry_count(&self) -> Option<usize> {
        self.inner.lock().stores.archive().map(|s| s.archive().index().len())
    }
}

impl Drop for Factory {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.resources.is_empty() {
            warn!("factory for {} dropped with {} resources still cached", inner.uri, inner.resources.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("/a/b.texturec"), Some("texturec"));
        assert_eq!(extension("/a.dir/b"), None);
        assert_eq!(extension("/a/b.tar.gz"), Some("gz"));
        assert_eq!(extension("/noext"), None);
    }

    #[test]
    fn test_check_path() {
        assert!(check_path("/a.x").is_ok());
        assert!(matches!(check_path("a.x"), Err(ResourceError::NotFound(_))));
        assert!(matches!(check_path(""), Err(ResourceError::NotFound(_))));
    }
}
