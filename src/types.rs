use crate::{error::ResourceError, factory::LoadContext, hash::hash_path};
use std::{any::Any, sync::Arc};
use tracing::debug;

pub const MAX_RESOURCE_TYPES: usize = 128;

/// Payload owned by a resource type's create/destroy pair. The factory only counts references.
pub type Resource = Box<dyn Any + Send>;
/// Data produced by a preload callback and handed to create and post-create.
pub type PreloadData = Box<dyn Any + Send>;

pub type PreloadFn = Box<dyn Fn(&PreloadParams) -> Result<Option<PreloadData>, ResourceError> + Send + Sync>;
pub type CreateFn = Box<dyn Fn(&mut LoadContext, &CreateParams) -> Result<Created, ResourceError> + Send + Sync>;
pub type PostCreateFn = Box<
    dyn Fn(&mut LoadContext, &mut Resource, &PostCreateParams) -> Result<PostCreate, ResourceError> + Send + Sync,
>;
pub type DestroyFn = Box<dyn Fn(&mut LoadContext, Resource) + Send + Sync>;
pub type RecreateFn =
    Box<dyn Fn(&mut LoadContext, &mut Resource, &RecreateParams) -> Result<Recreated, ResourceError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceTypeId(usize);

pub struct PreloadParams<'a> {
    pub name: &'a str,
    pub path_hash: u64,
    pub buffer: &'a [u8],
}

pub struct CreateParams<'a> {
    pub name: &'a str,
    pub path_hash: u64,
    pub buffer: &'a [u8],
    pub preload_data: Option<&'a (dyn Any + Send)>,
}

pub struct PostCreateParams<'a> {
    pub name: &'a str,
    pub path_hash: u64,
    pub preload_data: Option<&'a (dyn Any + Send)>,
}

/// Input of a recreate: either a freshly loaded buffer or a message pushed by the caller.
pub struct RecreateParams<'a> {
    pub name: &'a str,
    pub path_hash: u64,
    pub buffer: &'a [u8],
    pub message: Option<&'a (dyn Any + Send)>,
}

pub struct Created {
    pub resource: Resource,
    /// In-memory size, 0 when the type does not report one.
    pub size: usize,
}

impl Created {
    pub fn new<T: Any + Send>(resource: T) -> Created {
        Created {
            resource: Box::new(resource),
            size: 0,
        }
    }

    pub fn with_size(mut self, size: usize) -> Created {
        self.size = size;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostCreate {
    Done,
    /// Not finished yet, call again.
    Pending,
}

pub enum Recreated {
    /// The payload was updated in place. `Some` carries a new in-memory size.
    InPlace(Option<usize>),
    /// A new payload replaces the old one, which is then destroyed.
    Replaced(Created),
}

/// Callbacks of a resource type. `create` and `destroy` are required.
#[derive(Default)]
pub struct TypeCallbacks {
    preload: Option<PreloadFn>,
    create: Option<CreateFn>,
    post_create: Option<PostCreateFn>,
    destroy: Option<DestroyFn>,
    recreate: Option<RecreateFn>,
}

impl TypeCallbacks {
    pub fn new() -> TypeCallbacks {
        TypeCallbacks::default()
    }

    pub fn preload<F>(mut self, f: F) -> Self
    where
        F: Fn(&PreloadParams) -> Result<Option<PreloadData>, ResourceError> + Send + Sync + 'static,
    {
        self.preload = Some(Box::new(f));
        self
    }

    pub fn create<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LoadContext, &CreateParams) -> Result<Created, ResourceError> + Send + Sync + 'static,
    {
        self.create = Some(Box::new(f));
        self
    }

    pub fn post_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LoadContext, &mut Resource, &PostCreateParams) -> Result<PostCreate, ResourceError>
            + Send
            + Sync
            + 'static,
    {
        self.post_create = Some(Box::new(f));
        self
    }

    pub fn destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LoadContext, Resource) + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(f));
        self
    }

    pub fn recreate<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LoadContext, &mut Resource, &RecreateParams) -> Result<Recreated, ResourceError>
            + Send
            + Sync
            + 'static,
    {
        self.recreate = Some(Box::new(f));
        self
    }
}

pub struct ResourceType {
    pub id: ResourceTypeId,
    pub extension: String,
    pub extension_hash: u64,
    pub preload: Option<PreloadFn>,
    pub create: CreateFn,
    pub post_create: Option<PostCreateFn>,
    pub destroy: DestroyFn,
    pub recreate: Option<RecreateFn>,
}

/// Registered resource types, looked up by file extension.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<Arc<ResourceType>>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    /// Register callbacks for files ending in `.extension`.
    ///
    /// # Arguments
    ///
    /// * `extension` - Extension without the leading dot, e.g. `"texturec"`
    /// * `callbacks` - The type's callbacks, `create` and `destroy` must be set
    pub fn register(&mut self, extension: &str, callbacks: TypeCallbacks) -> Result<ResourceTypeId, ResourceError> {
        if self.types.len() >= MAX_RESOURCE_TYPES {
            return Err(ResourceError::OutOfResources(MAX_RESOURCE_TYPES));
        }
        if extension.is_empty() || extension.contains('.') {
            return Err(ResourceError::Inval(format!("invalid extension '{extension}'")));
        }
        if self.find(extension).is_some() {
            return Err(ResourceError::AlreadyRegistered(extension.to_string()));
        }

        let TypeCallbacks {
            preload,
            create,
            post_create,
            destroy,
            recreate,
        } = callbacks;
        let (Some(create), Some(destroy)) = (create, destroy) else {
            return Err(ResourceError::Inval(format!(
                "type '{extension}' requires create and destroy callbacks"
            )));
        };

        let id = ResourceTypeId(self.types.len());
        self.types.push(Arc::new(ResourceType {
            id,
            extension: extension.to_string(),
            extension_hash: hash_path(extension),
            preload,
            create,
            post_create,
            destroy,
            recreate,
        }));
        debug!("registered resource type '{extension}'");
        Ok(id)
    }

    pub fn find(&self, extension: &str) -> Option<&Arc<ResourceType>> {
        let hash = hash_path(extension);
        self.types
            .iter()
            .find(|t| t.extension_hash == hash && t.extension == extension)
    }

    pub fn get(&self, id: ResourceTypeId) -> Option<&Arc<ResourceType>> {
        self.types.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callbacks() -> TypeCallbacks {
        TypeCallbacks::new()
            .create(|_, params| Ok(Created::new(params.buffer.to_vec())))
            .destroy(|_, _| {})
    }

    #[test]
    fn test_register() {
        let mut registry = TypeRegistry::new();
        let id = registry.register("texturec", callbacks()).unwrap();
        assert_eq!(registry.find("texturec").unwrap().id, id);
        assert_eq!(registry.get(id).unwrap().extension, "texturec");
        assert!(registry.find("scriptc").is_none());
    }

    #[test]
    fn test_register_errors() {
        let mut registry = TypeRegistry::new();
        registry.register("a", callbacks()).unwrap();
        assert!(matches!(
            registry.register("a", callbacks()),
            Err(ResourceError::AlreadyRegistered(_))
        ));
        assert!(matches!(registry.register("", callbacks()), Err(ResourceError::Inval(_))));
        assert!(matches!(registry.register("a.b", callbacks()), Err(ResourceError::Inval(_))));
        assert!(matches!(
            registry.register("c", TypeCallbacks::new().destroy(|_, _| {})),
            Err(ResourceError::Inval(_))
        ));
    }

    #[test]
    fn test_max_types() {
        let mut registry = TypeRegistry::new();
        for i in 0..MAX_RESOURCE_TYPES {
            registry.register(&format!("t{i}"), callbacks()).unwrap();
        }
        assert!(matches!(
            registry.register("overflow", callbacks()),
            Err(ResourceError::OutOfResources(_))
        ));
    }
}
