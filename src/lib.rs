//! Content-addressable resource store.
//!
//! A [`Factory`] loads named resources through one backend (a signed manifest with its
//! archive, a plain directory or an HTTP server), caches them by canonical path hash and
//! counts references to them. Archive backed factories can additionally take live-update
//! content: resources and manifests downloaded at runtime that patch the bundled set.

pub mod archive;
pub mod config;
pub mod error;
pub mod factory;
pub mod hash;
pub mod liveupdate;
pub mod manifest;
pub mod store;
pub mod types;
pub mod verify;

pub use config::{init_logging, BuiltinsArchive, FactoryParams};
pub use error::{live_update_result, result_to_string, ResourceError, ResultCode};
pub use factory::{Factory, LoadContext, ResourceHandle, ResourceInfo, ResourceReloaded};
pub use liveupdate::{LiveUpdateResult, LiveUpdateState};
pub use types::{Created, PostCreate, Recreated, Resource, ResourceTypeId, TypeCallbacks};
