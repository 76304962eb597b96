//! Row-level and layer-level access control for a map server.
//!
//! For every layer of a request the host asks [`AccessControl`] for:
//!
//! - a row filter, built from group-owned polygons ([`spatial`]) and from an
//!   attribute matched against the caller login or groups ([`login`]);
//! - the caller's rights on the layer ([`LayerPermissions`]);
//! - the cache key of the response.
//!
//! Filters are plain strings. [`ALL_FEATURES`] means unrestricted and
//! [`NO_FEATURES`] hides every row; any failure resolves to the latter.

pub mod access_control;
mod error;
pub mod geometry;
pub mod identity;
pub mod layer;
pub mod login;
pub mod permissions;
pub mod quoting;
pub mod spatial;
mod types;

pub use access_control::{AccessControl, CACHE_KEY_SEPARATOR, RequestScope, combine_filters};
pub use error::{FilterError, FilterResult};
pub use geometry::{Crs, NoReprojection, PolygonUnion, Reprojector};
pub use identity::{CallerIdentity, RequestInfo};
pub use layer::{
    DataSourceUri, Feature, LayerRegistry, MemoryLayer, SharedLayer, SubsetGuard, VectorLayer,
};
pub use login::{anonymous_login_filter, build_login_filter};
pub use permissions::apply_edition_rights;
pub use spatial::{PolygonFilter, PredicateRequest};
pub use types::{
    ALL_FEATURES, CompiledFilter, FilterTarget, LayerPermissions, NO_FEATURES, SpatialBackend,
};
