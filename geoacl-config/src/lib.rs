//! Project access-control configuration for geoacl.
//!
//! A project document declares which layers are visible to which groups
//! (`layers`), who may edit what (`editionLayers`), attribute filters keyed
//! by login or groups (`loginFilteredLayers`) and group-owned polygons that
//! restrict features spatially (`filter_by_polygon`).

mod error;
mod store;
mod tos;
mod truthy;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use store::{ConfigStore, DEFAULT_CAPACITY};
pub use tos::{BING_DOMAIN, GOOGLE_DOMAIN, LicensedSource, TosPolicy};
pub use truthy::{TRUTHY_TOKENS, to_bool, value_to_bool};
pub use types::{
    EditionCapabilities, EditionConfig, FilterMode, LayerConfig, LoginFilterConfig,
    PolygonFilterConfig, PolygonLayerEntry, PolygonSource, ProjectConfig, ProjectOptions,
    SpatialRelationship,
};
