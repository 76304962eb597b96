//! Error types for filter generation.

use thiserror::Error;

/// Errors raised while resolving a filter. The orchestrator never lets one
/// reach the caller: each is turned into the most restrictive outcome.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("polygon source layer not found: {0}")]
    PolygonSourceNotFound(String),

    #[error("field {field} not found on layer {layer}")]
    FieldNotFound { field: String, layer: String },

    #[error("CRS error: {0}")]
    Crs(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("WKT parse error: {0}")]
    WktParse(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("subset string rejected by layer {layer}: {subset}")]
    SubsetRejected { layer: String, subset: String },

    #[error("layer {0} is already filtered by another request")]
    LayerBusy(String),

    #[error("configuration error: {0}")]
    Config(#[from] geoacl_config::ConfigError),
}

pub type FilterResult<T> = Result<T, FilterError>;
