//! Core data types shared by the filter builders and the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter meaning "no restriction".
pub const ALL_FEATURES: &str = "";

/// Filter matching nothing.
pub const NO_FEATURES: &str = "1 = 0";

/// Language the host expects the filter in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    /// Provider subset string; must stay safe SQL.
    SubsetString,
    /// Host expression language.
    Expression,
}

/// How a spatial predicate reaches the data.
///
/// Chosen once per layer from the provider capability and the filter target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialBackend {
    /// `ST_Intersects` / `ST_Contains` pushed down to the database.
    PushDownSql { geometry_column: String },
    /// Host expression (`intersects(geom_from_wkt(...), $geometry)`).
    Expression,
    /// Predicate evaluated in-process, result sent as a primary key list.
    KeyList,
}

impl SpatialBackend {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PushDownSql { .. } => "push_down_sql",
            Self::Expression => "expression",
            Self::KeyList => "key_list",
        }
    }
}

impl fmt::Display for SpatialBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-scoped spatial filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFilter {
    pub predicate: String,
    /// `SRID=<srid>;<wkt>` of the resolved group area, empty for sentinels.
    pub geometry_ewkt: String,
    pub backend: SpatialBackend,
}

impl CompiledFilter {
    pub fn all_features(backend: SpatialBackend) -> Self {
        Self {
            predicate: ALL_FEATURES.to_string(),
            geometry_ewkt: String::new(),
            backend,
        }
    }

    pub fn no_features(backend: SpatialBackend) -> Self {
        Self {
            predicate: NO_FEATURES.to_string(),
            geometry_ewkt: String::new(),
            backend,
        }
    }

    pub fn matches_nothing(&self) -> bool {
        self.predicate == NO_FEATURES
    }
}

/// Rights of the caller on one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerPermissions {
    pub can_read: bool,
    pub can_insert: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

impl Default for LayerPermissions {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl LayerPermissions {
    pub fn allow_all() -> Self {
        Self {
            can_read: true,
            can_insert: true,
            can_update: true,
            can_delete: true,
        }
    }

    pub fn deny_all() -> Self {
        Self {
            can_read: false,
            can_insert: false,
            can_update: false,
            can_delete: false,
        }
    }

    /// Set every flag, read included.
    pub fn set_all(&mut self, allowed: bool) {
        self.can_read = allowed;
        self.can_insert = allowed;
        self.can_update = allowed;
        self.can_delete = allowed;
    }

    /// Drop insert, update and delete rights.
    pub fn revoke_edition(&mut self) {
        self.can_insert = false;
        self.can_update = false;
        self.can_delete = false;
    }
}
