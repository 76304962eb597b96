//! Project configuration model.
//!
//! The project document is parsed section by section: a malformed section is
//! logged and treated as absent so that one bad entry never takes the whole
//! project down with it. `filter_by_polygon` is the exception: its entries
//! restrict access, so a malformed entry is kept as a rejected layer id and a
//! malformed section rejects every layer.

use crate::error::{ConfigError, ConfigResult};
use crate::truthy::bool_like;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Per-layer display configuration (`layers.<layer name>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Groups allowed to see the layer at all. Empty means no restriction.
    #[serde(default, deserialize_with = "string_or_list")]
    pub group_visibility: Vec<String>,
}

impl LayerConfig {
    /// Trimmed group visibility entries.
    pub fn visibility_groups(&self) -> Vec<String> {
        self.group_visibility
            .iter()
            .map(|g| g.trim().to_string())
            .collect()
    }
}

/// Edition capabilities of a layer (`editionLayers.<layer id>.capabilities`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditionCapabilities {
    #[serde(default, deserialize_with = "bool_like")]
    pub create_feature: bool,
    #[serde(default, deserialize_with = "bool_like")]
    pub delete_feature: bool,
    #[serde(default, deserialize_with = "bool_like")]
    pub modify_attribute: bool,
    #[serde(default, deserialize_with = "bool_like")]
    pub modify_geometry: bool,
}

/// Edition configuration of one layer (`editionLayers.<layer id>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionConfig {
    /// Comma separated list of groups allowed to edit. Empty or absent means
    /// every caller.
    #[serde(default)]
    pub acl: Option<String>,

    #[serde(default)]
    pub capabilities: Option<EditionCapabilities>,
}

impl EditionConfig {
    /// Trimmed ACL groups, or `None` when no ACL restricts edition.
    pub fn acl_groups(&self) -> Option<Vec<String>> {
        match self.acl.as_deref() {
            Some(acl) if !acl.is_empty() => {
                Some(acl.split(',').map(|g| g.trim().to_string()).collect())
            }
            _ => None,
        }
    }
}

/// Attribute filter by login or groups (`loginFilteredLayers.<layer name>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginFilterConfig {
    #[serde(rename = "layerId")]
    pub layer_id: String,

    #[serde(rename = "filterAttribute")]
    pub filter_attribute: String,

    /// Filter on the caller login rather than the caller groups.
    #[serde(rename = "filterPrivate", deserialize_with = "bool_like")]
    pub filter_private: bool,

    /// Only restrict edit operations; display is never filtered.
    #[serde(default, deserialize_with = "bool_like")]
    pub edition_only: bool,

    /// The attribute may hold several comma separated values.
    #[serde(default, deserialize_with = "bool_like")]
    pub allow_multiple_acl_values: bool,
}

/// Spatial relationship between the group polygon and the layer features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialRelationship {
    Intersects,
    Contains,
    #[serde(other)]
    Unknown,
}

impl SpatialRelationship {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Intersects => "intersects",
            Self::Contains => "contains",
            Self::Unknown => "unknown",
        }
    }
}

/// When the spatial filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    DisplayAndEditing,
    Editing,
    #[serde(other)]
    Unknown,
}

/// Polygon source shared by every spatially filtered layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonSource {
    #[serde(default)]
    pub polygon_layer_id: String,

    /// Attribute on the polygon layer holding comma separated group names.
    #[serde(default)]
    pub group_field: String,
}

/// One spatially filtered layer (`filter_by_polygon.layers[]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonLayerEntry {
    /// Target layer id.
    pub layer: String,

    pub primary_key: String,

    pub spatial_relationship: SpatialRelationship,

    pub filter_mode: FilterMode,

    /// Key the polygon lookup by login instead of groups.
    #[serde(default, deserialize_with = "bool_like")]
    pub filter_by_user: bool,

    /// Test the feature centroid instead of the full feature geometry.
    #[serde(default, deserialize_with = "bool_like")]
    pub use_centroid: bool,
}

/// The `filter_by_polygon` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonFilterConfig {
    #[serde(default)]
    pub config: PolygonSource,

    #[serde(default)]
    pub layers: Vec<PolygonLayerEntry>,

    /// Layer ids whose entry could not be parsed.
    #[serde(skip)]
    pub rejected_layers: Vec<String>,

    /// The section itself could not be parsed; no layer can be trusted.
    #[serde(skip)]
    pub malformed: bool,
}

impl PolygonFilterConfig {
    /// Parse the section entry by entry.
    ///
    /// An entry that does not parse is remembered by its `layer` id. A
    /// section that is not an object, a `config` or `layers` of the wrong
    /// shape, or an entry without a layer id marks the whole section as
    /// malformed.
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(section) = value else {
            warn!(
                "Config section filter_by_polygon is {}, hiding every layer",
                json_kind(value)
            );
            return Self::malformed();
        };

        let config = match section.get("config") {
            None | Some(Value::Null) => PolygonSource::default(),
            Some(value) => match PolygonSource::deserialize(value) {
                Ok(config) => config,
                Err(e) => {
                    warn!("filter_by_polygon config not well formed, hiding every layer: {e}");
                    return Self::malformed();
                }
            },
        };

        let entries: &[Value] = match section.get("layers") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                warn!(
                    "filter_by_polygon layers is {}, hiding every layer",
                    json_kind(other)
                );
                return Self::malformed();
            }
        };

        let mut parsed = Self {
            config,
            ..Self::default()
        };
        for value in entries {
            match PolygonLayerEntry::deserialize(value) {
                Ok(entry) => parsed.layers.push(entry),
                Err(e) => match value.get("layer").and_then(Value::as_str) {
                    Some(layer_id) => {
                        warn!("filter_by_polygon entry of layer {layer_id} not well formed: {e}");
                        parsed.rejected_layers.push(layer_id.to_string());
                    }
                    None => {
                        warn!(
                            "filter_by_polygon entry without a layer id, hiding every layer: {e}"
                        );
                        parsed.malformed = true;
                    }
                },
            }
        }
        parsed
    }

    fn malformed() -> Self {
        Self {
            malformed: true,
            ..Self::default()
        }
    }

    /// Entry for the given target layer id.
    pub fn entry(&self, layer_id: &str) -> Option<&PolygonLayerEntry> {
        self.layers.iter().find(|entry| entry.layer == layer_id)
    }

    /// The layer's entry, or the whole section, could not be parsed.
    pub fn is_rejected(&self, layer_id: &str) -> bool {
        self.malformed || self.rejected_layers.iter().any(|id| id == layer_id)
    }

    /// A polygon source and its group field are both configured.
    pub fn has_source(&self) -> bool {
        !self.config.polygon_layer_id.is_empty() && !self.config.group_field.is_empty()
    }
}

/// Project wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOptions {
    #[serde(default, rename = "googleKey")]
    pub google_key: String,

    #[serde(default, rename = "bingKey")]
    pub bing_key: String,
}

/// Parsed project access-control configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectConfig {
    layers: Option<BTreeMap<String, LayerConfig>>,
    edition_layers: Option<Map<String, Value>>,
    login_filtered_layers: Option<Map<String, Value>>,
    filter_by_polygon: Option<PolygonFilterConfig>,
    options: ProjectOptions,
}

impl ProjectConfig {
    /// Parse a project document.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Build from an already parsed JSON document.
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let root = match value {
            Value::Object(map) if map.is_empty() => return Err(ConfigError::Empty),
            Value::Object(map) => map,
            Value::Null => return Err(ConfigError::Empty),
            other => {
                return Err(ConfigError::Malformed(format!(
                    "expected an object at the top level, got {}",
                    json_kind(&other)
                )));
            }
        };

        Ok(Self {
            layers: parse_layers(&root),
            edition_layers: non_empty_object(&root, "editionLayers"),
            login_filtered_layers: non_empty_object(&root, "loginFilteredLayers"),
            filter_by_polygon: root
                .get("filter_by_polygon")
                .filter(|value| !value.is_null())
                .map(PolygonFilterConfig::from_value),
            options: section(&root, "options").unwrap_or_default(),
        })
    }

    /// The `layers` section, `None` when missing, empty or not an object.
    pub fn layers(&self) -> Option<&BTreeMap<String, LayerConfig>> {
        self.layers.as_ref()
    }

    pub fn layer(&self, layer_name: &str) -> Option<&LayerConfig> {
        self.layers.as_ref()?.get(layer_name)
    }

    /// Whether `editionLayers` is declared at all.
    pub fn has_edition_layers(&self) -> bool {
        self.edition_layers.is_some()
    }

    /// Edition config for a layer id. Empty or malformed entries count as
    /// absent.
    pub fn edition_layer(&self, layer_id: &str) -> Option<EditionConfig> {
        let value = self.edition_layers.as_ref()?.get(layer_id)?;
        if is_falsy(value) {
            return None;
        }
        match EditionConfig::deserialize(value) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("editionLayers for layer {layer_id} not well formed: {e}");
                None
            }
        }
    }

    /// Login filter config for a layer name, validated.
    ///
    /// `layerId`, `filterAttribute` and `filterPrivate` are mandatory; an
    /// entry missing one of them is treated as absent.
    pub fn login_filter(&self, layer_name: &str) -> Option<LoginFilterConfig> {
        let Some(layers) = self.login_filtered_layers.as_ref() else {
            info!("Config has no loginFilteredLayers");
            return None;
        };
        let value = match layers.get(layer_name) {
            Some(value) if !is_falsy(value) => value,
            _ => {
                info!("Layer {layer_name} has no loginFilteredLayers");
                return None;
            }
        };
        if !value.is_object() {
            warn!("loginFilteredLayers for layer {layer_name} is not an object");
            return None;
        }
        match LoginFilterConfig::deserialize(value) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("loginFilteredLayers for layer {layer_name} not well formed: {e}");
                None
            }
        }
    }

    pub fn filter_by_polygon(&self) -> Option<&PolygonFilterConfig> {
        self.filter_by_polygon.as_ref()
    }

    pub fn options(&self) -> &ProjectOptions {
        &self.options
    }
}

fn parse_layers(root: &Map<String, Value>) -> Option<BTreeMap<String, LayerConfig>> {
    let Some(value) = root.get("layers") else {
        warn!("Config has no layers");
        return None;
    };
    let Value::Object(entries) = value else {
        warn!("Config layers is not an object");
        return None;
    };
    if entries.is_empty() {
        warn!("Config has no layers");
        return None;
    }

    let layers = entries
        .iter()
        .map(|(name, entry)| {
            let config = LayerConfig::deserialize(entry).unwrap_or_else(|e| {
                warn!("Layer config for {name} not well formed, using defaults: {e}");
                LayerConfig::default()
            });
            (name.clone(), config)
        })
        .collect();
    Some(layers)
}

fn section<T: DeserializeOwned>(root: &Map<String, Value>, key: &str) -> Option<T> {
    let value = root.get(key)?;
    if value.is_null() {
        return None;
    }
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Config section {key} not well formed, ignoring it: {e}");
            None
        }
    }
}

fn non_empty_object(root: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match root.get(key) {
        Some(Value::Object(map)) if !map.is_empty() => Some(map.clone()),
        Some(Value::Object(_)) | Some(Value::Null) | None => None,
        Some(other) => {
            warn!("Config section {key} is {}, expected an object", json_kind(other));
            None
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) if s.is_empty() => Vec::new(),
        StringOrList::One(s) => s.split(',').map(str::to_string).collect(),
        StringOrList::Many(items) => items,
        StringOrList::Nothing(()) => Vec::new(),
    })
}
