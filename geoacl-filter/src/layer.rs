//! Host layer abstraction.
//!
//! The host's query engine owns the layers; this crate only needs to read
//! attributes and geometries, know the CRS and provider, and swap the active
//! subset string for the lifetime of one request.

use crate::error::{FilterError, FilterResult};
use crate::geometry::{Crs, parse_wkt};
use crate::quoting::format_table_reference;
use crate::types::ALL_FEATURES;
use geo_types::Geometry;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, TryLockError};
use tracing::{debug, error, warn};

/// Provider name of layers able to run spatial SQL.
pub const POSTGRES_PROVIDER: &str = "postgres";

/// Provider name of [`MemoryLayer`].
pub const MEMORY_PROVIDER: &str = "memory";

/// One feature as read from a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: i64,
    pub attributes: Map<String, Value>,
    pub geometry: Option<Geometry<f64>>,
}

impl Feature {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// A vector layer served by the host.
pub trait VectorLayer {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Storage provider, e.g. `postgres`, `ogr`, `memory`.
    fn provider_type(&self) -> &str;

    /// Raw data source string.
    fn source(&self) -> &str {
        ""
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn crs(&self) -> Crs;

    /// Parsed data source, for providers that have one.
    fn data_source(&self) -> Option<DataSourceUri> {
        DataSourceUri::parse(self.source()).ok()
    }

    fn has_field(&self, name: &str) -> bool;

    /// Scan every feature of the layer.
    fn features(&self) -> FilterResult<Box<dyn Iterator<Item = Feature> + '_>>;

    /// Active subset string, empty when unfiltered.
    fn subset_string(&self) -> &str;

    /// Replace the active subset string. Returns `false` when the provider
    /// rejects it.
    fn set_subset_string(&mut self, subset: &str) -> bool;
}

/// Resolves layers of the current project by id.
pub trait LayerRegistry {
    fn layer(&self, id: &str) -> Option<&dyn VectorLayer>;
}

impl<L: VectorLayer> LayerRegistry for BTreeMap<String, L> {
    fn layer(&self, id: &str) -> Option<&dyn VectorLayer> {
        self.get(id).map(|layer| layer as &dyn VectorLayer)
    }
}

impl<L: VectorLayer> LayerRegistry for [L] {
    fn layer(&self, id: &str) -> Option<&dyn VectorLayer> {
        self.iter()
            .find(|layer| layer.id() == id)
            .map(|layer| layer as &dyn VectorLayer)
    }
}

impl<L: VectorLayer> LayerRegistry for Vec<L> {
    fn layer(&self, id: &str) -> Option<&dyn VectorLayer> {
        self.as_slice().layer(id)
    }
}

fn table_pattern() -> FilterResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"table=(?:"(?P<schema>[^"]*)"\.)?(?:"(?P<quoted>[^"]*)"|(?P<bare>[^\s"]+))(?:\s+\((?P<geom>[^)]*)\))?"#,
            )
            .ok()
        })
        .as_ref()
        .ok_or_else(|| FilterError::Provider("invalid table pattern".to_string()))
}

fn pair_pattern() -> FilterResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?P<key>\w+)=(?:'(?P<quoted>(?:[^'\\]|\\.)*)'|(?P<bare>[^\s']+))"#).ok()
        })
        .as_ref()
        .ok_or_else(|| FilterError::Provider("invalid key=value pattern".to_string()))
}

/// Database data source of a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceUri {
    pub schema: String,
    pub table: String,
    pub geometry_column: String,
    pub key_column: String,
}

impl DataSourceUri {
    /// Parse a provider connection string such as
    /// `dbname='gis' key='id' srid=2154 table="public"."roads" (geom) sql=`.
    /// The `sql=` tail is the provider's own filter and is not parsed.
    pub fn parse(source: &str) -> FilterResult<Self> {
        let head = match source.find(" sql=") {
            Some(pos) => &source[..pos],
            None => source,
        };

        let caps = table_pattern()?
            .captures(head)
            .ok_or_else(|| FilterError::Provider(format!("no table in data source: {source}")))?;
        let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

        let mut uri = Self {
            schema: text("schema").unwrap_or_default(),
            table: text("quoted").or_else(|| text("bare")).unwrap_or_default(),
            geometry_column: text("geom").unwrap_or_default(),
            ..Self::default()
        };

        for pair in pair_pattern()?.captures_iter(head) {
            let Some(key) = pair.name("key") else {
                continue;
            };
            let value = pair
                .name("quoted")
                .or_else(|| pair.name("bare"))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if key.as_str() == "key" {
                uri.key_column = value.trim_matches('"').to_string();
            }
        }

        Ok(uri)
    }

    /// `"schema"."table"` reference of the source.
    pub fn table_reference(&self) -> String {
        format_table_reference(&self.schema, &self.table)
    }
}

/// In-process vector layer.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    id: String,
    name: String,
    provider: String,
    source: String,
    crs: Crs,
    fields: Vec<String>,
    features: Vec<Feature>,
    subset: String,
    valid: bool,
}

impl MemoryLayer {
    pub fn new(id: &str, name: &str, crs: Crs, fields: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider: MEMORY_PROVIDER.to_string(),
            source: String::new(),
            crs,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            features: Vec::new(),
            subset: String::new(),
            valid: true,
        }
    }

    /// Pretend to come from another provider, e.g. `postgres` with a
    /// connection string.
    pub fn with_provider(mut self, provider: &str, source: &str) -> Self {
        self.provider = provider.to_string();
        self.source = source.to_string();
        self
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Add a feature from WKT and a JSON object of attributes. Returns the
    /// feature id.
    pub fn add_feature(&mut self, wkt: Option<&str>, attributes: Value) -> FilterResult<i64> {
        let Value::Object(attributes) = attributes else {
            return Err(FilterError::Provider(
                "feature attributes must be a JSON object".to_string(),
            ));
        };
        if let Some(unknown) = attributes.keys().find(|k| !self.has_field(k)) {
            return Err(FilterError::FieldNotFound {
                field: unknown.clone(),
                layer: self.name.clone(),
            });
        }
        let geometry = wkt.map(parse_wkt).transpose()?;
        let id = self.features.len() as i64 + 1;
        self.features.push(Feature {
            id,
            attributes,
            geometry,
        });
        Ok(id)
    }
}

impl VectorLayer for MemoryLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        &self.provider
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn crs(&self) -> Crs {
        self.crs
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// The scan ignores the subset string: memory layers cannot evaluate it.
    fn features(&self) -> FilterResult<Box<dyn Iterator<Item = Feature> + '_>> {
        Ok(Box::new(self.features.iter().cloned()))
    }

    fn subset_string(&self) -> &str {
        &self.subset
    }

    fn set_subset_string(&mut self, subset: &str) -> bool {
        self.subset = subset.to_string();
        true
    }
}

/// Request-scoped subset filter on a shared layer.
///
/// The prior subset string is restored when the guard is dropped, whichever
/// way the request ends.
pub struct SubsetGuard<'a, L: VectorLayer + ?Sized> {
    layer: &'a mut L,
    previous: String,
    applied: bool,
}

impl<'a, L: VectorLayer + ?Sized> SubsetGuard<'a, L> {
    /// AND the filter onto the layer's current subset string.
    pub fn apply(layer: &'a mut L, filter: &str) -> FilterResult<Self> {
        let previous = layer.subset_string().to_string();
        if filter == ALL_FEATURES {
            return Ok(Self {
                layer,
                previous,
                applied: false,
            });
        }

        let combined = if previous.is_empty() {
            filter.to_string()
        } else {
            format!("({previous}) AND ({filter})")
        };

        if !layer.set_subset_string(&combined) {
            if !layer.set_subset_string(&previous) {
                error!(
                    "Layer {} rejected both the filter and its previous subset string",
                    layer.name()
                );
            }
            return Err(FilterError::SubsetRejected {
                layer: layer.name().to_string(),
                subset: combined,
            });
        }

        debug!("Layer {} filtered with {combined}", layer.name());
        Ok(Self {
            layer,
            previous,
            applied: true,
        })
    }

    /// Whether the guard changed the layer at all.
    pub fn is_applied(&self) -> bool {
        self.applied
    }
}

impl<L: VectorLayer + ?Sized> Deref for SubsetGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        &*self.layer
    }
}

impl<L: VectorLayer + ?Sized> Drop for SubsetGuard<'_, L> {
    fn drop(&mut self) {
        if !self.applied {
            return;
        }
        if self.layer.set_subset_string(&self.previous) {
            debug!("Layer {} subset string restored", self.layer.name());
        } else {
            error!(
                "Layer {} refused to restore its subset string {:?}",
                self.layer.name(),
                self.previous
            );
        }
    }
}

/// A layer shared between request workers.
///
/// Acquisition never waits: a layer held by another request is reported as
/// [`FilterError::LayerBusy`] so that one caller's filter cannot leak into
/// another caller's response.
pub struct SharedLayer<L> {
    id: String,
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedLayer<L> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: VectorLayer> SharedLayer<L> {
    pub fn new(layer: L) -> Self {
        Self {
            id: layer.id().to_string(),
            inner: Arc::new(Mutex::new(layer)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take exclusive use of the layer for one request.
    pub fn try_acquire(&self) -> FilterResult<MutexGuard<'_, L>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            // A panicking holder already ran its SubsetGuard drop.
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("[SharedLayer] recovering {} from poisoned mutex", self.id);
                Ok(poisoned.into_inner())
            }
            Err(TryLockError::WouldBlock) => Err(FilterError::LayerBusy(self.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn points() -> MemoryLayer {
        let mut layer = MemoryLayer::new("points_id", "points", Crs::WGS84, &["id"]);
        layer.add_feature(Some("POINT(1 1)"), json!({"id": 1})).unwrap();
        layer
    }

    #[test]
    fn parses_postgres_source() {
        let uri = DataSourceUri::parse(
            r#"dbname='gis' host=localhost port=5432 user='john' key='id' srid=2154 type=Point table="public"."roads" (the_geom) sql=cityid = 2643"#,
        )
        .unwrap();
        assert_eq!(uri.schema, "public");
        assert_eq!(uri.table, "roads");
        assert_eq!(uri.geometry_column, "the_geom");
        assert_eq!(uri.key_column, "id");
        assert_eq!(uri.table_reference(), r#""public"."roads""#);
    }

    #[test]
    fn parses_source_without_schema() {
        let uri = DataSourceUri::parse(r#"dbname='gis' table="roads" (geom)"#).unwrap();
        assert_eq!(uri.schema, "");
        assert_eq!(uri.table_reference(), r#""roads""#);
        assert!(DataSourceUri::parse("/data/bakeries.shp").is_err());
    }

    #[test]
    fn sql_tail_does_not_leak_into_the_source() {
        let uri = DataSourceUri::parse(
            r#"dbname='gis' table="public"."roads" (geom) sql="kind" = 'x' key='other'"#,
        )
        .unwrap();
        assert_eq!(uri.geometry_column, "geom");
        assert_eq!(uri.key_column, "");
        // the patterns are compiled once and reused
        assert!(std::ptr::eq(table_pattern().unwrap(), table_pattern().unwrap()));
    }

    #[test]
    fn unknown_attribute_is_refused() {
        let mut layer = points();
        assert!(matches!(
            layer.add_feature(None, json!({"name": "x"})),
            Err(FilterError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn guard_restores_previous_subset() {
        let mut layer = points();
        layer.set_subset_string("\"kind\" = 'shop'");
        {
            let guard = SubsetGuard::apply(&mut layer, "\"id\" IN ( 1 )").unwrap();
            assert!(guard.is_applied());
            assert_eq!(
                guard.subset_string(),
                "(\"kind\" = 'shop') AND (\"id\" IN ( 1 ))"
            );
        }
        assert_eq!(layer.subset_string(), "\"kind\" = 'shop'");
    }

    #[test]
    fn unrestricted_filter_leaves_layer_alone() {
        let mut layer = points();
        let guard = SubsetGuard::apply(&mut layer, ALL_FEATURES).unwrap();
        assert!(!guard.is_applied());
        assert_eq!(guard.subset_string(), "");
    }

    #[test]
    fn shared_layer_fails_loudly_when_busy() {
        let shared = SharedLayer::new(points());
        let held = shared.try_acquire().unwrap();
        assert!(matches!(shared.try_acquire(), Err(FilterError::LayerBusy(id)) if id == "points_id"));
        drop(held);
        assert!(shared.try_acquire().is_ok());
    }
}
