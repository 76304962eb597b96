//! Filter by polygon.
//!
//! Features of a layer are visible when they relate (intersect or are
//! contained) to the union of the polygons tagged with the caller's groups,
//! or with the caller's login. The polygons live in one source layer shared
//! by every filtered layer; the group field holds comma separated names.

use crate::error::{FilterError, FilterResult};
use crate::geometry::{Crs, PolygonUnion, Reprojector, relationship_holds, to_ewkt, to_wkt};
use crate::layer::{LayerRegistry, POSTGRES_PROVIDER, VectorLayer};
use crate::quoting::{SqlValue, format_in_list, quote_identifier, quote_string};
use crate::types::{CompiledFilter, FilterTarget, NO_FEATURES, SpatialBackend};
use geo_types::{Geometry, MultiPolygon};
use geoacl_config::{FilterMode, PolygonFilterConfig, PolygonLayerEntry, SpatialRelationship};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Everything a backend needs to turn a group area into a predicate.
pub struct PredicateRequest<'a> {
    pub layer: &'a dyn VectorLayer,
    /// Group area, in `area_crs`.
    pub area: &'a Geometry<f64>,
    pub area_crs: Crs,
    pub relationship: SpatialRelationship,
    pub use_centroid: bool,
    pub primary_key: &'a str,
    pub reprojector: &'a dyn Reprojector,
}

impl SpatialBackend {
    /// Pick the backend for a layer.
    ///
    /// PostgreSQL layers get the predicate pushed down. Other providers get a
    /// host expression when the host asked for one, a primary key list
    /// otherwise.
    pub fn select(layer: &dyn VectorLayer, target: FilterTarget) -> Self {
        if layer.provider_type() == POSTGRES_PROVIDER {
            match layer.data_source() {
                Some(uri) if !uri.geometry_column.is_empty() => {
                    return Self::PushDownSql {
                        geometry_column: uri.geometry_column,
                    };
                }
                _ => warn!(
                    "Layer {} has no geometry column in its data source, evaluating in-process",
                    layer.name()
                ),
            }
        }
        match target {
            FilterTarget::Expression => Self::Expression,
            FilterTarget::SubsetString => Self::KeyList,
        }
    }

    /// Predicate restricting the layer to features related to the area.
    ///
    /// The key list backend returns [`NO_FEATURES`] when no feature matches.
    pub fn compile_spatial_predicate(
        &self,
        request: &PredicateRequest<'_>,
    ) -> FilterResult<String> {
        match self {
            Self::PushDownSql { geometry_column } => format_sql_relationship(
                request.layer.crs(),
                request.area_crs,
                geometry_column,
                request.area,
                request.relationship,
                request.use_centroid,
            ),
            Self::Expression => format_expression_relationship(
                request.layer.crs(),
                request.area_crs,
                request.area,
                request.relationship,
                request.use_centroid,
            ),
            Self::KeyList => key_list_predicate(request),
        }
    }
}

fn sql_function(relationship: SpatialRelationship) -> FilterResult<&'static str> {
    match relationship {
        SpatialRelationship::Intersects => Ok("ST_Intersects"),
        SpatialRelationship::Contains => Ok("ST_Contains"),
        SpatialRelationship::Unknown => Err(FilterError::Geometry(
            "unknown spatial relationship".to_string(),
        )),
    }
}

fn expression_function(relationship: SpatialRelationship) -> FilterResult<&'static str> {
    match relationship {
        SpatialRelationship::Intersects => Ok("intersects"),
        SpatialRelationship::Contains => Ok("contains"),
        SpatialRelationship::Unknown => Err(FilterError::Geometry(
            "unknown spatial relationship".to_string(),
        )),
    }
}

/// PostGIS predicate. The area is only transformed when the CRSs differ.
pub fn format_sql_relationship(
    layer_crs: Crs,
    area_crs: Crs,
    geometry_column: &str,
    area: &Geometry<f64>,
    relationship: SpatialRelationship,
    use_centroid: bool,
) -> FilterResult<String> {
    let function = sql_function(relationship)?;

    let mut polygon = format!(
        "ST_SetSRID(ST_GeomFromText({}), {})",
        quote_string(&to_wkt(area)),
        area_crs.srid
    );
    if layer_crs != area_crs {
        polygon = format!("ST_Transform({polygon}, {})", layer_crs.srid);
    }

    let column = quote_identifier(geometry_column);
    let geometry = if use_centroid {
        format!("ST_Centroid({column})")
    } else {
        column
    };

    Ok(format!("\n{function}(\n    {polygon},\n    {geometry}\n)"))
}

/// Host expression predicate. The area is only transformed when the CRSs
/// differ.
pub fn format_expression_relationship(
    layer_crs: Crs,
    area_crs: Crs,
    area: &Geometry<f64>,
    relationship: SpatialRelationship,
    use_centroid: bool,
) -> FilterResult<String> {
    let function = expression_function(relationship)?;

    let mut polygon = format!("geom_from_wkt({})", quote_string(&to_wkt(area)));
    if layer_crs != area_crs {
        polygon = format!(
            "transform({polygon}, {}, {})",
            quote_string(&area_crs.auth_id()),
            quote_string(&layer_crs.auth_id())
        );
    }

    let geometry = if use_centroid {
        "centroid($geometry)"
    } else {
        "$geometry"
    };

    Ok(format!("\n{function}(\n    {polygon},\n    {geometry}\n)"))
}

fn key_list_predicate(request: &PredicateRequest<'_>) -> FilterResult<String> {
    let layer = request.layer;
    if !layer.has_field(request.primary_key) {
        return Err(FilterError::FieldNotFound {
            field: request.primary_key.to_string(),
            layer: layer.name().to_string(),
        });
    }

    let area = if layer.crs() == request.area_crs {
        request.area.clone()
    } else {
        request
            .reprojector
            .reproject(request.area.clone(), request.area_crs, layer.crs())?
    };

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for feature in layer.features()? {
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        if !relationship_holds(request.relationship, &area, geometry, request.use_centroid)? {
            continue;
        }
        let Some(key) = feature.attribute(request.primary_key).and_then(SqlValue::from_json) else {
            warn!(
                "Feature {} of layer {} has no value for {}, skipped",
                feature.id,
                layer.name(),
                request.primary_key
            );
            continue;
        };
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }

    debug!("{} features of layer {} match the area", keys.len(), layer.name());
    if keys.is_empty() {
        return Ok(NO_FEATURES.to_string());
    }
    Ok(format_in_list(request.primary_key, &keys))
}

fn group_field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Polygon filter of one layer for one request.
pub struct PolygonFilter<'a> {
    config: Option<&'a PolygonFilterConfig>,
    entry: Option<&'a PolygonLayerEntry>,
    /// The layer's entry, or the whole section, failed to parse.
    rejected: bool,
    layer: &'a dyn VectorLayer,
    source: Option<&'a dyn VectorLayer>,
    editing: bool,
    target: FilterTarget,
    reprojector: &'a dyn Reprojector,
}

impl<'a> PolygonFilter<'a> {
    pub fn new(
        config: Option<&'a PolygonFilterConfig>,
        layer: &'a dyn VectorLayer,
        registry: &'a dyn LayerRegistry,
        editing: bool,
        target: FilterTarget,
        reprojector: &'a dyn Reprojector,
    ) -> Self {
        let entry = config.and_then(|c| c.entry(layer.id()));
        let rejected = config.is_some_and(|c| c.is_rejected(layer.id()));
        let source = config
            .filter(|_| entry.is_some())
            .and_then(|c| registry.layer(&c.config.polygon_layer_id));
        Self {
            config,
            entry,
            rejected,
            layer,
            source,
            editing,
            target,
            reprojector,
        }
    }

    /// The layer has an entry and the polygon source is configured, or its
    /// entry could not be parsed.
    pub fn is_filtered(&self) -> bool {
        self.rejected
            || (self.entry.is_some() && self.config.is_some_and(PolygonFilterConfig::has_source))
    }

    /// The configuration can be evaluated: the polygon source exists and
    /// carries the group field, the relationship and mode are known.
    pub fn is_valid(&self) -> bool {
        if !self.is_filtered() {
            return false;
        }
        if self.rejected {
            warn!(
                "Filter by polygon entry of layer {} is not well formed",
                self.layer.name()
            );
            return false;
        }
        let (Some(config), Some(entry)) = (self.config, self.entry) else {
            return false;
        };
        let Some(source) = self.source else {
            warn!(
                "Polygon layer {} not found in the project",
                config.config.polygon_layer_id
            );
            return false;
        };
        if !source.has_field(&config.config.group_field) {
            warn!(
                "Field {} not found on polygon layer {}",
                config.config.group_field,
                source.name()
            );
            return false;
        }
        if entry.spatial_relationship == SpatialRelationship::Unknown {
            warn!("Unknown spatial relationship for layer {}", self.layer.name());
            return false;
        }
        if entry.filter_mode == FilterMode::Unknown {
            warn!("Unknown filter mode for layer {}", self.layer.name());
            return false;
        }
        if let Some(uri) = self.layer.data_source() {
            if !uri.key_column.is_empty() && uri.key_column != entry.primary_key {
                warn!(
                    "Primary key {} of layer {} differs from its data source key {}",
                    entry.primary_key,
                    self.layer.name(),
                    uri.key_column
                );
            }
        }
        true
    }

    /// Polygons are looked up by login rather than by groups.
    pub fn is_filtered_by_user(&self) -> bool {
        self.entry.is_some_and(|entry| entry.filter_by_user)
    }

    /// Backend the layer's predicate is compiled with.
    pub fn backend(&self) -> SpatialBackend {
        SpatialBackend::select(self.layer, self.target)
    }

    /// CRS of the polygon source, which the group area is expressed in.
    fn area_crs(&self) -> FilterResult<Crs> {
        let source = self.source.ok_or_else(|| {
            FilterError::PolygonSourceNotFound(
                self.config
                    .map(|c| c.config.polygon_layer_id.clone())
                    .unwrap_or_default(),
            )
        })?;
        let crs = source.crs();
        if !crs.is_valid() {
            return Err(FilterError::Crs(format!(
                "polygon layer {} has no valid CRS",
                source.name()
            )));
        }
        Ok(crs)
    }

    /// Union of the source polygons tagged with any of `keys`, in the source
    /// CRS. Empty when nothing matches.
    pub fn resolve_geometry(&self, keys: &[String]) -> FilterResult<MultiPolygon<f64>> {
        let config = self
            .config
            .ok_or_else(|| FilterError::PolygonSourceNotFound(String::new()))?;
        let source = self.source.ok_or_else(|| {
            FilterError::PolygonSourceNotFound(config.config.polygon_layer_id.clone())
        })?;
        let group_field = &config.config.group_field;
        if !source.has_field(group_field) {
            return Err(FilterError::FieldNotFound {
                field: group_field.clone(),
                layer: source.name().to_string(),
            });
        }

        let mut union = PolygonUnion::new();
        for feature in source.features()? {
            let Some(groups) = feature.attribute(group_field).and_then(group_field_text) else {
                continue;
            };
            if !groups.split(',').any(|group| keys.iter().any(|key| key == group)) {
                continue;
            }
            match feature.geometry.as_ref() {
                Some(geometry) => {
                    if !union.add(geometry) {
                        warn!(
                            "Feature {} of polygon layer {} is not a polygon, skipped",
                            feature.id,
                            source.name()
                        );
                    }
                }
                None => debug!(
                    "Feature {} of polygon layer {} has no geometry",
                    feature.id,
                    source.name()
                ),
            }
        }
        Ok(union.into_multi_polygon())
    }

    /// Filter of the layer for the given groups or login.
    pub fn subset_filter(&self, keys: &[String]) -> FilterResult<CompiledFilter> {
        let backend = self.backend();
        if self.rejected {
            return Ok(CompiledFilter::no_features(backend));
        }
        let Some(entry) = self.entry else {
            return Ok(CompiledFilter::all_features(backend));
        };

        if entry.filter_mode == FilterMode::Editing && !self.editing {
            info!(
                "Layer {} is only filtered when editing, not filtering",
                self.layer.name()
            );
            return Ok(CompiledFilter::all_features(backend));
        }

        if !self.layer.crs().is_valid() {
            return Err(FilterError::Crs(format!(
                "layer {} has no valid CRS",
                self.layer.name()
            )));
        }
        let area_crs = self.area_crs()?;

        let area = self.resolve_geometry(keys)?;
        if area.0.is_empty() {
            info!(
                "No polygon for [{}] on layer {}, hiding every feature",
                keys.join(","),
                self.layer.name()
            );
            return Ok(CompiledFilter::no_features(backend));
        }

        let area = Geometry::MultiPolygon(area);
        let predicate = backend.compile_spatial_predicate(&PredicateRequest {
            layer: self.layer,
            area: &area,
            area_crs,
            relationship: entry.spatial_relationship,
            use_centroid: entry.use_centroid,
            primary_key: &entry.primary_key,
            reprojector: self.reprojector,
        })?;

        if predicate == NO_FEATURES {
            return Ok(CompiledFilter::no_features(backend));
        }
        Ok(CompiledFilter {
            predicate,
            geometry_ewkt: to_ewkt(area_crs, &area),
            backend,
        })
    }
}
