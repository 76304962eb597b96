//! Shared fixtures: a polygon source split between two groups and a point
//! layer with one feature per side plus one outside.

#![allow(dead_code)]

use geoacl_config::ProjectConfig;
use geoacl_filter::{CallerIdentity, Crs, MemoryLayer};
use serde_json::{Value, json};

pub const POLYGON_ID: &str = "polygon_id";
pub const POINTS_ID: &str = "points_id";

/// Route `tracing` output to the test harness, once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// `east,admins` owns (0,0)-(5,5), `west,admins` owns (0,0)-(-5,-5).
pub fn polygon_layer() -> MemoryLayer {
    let mut layer = MemoryLayer::new(POLYGON_ID, "polygon", Crs::WGS84, &["id", "groups"]);
    layer
        .add_feature(
            Some("POLYGON((0 0,0 5,5 5,5 0,0 0))"),
            json!({"id": 1, "groups": "east,admins"}),
        )
        .unwrap();
    layer
        .add_feature(
            Some("POLYGON((0 0,0 -5,-5 -5,-5 0,0 0))"),
            json!({"id": 1, "groups": "west,admins"}),
        )
        .unwrap();
    layer
}

/// Points at (1 1) id 1, (10 10) id 2, (-1 -1) id 3.
pub fn points_layer() -> MemoryLayer {
    let mut layer = MemoryLayer::new(POINTS_ID, "points", Crs::WGS84, &["id", "attr"]);
    layer
        .add_feature(Some("POINT(1 1)"), json!({"id": 1, "attr": "east"}))
        .unwrap();
    layer
        .add_feature(Some("POINT(10 10)"), json!({"id": 2, "attr": "all"}))
        .unwrap();
    layer
        .add_feature(Some("POINT(-1 -1)"), json!({"id": 3, "attr": "west"}))
        .unwrap();
    layer
}

pub fn polygon_section(mode: &str) -> Value {
    json!({
        "config": {"polygon_layer_id": POLYGON_ID, "group_field": "groups"},
        "layers": [{
            "layer": POINTS_ID,
            "primary_key": "id",
            "spatial_relationship": "intersects",
            "filter_mode": mode
        }]
    })
}

/// Project with the point layer filtered by polygon only.
pub fn spatial_project(mode: &str) -> ProjectConfig {
    ProjectConfig::from_value(json!({
        "layers": {"points": {}, "polygon": {}},
        "filter_by_polygon": polygon_section(mode)
    }))
    .unwrap()
}

/// Project with the point layer filtered by login attribute only.
pub fn login_project(private: bool) -> ProjectConfig {
    ProjectConfig::from_value(json!({
        "layers": {"points": {}},
        "loginFilteredLayers": {
            "points": {
                "layerId": POINTS_ID,
                "filterAttribute": "attr",
                "filterPrivate": if private { "True" } else { "False" }
            }
        }
    }))
    .unwrap()
}

/// Both filters on the point layer.
pub fn combined_project() -> ProjectConfig {
    ProjectConfig::from_value(json!({
        "layers": {"points": {}},
        "filter_by_polygon": polygon_section("display_and_editing"),
        "loginFilteredLayers": {
            "points": {
                "layerId": POINTS_ID,
                "filterAttribute": "attr",
                "filterPrivate": "False"
            }
        }
    }))
    .unwrap()
}

pub fn caller(groups: &[&str], login: &str) -> CallerIdentity {
    CallerIdentity::new(groups, login)
}
