use geoacl_config::ConfigStore;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn project(dir: &TempDir, name: &str, cfg: Option<&str>) -> PathBuf {
    let project = dir.path().join(name);
    fs::write(&project, "<qgis/>").unwrap();
    if let Some(cfg) = cfg {
        fs::write(ConfigStore::config_path(&project), cfg).unwrap();
    }
    project
}

fn touch(path: &std::path::Path, offset_secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
        .unwrap();
}

#[test]
fn config_path_appends_suffix() {
    assert_eq!(
        ConfigStore::config_path(std::path::Path::new("/srv/maps/france.qgs")),
        PathBuf::from("/srv/maps/france.qgs.cfg")
    );
}

#[test]
fn missing_project_or_config_yields_none() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::default();
    assert!(store.config_for_project(&dir.path().join("nope.qgs")).is_none());

    let bare = project(&dir, "bare.qgs", None);
    assert!(store.config_for_project(&bare).is_none());
}

#[test]
fn invalid_or_empty_config_yields_none() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::default();
    let broken = project(&dir, "broken.qgs", Some("{ nope"));
    assert!(store.config_for_project(&broken).is_none());

    let empty = project(&dir, "empty.qgs", Some("{}"));
    assert!(store.config_for_project(&empty).is_none());
}

#[test]
fn cached_until_modified() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::default();
    let path = project(&dir, "p.qgs", Some(r#"{"options": {"googleKey": "one"}}"#));

    let first = store.config_for_project(&path).unwrap();
    let second = store.config_for_project(&path).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.len(), 1);

    let cfg_path = ConfigStore::config_path(&path);
    fs::write(&cfg_path, r#"{"options": {"googleKey": "two"}}"#).unwrap();
    touch(&cfg_path, 60);

    let third = store.config_for_project(&path).unwrap();
    assert_eq!(third.options().google_key, "two");
    assert_eq!(store.len(), 1);
}

#[test]
fn capacity_evicts_oldest() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(2);
    for name in ["a.qgs", "b.qgs", "c.qgs"] {
        let path = project(&dir, name, Some(r#"{"options": {}}"#));
        assert!(store.config_for_project(&path).is_some());
    }
    assert_eq!(store.len(), 2);

    store.clear();
    assert!(store.is_empty());
}
