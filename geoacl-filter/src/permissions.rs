//! Edition rights from the `editionLayers` section.

use crate::identity::CallerIdentity;
use crate::types::LayerPermissions;
use geoacl_config::ProjectConfig;
use tracing::debug;

/// Grant or revoke insert, update and delete on a layer.
///
/// Without an `editionLayers` entry for the layer the caller cannot edit it.
/// A non-empty ACL restricts edition to the listed groups. Rights follow the
/// entry's capabilities; an entry without capabilities grants nothing. Read
/// access is never touched here.
pub fn apply_edition_rights(
    config: &ProjectConfig,
    layer_id: &str,
    identity: &CallerIdentity,
    rights: &mut LayerPermissions,
) {
    let Some(edition) = config.edition_layer(layer_id) else {
        debug!("Layer {layer_id} is not editable");
        rights.revoke_edition();
        return;
    };

    let authorized = match edition.acl_groups() {
        Some(acl) => identity.in_any_group(&acl),
        None => true,
    };

    match (authorized, edition.capabilities) {
        (true, Some(capabilities)) => {
            rights.can_insert = capabilities.create_feature;
            rights.can_delete = capabilities.delete_feature;
            rights.can_update = capabilities.modify_attribute || capabilities.modify_geometry;
        }
        (authorized, _) => {
            debug!("Layer {layer_id}: edition revoked, caller authorized {authorized}");
            rights.revoke_edition();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn project() -> ProjectConfig {
        ProjectConfig::from_value(json!({
            "layers": {"roads": {}},
            "editionLayers": {
                "roads_id": {
                    "acl": "editors, admins",
                    "capabilities": {
                        "createFeature": "True",
                        "deleteFeature": "False",
                        "modifyAttribute": "False",
                        "modifyGeometry": "True"
                    }
                },
                "open_id": {
                    "acl": "",
                    "capabilities": {"createFeature": "True"}
                },
                "bare_id": {"acl": ""}
            }
        }))
        .unwrap()
    }

    fn rights_for(layer_id: &str, groups: &[&str]) -> LayerPermissions {
        let mut rights = LayerPermissions::allow_all();
        apply_edition_rights(&project(), layer_id, &CallerIdentity::new(groups, ""), &mut rights);
        rights
    }

    #[test]
    fn capabilities_map_to_rights() {
        assert_eq!(
            rights_for("roads_id", &["admins"]),
            LayerPermissions {
                can_read: true,
                can_insert: true,
                can_update: true,
                can_delete: false,
            }
        );
    }

    #[test]
    fn acl_excludes_other_groups() {
        let rights = rights_for("roads_id", &["visitors"]);
        assert!(rights.can_read);
        assert!(!rights.can_insert && !rights.can_update && !rights.can_delete);
    }

    #[test]
    fn empty_acl_means_everyone() {
        let rights = rights_for("open_id", &["visitors"]);
        assert!(rights.can_insert);
        assert!(!rights.can_update);
        assert!(!rights.can_delete);
    }

    #[test]
    fn no_capabilities_no_rights() {
        let rights = rights_for("bare_id", &["visitors"]);
        assert_eq!(rights, {
            let mut expected = LayerPermissions::allow_all();
            expected.revoke_edition();
            expected
        });
    }

    #[test]
    fn unknown_layer_is_read_only() {
        let rights = rights_for("lakes_id", &["admins"]);
        assert!(rights.can_read);
        assert!(!rights.can_insert);
    }
}
