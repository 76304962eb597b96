//! Access-control decisions for one request.
//!
//! [`AccessControl`] answers the host's three questions about a layer: which
//! rows the caller may see, what the caller may do with it, and under which
//! key responses may be cached. Every answer fails closed: a resolution error
//! hides rows or revokes rights, it is never sent back to the caller.

use crate::error::FilterResult;
use crate::geometry::{NoReprojection, Reprojector};
use crate::identity::CallerIdentity;
use crate::layer::{LayerRegistry, SubsetGuard, VectorLayer};
use crate::login::{anonymous_login_filter, build_login_filter};
use crate::permissions::apply_edition_rights;
use crate::spatial::PolygonFilter;
use crate::types::{ALL_FEATURES, FilterTarget, LayerPermissions, NO_FEATURES};
use geoacl_config::{LicensedSource, ProjectConfig, TosPolicy};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Separator of the groups in a cache key.
pub const CACHE_KEY_SEPARATOR: &str = "@@";

/// Everything known about the request being served.
#[derive(Clone, Copy)]
pub struct RequestScope<'a> {
    pub identity: &'a CallerIdentity,
    /// Project configuration, `None` when the project has none or it could
    /// not be read.
    pub config: Option<&'a ProjectConfig>,
    /// Layers of the project, used to resolve the polygon source.
    pub registry: &'a dyn LayerRegistry,
    /// OGC service of the request (`WMS`, `WFS`...).
    pub service: &'a str,
}

impl<'a> RequestScope<'a> {
    pub fn new(
        identity: &'a CallerIdentity,
        config: Option<&'a ProjectConfig>,
        registry: &'a dyn LayerRegistry,
    ) -> Self {
        Self {
            identity,
            config,
            registry,
            service: "",
        }
    }

    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = service;
        self
    }
}

/// Access-control entry point shared by every request of a server.
#[derive(Clone)]
pub struct AccessControl {
    tos: TosPolicy,
    reprojector: Arc<dyn Reprojector>,
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::new(TosPolicy::default(), Arc::new(NoReprojection))
    }
}

impl AccessControl {
    pub fn new(tos: TosPolicy, reprojector: Arc<dyn Reprojector>) -> Self {
        Self { tos, reprojector }
    }

    /// ToS policy read from the `STRICT_*_TOS_CHECK` environment variables.
    pub fn from_env(reprojector: Arc<dyn Reprojector>) -> Self {
        let tos = TosPolicy::from_env();
        info!(
            "Strict ToS check: Google {}, Bing {}",
            tos.strict_google, tos.strict_bing
        );
        Self::new(tos, reprojector)
    }

    /// Row filter as a provider subset string.
    pub fn layer_filter_subset_string(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
    ) -> String {
        self.layer_filter(scope, layer, FilterTarget::SubsetString)
    }

    /// Row filter as a host expression.
    pub fn layer_filter_expression(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
    ) -> String {
        self.layer_filter(scope, layer, FilterTarget::Expression)
    }

    /// Row filter of a layer for the caller: [`ALL_FEATURES`],
    /// [`NO_FEATURES`] or a predicate.
    pub fn layer_filter(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
        target: FilterTarget,
    ) -> String {
        let start = Instant::now();
        let filter = self.resolve_layer_filter(scope, layer, target);
        debug!(
            "Filter of layer {} computed in {:?}",
            layer.name(),
            start.elapsed()
        );
        filter
    }

    fn resolve_layer_filter(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
        target: FilterTarget,
    ) -> String {
        let identity = scope.identity;
        if identity.override_filter {
            debug!("Filter override for layer {}", layer.name());
            return ALL_FEATURES.to_string();
        }

        if !identity.has_identity() {
            return ALL_FEATURES.to_string();
        }

        let Some(config) = scope.config else {
            return ALL_FEATURES.to_string();
        };
        if config.layer(layer.name()).is_none() {
            return ALL_FEATURES.to_string();
        }

        let resolved = panic::catch_unwind(AssertUnwindSafe(|| {
            self.polygon_filter(scope, config, layer, target)
        }));
        let polygon = match resolved {
            Ok(Ok(polygon)) => polygon,
            Ok(Err(e)) => {
                error!(
                    "Filter by polygon failed for layer {}, hiding every feature: {e}",
                    layer.name()
                );
                return NO_FEATURES.to_string();
            }
            Err(_) => {
                error!(
                    "Filter by polygon panicked for layer {}, hiding every feature",
                    layer.name()
                );
                return NO_FEATURES.to_string();
            }
        };
        if polygon != ALL_FEATURES {
            info!("Polygon filter of layer {}: {polygon}", layer.name());
        }

        let login_config = match config.login_filter(layer.name()) {
            Some(login_config) if !login_config.edition_only => login_config,
            _ => return polygon,
        };

        let login = if identity.is_anonymous() {
            anonymous_login_filter(&login_config.filter_attribute)
        } else {
            build_login_filter(&login_config, identity, layer.provider_type())
        };

        combine_filters(&polygon, &login)
    }

    fn polygon_filter(
        &self,
        scope: &RequestScope<'_>,
        config: &ProjectConfig,
        layer: &dyn VectorLayer,
        target: FilterTarget,
    ) -> FilterResult<String> {
        let identity = scope.identity;
        let filter = PolygonFilter::new(
            config.filter_by_polygon(),
            layer,
            scope.registry,
            identity.is_editing_context,
            target,
            self.reprojector.as_ref(),
        );
        if !filter.is_filtered() {
            return Ok(ALL_FEATURES.to_string());
        }
        if !filter.is_valid() {
            error!(
                "The filter by polygon configuration of layer {} is not valid, hiding every feature",
                layer.name()
            );
            return Ok(NO_FEATURES.to_string());
        }

        let keys = if filter.is_filtered_by_user() {
            vec![identity.login.clone()]
        } else {
            identity.groups.clone()
        };
        Ok(filter.subset_filter(&keys)?.predicate)
    }

    /// Apply the caller's subset filter to a layer for the duration of the
    /// returned guard.
    pub fn apply_layer_filter<'l, L: VectorLayer>(
        &self,
        scope: &RequestScope<'_>,
        layer: &'l mut L,
    ) -> FilterResult<SubsetGuard<'l, L>> {
        let filter = self.layer_filter(scope, &*layer, FilterTarget::SubsetString);
        SubsetGuard::apply(layer, &filter)
    }

    /// Rights of the caller on a layer, starting from the host defaults.
    pub fn layer_permissions(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
        defaults: LayerPermissions,
    ) -> LayerPermissions {
        let resolved = panic::catch_unwind(AssertUnwindSafe(|| {
            self.resolve_permissions(scope, layer, defaults)
        }));
        resolved.unwrap_or_else(|_| {
            error!(
                "Permissions of layer {} panicked, denying everything",
                layer.name()
            );
            LayerPermissions::deny_all()
        })
    }

    fn resolve_permissions(
        &self,
        scope: &RequestScope<'_>,
        layer: &dyn VectorLayer,
        mut rights: LayerPermissions,
    ) -> LayerPermissions {
        let name = layer.name();
        if !layer.is_valid() && !scope.service.eq_ignore_ascii_case("WMS") {
            info!("Layer {name} is invalid, denying access");
            return LayerPermissions::deny_all();
        }

        let licensed = LicensedSource::detect(layer.source());
        if let Some(source) = licensed {
            info!("Layer {name} is a {source} layer which might need an API key");
        }

        let Some(config) = scope.config else {
            if let Some(source) = licensed {
                rights.set_all(!self.tos.is_strict(source));
            }
            return rights;
        };

        let groups = &scope.identity.groups;
        if groups.is_empty() && licensed.is_none() {
            return rights;
        }

        if let Some(source) = licensed {
            if source.api_key(config.options()).is_empty() && self.tos.is_strict(source) {
                warn!(
                    "Layer {name} is protected by the {source} licence but no API key is configured, discarding it"
                );
                return LayerPermissions::deny_all();
            }
        }

        if config.layers().is_none() {
            return rights;
        }

        apply_edition_rights(config, layer.id(), scope.identity, &mut rights);

        let visibility = match config.layer(name) {
            Some(layer_config) if !layer_config.group_visibility.is_empty() => {
                layer_config.visibility_groups()
            }
            _ => {
                debug!("No group visibility for layer {name}");
                return rights;
            }
        };

        if let Some(group) = groups.iter().find(|g| visibility.contains(g)) {
            debug!("Group {group} may see layer {name}");
            return rights;
        }

        info!("Groups [{}] may not see layer {name}", groups.join(", "));
        LayerPermissions::deny_all()
    }

    /// Cache key of the responses for the caller.
    ///
    /// Callers sharing the same groups share the key as soon as one layer
    /// restricts its visibility by group.
    pub fn cache_key(&self, scope: &RequestScope<'_>, default_key: &str) -> String {
        let identity = scope.identity;
        if identity.groups.is_empty() {
            return default_key.to_string();
        }
        let Some(layers) = scope.config.and_then(ProjectConfig::layers) else {
            return default_key.to_string();
        };

        let has_group_visibility = layers.values().any(|layer| {
            let visibility = layer.visibility_groups();
            !visibility.is_empty() && visibility != [""]
        });
        if !has_group_visibility {
            return default_key.to_string();
        }

        if identity.has_anonymous_groups() {
            return CACHE_KEY_SEPARATOR.to_string();
        }
        let mut groups: Vec<&str> = identity.groups.iter().map(String::as_str).collect();
        groups.sort_unstable();
        groups.dedup();
        groups.join(CACHE_KEY_SEPARATOR)
    }
}

/// AND two filters. [`NO_FEATURES`] wins, [`ALL_FEATURES`] is neutral.
pub fn combine_filters(polygon: &str, login: &str) -> String {
    if polygon == NO_FEATURES || login == NO_FEATURES {
        return NO_FEATURES.to_string();
    }
    match (polygon == ALL_FEATURES, login == ALL_FEATURES) {
        (true, _) => login.to_string(),
        (false, true) => polygon.to_string(),
        (false, false) => format!("({polygon}) AND ({login})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn combination_rules() {
        assert_eq!(combine_filters("", ""), "");
        assert_eq!(combine_filters("1 = 0", "\"a\" = 'all'"), "1 = 0");
        assert_eq!(combine_filters("\"id\" IN ( 1 )", "1 = 0"), "1 = 0");
        assert_eq!(combine_filters("", "\"a\" = 'all'"), "\"a\" = 'all'");
        assert_eq!(combine_filters("\"id\" IN ( 1 )", ""), "\"id\" IN ( 1 )");
        assert_eq!(
            combine_filters("\"id\" IN ( 1 )", "\"a\" = 'x' OR \"a\" = 'all'"),
            "(\"id\" IN ( 1 )) AND (\"a\" = 'x' OR \"a\" = 'all')"
        );
    }
}
