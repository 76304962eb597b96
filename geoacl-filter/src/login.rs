//! Attribute filter on the caller login or groups.
//!
//! Rows tagged `all` are visible to everyone. With multi-value ACLs enabled
//! on a PostgreSQL layer the attribute may hold several comma separated
//! values (`group_a,group_b`), matched with plain `LIKE` clauses so the
//! result stays within the SQL subset the host accepts. `%` and `_` inside a
//! value are not escaped.

use crate::identity::CallerIdentity;
use crate::layer::POSTGRES_PROVIDER;
use crate::quoting::{field_equality, quote_identifier, quote_string};
use crate::types::ALL_FEATURES;
use geoacl_config::LoginFilterConfig;

/// Value every caller matches.
pub const ALL_VALUE: &str = "all";

/// Build the login/group filter of a layer.
pub fn build_login_filter(
    config: &LoginFilterConfig,
    identity: &CallerIdentity,
    provider: &str,
) -> String {
    if config.edition_only {
        return ALL_FEATURES.to_string();
    }

    let mut values: Vec<&str> = if config.filter_private {
        vec![identity.login.as_str()]
    } else {
        identity.groups.iter().map(String::as_str).collect()
    };
    values.push(ALL_VALUE);

    let field = quote_identifier(&config.filter_attribute);
    let multi_value = provider == POSTGRES_PROVIDER && config.allow_multiple_acl_values;

    values
        .iter()
        .map(|value| {
            let mut clauses = vec![format!("{field} = {}", quote_string(value))];
            if multi_value {
                // begins with, ends with, in between
                let patterns = [
                    format!("{value},%"),
                    format!("%,{value}"),
                    format!("%,{value},%"),
                ];
                for pattern in patterns {
                    clauses.push(format!("{field} LIKE {}", quote_string(&pattern)));
                }
            }
            clauses.join(" OR ")
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Filter for a caller with no identity at all: only rows tagged `all`.
pub fn anonymous_login_filter(attribute: &str) -> String {
    field_equality(attribute, ALL_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(private: bool, multiple: bool) -> LoginFilterConfig {
        LoginFilterConfig {
            layer_id: "layer_id".into(),
            filter_attribute: "attr".into(),
            filter_private: private,
            edition_only: false,
            allow_multiple_acl_values: multiple,
        }
    }

    #[test]
    fn private_filter_uses_login() {
        let identity = CallerIdentity::new(&["staff"], "alice");
        assert_eq!(
            build_login_filter(&config(true, false), &identity, "postgres"),
            r#""attr" = 'alice' OR "attr" = 'all'"#
        );
    }

    #[test]
    fn group_filter_keeps_group_order() {
        let identity = CallerIdentity::new(&["west", "admins"], "alice");
        assert_eq!(
            build_login_filter(&config(false, false), &identity, "ogr"),
            r#""attr" = 'west' OR "attr" = 'admins' OR "attr" = 'all'"#
        );
    }

    #[test]
    fn multiple_values_on_postgres() {
        let identity = CallerIdentity::new(&["east"], "");
        assert_eq!(
            build_login_filter(&config(false, true), &identity, "postgres"),
            concat!(
                r#""attr" = 'east' OR "attr" LIKE 'east,%' OR "attr" LIKE '%,east' OR "attr" LIKE '%,east,%'"#,
                r#" OR "attr" = 'all' OR "attr" LIKE 'all,%' OR "attr" LIKE '%,all' OR "attr" LIKE '%,all,%'"#
            )
        );
    }

    #[test]
    fn multiple_values_ignored_elsewhere() {
        let identity = CallerIdentity::new(&["east"], "");
        assert_eq!(
            build_login_filter(&config(false, true), &identity, "ogr"),
            r#""attr" = 'east' OR "attr" = 'all'"#
        );
    }

    #[test]
    fn wildcards_are_not_escaped() {
        let identity = CallerIdentity::new(&["a_b"], "");
        let filter = build_login_filter(&config(false, true), &identity, "postgres");
        assert!(filter.contains(r#""attr" LIKE 'a_b,%'"#));
    }

    #[test]
    fn edition_only_never_filters() {
        let mut cfg = config(true, false);
        cfg.edition_only = true;
        let identity = CallerIdentity::new(&["east"], "alice");
        assert_eq!(build_login_filter(&cfg, &identity, "postgres"), ALL_FEATURES);
    }

    #[test]
    fn quotes_in_login_are_escaped() {
        let identity = CallerIdentity::new(&[], "o'hara");
        assert_eq!(
            build_login_filter(&config(true, false), &identity, "postgres"),
            r#""attr" = 'o''hara' OR "attr" = 'all'"#
        );
    }

    #[test]
    fn anonymous_filter() {
        assert_eq!(anonymous_login_filter("attr"), r#""attr" = 'all'"#);
    }
}
