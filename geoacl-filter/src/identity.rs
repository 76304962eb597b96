//! Caller identity extraction.
//!
//! Request headers take precedence over query parameters. Header names are
//! matched case-insensitively, parameter names too (hosts upper-case them).

use geoacl_config::to_bool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub const GROUPS_HEADER: &str = "X-Lizmap-User-Groups";
pub const LOGIN_HEADER: &str = "X-Lizmap-User";
pub const OVERRIDE_HEADER: &str = "X-Lizmap-Override-Filter";
pub const EDITING_HEADER: &str = "X-Lizmap-Edition-Context";

pub const GROUPS_PARAM: &str = "LIZMAP_USER_GROUPS";
pub const LOGIN_PARAM: &str = "LIZMAP_USER";
pub const OVERRIDE_PARAM: &str = "LIZMAP_OVERRIDE_FILTER";
pub const EDITING_PARAM: &str = "LIZMAP_EDITION_CONTEXT";

/// Headers and query parameters of the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_ascii_uppercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_ascii_uppercase()).map(String::as_str)
    }
}

fn split_groups(value: &str) -> Vec<String> {
    value.split(',').map(|g| g.trim().to_string()).collect()
}

/// Who is calling, derived once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Group memberships. `[""]` is an anonymous caller.
    pub groups: Vec<String>,
    pub login: String,
    /// Bypass every row filter.
    pub override_filter: bool,
    pub is_editing_context: bool,
}

impl CallerIdentity {
    pub fn new(groups: &[&str], login: &str) -> Self {
        Self {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            login: login.to_string(),
            ..Self::default()
        }
    }

    pub fn editing(mut self, editing: bool) -> Self {
        self.is_editing_context = editing;
        self
    }

    pub fn with_override(mut self, override_filter: bool) -> Self {
        self.override_filter = override_filter;
        self
    }

    /// Extract the identity from request headers, falling back to query
    /// parameters.
    pub fn from_request(request: &RequestInfo) -> Self {
        let groups = match request.header(GROUPS_HEADER) {
            Some(value) => split_groups(value),
            None => Vec::new(),
        };
        let groups = if groups.is_empty() {
            request.param(GROUPS_PARAM).map(split_groups).unwrap_or_default()
        } else {
            groups
        };

        let login = match request.header(LOGIN_HEADER) {
            Some(login) if !login.is_empty() => login.to_string(),
            _ => request.param(LOGIN_PARAM).unwrap_or_default().to_string(),
        };

        let flag = |header: &str, param: &str| {
            request
                .header(header)
                .or_else(|| request.param(param))
                .is_some_and(to_bool)
        };

        let identity = Self {
            groups,
            login,
            override_filter: flag(OVERRIDE_HEADER, OVERRIDE_PARAM),
            is_editing_context: flag(EDITING_HEADER, EDITING_PARAM),
        };
        debug!(
            "Caller groups [{}], login {:?}, override {}, editing {}",
            identity.groups.join(","),
            identity.login,
            identity.override_filter,
            identity.is_editing_context
        );
        identity
    }

    /// Groups are exactly `[""]` and there is no login.
    pub fn is_anonymous(&self) -> bool {
        self.has_anonymous_groups() && self.login.is_empty()
    }

    /// Groups are exactly `[""]`.
    pub fn has_anonymous_groups(&self) -> bool {
        self.groups.len() == 1 && self.groups[0].is_empty()
    }

    /// Some group or a login was supplied.
    pub fn has_identity(&self) -> bool {
        !self.groups.is_empty() || !self.login.is_empty()
    }

    pub fn in_any_group(&self, allowed: &[String]) -> bool {
        self.groups.iter().any(|g| allowed.contains(g))
    }
}
