//! Terms-of-service policy for licensed third-party basemap sources.
//!
//! Google and Bing tiles may only be served when the project carries an API
//! key. The check is strict unless `STRICT_<PROVIDER>_TOS_CHECK` says
//! otherwise.

use crate::truthy::to_bool;
use crate::types::ProjectOptions;
use std::fmt;

pub const GOOGLE_DOMAIN: &str = "google.com";
pub const BING_DOMAIN: &str = "virtualearth.net";

/// A licensed third-party source detected from a layer data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicensedSource {
    Google,
    Bing,
}

impl LicensedSource {
    /// Detect a licensed source from a layer data source string.
    pub fn detect(source: &str) -> Option<Self> {
        let source = source.to_lowercase();
        if source.contains(GOOGLE_DOMAIN) {
            Some(Self::Google)
        } else if source.contains(BING_DOMAIN) {
            Some(Self::Bing)
        } else {
            None
        }
    }

    /// Provider token used in the environment variable name.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Bing => "BING",
        }
    }

    /// Environment variable toggling the strict check for this provider.
    pub fn env_var(&self) -> String {
        format!("STRICT_{}_TOS_CHECK", self.key())
    }

    /// API key configured in the project options, if any.
    pub fn api_key<'a>(&self, options: &'a ProjectOptions) -> &'a str {
        match self {
            Self::Google => &options.google_key,
            Self::Bing => &options.bing_key,
        }
    }
}

impl fmt::Display for LicensedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "Google"),
            Self::Bing => write!(f, "Bing"),
        }
    }
}

/// Whether each licensed source must have an API key to be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TosPolicy {
    pub strict_google: bool,
    pub strict_bing: bool,
}

impl Default for TosPolicy {
    fn default() -> Self {
        Self {
            strict_google: true,
            strict_bing: true,
        }
    }
}

impl TosPolicy {
    /// Read the policy from the process environment. Unset means strict.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the policy from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let strict = |source: LicensedSource| {
            lookup(&source.env_var()).map_or(true, |value| to_bool(&value))
        };
        Self {
            strict_google: strict(LicensedSource::Google),
            strict_bing: strict(LicensedSource::Bing),
        }
    }

    pub fn is_strict(&self, source: LicensedSource) -> bool {
        match source {
            LicensedSource::Google => self.strict_google,
            LicensedSource::Bing => self.strict_bing,
        }
    }
}
