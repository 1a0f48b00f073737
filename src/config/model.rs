//! Serde data structures for the Waypoint configuration file.
//!
//! Contains [`Config`] (the root), [`RouteConfig`], [`Defaults`],
//! [`HealthConfig`] and [`RewriteRules`]. All types derive
//! `Deserialize` with `deny_unknown_fields` for strict parsing.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

const fn default_timeout() -> u64 {
    30_000
}

const fn default_connect_timeout() -> u64 {
    5_000
}

const fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    "/healthz".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub health: HealthConfig,

    pub routes: Vec<RouteConfig>,
}

impl Config {
    #[must_use]
    pub fn total_rewrite_rules(&self) -> usize {
        self.routes.iter().map(|r| r.path_rewrite.len()).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Upstream response-header timeout in milliseconds. The clock starts
    /// once the request body has been fully handed to the upstream, so a
    /// slow upload is not cut short.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_true")]
    pub proxy_headers: bool,

    #[serde(default = "default_true")]
    pub strip_hop_by_hop: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            proxy_headers: default_true(),
            strip_hop_by_hop: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub prefix: String,

    pub upstream: String,

    #[serde(default, alias = "pathRewrite")]
    pub path_rewrite: RewriteRules,

    #[serde(default, alias = "changeOrigin")]
    pub change_origin: bool,

    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Ordered `pattern -> replacement` pairs.
///
/// Written as a map in config files. Declaration order is kept, which
/// a `HashMap` would lose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteRules(pub Vec<(String, String)>);

impl RewriteRules {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, r)| (p.as_str(), r.as_str()))
    }
}

impl<P: Into<String>, R: Into<String>> FromIterator<(P, R)> for RewriteRules {
    fn from_iter<I: IntoIterator<Item = (P, R)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(p, r)| (p.into(), r.into())).collect())
    }
}

impl<'de> Deserialize<'de> for RewriteRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = RewriteRules;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of pattern to replacement")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((pattern, replacement)) =
                    access.next_entry::<String, String>()?
                {
                    rules.push((pattern, replacement));
                }
                Ok(RewriteRules(rules))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}
