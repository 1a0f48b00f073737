//! Longest-prefix route matching.
//!
//! The [`RouteTable`] is compiled once from the validated config and
//! shared read-only by every connection. [`RouteTable::match_route`]
//! picks the route whose prefix is the longest match for the request
//! path. A prefix matches when the path equals it or continues it at a
//! `/` boundary, so `/api` covers `/api` and `/api/users` but not
//! `/apix`. A prefix that itself ends in `/` matches anything under it.

use std::time::Duration;

use hyper::Uri;
use url::Url;

use super::rewrite::PathRewriter;
use crate::config::model::{Config, Defaults, RouteConfig};
use crate::error::{ValidationError, WaypointError};

#[derive(Debug, Clone)]
pub struct Route {
    prefix: String,
    upstream: Url,
    authority: String,
    rewriter: PathRewriter,
    change_origin: bool,
    timeout: Duration,
}

impl Route {
    pub fn from_config(config: &RouteConfig, defaults: &Defaults) -> Result<Self, WaypointError> {
        let invalid = |field: &str, message: String| WaypointError::ConfigValidation {
            errors: vec![ValidationError {
                route: config.prefix.clone(),
                field: field.into(),
                message,
                suggestion: None,
            }],
        };

        let upstream = Url::parse(&config.upstream)
            .map_err(|e| invalid("upstream", format!("'{}': {e}", config.upstream)))?;
        let host = upstream
            .host_str()
            .ok_or_else(|| invalid("upstream", format!("'{}' has no host", config.upstream)))?;
        let authority = upstream
            .port()
            .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));

        let rewriter = PathRewriter::compile(&config.path_rewrite)
            .map_err(|e| invalid("path_rewrite", e.to_string()))?;

        Ok(Self {
            prefix: config.prefix.clone(),
            authority,
            upstream,
            rewriter,
            change_origin: config.change_origin,
            timeout: Duration::from_millis(config.timeout.unwrap_or(defaults.timeout)),
        })
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub const fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// `host[:port]` of the upstream, the value sent as `Host` when
    /// `change_origin` is set. The port is omitted when it is the
    /// scheme's default.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[must_use]
    pub const fn change_origin(&self) -> bool {
        self.change_origin
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str()).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/')
        })
    }

    /// Apply this route's rewrite rules to a request path.
    #[must_use]
    pub fn rewrite(&self, path: &str) -> String {
        self.rewriter.apply(path)
    }

    /// Absolute URI for the outbound request: the upstream's base path
    /// joined with the rewritten path, plus the untouched query string.
    pub fn upstream_uri(&self, rewritten: &str, query: Option<&str>) -> Result<Uri, hyper::http::Error> {
        let base = self.upstream.path().trim_end_matches('/');
        let mut target = format!(
            "{}://{}{base}{rewritten}",
            self.upstream.scheme(),
            self.authority
        );
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        Ok(target.parse::<Uri>()?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[cfg(test)]
    pub(crate) fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn from_config(config: &Config) -> Result<Self, WaypointError> {
        let routes = config
            .routes
            .iter()
            .map(|r| Route::from_config(r, &config.defaults))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    /// Route with the longest prefix matching `path`, if any.
    #[must_use]
    pub fn match_route(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.prefix.len())
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}
