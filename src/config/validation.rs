//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors such as empty routes, malformed prefixes, duplicate prefixes,
//! bad upstream URLs and rewrite patterns that do not compile. Returns
//! every problem at once as a list of [`ValidationError`] values with
//! per-field suggestions.

use std::collections::HashSet;

use regex::Regex;
use url::Url;

use super::model::Config;
use crate::error::ValidationError;

/// Validate a single route prefix. Returns `Ok(())` or a human-readable error.
pub fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("prefix cannot be empty".into());
    }
    if !prefix.starts_with('/') {
        return Err("prefix must start with '/'".into());
    }
    if prefix.contains('?') || prefix.contains('#') {
        return Err("prefix must be a plain path (no query or fragment)".into());
    }
    Ok(())
}

/// Validate an upstream URL. Returns `Ok(())` or a human-readable error.
pub fn validate_upstream(upstream: &str) -> Result<(), String> {
    let parsed = Url::parse(upstream).map_err(|_| format!("'{upstream}' is not a valid URL"))?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(format!(
            "unsupported scheme '{scheme}' (expected http or https)"
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("'{upstream}' has no host"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err("upstream URL must not carry a query or fragment".into());
    }
    Ok(())
}

/// Validate a rewrite pattern. Returns `Ok(())` or the regex compiler's message.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("defaults.timeout", config.defaults.timeout),
        ("defaults.connect_timeout", config.defaults.connect_timeout),
    ] {
        if value == 0 {
            errors.push(ValidationError {
                route: "(root)".into(),
                field: field.into(),
                message: "timeout must be greater than zero".into(),
                suggestion: None,
            });
        }
    }

    let health_path = &config.health.path;
    if !health_path.starts_with('/') {
        errors.push(ValidationError {
            route: "(root)".into(),
            field: "health.path".into(),
            message: "health path must start with '/'".into(),
            suggestion: Some(format!("did you mean '/{health_path}'?")),
        });
    }

    if config.routes.is_empty() {
        errors.push(ValidationError {
            route: "(root)".into(),
            field: "routes".into(),
            message: "at least one route must be defined".into(),
            suggestion: None,
        });
        return Err(errors);
    }

    let mut seen_prefixes = HashSet::new();

    for (i, route) in config.routes.iter().enumerate() {
        let route_id = if route.prefix.is_empty() {
            format!("routes[{i}]")
        } else {
            route.prefix.clone()
        };

        if let Err(msg) = validate_prefix(&route.prefix) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "prefix".into(),
                message: msg,
                suggestion: if !route.prefix.is_empty() && !route.prefix.starts_with('/') {
                    Some(format!("did you mean '/{}'?", route.prefix))
                } else {
                    None
                },
            });
        }

        if !seen_prefixes.insert(route.prefix.as_str()) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "prefix".into(),
                message: "duplicate route prefix".into(),
                suggestion: None,
            });
        }

        if route.prefix == *health_path {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "prefix".into(),
                message: format!("prefix collides with the health path '{health_path}'"),
                suggestion: Some("set health.path to an unused path".into()),
            });
        }

        if let Err(msg) = validate_upstream(&route.upstream) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "upstream".into(),
                message: msg,
                suggestion: None,
            });
        }

        for (pattern, _) in route.path_rewrite.iter() {
            if let Err(msg) = validate_pattern(pattern) {
                errors.push(ValidationError {
                    route: route_id.clone(),
                    field: "path_rewrite".into(),
                    message: msg,
                    suggestion: None,
                });
            }
        }

        if route.timeout == Some(0) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "timeout".into(),
                message: "timeout must be greater than zero".into(),
                suggestion: Some("omit the field to use defaults.timeout".into()),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let mut lines = vec![format!(
        "  {} routes, {} rewrite rules\n",
        config.routes.len(),
        config.total_rewrite_rules()
    )];

    for route in &config.routes {
        let timeout = route.timeout.map_or_else(
            || format!("{}ms (default)", config.defaults.timeout),
            |t| format!("{t}ms"),
        );

        lines.push(format!("  {}  -> {}", route.prefix, route.upstream));
        if route.path_rewrite.is_empty() {
            lines.push("    rewrite: none".into());
        }
        for (pattern, replacement) in route.path_rewrite.iter() {
            lines.push(format!("    rewrite: {pattern:?} => {replacement:?}"));
        }
        if route.change_origin {
            lines.push("    change origin: yes".into());
        }
        lines.push(format!("    timeout: {timeout}"));
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
