//! Ordered regex path rewriting.
//!
//! A [`PathRewriter`] holds a route's `pattern -> replacement` rules,
//! compiled once when the route table is built. Rules run in
//! declaration order and each one replaces at most its first match, so
//! a rule whose replacement matches its own pattern is not re-applied
//! within a single call. Running the rewriter twice over its own
//! output is therefore only a no-op when no replacement re-matches.

use regex::Regex;

use crate::config::model::RewriteRules;

#[derive(Debug, Clone)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

#[derive(Debug, Clone, Default)]
pub struct PathRewriter {
    rules: Vec<RewriteRule>,
}

impl PathRewriter {
    pub fn compile(rules: &RewriteRules) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(pattern, replacement)| {
                Ok(RewriteRule {
                    pattern: Regex::new(pattern)?,
                    replacement: replacement.to_string(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Apply every rule once, in order. The result always starts with `/`.
    ///
    /// Replacements may reference capture groups (`$1`, `${name}`).
    #[must_use]
    pub fn apply(&self, path: &str) -> String {
        let mut current = path.to_string();
        for rule in &self.rules {
            let replaced = rule.pattern.replace(&current, rule.replacement.as_str());
            current = replaced.into_owned();
        }
        if current.starts_with('/') {
            current
        } else {
            format!("/{current}")
        }
    }
}
