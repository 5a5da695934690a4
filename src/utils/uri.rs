//! URI template matching
//!
//! Resource templates use RFC 6570 level 1 expressions (`{name}`) plus the
//! reserved form (`{+name}`). A template is compiled once into an anchored
//! regex; matching a concrete URI yields the variable bindings.

use regex::Regex;
use std::collections::HashMap;

use crate::error::Error;

/// A compiled URI template
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    pattern: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compile a template such as `users://{id}/profile`
    pub fn parse(template: &str) -> Result<Self, Error> {
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..open]));
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| Error::ConfigError(format!("Unclosed expression in URI template: {}", template)))?;

            let expr = &rest[open + 1..close];
            let (reserved, name) = match expr.strip_prefix('+') {
                Some(name) => (true, name),
                None => (false, expr),
            };
            if !is_valid_variable(name) {
                return Err(Error::ConfigError(format!(
                    "Invalid variable '{}' in URI template: {}",
                    expr, template
                )));
            }
            if variables.iter().any(|v| v == name) {
                return Err(Error::ConfigError(format!(
                    "Duplicate variable '{}' in URI template: {}",
                    name, template
                )));
            }

            let class = if reserved { ".+" } else { "[^/]+" };
            pattern.push_str(&format!("(?P<{}>{})", name, class));
            variables.push(name.to_string());
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern)
            .map_err(|e| Error::ConfigError(format!("Invalid URI template {}: {}", template, e)))?;

        Ok(Self {
            template: template.to_string(),
            pattern,
            variables,
        })
    }

    /// The template text this was compiled from
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Variable names in order of appearance
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Match a concrete URI, returning the bound variables
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(uri)?;
        let vars = self
            .variables
            .iter()
            .filter_map(|name| captures.name(name).map(|m| (name.clone(), m.as_str().to_string())))
            .collect();
        Some(vars)
    }

    /// Substitute variables into the template. Missing variables expand to nothing.
    pub fn expand(&self, vars: &HashMap<String, String>) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            match rest[open..].find('}') {
                Some(i) => {
                    let expr = &rest[open + 1..open + i];
                    let name = expr.trim_start_matches('+');
                    if let Some(value) = vars.get(name) {
                        out.push_str(value);
                    }
                    rest = &rest[open + i + 1..];
                }
                None => {
                    rest = &rest[open..];
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn is_valid_variable(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
