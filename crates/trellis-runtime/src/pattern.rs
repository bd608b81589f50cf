use std::collections::BTreeMap;

use regex::Regex;

use crate::error::RuntimeError;

/// A compiled path template.
///
/// `:name` captures one non-empty segment under `name`; `*` captures any
/// remainder (slashes included) under its positional index `"0"`, `"1"`, ….
/// Everything else matches literally and the whole path must match.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    params: Vec<String>,
}

impl PathPattern {
    pub fn parse(source: &str) -> Result<Self, RuntimeError> {
        let invalid = |reason: String| RuntimeError::InvalidPattern {
            pattern: source.to_string(),
            reason,
        };

        let mut expr = String::from("^");
        let mut params: Vec<String> = Vec::new();
        let mut wildcards = 0usize;
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                ':' => {
                    let mut name = String::new();
                    while let Some(&n) = chars.peek() {
                        if !(n.is_ascii_alphanumeric() || n == '_') {
                            break;
                        }
                        name.push(n);
                        chars.next();
                    }
                    if name.is_empty() {
                        return Err(invalid("':' must be followed by a parameter name".into()));
                    }
                    if params.contains(&name) {
                        return Err(invalid(format!("parameter {name:?} appears twice")));
                    }
                    params.push(name);
                    expr.push_str("([^/]+)");
                }
                '*' => {
                    params.push(wildcards.to_string());
                    wildcards += 1;
                    expr.push_str("(.*)");
                }
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            regex,
            params,
        })
    }

    /// Captured parameters if `path` matches.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = captures.get(i + 1).map_or("", |m| m.as_str());
                    (name.clone(), value.to_string())
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
