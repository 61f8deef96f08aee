//! Path templates with named placeholders.
//!
//! A template such as `/servers/{server}/failoverGroups/{group}` compiles to
//! an anchored, case-insensitive pattern in which every placeholder captures
//! one or more non-slash characters. Anchoring matters: a failover-group id is
//! itself a prefix of longer resource ids, and those must not match.

use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Template compilation errors.
#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("unexpected '}}' at byte {0}")]
    UnexpectedClose(usize),

    #[error("invalid placeholder name: {0:?}")]
    InvalidName(String),

    #[error("duplicate placeholder name: {0}")]
    DuplicateName(String),

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    names: Vec<String>,
    pattern: Regex,
}

impl UriTemplate {
    /// Compile a template of literal segments and `{name}` placeholders.
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        let mut pattern = String::from("(?i)^");
        let mut names: Vec<String> = Vec::new();
        let mut rest = template;
        let mut offset = 0;

        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                None => {
                    pattern.push_str(&regex::escape(rest));
                    break;
                }
                Some(pos) if rest.as_bytes()[pos] == b'}' => {
                    return Err(TemplateError::UnexpectedClose(offset + pos));
                }
                Some(open) => {
                    pattern.push_str(&regex::escape(&rest[..open]));
                    let after = &rest[open + 1..];
                    let close = after
                        .find('}')
                        .ok_or(TemplateError::Unterminated(offset + open))?;
                    let name = &after[..close];

                    if !is_valid_name(name) {
                        return Err(TemplateError::InvalidName(name.to_string()));
                    }
                    if names.iter().any(|n| n == name) {
                        return Err(TemplateError::DuplicateName(name.to_string()));
                    }

                    pattern.push_str(&format!("(?P<{}>[^/]+)", name));
                    names.push(name.to_string());

                    let consumed = open + 1 + close + 1;
                    rest = &rest[consumed..];
                    offset += consumed;
                }
            }
        }

        pattern.push('$');

        Ok(Self {
            template: template.to_string(),
            names,
            pattern: Regex::new(&pattern)?,
        })
    }

    /// Extract placeholder values from `candidate`.
    ///
    /// Returns `None` unless the whole candidate has the template's shape.
    pub fn matches(&self, candidate: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(candidate)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    /// Placeholder names in template order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The source template.
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
