//! Path template compilation and matching.
//!
//! # Responsibilities
//! - Compile `/users/{id}` style templates into anchored regular expressions
//! - Capture named placeholders in declaration order
//! - Wrap raw patterns received over the handshake
//!
//! # Design Decisions
//! - Leading and trailing slashes of the template are ignored
//! - A placeholder matches one or more word, hyphen or underscore characters
//! - Literal segments are regex-escaped, so `.` in `/report.csv` is literal
//! - The compiled text is the identity of a route (duplicate detection)

use std::collections::HashMap;

use regex::Regex;

use crate::error::{GatewayError, GatewayResult};

const PLACEHOLDER: &str = r"([\w-]+)";

/// A compiled path matcher.
#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    params: Vec<String>,
}

impl PathPattern {
    /// Compile a human-authored template.
    pub fn compile(template: &str) -> GatewayResult<Self> {
        let (source, params) = translate(template)?;
        let regex = Regex::new(&source).map_err(|source_err| GatewayError::InvalidPattern {
            pattern: source.clone(),
            source: source_err,
        })?;
        Ok(Self { regex, params })
    }

    /// Wrap an already-compiled pattern string (as sent in a handshake).
    pub fn from_regex(pattern: &str) -> GatewayResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| GatewayError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            regex,
            params: Vec::new(),
        })
    }

    /// Compiled pattern text.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Placeholder names in encountered order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match and collect named parameters. `None` when the path does not match.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut values = HashMap::with_capacity(self.params.len());
        for (index, name) in self.params.iter().enumerate() {
            if let Some(m) = caps.get(index + 1) {
                values.insert(name.clone(), m.as_str().to_string());
            }
        }
        Some(values)
    }
}

fn translate(template: &str) -> GatewayResult<(String, Vec<String>)> {
    let malformed = |reason| GatewayError::MalformedTemplate {
        template: template.to_string(),
        reason,
    };

    let trimmed = template.trim_matches('/');
    let mut body = String::with_capacity(trimmed.len() + 16);
    let mut params = Vec::new();
    let mut rest = trimmed;

    while let Some(opener) = rest.find(['{', '}']) {
        if rest[opener..].starts_with('}') {
            return Err(malformed("closing brace without opening brace"));
        }
        let after = &rest[opener + 1..];
        let closer = after
            .find('}')
            .ok_or_else(|| malformed("unterminated placeholder"))?;
        let name = &after[..closer];
        if name.is_empty() {
            return Err(malformed("empty placeholder name"));
        }
        if name.contains('{') {
            return Err(malformed("nested placeholder"));
        }

        body.push_str(&regex::escape(&rest[..opener]));
        body.push_str(PLACEHOLDER);
        params.push(name.to_string());
        rest = &after[closer + 1..];
    }
    body.push_str(&regex::escape(rest));

    Ok((format!("^/?{}/?$", body), params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_capture() {
        let pattern = PathPattern::compile("/users/{id}").unwrap();

        let params = pattern.captures("/users/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        assert!(pattern.is_match("/users/42/"));
        assert!(!pattern.is_match("/users"));
        assert!(!pattern.is_match("/users/42/orders"));
    }

    #[test]
    fn test_multiple_params_in_order() {
        let pattern = PathPattern::compile("orgs/{org}/members/{member_id}/").unwrap();
        assert_eq!(pattern.params(), &["org".to_string(), "member_id".to_string()]);

        let params = pattern.captures("/orgs/acme-co/members/user_7").unwrap();
        assert_eq!(params["org"], "acme-co");
        assert_eq!(params["member_id"], "user_7");
    }

    #[test]
    fn test_literal_segments_are_escaped() {
        let pattern = PathPattern::compile("/report.csv").unwrap();
        assert!(pattern.is_match("/report.csv"));
        assert!(!pattern.is_match("/reportxcsv"));
    }

    #[test]
    fn test_root_template() {
        let pattern = PathPattern::compile("/").unwrap();
        assert!(pattern.is_match("/"));
        assert!(pattern.is_match(""));
        assert!(!pattern.is_match("/a"));
    }

    #[test]
    fn test_placeholder_rejects_other_characters() {
        let pattern = PathPattern::compile("/files/{name}").unwrap();
        assert!(!pattern.is_match("/files/a.b"));
        assert!(!pattern.is_match("/files/a%20b"));
    }

    #[test]
    fn test_malformed_templates() {
        for template in ["/users/{id", "/users/}", "/users/{}", "/a/{b{c}"] {
            let err = PathPattern::compile(template).unwrap_err();
            assert!(
                matches!(err, GatewayError::MalformedTemplate { .. }),
                "{template} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_from_regex() {
        let pattern = PathPattern::from_regex("^/secret$").unwrap();
        assert!(pattern.is_match("/secret"));
        assert!(!pattern.is_match("/secret/"));

        assert!(matches!(
            PathPattern::from_regex("^/(unclosed$"),
            Err(GatewayError::InvalidPattern { .. })
        ));
    }
}
