//! Scenarios and the request/response shapes they are matched against.

use crate::config::{DelayConfig, ResponseBody};
use crate::error::DefinitionError;
use crate::pattern::{
    KeyedPatterns, MatchOptions, Mismatch, MismatchReason, Pattern, ScalarKind,
};
use crate::value::{Value, ValueMap};
use std::collections::HashMap;

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Literal(String),
    Param { name: String, pattern: Pattern },
}

/// A parsed path template such as `/users/{id:number}/orders`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    template: String,
    segments: Vec<PathSegment>,
}

impl PathPattern {
    /// Parse a template. Parameters are `{name}` (string) or
    /// `{name:string|number|boolean}`.
    pub fn parse(template: &str) -> Result<Self, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidPath {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if !template.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let mut segments = Vec::new();
        for raw in split_path(template) {
            if raw.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                let (name, kind) = match inner.split_once(':') {
                    Some((name, kind)) => (name.trim(), kind.trim()),
                    None => (inner.trim(), "string"),
                };
                if name.is_empty() {
                    return Err(invalid("parameter without a name"));
                }
                let kind = match kind {
                    "string" => ScalarKind::String,
                    "number" | "integer" => ScalarKind::Number,
                    "boolean" => ScalarKind::Boolean,
                    other => return Err(invalid(&format!("unknown parameter type {other:?}"))),
                };
                segments.push(PathSegment::Param {
                    name: name.to_string(),
                    pattern: Pattern::Typed {
                        kind,
                        constraints: Default::default(),
                    },
                });
            } else if raw.contains('{') || raw.contains('}') {
                return Err(invalid("parameters must span a whole segment"));
            } else {
                segments.push(PathSegment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Template with parameter names erased, so `/users/{id}` and
    /// `/users/{userId}` identify the same operation.
    pub fn normalized(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|s| match s {
                PathSegment::Literal(lit) => format!("/{lit}"),
                PathSegment::Param { .. } => "/{}".to_string(),
            })
            .collect()
    }

    /// Per-segment literal flags. Compared lexicographically, a higher
    /// value means a more specific template.
    pub fn specificity(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|s| matches!(s, PathSegment::Literal(_)))
            .collect()
    }

    /// Whether `path` has this template's segment count and literal segments,
    /// regardless of whether its parameter values are valid.
    pub fn has_shape_of(&self, path: &str) -> bool {
        let actual: Vec<String> = split_path(path).into_iter().map(percent_decode).collect();
        actual.len() == self.segments.len()
            && self.segments.iter().zip(&actual).all(|(segment, value)| match segment {
                PathSegment::Literal(lit) => lit == value,
                PathSegment::Param { .. } => true,
            })
    }

    /// Match a request path, returning the extracted parameters.
    pub fn matches(&self, path: &str) -> Result<HashMap<String, String>, Vec<Mismatch>> {
        let actual: Vec<String> = split_path(path).into_iter().map(percent_decode).collect();
        if actual.len() != self.segments.len() {
            return Err(vec![Mismatch::new(
                "path",
                MismatchReason::ValueMismatch,
                format!("{path} does not match {}", self.template),
            )]);
        }

        let mut params = HashMap::new();
        let mut mismatches = Vec::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                PathSegment::Literal(lit) if *lit == value => {}
                PathSegment::Literal(lit) => mismatches.push(Mismatch::new(
                    "path",
                    MismatchReason::ValueMismatch,
                    format!("expected segment \"{lit}\" but got \"{value}\""),
                )),
                PathSegment::Param { name, pattern } => {
                    let outcome = pattern.matches_at(
                        &Value::string(value.clone()),
                        &format!("path.{name}"),
                        MatchOptions::text(),
                    );
                    match outcome {
                        Ok(()) => {
                            params.insert(name.clone(), value);
                        }
                        Err(errors) => mismatches.extend(errors),
                    }
                }
            }
        }

        if mismatches.is_empty() {
            Ok(params)
        } else {
            Err(mismatches)
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Decode `%XX` escapes.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `a=1&b=two` into decoded pairs, keeping order. `+` is a space.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    let decode = |s: &str| percent_decode(&s.replace('+', " "));
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (decode(key), decode(value)),
            None => (decode(part), String::new()),
        })
        .collect()
}

/// A decoded HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Value::Null,
        }
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query.extend(parse_query_string(query));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Query parameters as a map of strings.
    pub fn query_map(&self) -> ValueMap {
        self.query
            .iter()
            .map(|(k, v)| (k.clone(), Value::string(v.clone())))
            .collect()
    }

    /// Headers as a map of strings keyed by lower-cased name.
    pub fn header_map(&self) -> ValueMap {
        self.headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), Value::string(v.clone())))
            .collect()
    }
}

/// A response produced by the stub engine.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A literal canned response body.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralBody {
    pub content: ResponseBody,
    /// Render the body with Handlebars against the match bindings.
    pub template: bool,
}

/// One request/response behavior.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    /// Upper-case HTTP method.
    pub method: String,
    pub path: PathPattern,
    pub query: KeyedPatterns,
    /// Keyed by lower-cased header name.
    pub headers: KeyedPatterns,
    pub request_body: Pattern,
    pub status: u16,
    pub response_headers: KeyedPatterns,
    pub response_body: Pattern,
    pub literal_body: Option<LiteralBody>,
    pub delay: Option<DelayConfig>,
}

impl Scenario {
    /// A scenario accepting any query, headers and body, with no response
    /// body.
    pub fn new(name: impl Into<String>, method: &str, path: PathPattern, status: u16) -> Self {
        Self {
            name: name.into(),
            description: None,
            method: method.to_uppercase(),
            path,
            query: KeyedPatterns::new(),
            headers: KeyedPatterns::new(),
            request_body: Pattern::Any,
            status,
            response_headers: KeyedPatterns::new(),
            response_body: Pattern::Any,
            literal_body: None,
            delay: None,
        }
    }

    pub fn with_query(mut self, name: &str, pattern: Pattern, optional: bool) -> Self {
        self.query.insert(name, pattern, optional);
        self
    }

    pub fn with_header(mut self, name: &str, pattern: Pattern, optional: bool) -> Self {
        self.headers.insert(name.to_lowercase(), pattern, optional);
        self
    }

    pub fn with_request_body(mut self, pattern: Pattern) -> Self {
        self.request_body = pattern;
        self
    }

    pub fn with_response_header(mut self, name: &str, pattern: Pattern) -> Self {
        self.response_headers.insert(name, pattern, false);
        self
    }

    pub fn with_response_body(mut self, pattern: Pattern) -> Self {
        self.response_body = pattern;
        self
    }

    pub fn with_literal_body(mut self, content: ResponseBody) -> Self {
        self.literal_body = Some(LiteralBody {
            content,
            template: false,
        });
        self
    }

    /// `METHOD /template`, for logs and reports.
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.path.template())
    }
}
