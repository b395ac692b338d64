//! Patterns: typed matchers over [`Value`]s.
//!
//! Matching never fails fast. Every mismatch found while walking a value is
//! collected with the path it was found at, so a rejected request can be
//! explained field by field.

use crate::error::DefinitionError;
use crate::value::{local_name, TreeNode, Value, ValueMap};
use regex::Regex;
use regex_syntax::hir::{Class, Hir, HirKind};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

/// Runtime type accepted by [`Pattern::Typed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Boolean,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
        }
    }
}

/// Optional bounds on a typed scalar, plus an embedded default used when
/// generating examples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub default: Option<Value>,
}

/// A compiled regex, anchored on both ends.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    source: String,
    compiled: Regex,
}

impl RegexPattern {
    pub fn new(source: &str) -> Result<Self, DefinitionError> {
        let compiled = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            DefinitionError::InvalidRegex {
                pattern: source.to_string(),
                source: e,
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            compiled,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Named patterns with a set of optional names. Used for map bodies, query
/// parameters, headers and XML attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedPatterns {
    entries: Vec<(String, Pattern)>,
    optional: BTreeSet<String>,
}

impl KeyedPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, pattern: Pattern, optional: bool) {
        let key = key.into();
        if optional {
            self.optional.insert(key.clone());
        } else {
            self.optional.remove(&key);
        }
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = pattern,
            None => self.entries.push((key, pattern)),
        }
    }

    pub fn required(mut self, key: impl Into<String>, pattern: Pattern) -> Self {
        self.insert(key, pattern, false);
        self
    }

    pub fn optional(mut self, key: impl Into<String>, pattern: Pattern) -> Self {
        self.insert(key, pattern, true);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Pattern> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    pub fn is_optional(&self, key: &str) -> bool {
        self.optional.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Same patterns with every key lower-cased (header names).
    pub fn lowercase_keys(&self) -> Self {
        let mut out = KeyedPatterns::new();
        for (key, pattern) in self.iter() {
            out.insert(key.to_lowercase(), pattern.clone(), self.is_optional(key));
        }
        out
    }

    /// Match a map of values. Missing required keys and every declared key
    /// that is present are checked; undeclared keys only fail in strict mode.
    pub fn check_map(
        &self,
        map: &ValueMap,
        path: &str,
        options: MatchOptions,
        out: &mut Vec<Mismatch>,
    ) {
        for (key, pattern) in self.iter() {
            let key_path = child_path(path, key);
            match map.get(key) {
                Some(value) => pattern.check(value, &key_path, options, out),
                None if self.is_optional(key) => {}
                None => out.push(Mismatch::new(
                    key_path,
                    MismatchReason::MissingKey,
                    format!("required key \"{key}\" is missing"),
                )),
            }
        }
        if options.strict_keys {
            for key in map.keys().filter(|k| self.get(k).is_none()) {
                out.push(Mismatch::new(
                    child_path(path, key),
                    MismatchReason::UnexpectedKey,
                    format!("key \"{key}\" is not declared"),
                ));
            }
        }
    }

    /// A map holding an example value for every declared key.
    pub fn generate_example(&self) -> ValueMap {
        self.iter()
            .map(|(k, p)| (k.to_string(), p.generate_example()))
            .collect()
    }
}

/// How many times a child element may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurs {
    pub min: usize,
    pub max: Option<usize>,
}

impl Occurs {
    pub const ONCE: Occurs = Occurs {
        min: 1,
        max: Some(1),
    };
    pub const OPTIONAL: Occurs = Occurs {
        min: 0,
        max: Some(1),
    };
    pub const MANY: Occurs = Occurs { min: 0, max: None };

    pub fn is_repeatable(self) -> bool {
        self.max != Some(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildPattern {
    pub pattern: Pattern,
    pub occurs: Occurs,
}

/// Pattern for an XML element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPattern {
    /// Tag name. Without a prefix it matches on local name only.
    pub name: String,
    pub attributes: KeyedPatterns,
    pub children: Vec<ChildPattern>,
    /// Pattern for the text of a leaf element.
    pub text: Option<Box<Pattern>>,
}

impl ElementPattern {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: KeyedPatterns::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_child(mut self, pattern: Pattern, occurs: Occurs) -> Self {
        self.children.push(ChildPattern { pattern, occurs });
        self
    }

    pub fn with_text(mut self, pattern: Pattern) -> Self {
        self.text = Some(Box::new(pattern));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, pattern: Pattern) -> Self {
        self.attributes.insert(name, pattern, false);
        self
    }

    pub(crate) fn accepts_name(&self, name: &str) -> bool {
        if self.name.contains(':') {
            self.name == name
        } else {
            self.name == local_name(name)
        }
    }
}

/// A structural matcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Exact(Value),
    Typed {
        kind: ScalarKind,
        constraints: Constraints,
    },
    /// Any of the listed values; the first one is used for examples.
    Enumerated(Vec<Value>),
    Regex(RegexPattern),
    ListOf {
        element: Box<Pattern>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    KeyedMap(KeyedPatterns),
    TreeElement(ElementPattern),
    Any,
}

/// Why a value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    TypeMismatch,
    ValueMismatch,
    MissingKey,
    UnexpectedKey,
    NotInEnumeration,
    RegexMismatch,
    LengthOutOfBounds,
    OutOfRange,
    TagMismatch,
    MissingElement,
    UnexpectedElement,
}

/// One path-qualified mismatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub path: String,
    pub reason: MismatchReason,
    pub message: String,
}

impl Mismatch {
    pub fn new(path: impl Into<String>, reason: MismatchReason, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

pub type MatchOutcome = Result<(), Vec<Mismatch>>;

/// Knobs for a single match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Reject map keys the pattern does not declare.
    pub strict_keys: bool,
    /// The value came from text (path, query, header, XML): strings may be
    /// read as numbers or booleans.
    pub text_mode: bool,
}

impl MatchOptions {
    pub fn text() -> Self {
        Self {
            strict_keys: false,
            text_mode: true,
        }
    }

    pub fn strict(mut self, strict_keys: bool) -> Self {
        self.strict_keys = strict_keys;
        self
    }
}

pub(crate) fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

impl Pattern {
    pub fn string() -> Self {
        Pattern::Typed {
            kind: ScalarKind::String,
            constraints: Constraints::default(),
        }
    }

    pub fn number() -> Self {
        Pattern::Typed {
            kind: ScalarKind::Number,
            constraints: Constraints::default(),
        }
    }

    pub fn boolean() -> Self {
        Pattern::Typed {
            kind: ScalarKind::Boolean,
            constraints: Constraints::default(),
        }
    }

    pub fn exact(value: impl Into<Value>) -> Self {
        Pattern::Exact(value.into())
    }

    pub fn list_of(element: Pattern) -> Self {
        Pattern::ListOf {
            element: Box::new(element),
            min_items: None,
            max_items: None,
        }
    }

    /// Match with default options.
    pub fn matches(&self, value: &Value) -> MatchOutcome {
        self.matches_at(value, "", MatchOptions::default())
    }

    /// Match, reporting mismatch paths relative to `path`.
    pub fn matches_at(&self, value: &Value, path: &str, options: MatchOptions) -> MatchOutcome {
        let mut mismatches = Vec::new();
        self.check(value, path, options, &mut mismatches);
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(mismatches)
        }
    }

    pub(crate) fn check(
        &self,
        value: &Value,
        path: &str,
        options: MatchOptions,
        out: &mut Vec<Mismatch>,
    ) {
        match self {
            Pattern::Any => {}
            Pattern::Exact(expected) => {
                if !exact_eq(expected, value, options) {
                    out.push(Mismatch::new(
                        path,
                        MismatchReason::ValueMismatch,
                        format!("expected {expected} but got {value}"),
                    ));
                }
            }
            Pattern::Typed { kind, constraints } => {
                check_typed(*kind, constraints, value, path, options, out)
            }
            Pattern::Enumerated(values) => {
                if !values.iter().any(|v| exact_eq(v, value, options)) {
                    let allowed: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    out.push(Mismatch::new(
                        path,
                        MismatchReason::NotInEnumeration,
                        format!("{value} is not one of [{}]", allowed.join(", ")),
                    ));
                }
            }
            Pattern::Regex(regex) => match value {
                Value::String(s) if regex.is_match(s) => {}
                Value::String(s) => out.push(Mismatch::new(
                    path,
                    MismatchReason::RegexMismatch,
                    format!("\"{s}\" does not match /{}/", regex.source()),
                )),
                other => out.push(type_mismatch(path, "string", other)),
            },
            Pattern::ListOf {
                element,
                min_items,
                max_items,
            } => {
                let Value::List(items) = value else {
                    out.push(type_mismatch(path, "list", value));
                    return;
                };
                let too_short = min_items.is_some_and(|min| items.len() < min);
                let too_long = max_items.is_some_and(|max| items.len() > max);
                if too_short || too_long {
                    out.push(Mismatch::new(
                        path,
                        MismatchReason::LengthOutOfBounds,
                        format!(
                            "list has {} items, expected {}",
                            items.len(),
                            describe_bounds(*min_items, *max_items)
                        ),
                    ));
                }
                for (i, item) in items.iter().enumerate() {
                    element.check(item, &format!("{path}[{i}]"), options, out);
                }
            }
            Pattern::KeyedMap(keyed) => match value {
                Value::Map(map) => keyed.check_map(map, path, options, out),
                other => out.push(type_mismatch(path, "map", other)),
            },
            Pattern::TreeElement(element) => match value {
                Value::Tree(node) => check_element(element, node, path, options, out),
                other => out.push(type_mismatch(path, "xml element", other)),
            },
        }
    }

    /// Produce a value this pattern accepts.
    pub fn generate_example(&self) -> Value {
        match self {
            Pattern::Any => Value::Null,
            Pattern::Exact(value) => value.clone(),
            Pattern::Typed { kind, constraints } => generate_typed(*kind, constraints),
            Pattern::Enumerated(values) => values.first().cloned().unwrap_or(Value::Null),
            Pattern::Regex(regex) => Value::String(shortest_regex_match(regex.source())),
            Pattern::ListOf {
                element,
                min_items,
                max_items,
            } => {
                let mut count = min_items.unwrap_or(1);
                if let Some(max) = max_items {
                    count = count.min(*max);
                }
                Value::List((0..count).map(|_| element.generate_example()).collect())
            }
            Pattern::KeyedMap(keyed) => Value::Map(keyed.generate_example()),
            Pattern::TreeElement(element) => Value::Tree(generate_element(element)),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("any value"),
            Pattern::Exact(value) => write!(f, "exactly {value}"),
            Pattern::Typed { kind, .. } => f.write_str(kind.name()),
            Pattern::Enumerated(values) => {
                let names: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "one of [{}]", names.join(", "))
            }
            Pattern::Regex(regex) => write!(f, "/{}/", regex.source()),
            Pattern::ListOf { element, .. } => write!(f, "list of {element}"),
            Pattern::KeyedMap(_) => f.write_str("map"),
            Pattern::TreeElement(element) => write!(f, "<{}>", element.name),
        }
    }
}

fn type_mismatch(path: &str, expected: &str, got: &Value) -> Mismatch {
    Mismatch::new(
        path,
        MismatchReason::TypeMismatch,
        format!("expected {expected} but got {} {got}", got.type_name()),
    )
}

fn describe_bounds<T: fmt::Display>(min: Option<T>, max: Option<T>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("between {min} and {max}"),
        (Some(min), None) => format!("at least {min}"),
        (None, Some(max)) => format!("at most {max}"),
        (None, None) => "any number".to_string(),
    }
}

/// Exact comparison. In text mode a string is compared with the textual
/// form of a scalar expectation.
fn exact_eq(expected: &Value, value: &Value, options: MatchOptions) -> bool {
    if expected == value {
        return true;
    }
    match (expected, value) {
        (Value::Number(_) | Value::Boolean(_), Value::String(s)) if options.text_mode => {
            coerce(s, scalar_kind_of(expected)).is_some_and(|v| &v == expected)
        }
        _ => false,
    }
}

fn scalar_kind_of(value: &Value) -> ScalarKind {
    match value {
        Value::Number(_) => ScalarKind::Number,
        Value::Boolean(_) => ScalarKind::Boolean,
        _ => ScalarKind::String,
    }
}

fn coerce(text: &str, kind: ScalarKind) -> Option<Value> {
    match kind {
        ScalarKind::String => Some(Value::string(text)),
        ScalarKind::Number => {
            let trimmed = text.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Some(Value::Number(n.into()));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::number)
        }
        ScalarKind::Boolean => match text.trim() {
            "true" => Some(Value::Boolean(true)),
            "false" => Some(Value::Boolean(false)),
            _ => None,
        },
    }
}

fn check_typed(
    kind: ScalarKind,
    constraints: &Constraints,
    value: &Value,
    path: &str,
    options: MatchOptions,
    out: &mut Vec<Mismatch>,
) {
    let value: Cow<'_, Value> = match value {
        Value::String(s) if options.text_mode && kind != ScalarKind::String => {
            match coerce(s, kind) {
                Some(v) => Cow::Owned(v),
                None => {
                    out.push(type_mismatch(path, kind.name(), value));
                    return;
                }
            }
        }
        _ => Cow::Borrowed(value),
    };

    match (kind, value.as_ref()) {
        (ScalarKind::String, Value::String(s)) => {
            let len = s.chars().count();
            let too_short = constraints.min_length.is_some_and(|min| len < min);
            let too_long = constraints.max_length.is_some_and(|max| len > max);
            if too_short || too_long {
                out.push(Mismatch::new(
                    path,
                    MismatchReason::LengthOutOfBounds,
                    format!(
                        "string has length {len}, expected {}",
                        describe_bounds(constraints.min_length, constraints.max_length)
                    ),
                ));
            }
        }
        (ScalarKind::Number, Value::Number(n)) => {
            let n = n.as_f64().unwrap_or(f64::NAN);
            let below = constraints.min.is_some_and(|min| n < min);
            let above = constraints.max.is_some_and(|max| n > max);
            if below || above {
                out.push(Mismatch::new(
                    path,
                    MismatchReason::OutOfRange,
                    format!(
                        "{n} is out of range, expected {}",
                        describe_bounds(constraints.min, constraints.max)
                    ),
                ));
            }
        }
        (ScalarKind::Boolean, Value::Boolean(_)) => {}
        (_, other) => out.push(type_mismatch(path, kind.name(), other)),
    }
}

fn check_element(
    pattern: &ElementPattern,
    node: &TreeNode,
    path: &str,
    options: MatchOptions,
    out: &mut Vec<Mismatch>,
) {
    if !pattern.accepts_name(&node.name) {
        out.push(Mismatch::new(
            path,
            MismatchReason::TagMismatch,
            format!("expected element <{}> but got <{}>", pattern.name, node.name),
        ));
        return;
    }

    let text_options = MatchOptions::text().strict(options.strict_keys);

    // Namespace declarations are not data; prefixes are resolved by name.
    let attributes: ValueMap = node
        .attributes
        .iter()
        .filter(|(k, _)| !is_namespace_declaration(k))
        .map(|(k, v)| (format!("@{k}"), Value::string(v.clone())))
        .collect();
    let mut declared = KeyedPatterns::new();
    for (key, attr_pattern) in pattern.attributes.iter() {
        if is_namespace_declaration(key) {
            continue;
        }
        declared.insert(
            format!("@{key}"),
            attr_pattern.clone(),
            pattern.attributes.is_optional(key),
        );
    }
    declared.check_map(&attributes, path, text_options, out);

    if let Some(text_pattern) = &pattern.text {
        let text = Value::string(node.text.clone().unwrap_or_default());
        text_pattern.check(&text, path, text_options, out);
    }

    let elements: Vec<&TreeNode> = node.elements().collect();
    let mut next = 0;
    for child in &pattern.children {
        let child_name = match &child.pattern {
            Pattern::TreeElement(e) => local_name(&e.name).to_string(),
            _ => "*".to_string(),
        };
        let mut count = 0;
        while next < elements.len() && child.occurs.max.map_or(true, |max| count < max) {
            let candidate = elements[next];
            let claimed = match &child.pattern {
                Pattern::TreeElement(e) => e.accepts_name(&candidate.name),
                _ => true,
            };
            if !claimed {
                break;
            }
            let element_path = if child.occurs.is_repeatable() {
                format!("{}[{count}]", child_path(path, &child_name))
            } else {
                child_path(path, &child_name)
            };
            child
                .pattern
                .check(&Value::Tree(candidate.clone()), &element_path, options, out);
            count += 1;
            next += 1;
        }
        if count < child.occurs.min {
            out.push(Mismatch::new(
                child_path(path, &child_name),
                MismatchReason::MissingElement,
                format!(
                    "expected at least {} <{child_name}> element(s) but found {count}",
                    child.occurs.min
                ),
            ));
        }
    }
    for extra in &elements[next..] {
        out.push(Mismatch::new(
            child_path(path, extra.local_name()),
            MismatchReason::UnexpectedElement,
            format!("unexpected element <{}>", extra.name),
        ));
    }
}

fn is_namespace_declaration(attribute: &str) -> bool {
    attribute == "xmlns" || attribute.starts_with("xmlns:")
}

fn generate_typed(kind: ScalarKind, constraints: &Constraints) -> Value {
    if let Some(default) = &constraints.default {
        return default.clone();
    }
    match kind {
        ScalarKind::String => {
            const BASE: &str = "string";
            let mut len = BASE.len().max(constraints.min_length.unwrap_or(0));
            if let Some(max) = constraints.max_length {
                len = len.min(max);
            }
            Value::String(BASE.chars().cycle().take(len).collect())
        }
        ScalarKind::Number => match (constraints.min, constraints.max) {
            (Some(min), _) => Value::number(min),
            (None, Some(max)) if max < 0.0 => Value::number(max),
            _ => Value::number(0.0),
        },
        ScalarKind::Boolean => Value::Boolean(true),
    }
}

fn generate_element(pattern: &ElementPattern) -> TreeNode {
    let mut node = TreeNode::new(pattern.name.clone());
    for (key, attr_pattern) in pattern.attributes.iter() {
        node.attributes
            .push((key.to_string(), attr_pattern.generate_example().to_text()));
    }
    if let Some(text_pattern) = &pattern.text {
        let text = text_pattern.generate_example().to_text();
        if !text.is_empty() {
            node.text = Some(text);
        }
    }
    for child in &pattern.children {
        let mut count = child.occurs.min.max(1);
        if let Some(max) = child.occurs.max {
            count = count.min(max);
        }
        for _ in 0..count {
            match child.pattern.generate_example() {
                Value::Tree(element) => node.children.push(Value::Tree(element)),
                Value::Null if child.occurs.min == 0 => {}
                other => {
                    let mut wrapper = TreeNode::new("value");
                    wrapper.text = Some(other.to_text()).filter(|t| !t.is_empty());
                    node.children.push(Value::Tree(wrapper));
                }
            }
        }
    }
    node
}

/// Shortest canonical string accepted by a regex: minimum repetitions, first
/// alternative, and a readable character from each class.
fn shortest_regex_match(source: &str) -> String {
    let mut out = String::new();
    if let Ok(hir) = regex_syntax::parse(source) {
        write_shortest(&hir, &mut out);
    }
    out
}

fn write_shortest(hir: &Hir, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(literal) => out.push_str(&String::from_utf8_lossy(&literal.0)),
        HirKind::Class(Class::Unicode(class)) => {
            const PREFERRED: [char; 5] = ['a', 'x', '0', 'A', ' '];
            let ranges = class.ranges();
            let preferred = PREFERRED
                .iter()
                .copied()
                .find(|c| ranges.iter().any(|r| r.start() <= *c && *c <= r.end()));
            if let Some(c) = preferred.or_else(|| ranges.first().map(|r| r.start())) {
                out.push(c);
            }
        }
        HirKind::Class(Class::Bytes(class)) => {
            if let Some(range) = class.ranges().first() {
                out.push(char::from(range.start()));
            }
        }
        HirKind::Repetition(repetition) => {
            for _ in 0..repetition.min {
                write_shortest(&repetition.sub, out);
            }
        }
        HirKind::Capture(capture) => write_shortest(&capture.sub, out),
        HirKind::Concat(parts) => {
            for part in parts {
                write_shortest(part, out);
            }
        }
        HirKind::Alternation(alternatives) => {
            if let Some(first) = alternatives.first() {
                write_shortest(first, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &str) -> Value {
        Value::parse_json(text).unwrap()
    }

    fn order_pattern() -> Pattern {
        Pattern::KeyedMap(
            KeyedPatterns::new()
                .required("qty", Pattern::number())
                .optional("note", Pattern::string())
                .required(
                    "items",
                    Pattern::list_of(Pattern::KeyedMap(
                        KeyedPatterns::new().required("name", Pattern::string()),
                    )),
                ),
        )
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(Pattern::Any.matches(&Value::Null).is_ok());
        assert!(Pattern::Any.matches(&json(r#"{"a": [1]}"#)).is_ok());
    }

    #[test]
    fn test_typed_scalar_type_mismatch() {
        let errors = order_pattern()
            .matches_at(&json(r#"{"qty": "two", "items": []}"#), "body", MatchOptions::default())
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "body.qty");
        assert_eq!(errors[0].reason, MismatchReason::TypeMismatch);
    }

    #[test]
    fn test_nested_paths_and_missing_keys_are_all_reported() {
        let value = json(r#"{"items": [{"name": "a"}, {"name": "b"}, {"name": 3}]}"#);
        let errors = order_pattern()
            .matches_at(&value, "body", MatchOptions::default())
            .unwrap_err();
        let paths: Vec<_> = errors.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["body.qty", "body.items[2].name"]);
        assert_eq!(errors[0].reason, MismatchReason::MissingKey);
    }

    #[test]
    fn test_keyed_map_is_open_unless_strict() {
        let value = json(r#"{"qty": 1, "items": [], "extra": true}"#);
        assert!(order_pattern().matches(&value).is_ok());
        let errors = order_pattern()
            .matches_at(&value, "", MatchOptions::default().strict(true))
            .unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::UnexpectedKey);
        assert_eq!(errors[0].path, "extra");
    }

    #[test]
    fn test_constraints() {
        let pattern = Pattern::Typed {
            kind: ScalarKind::Number,
            constraints: Constraints {
                min: Some(1.0),
                max: Some(10.0),
                ..Default::default()
            },
        };
        assert!(pattern.matches(&json("5")).is_ok());
        let errors = pattern.matches(&json("11")).unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::OutOfRange);

        let pattern = Pattern::Typed {
            kind: ScalarKind::String,
            constraints: Constraints {
                max_length: Some(3),
                ..Default::default()
            },
        };
        let errors = pattern.matches(&Value::string("abcd")).unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::LengthOutOfBounds);
    }

    #[test]
    fn test_list_bounds() {
        let pattern = Pattern::ListOf {
            element: Box::new(Pattern::number()),
            min_items: Some(1),
            max_items: Some(2),
        };
        assert!(pattern.matches(&json("[1, 2]")).is_ok());
        assert!(pattern.matches(&json("[]")).is_err());
        assert!(pattern.matches(&json("[1, 2, 3]")).is_err());
    }

    #[test]
    fn test_enumeration_and_regex() {
        let pattern = Pattern::Enumerated(vec![Value::string("open"), Value::string("closed")]);
        assert!(pattern.matches(&Value::string("open")).is_ok());
        let errors = pattern.matches(&Value::string("pending")).unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::NotInEnumeration);

        let regex = Pattern::Regex(RegexPattern::new(r"[A-Z]{2}-\d+").unwrap());
        assert!(regex.matches(&Value::string("AB-12")).is_ok());
        let errors = regex.matches(&Value::string("xAB-12")).unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::RegexMismatch);
    }

    #[test]
    fn test_text_mode_coerces_strings() {
        assert!(Pattern::number()
            .matches_at(&Value::string("42"), "", MatchOptions::text())
            .is_ok());
        assert!(Pattern::number().matches(&Value::string("42")).is_err());
        assert!(Pattern::exact(Value::number(1.0))
            .matches_at(&Value::string("1"), "", MatchOptions::text())
            .is_ok());
        assert!(Pattern::boolean()
            .matches_at(&Value::string("yes"), "", MatchOptions::text())
            .is_err());
    }

    fn envelope_pattern() -> Pattern {
        let item = ElementPattern::new("item")
            .with_attribute("sku", Pattern::string())
            .with_text(Pattern::number());
        Pattern::TreeElement(
            ElementPattern::new("order")
                .with_child(
                    Pattern::TreeElement(ElementPattern::new("customer").with_text(Pattern::string())),
                    Occurs::ONCE,
                )
                .with_child(Pattern::TreeElement(item), Occurs { min: 1, max: None })
                .with_child(
                    Pattern::TreeElement(ElementPattern::new("note")),
                    Occurs::OPTIONAL,
                ),
        )
    }

    #[test]
    fn test_tree_element_matching() {
        let xml = r#"<ns:order xmlns:ns="urn:x">
            <ns:customer>Ann</ns:customer>
            <ns:item sku="a">1</ns:item>
            <ns:item sku="b">2</ns:item>
        </ns:order>"#;
        assert!(envelope_pattern().matches(&Value::parse_xml(xml).unwrap()).is_ok());
    }

    #[test]
    fn test_tree_element_mismatches() {
        let xml = r#"<order><customer>Ann</customer><item>x</item><bogus/></order>"#;
        let errors = envelope_pattern()
            .matches_at(&Value::parse_xml(xml).unwrap(), "body", MatchOptions::default())
            .unwrap_err();
        let reasons: Vec<_> = errors.iter().map(|m| (m.path.as_str(), m.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                ("body.item[0].@sku", MismatchReason::MissingKey),
                ("body.item[0]", MismatchReason::TypeMismatch),
                ("body.bogus", MismatchReason::UnexpectedElement),
            ]
        );
    }

    #[test]
    fn test_tree_missing_required_child() {
        let errors = envelope_pattern()
            .matches(&Value::parse_xml("<order><customer>A</customer></order>").unwrap())
            .unwrap_err();
        assert_eq!(errors[0].reason, MismatchReason::MissingElement);
        assert_eq!(errors[0].path, "item");
    }

    #[test]
    fn test_generated_examples_satisfy_their_patterns() {
        let patterns = vec![
            Pattern::Any,
            Pattern::string(),
            Pattern::number(),
            Pattern::boolean(),
            Pattern::Typed {
                kind: ScalarKind::Number,
                constraints: Constraints {
                    min: Some(3.5),
                    max: Some(9.0),
                    ..Default::default()
                },
            },
            Pattern::Typed {
                kind: ScalarKind::String,
                constraints: Constraints {
                    min_length: Some(10),
                    ..Default::default()
                },
            },
            Pattern::Typed {
                kind: ScalarKind::String,
                constraints: Constraints {
                    max_length: Some(2),
                    ..Default::default()
                },
            },
            Pattern::Enumerated(vec![Value::string("b"), Value::string("a")]),
            Pattern::Regex(RegexPattern::new(r"(?:ab|cd)+-\d{3}[A-Z]?").unwrap()),
            Pattern::Regex(RegexPattern::new(r"\w+@example\.com").unwrap()),
            Pattern::ListOf {
                element: Box::new(Pattern::number()),
                min_items: Some(3),
                max_items: None,
            },
            order_pattern(),
            envelope_pattern(),
        ];
        for pattern in patterns {
            let example = pattern.generate_example();
            let outcome = pattern.matches(&example);
            assert!(outcome.is_ok(), "{pattern} rejected {example}: {outcome:?}");
        }
    }

    #[test]
    fn test_generation_is_stable() {
        let pattern = Pattern::Enumerated(vec![Value::string("first"), Value::string("second")]);
        assert_eq!(pattern.generate_example(), Value::string("first"));
        assert_eq!(Pattern::number().generate_example(), Value::number(0.0));
        assert_eq!(
            Pattern::Regex(RegexPattern::new(r"\d{3}").unwrap()).generate_example(),
            Value::string("000")
        );

        let with_default = Pattern::Typed {
            kind: ScalarKind::String,
            constraints: Constraints {
                default: Some(Value::string("hello")),
                ..Default::default()
            },
        };
        assert_eq!(with_default.generate_example(), Value::string("hello"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(matches!(
            RegexPattern::new("(unclosed"),
            Err(DefinitionError::InvalidRegex { .. })
        ));
    }
}
