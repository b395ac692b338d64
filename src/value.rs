//! Unified value model for JSON, XML and scalar data.
//!
//! Request and response bodies, path segments, query parameters and headers
//! are all turned into a [`Value`] before matching, so patterns never have to
//! care where a value came from.

use crate::error::ParseError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Number;
use std::fmt;

/// A structural value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Map(ValueMap),
    Tree(TreeNode),
}

/// String-keyed map with unique keys that keeps insertion order.
///
/// Equality ignores order; serialization does not.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(String, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, replacing the value in place if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

/// An XML element.
#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    /// Qualified tag name, prefix included (`soapenv:Envelope`).
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements. Non-whitespace text in mixed content appears here
    /// as [`Value::String`].
    pub children: Vec<Value>,
    /// Text of a leaf element, verbatim.
    pub text: Option<String>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Tag name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping mixed-content text.
    pub fn elements(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.iter().filter_map(|c| match c {
            Value::Tree(node) => Some(node),
            _ => None,
        })
    }

    fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(k, v)| other.attribute(k) == Some(v.as_str()))
            && self.children == other.children
            && self.text_or_empty() == other.text_or_empty()
    }
}

/// Strip a namespace prefix from a qualified XML name.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Tree(a), Value::Tree(b)) => a == b,
            _ => false,
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    a.as_f64() == b.as_f64()
}

impl Value {
    /// Parse JSON text.
    pub fn parse_json(text: &str) -> Result<Value, ParseError> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Ok(Value::from(json))
    }

    /// Parse an XML document into its root element.
    pub fn parse_xml(text: &str) -> Result<Value, ParseError> {
        parse_xml_document(text).map(Value::Tree)
    }

    /// Interpret a raw HTTP body according to its `Content-Type`.
    ///
    /// JSON and XML media types must parse as declared; `text/*` bodies stay
    /// strings. Without a usable media type the body is sniffed: empty is
    /// `Null`, `<` is XML, `{` or `[` is JSON, other text is a JSON scalar
    /// when it parses as one and a plain string otherwise.
    pub fn parse_body(text: &str, content_type: Option<&str>) -> Result<Value, ParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }

        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|mt| mt.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if media_type.ends_with("json") {
            return Value::parse_json(trimmed);
        }
        if media_type.ends_with("xml") {
            return Value::parse_xml(text);
        }
        if media_type.starts_with("text/") {
            return Ok(Value::String(text.to_string()));
        }

        match trimmed.as_bytes()[0] {
            b'<' => Value::parse_xml(text),
            b'{' | b'[' => Value::parse_json(trimmed),
            _ => Ok(Value::parse_json(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))),
        }
    }

    /// Number from an `f64`, kept integral when it has no fractional part.
    pub fn number(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::Number(Number::from(n as i64))
        } else {
            Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
        }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    /// Short name of the runtime type, used in mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Tree(_) => "xml element",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Plain-text rendering, as it would appear in a header, query
    /// parameter, path segment or XML attribute.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Tree(node) => node_to_xml(node),
            Value::List(_) | Value::Map(_) => self.to_json_string(),
        }
    }

    /// Render as an HTTP body: XML for trees, raw text for strings,
    /// JSON for everything else.
    pub fn serialize(&self) -> String {
        match self {
            Value::Tree(node) => node_to_xml(node),
            Value::String(s) => s.clone(),
            _ => self.to_json_string(),
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn to_xml_string(&self) -> Option<String> {
        match self {
            Value::Tree(node) => Some(node_to_xml(node)),
            _ => None,
        }
    }

    /// Convert to a `serde_json::Value`. Trees become their XML text.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Tree(node) => serde_json::Value::String(node_to_xml(node)),
        }
    }

    /// Suggested `Content-Type` when this value is returned as a body.
    pub fn content_type(&self) -> &'static str {
        match self {
            Value::Tree(_) => "text/xml",
            Value::String(_) => "text/plain",
            _ => "application/json",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<TreeNode> for Value {
    fn from(node: TreeNode) -> Self {
        Value::Tree(node)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tree(node) => f.write_str(&node_to_xml(node)),
            _ => f.write_str(&self.to_json_string()),
        }
    }
}

// XML parsing

struct OpenElement {
    node: TreeNode,
    /// Text and element children in document order, before whitespace
    /// collapsing.
    raw: Vec<Value>,
}

impl OpenElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut node = TreeNode::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
            node.attributes.push((key, value));
        }
        Ok(Self {
            node,
            raw: Vec::new(),
        })
    }

    fn push_text(&mut self, text: String) {
        if let Some(Value::String(last)) = self.raw.last_mut() {
            last.push_str(&text);
        } else {
            self.raw.push(Value::String(text));
        }
    }

    fn finish(mut self) -> TreeNode {
        let has_elements = self.raw.iter().any(|v| matches!(v, Value::Tree(_)));
        if has_elements {
            self.node.children = self
                .raw
                .into_iter()
                .filter(|v| match v {
                    Value::String(s) => !s.trim().is_empty(),
                    _ => true,
                })
                .collect();
        } else {
            let text: String = self
                .raw
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            if !text.is_empty() {
                self.node.text = Some(text);
            }
        }
        self.node
    }
}

fn parse_xml_document(text: &str) -> Result<TreeNode, ParseError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<TreeNode> = None;

    let xml_error = |reader: &Reader<&[u8]>, message: String| ParseError::Xml {
        position: reader.buffer_position() as u64,
        message,
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(&reader, e.to_string()))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(ParseError::TrailingContent);
                }
                let open = OpenElement::from_start(&start).map_err(|m| xml_error(&reader, m))?;
                stack.push(open);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(ParseError::TrailingContent);
                }
                let node = OpenElement::from_start(&start)
                    .map_err(|m| xml_error(&reader, m))?
                    .finish();
                match stack.last_mut() {
                    Some(parent) => parent.raw.push(Value::Tree(node)),
                    None => root = Some(node),
                }
            }
            Event::End(_) => {
                let Some(open) = stack.pop() else {
                    return Err(xml_error(&reader, "unbalanced closing tag".to_string()));
                };
                let node = open.finish();
                match stack.last_mut() {
                    Some(parent) => parent.raw.push(Value::Tree(node)),
                    None => root = Some(node),
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| xml_error(&reader, e.to_string()))?
                    .into_owned();
                match stack.last_mut() {
                    Some(open) => open.push_text(text),
                    None if text.trim().is_empty() => {}
                    None if root.is_some() => return Err(ParseError::TrailingContent),
                    None => {
                        return Err(xml_error(&reader, "text outside of root element".into()))
                    }
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(open) = stack.last_mut() {
                    open.push_text(text);
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::UnclosedElement(open.node.name));
    }
    root.ok_or(ParseError::EmptyDocument)
}

// XML serialization

fn node_to_xml(node: &TreeNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &TreeNode, out: &mut String) {
    out.push('<');
    out.push_str(&node.name);
    for (key, value) in &node.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&quick_xml::escape::escape(value.as_str()));
        out.push('"');
    }

    if node.children.is_empty() && node.text.as_deref().unwrap_or("").is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = &node.text {
        out.push_str(&quick_xml::escape::escape(text.as_str()));
    }
    for child in &node.children {
        match child {
            Value::Tree(element) => write_node(element, out),
            other => out.push_str(&quick_xml::escape::escape(other.to_text().as_str())),
        }
    }
    out.push_str("</");
    out.push_str(&node.name);
    out.push('>');
}
