//! Contract files.
//!
//! A contract lists scenarios (and SOAP operations) with their request and
//! response patterns. The same [`ScenarioDefinition`] shape, sent as JSON,
//! is the payload of the expectation admin endpoint.

use crate::error::DefinitionError;
use crate::pattern::{
    ChildPattern, Constraints, ElementPattern, KeyedPatterns, Occurs, Pattern, RegexPattern,
    ScalarKind,
};
use crate::scenario::{LiteralBody, PathPattern, Scenario};
use crate::soap::SoapOperation;
use crate::value::Value;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A contract file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    /// Specification name used in compatibility reports
    #[serde(default)]
    pub name: Option<String>,

    /// Service type reported alongside the specification (e.g. "SOAP")
    #[serde(default)]
    pub service_type: Option<String>,

    /// HTTP scenarios
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,

    /// Operations emitted by a WSDL converter
    #[serde(default)]
    pub soap_operations: Vec<SoapOperationDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl ContractConfig {
    /// Load a contract from a YAML or JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract {}", path.display()))?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let mut config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        if config.name.is_none() {
            config.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML contract.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the contract by building every scenario.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, scenario) in self.scenarios.iter().enumerate() {
            scenario
                .to_scenario()
                .map_err(|e| anyhow::anyhow!("Scenario {}: {}", i, e))?;
        }
        for (i, operation) in self.soap_operations.iter().enumerate() {
            operation
                .to_operation()
                .and_then(|op| op.to_scenario())
                .map_err(|e| anyhow::anyhow!("SOAP operation {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Runtime scenarios in declaration order, HTTP scenarios first.
    pub fn to_scenarios(&self) -> Result<Vec<Scenario>, DefinitionError> {
        let mut scenarios = self
            .scenarios
            .iter()
            .map(ScenarioDefinition::to_scenario)
            .collect::<Result<Vec<_>, _>>()?;
        for operation in &self.soap_operations {
            scenarios.push(operation.to_operation()?.to_scenario()?);
        }
        Ok(scenarios)
    }

    pub fn specification_name(&self) -> &str {
        self.name.as_deref().unwrap_or("contract")
    }
}

/// A single scenario definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    /// Scenario name, unique within a contract
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Request patterns
    pub request: RequestDefinition,

    /// Response to return
    pub response: ResponseDefinition,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

impl ScenarioDefinition {
    /// Build the runtime scenario.
    pub fn to_scenario(&self) -> Result<Scenario, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.request.method.trim().is_empty() {
            return Err(DefinitionError::EmptyMethod {
                scenario: self.name.clone(),
            });
        }
        self.response.validate(&self.name)?;

        let path = PathPattern::parse(&self.request.path)?;
        let mut scenario = Scenario::new(
            self.name.clone(),
            self.request.method.trim(),
            path,
            self.response.status,
        );
        scenario.description = self.description.clone();
        scenario.query = keyed_patterns(&self.request.query, false)?;
        scenario.headers = keyed_patterns(&self.request.headers, true)?;
        if let Some(body) = &self.request.body {
            scenario.request_body = body.to_pattern()?;
        }
        scenario.response_headers = keyed_patterns(&self.response.headers, false)?;
        if let Some(body) = &self.response.body {
            scenario.response_body = body.to_pattern()?;
        }
        if let Some(literal) = &self.response.literal {
            literal.to_bytes()?;
            scenario.literal_body = Some(LiteralBody {
                content: literal.clone(),
                template: self.response.template,
            });
        }
        scenario.delay = self.delay.clone();
        Ok(scenario)
    }
}

fn keyed_patterns(
    definitions: &BTreeMap<String, ParameterDefinition>,
    lowercase: bool,
) -> Result<KeyedPatterns, DefinitionError> {
    let mut keyed = KeyedPatterns::new();
    for (name, definition) in definitions {
        let name = if lowercase {
            name.to_lowercase()
        } else {
            name.clone()
        };
        keyed.insert(name, definition.pattern.to_pattern()?, definition.optional);
    }
    Ok(keyed)
}

/// Request matching patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    /// HTTP method
    pub method: String,

    /// Path template, e.g. `/users/{id:number}`
    pub path: String,

    /// Query parameter patterns
    #[serde(default)]
    pub query: BTreeMap<String, ParameterDefinition>,

    /// Header patterns (names are case-insensitive)
    #[serde(default)]
    pub headers: BTreeMap<String, ParameterDefinition>,

    /// Body pattern (absent = any body)
    #[serde(default)]
    pub body: Option<PatternDefinition>,
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response header patterns
    #[serde(default)]
    pub headers: BTreeMap<String, ParameterDefinition>,

    /// Response body pattern, rendered through example generation
    #[serde(default)]
    pub body: Option<PatternDefinition>,

    /// Literal canned body, returned verbatim
    #[serde(default)]
    pub literal: Option<ResponseBody>,

    /// Whether the literal body is a template
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self, scenario: &str) -> Result<(), DefinitionError> {
        if self.status < 100 || self.status > 599 {
            return Err(DefinitionError::InvalidStatus {
                scenario: scenario.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }
}

/// A named parameter (query, header, object property, XML attribute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(default)]
    pub optional: bool,

    #[serde(flatten)]
    pub pattern: PatternDefinition,
}

/// An object property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(flatten)]
    pub pattern: PatternDefinition,
}

/// Pattern definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternDefinition {
    /// Any value
    Any,
    /// Exactly this JSON value
    Exact { value: serde_json::Value },
    /// Exactly this XML document
    XmlExact { value: String },
    /// Typed string
    String {
        #[serde(default)]
        min_length: Option<usize>,
        #[serde(default)]
        max_length: Option<usize>,
        #[serde(default)]
        default: Option<String>,
    },
    /// Typed number
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        default: Option<f64>,
    },
    /// Typed boolean
    Boolean {
        #[serde(default)]
        default: Option<bool>,
    },
    /// One of the listed values
    Enum { values: Vec<serde_json::Value> },
    /// String matching a regex (anchored)
    Regex { pattern: String },
    /// List of items
    List {
        items: Box<PatternDefinition>,
        #[serde(default)]
        min_items: Option<usize>,
        #[serde(default)]
        max_items: Option<usize>,
    },
    /// Object with named properties; undeclared keys are allowed
    Object {
        #[serde(default)]
        properties: Vec<PropertyDefinition>,
    },
    /// XML element
    Xml(XmlElementDefinition),
}

/// XML element pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlElementDefinition {
    /// Tag name; without a prefix it matches any namespace prefix
    pub name: String,

    #[serde(default)]
    pub attributes: Vec<PropertyDefinition>,

    #[serde(default)]
    pub children: Vec<XmlChildDefinition>,

    /// Leaf text pattern
    #[serde(default)]
    pub text: Option<Box<PatternDefinition>>,
}

/// A child element with its occurrence bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlChildDefinition {
    #[serde(default = "default_occurs")]
    pub min_occurs: usize,

    #[serde(default = "default_max_occurs")]
    pub max_occurs: Option<usize>,

    /// No upper bound (overrides `max_occurs`)
    #[serde(default)]
    pub unbounded: bool,

    #[serde(flatten)]
    pub element: XmlElementDefinition,
}

fn default_occurs() -> usize {
    1
}

fn default_max_occurs() -> Option<usize> {
    Some(1)
}

impl PatternDefinition {
    /// Build the runtime pattern.
    pub fn to_pattern(&self) -> Result<Pattern, DefinitionError> {
        let pattern = match self {
            PatternDefinition::Any => Pattern::Any,
            PatternDefinition::Exact { value } => Pattern::Exact(Value::from(value.clone())),
            PatternDefinition::XmlExact { value } => Pattern::Exact(Value::parse_xml(value)?),
            PatternDefinition::String {
                min_length,
                max_length,
                default,
            } => {
                check_order(*min_length, *max_length, "min_length", "max_length")?;
                Pattern::Typed {
                    kind: ScalarKind::String,
                    constraints: Constraints {
                        min_length: *min_length,
                        max_length: *max_length,
                        default: default.clone().map(Value::String),
                        ..Default::default()
                    },
                }
            }
            PatternDefinition::Number { min, max, default } => {
                check_order(*min, *max, "min", "max")?;
                Pattern::Typed {
                    kind: ScalarKind::Number,
                    constraints: Constraints {
                        min: *min,
                        max: *max,
                        default: default.map(Value::number),
                        ..Default::default()
                    },
                }
            }
            PatternDefinition::Boolean { default } => Pattern::Typed {
                kind: ScalarKind::Boolean,
                constraints: Constraints {
                    default: default.map(Value::Boolean),
                    ..Default::default()
                },
            },
            PatternDefinition::Enum { values } => {
                if values.is_empty() {
                    return Err(DefinitionError::InvalidPattern(
                        "enum needs at least one value".to_string(),
                    ));
                }
                Pattern::Enumerated(values.iter().cloned().map(Value::from).collect())
            }
            PatternDefinition::Regex { pattern } => Pattern::Regex(RegexPattern::new(pattern)?),
            PatternDefinition::List {
                items,
                min_items,
                max_items,
            } => {
                check_order(*min_items, *max_items, "min_items", "max_items")?;
                Pattern::ListOf {
                    element: Box::new(items.to_pattern()?),
                    min_items: *min_items,
                    max_items: *max_items,
                }
            }
            PatternDefinition::Object { properties } => {
                let mut keyed = KeyedPatterns::new();
                for property in properties {
                    keyed.insert(
                        property.name.clone(),
                        property.pattern.to_pattern()?,
                        property.optional,
                    );
                }
                Pattern::KeyedMap(keyed)
            }
            PatternDefinition::Xml(element) => Pattern::TreeElement(element.to_element()?),
        };
        check_default(&pattern)?;
        Ok(pattern)
    }
}

impl XmlElementDefinition {
    pub fn to_element(&self) -> Result<ElementPattern, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::InvalidPattern(
                "xml element needs a name".to_string(),
            ));
        }
        let mut element = ElementPattern::new(self.name.clone());
        for attribute in &self.attributes {
            element.attributes.insert(
                attribute.name.clone(),
                attribute.pattern.to_pattern()?,
                attribute.optional,
            );
        }
        for child in &self.children {
            let max = if child.unbounded {
                None
            } else {
                child.max_occurs
            };
            check_order(Some(child.min_occurs), max, "min_occurs", "max_occurs")?;
            element.children.push(ChildPattern {
                pattern: Pattern::TreeElement(child.element.to_element()?),
                occurs: Occurs {
                    min: child.min_occurs,
                    max,
                },
            });
        }
        if let Some(text) = &self.text {
            element.text = Some(Box::new(text.to_pattern()?));
        }
        Ok(element)
    }
}

/// An embedded default is served as-is, so it must satisfy its own pattern.
fn check_default(pattern: &Pattern) -> Result<(), DefinitionError> {
    let Pattern::Typed {
        constraints:
            Constraints {
                default: Some(default),
                ..
            },
        ..
    } = pattern
    else {
        return Ok(());
    };
    pattern.matches(default).map_err(|mismatches| {
        let reasons: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
        DefinitionError::InvalidPattern(format!(
            "default {} does not satisfy its pattern: {}",
            default.serialize(),
            reasons.join("; ")
        ))
    })
}

fn check_order<T: PartialOrd + std::fmt::Display>(
    min: Option<T>,
    max: Option<T>,
    min_name: &str,
    max_name: &str,
) -> Result<(), DefinitionError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(DefinitionError::InvalidPattern(format!(
            "{min_name} ({min}) is greater than {max_name} ({max})"
        ))),
        _ => Ok(()),
    }
}

/// A SOAP operation as emitted by a WSDL converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoapOperationDefinition {
    /// Operation name
    pub name: String,

    /// Endpoint path
    #[serde(default = "default_soap_path")]
    pub path: String,

    /// SOAPAction header value
    #[serde(default)]
    pub soap_action: Option<String>,

    /// Request payload element (inside the SOAP Body)
    #[serde(default)]
    pub request: Option<XmlElementDefinition>,

    /// Response payload element (inside the SOAP Body)
    #[serde(default)]
    pub response: Option<XmlElementDefinition>,
}

fn default_soap_path() -> String {
    "/".to_string()
}

impl SoapOperationDefinition {
    pub fn to_operation(&self) -> Result<SoapOperation, DefinitionError> {
        Ok(SoapOperation {
            name: self.name.clone(),
            path: self.path.clone(),
            soap_action: self.soap_action.clone(),
            request: self.request.as_ref().map(|r| r.to_element()).transpose()?,
            response: self.response.as_ref().map(|r| r.to_element()).transpose()?,
        })
    }
}

/// Literal response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DefinitionError> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => serde_json::to_vec(content)
                .map_err(|e| DefinitionError::InvalidBody(e.to_string())),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| DefinitionError::InvalidBody(format!("invalid base64: {e}")))
            }
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched scenarios
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Status of the diagnostic response for unmatched requests
    #[serde(default = "default_unmatched_status")]
    pub unmatched_status: u16,

    /// Reject request body keys a scenario does not declare
    #[serde(default)]
    pub strict_bodies: bool,

    /// Content type for generated bodies that do not imply one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            unmatched_status: default_unmatched_status(),
            strict_bodies: false,
            default_content_type: default_content_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_unmatched_status() -> u16 {
    400
}

fn default_content_type() -> String {
    "application/json".to_string()
}
