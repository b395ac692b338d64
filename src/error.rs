//! Error types.

use std::io;
use thiserror::Error;

/// Malformed JSON or XML input.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("XML document has no root element")]
    EmptyDocument,

    #[error("XML element <{0}> is never closed")]
    UnclosedElement(String),

    #[error("unexpected content after the XML root element")]
    TrailingContent,
}

/// A scenario, pattern or expectation definition that cannot be turned into
/// a runtime scenario.
///
/// When it comes from the administrative channel this is the
/// "invalid expectation" rejection; the engine state is left untouched.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("scenario name cannot be empty")]
    EmptyName,

    #[error("scenario {scenario}: HTTP method cannot be empty")]
    EmptyMethod { scenario: String },

    #[error("scenario {scenario}: invalid status code {status}")]
    InvalidStatus { scenario: String, status: u16 },

    #[error("invalid path template {template:?}: {reason}")]
    InvalidPath { template: String, reason: String },

    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid literal body: {0}")]
    InvalidBody(String),

    #[error("invalid XML literal: {0}")]
    InvalidXml(#[from] ParseError),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Stub server lifecycle failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("server task failed: {0}")]
    Task(String),
}
