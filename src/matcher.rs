//! Request matching logic.
//!
//! Matches incoming requests against scenarios, keeping every candidate's
//! mismatches so an unmatched request can be diagnosed.

use crate::error::ParseError;
use crate::pattern::{MatchOptions, Mismatch};
use crate::scenario::{HttpRequest, Scenario};
use serde::Serialize;
use std::collections::HashMap;

/// Context captured during matching (for template variables).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    /// Path parameters extracted from template matching
    pub path_params: HashMap<String, String>,
    /// Query parameters
    pub query_params: HashMap<String, String>,
    /// Request headers keyed by lower-cased name
    pub headers: HashMap<String, String>,
}

/// A candidate with the request's method and path shape that rejected it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRejection {
    pub scenario: String,
    pub method: String,
    pub path: String,
    pub mismatches: Vec<Mismatch>,
}

impl CandidateRejection {
    fn new(scenario: &Scenario, mismatches: Vec<Mismatch>) -> Self {
        Self {
            scenario: scenario.name.clone(),
            method: scenario.method.clone(),
            path: scenario.path.template().to_string(),
            mismatches,
        }
    }
}

/// Why no scenario was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No scenario has this method and path.
    NoMatchingPath,
    /// Some scenarios have the method and path shape but none accepted the request.
    NoMatchingScenario,
    /// The body does not parse as its declared content type.
    MalformedBody,
}

/// Diagnostic for an unmatched request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchFailure {
    pub kind: FailureKind,
    pub method: String,
    pub path: String,
    pub candidates: Vec<CandidateRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MatchFailure {
    /// Failure for a request whose body could not be parsed.
    pub fn malformed_body(method: &str, path: &str, error: &ParseError) -> Self {
        Self {
            kind: FailureKind::MalformedBody,
            method: method.to_uppercase(),
            path: path.to_string(),
            candidates: Vec::new(),
            detail: Some(error.to_string()),
        }
    }

    pub fn message(&self) -> String {
        match self.kind {
            FailureKind::MalformedBody => format!(
                "{} {} has a malformed body: {}",
                self.method,
                self.path,
                self.detail.as_deref().unwrap_or("unknown parse error")
            ),
            FailureKind::NoMatchingPath => {
                format!("No scenario is defined for {} {}", self.method, self.path)
            }
            FailureKind::NoMatchingScenario => format!(
                "{} {} was rejected by {} candidate scenario(s)",
                self.method,
                self.path,
                self.candidates.len()
            ),
        }
    }
}

/// Result of matching a request against scenarios.
#[derive(Debug)]
pub enum MatchResult<'a> {
    Success {
        /// The matched scenario
        scenario: &'a Scenario,
        /// Context captured during matching
        bindings: Bindings,
    },
    Failure(MatchFailure),
}

impl<'a> MatchResult<'a> {
    pub fn scenario(&self) -> Option<&'a Scenario> {
        match self {
            MatchResult::Success { scenario, .. } => Some(scenario),
            MatchResult::Failure(_) => None,
        }
    }
}

/// Request matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    /// Reject body keys the scenario does not declare
    strict_bodies: bool,
}

impl Matcher {
    pub fn new(strict_bodies: bool) -> Self {
        Self { strict_bodies }
    }

    /// Find the best matching scenario for a request.
    ///
    /// Among scenarios that accept the request the one with the most
    /// specific path wins; equal specificity goes to the earliest in
    /// `scenarios`.
    pub fn find_best_match<'a>(
        &self,
        request: &HttpRequest,
        scenarios: &'a [Scenario],
    ) -> MatchResult<'a> {
        let method = request.method.to_uppercase();
        let mut best: Option<(Vec<bool>, &'a Scenario, Bindings)> = None;
        let mut rejections = Vec::new();

        for scenario in scenarios {
            if scenario.method != method {
                continue;
            }
            let path_params = match scenario.path.matches(&request.path) {
                Ok(params) => params,
                // Literal segments filter; bad parameter values are diagnosed
                Err(mismatches) => {
                    if scenario.path.has_shape_of(&request.path) {
                        rejections.push(CandidateRejection::new(scenario, mismatches));
                    }
                    continue;
                }
            };

            let mismatches = self.check_request(scenario, request);
            if !mismatches.is_empty() {
                rejections.push(CandidateRejection::new(scenario, mismatches));
                continue;
            }

            let specificity = scenario.path.specificity();
            let better = match &best {
                Some((current, _, _)) => specificity > *current,
                None => true,
            };
            if better {
                best = Some((
                    specificity,
                    scenario,
                    Bindings {
                        path_params,
                        query_params: request.query.iter().cloned().collect(),
                        headers: request
                            .headers
                            .iter()
                            .map(|(k, v)| (k.to_lowercase(), v.clone()))
                            .collect(),
                    },
                ));
            }
        }

        match best {
            Some((_, scenario, bindings)) => MatchResult::Success { scenario, bindings },
            None => MatchResult::Failure(MatchFailure {
                kind: if rejections.is_empty() {
                    FailureKind::NoMatchingPath
                } else {
                    FailureKind::NoMatchingScenario
                },
                method,
                path: request.path.clone(),
                candidates: rejections,
                detail: None,
            }),
        }
    }

    fn check_request(&self, scenario: &Scenario, request: &HttpRequest) -> Vec<Mismatch> {
        let mut mismatches = Vec::new();

        scenario.query.check_map(
            &request.query_map(),
            "query",
            MatchOptions::text(),
            &mut mismatches,
        );
        scenario.headers.check_map(
            &request.header_map(),
            "headers",
            MatchOptions::text(),
            &mut mismatches,
        );
        if let Err(errors) = scenario.request_body.matches_at(
            &request.body,
            "body",
            MatchOptions::default().strict(self.strict_bodies),
        ) {
            mismatches.extend(errors);
        }

        mismatches
    }
}
