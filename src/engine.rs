//! Stub dispatch engine.

use crate::config::{ContractConfig, GlobalSettings, ResponseBody, ScenarioDefinition};
use crate::error::{DefinitionError, ParseError};
use crate::matcher::{Bindings, MatchFailure, MatchResult, Matcher};
use crate::pattern::Pattern;
use crate::scenario::{HttpRequest, HttpResponse, LiteralBody, Scenario};
use crate::template::TemplateEngine;
use crate::value::Value;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// An immutable view of the scenarios requests are matched against.
#[derive(Debug)]
pub struct ScenarioSnapshot {
    /// Bumped on every expectation change
    pub version: u64,
    /// Expectations (newest first) followed by static scenarios
    pub scenarios: Vec<Scenario>,
    /// Number of leading entries in `scenarios` that are expectations
    pub expectation_count: usize,
}

impl ScenarioSnapshot {
    pub fn expectations(&self) -> &[Scenario] {
        &self.scenarios[..self.expectation_count]
    }
}

/// Listing entry for the administrative channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub method: String,
    pub path: String,
    pub status: u16,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            method: scenario.method.clone(),
            path: scenario.path.template().to_string(),
            status: scenario.status,
        }
    }
}

/// Stub Engine
///
/// Answers requests from the best matching scenario and keeps the set of
/// runtime expectations.
pub struct StubEngine {
    static_scenarios: Vec<Scenario>,
    snapshot: RwLock<Arc<ScenarioSnapshot>>,
    matcher: Matcher,
    template_engine: TemplateEngine,
    settings: GlobalSettings,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests matched to scenarios.
    requests_matched: AtomicU64,
    /// Total requests unmatched.
    requests_unmatched: AtomicU64,
}

impl StubEngine {
    /// Create a new engine with the given static scenarios.
    pub fn new(scenarios: Vec<Scenario>, settings: GlobalSettings) -> Self {
        info!(
            scenarios = scenarios.len(),
            strict_bodies = settings.strict_bodies,
            "Stub engine initialized"
        );

        let snapshot = ScenarioSnapshot {
            version: 0,
            scenarios: scenarios.clone(),
            expectation_count: 0,
        };

        Self {
            static_scenarios: scenarios,
            snapshot: RwLock::new(Arc::new(snapshot)),
            matcher: Matcher::new(settings.strict_bodies),
            template_engine: TemplateEngine::new(),
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Create from a loaded contract.
    pub fn from_config(config: &ContractConfig) -> Result<Self, DefinitionError> {
        Ok(Self::new(config.to_scenarios()?, config.settings.clone()))
    }

    /// Create from a YAML contract string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config = ContractConfig::from_yaml(yaml)?;
        Ok(Self::from_config(&config)?)
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// The current snapshot. Matching against it never blocks writers.
    pub async fn snapshot(&self) -> Arc<ScenarioSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Current expectations, newest first.
    pub async fn expectations(&self) -> Vec<ScenarioSummary> {
        self.snapshot()
            .await
            .expectations()
            .iter()
            .map(ScenarioSummary::from)
            .collect()
    }

    /// Register an expectation ahead of every existing scenario.
    ///
    /// Returns the new snapshot version. An invalid definition leaves the
    /// engine untouched.
    pub async fn add_expectation(
        &self,
        definition: &ScenarioDefinition,
    ) -> Result<u64, DefinitionError> {
        let scenario = definition.to_scenario()?;
        Ok(self.add_expectation_scenario(scenario).await)
    }

    /// Register an already built scenario as an expectation.
    pub async fn add_expectation_scenario(&self, scenario: Scenario) -> u64 {
        let mut guard = self.snapshot.write().await;
        let name = scenario.name.clone();
        let operation = scenario.operation();

        let mut scenarios = Vec::with_capacity(guard.scenarios.len() + 1);
        scenarios.push(scenario);
        scenarios.extend(guard.scenarios.iter().cloned());
        let next = ScenarioSnapshot {
            version: guard.version + 1,
            scenarios,
            expectation_count: guard.expectation_count + 1,
        };
        let version = next.version;
        *guard = Arc::new(next);

        info!(scenario = %name, operation = %operation, version, "Expectation added");
        version
    }

    /// Drop every expectation. Returns how many were removed.
    pub async fn clear_expectations(&self) -> usize {
        let mut guard = self.snapshot.write().await;
        let removed = guard.expectation_count;
        let version = guard.version + 1;
        *guard = Arc::new(ScenarioSnapshot {
            version,
            scenarios: self.static_scenarios.clone(),
            expectation_count: 0,
        });

        info!(removed, version, "Expectations cleared");
        removed
    }

    /// Replace all expectations at once. The first definition ends up
    /// first; nothing changes if any definition is invalid.
    pub async fn replace_expectations(
        &self,
        definitions: &[ScenarioDefinition],
    ) -> Result<u64, DefinitionError> {
        let expectations = definitions
            .iter()
            .map(ScenarioDefinition::to_scenario)
            .collect::<Result<Vec<_>, _>>()?;

        let mut guard = self.snapshot.write().await;
        let expectation_count = expectations.len();
        let mut scenarios = expectations;
        scenarios.extend(self.static_scenarios.iter().cloned());
        let version = guard.version + 1;
        *guard = Arc::new(ScenarioSnapshot {
            version,
            scenarios,
            expectation_count,
        });

        info!(expectations = expectation_count, version, "Expectations replaced");
        Ok(version)
    }

    /// Answer one request.
    pub async fn dispatch(&self, request: &HttpRequest) -> HttpResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.snapshot().await;
        let (response, delay) = match self.matcher.find_best_match(request, &snapshot.scenarios) {
            MatchResult::Success { scenario, bindings } => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_matches {
                    info!(
                        scenario = %scenario.name,
                        method = %request.method,
                        path = %request.path,
                        "Request matched scenario"
                    );
                }
                (
                    self.build_response(scenario, &bindings, request),
                    scenario.delay.as_ref().map(|d| d.calculate()),
                )
            }
            MatchResult::Failure(failure) => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        candidates = failure.candidates.len(),
                        "No matching scenario found"
                    );
                }
                (self.build_failure_response(&failure), None)
            }
        };

        if let Some(delay_ms) = delay.filter(|ms| *ms > 0) {
            debug!(delay_ms, "Applying delay");
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
        }

        response
    }

    /// Answer a request whose body does not parse as its declared
    /// content type. Counted as unmatched.
    pub fn reject_malformed(&self, request: &HttpRequest, error: &ParseError) -> HttpResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            warn!(
                method = %request.method,
                path = %request.path,
                error = %error,
                "Malformed request body"
            );
        }
        self.build_failure_response(&MatchFailure::malformed_body(
            &request.method,
            &request.path,
            error,
        ))
    }

    /// Build a response from a matched scenario.
    fn build_response(
        &self,
        scenario: &Scenario,
        bindings: &Bindings,
        request: &HttpRequest,
    ) -> HttpResponse {
        let mut headers: Vec<(String, String)> = scenario
            .response_headers
            .iter()
            .map(|(name, pattern)| {
                let value = match pattern {
                    Pattern::Exact(value) => value.to_text(),
                    other => other.generate_example().to_text(),
                };
                (name.to_string(), value)
            })
            .collect();

        let (body, content_type) = match &scenario.literal_body {
            Some(literal) => (
                self.render_literal(scenario, literal, bindings, request),
                Some(literal.content.content_type().to_string()),
            ),
            None => match &scenario.response_body {
                Pattern::Any => (Vec::new(), None),
                pattern => {
                    let example = pattern.generate_example();
                    let content_type = match example {
                        Value::Tree(_) | Value::String(_) => example.content_type().to_string(),
                        _ => self.settings.default_content_type.clone(),
                    };
                    (example.serialize().into_bytes(), Some(content_type))
                }
            },
        };

        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if let Some(content_type) = content_type.filter(|_| !has_content_type) {
            headers.push(("Content-Type".to_string(), content_type));
        }

        HttpResponse {
            status: scenario.status,
            headers,
            body,
        }
    }

    /// Literal bodies are returned verbatim unless marked as templates.
    fn render_literal(
        &self,
        scenario: &Scenario,
        literal: &LiteralBody,
        bindings: &Bindings,
        request: &HttpRequest,
    ) -> Vec<u8> {
        let rendered = match (&literal.content, literal.template) {
            (ResponseBody::Text { content }, true) => self
                .template_engine
                .render(content, request, bindings)
                .map(String::into_bytes),
            (ResponseBody::Json { content }, true) => self
                .template_engine
                .render_json(content, request, bindings)
                .map(|v| v.to_string().into_bytes()),
            _ => return literal.content.to_bytes().unwrap_or_default(),
        };

        rendered.unwrap_or_else(|e| {
            warn!(scenario = %scenario.name, error = %e, "Template rendering failed");
            literal.content.to_bytes().unwrap_or_default()
        })
    }

    /// Build the diagnostic response for an unmatched request.
    fn build_failure_response(&self, failure: &MatchFailure) -> HttpResponse {
        let mut body = serde_json::json!({
            "error": failure.kind,
            "message": failure.message(),
            "request": {
                "method": failure.method,
                "path": failure.path,
            },
            "candidates": failure.candidates,
        });
        if let Some(detail) = &failure.detail {
            body["detail"] = serde_json::Value::String(detail.clone());
        }

        HttpResponse {
            status: self.settings.unmatched_status,
            headers: vec![(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )],
            body: serde_json::to_vec_pretty(&body).unwrap_or_default(),
        }
    }
}
