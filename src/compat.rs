//! Backward compatibility between two versions of a contract.
//!
//! A new version is compatible when its request patterns accept everything
//! the old ones accepted and the old response patterns accept everything the
//! new ones can produce. Both checks reduce to one question: does the wider
//! pattern accept every value the narrower one does?

use crate::pattern::{
    child_path, ChildPattern, Constraints, ElementPattern, KeyedPatterns, Occurs, Pattern,
    ScalarKind,
};
use crate::scenario::{PathSegment, Scenario};
use crate::value::{local_name, Value};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Outcome for one `(path, method, responseCode)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityStatus {
    Compatible,
    Breaking,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityRow {
    pub path: String,
    pub method: String,
    pub response_code: u16,
    pub status: CompatibilityStatus,
    pub reasons: Vec<String>,
}

/// Which side of the exchange is being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// wider = new, narrower = old
    Request,
    /// wider = old, narrower = new
    Response,
}

#[derive(Debug, Clone, Copy)]
struct Comparison {
    direction: Direction,
    /// Values are read from text, so an unconstrained string takes anything
    text_mode: bool,
}

/// Compare two scenario sets, one row per operation and response code.
///
/// Rows follow the order operations first appear in `old`, then operations
/// only present in `new`; codes ascend within an operation.
pub fn check(old: &[Scenario], new: &[Scenario]) -> Vec<CompatibilityRow> {
    let old_ops = group_operations(old);
    let new_ops = group_operations(new);

    let mut rows = Vec::new();
    for (key, old_scenarios) in &old_ops {
        match lookup(&new_ops, key) {
            Some(new_scenarios) => rows.extend(compare_operation(old_scenarios, new_scenarios)),
            None => {
                for code in status_codes(old_scenarios) {
                    rows.push(row(
                        old_scenarios,
                        code,
                        CompatibilityStatus::Breaking,
                        vec!["operation was removed".to_string()],
                    ));
                }
            }
        }
    }
    for (key, new_scenarios) in &new_ops {
        if lookup(&old_ops, key).is_none() {
            for code in status_codes(new_scenarios) {
                rows.push(row(
                    new_scenarios,
                    code,
                    CompatibilityStatus::Unchanged,
                    vec!["operation was added".to_string()],
                ));
            }
        }
    }
    rows
}

pub fn has_breaking_changes(rows: &[CompatibilityRow]) -> bool {
    rows.iter()
        .any(|row| row.status == CompatibilityStatus::Breaking)
}

type OperationKey = (String, String);

fn group_operations(scenarios: &[Scenario]) -> Vec<(OperationKey, Vec<&Scenario>)> {
    let mut groups: Vec<(OperationKey, Vec<&Scenario>)> = Vec::new();
    let mut index: HashMap<OperationKey, usize> = HashMap::new();
    for scenario in scenarios {
        let key = (scenario.path.normalized(), scenario.method.clone());
        match index.get(&key) {
            Some(&i) => groups[i].1.push(scenario),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![scenario]));
            }
        }
    }
    groups
}

fn lookup<'a, 'b>(
    groups: &'a [(OperationKey, Vec<&'b Scenario>)],
    key: &OperationKey,
) -> Option<&'a [&'b Scenario]> {
    groups
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, scenarios)| scenarios.as_slice())
}

fn status_codes(scenarios: &[&Scenario]) -> BTreeSet<u16> {
    scenarios.iter().map(|s| s.status).collect()
}

fn row(
    scenarios: &[&Scenario],
    code: u16,
    status: CompatibilityStatus,
    reasons: Vec<String>,
) -> CompatibilityRow {
    let representative = scenarios
        .iter()
        .find(|s| s.status == code)
        .or_else(|| scenarios.first());
    CompatibilityRow {
        path: representative
            .map(|s| s.path.template().to_string())
            .unwrap_or_default(),
        method: representative.map(|s| s.method.clone()).unwrap_or_default(),
        response_code: code,
        status,
        reasons,
    }
}

fn compare_operation(old: &[&Scenario], new: &[&Scenario]) -> Vec<CompatibilityRow> {
    let old_codes = status_codes(old);
    let new_codes = status_codes(new);

    old_codes
        .union(&new_codes)
        .map(|&code| {
            let old_at: Vec<&Scenario> = old.iter().copied().filter(|s| s.status == code).collect();
            let new_at: Vec<&Scenario> = new.iter().copied().filter(|s| s.status == code).collect();

            if new_at.is_empty() {
                return row(
                    old,
                    code,
                    CompatibilityStatus::Compatible,
                    vec![format!("response {code} is no longer produced")],
                );
            }
            if old_at.is_empty() {
                return row(
                    new,
                    code,
                    CompatibilityStatus::Breaking,
                    vec![format!("new response {code} is not expected by existing consumers")],
                );
            }

            let reasons = compare_scenarios(&old_at, &new_at);
            let status = if !reasons.is_empty() {
                CompatibilityStatus::Breaking
            } else if same_shapes(&old_at, &new_at) {
                CompatibilityStatus::Unchanged
            } else {
                CompatibilityStatus::Compatible
            };
            row(new, code, status, reasons)
        })
        .collect()
}

/// Every old request must still be accepted by some new scenario, and every
/// new response must be accepted by some old scenario.
fn compare_scenarios(old: &[&Scenario], new: &[&Scenario]) -> Vec<String> {
    let mut reasons = Vec::new();

    for old_scenario in old {
        let attempts: Vec<Vec<String>> = new
            .iter()
            .map(|new_scenario| request_reasons(new_scenario, old_scenario))
            .collect();
        if let Some(first) = first_failure(attempts) {
            reasons.extend(first);
        }
    }
    for new_scenario in new {
        let attempts: Vec<Vec<String>> = old
            .iter()
            .map(|old_scenario| response_reasons(old_scenario, new_scenario))
            .collect();
        if let Some(first) = first_failure(attempts) {
            reasons.extend(first);
        }
    }

    reasons
}

/// `None` when any attempt succeeded, otherwise the first attempt's reasons.
fn first_failure(attempts: Vec<Vec<String>>) -> Option<Vec<String>> {
    if attempts.iter().any(Vec::is_empty) {
        None
    } else {
        attempts.into_iter().next()
    }
}

fn request_reasons(new: &Scenario, old: &Scenario) -> Vec<String> {
    let mut reasons = Vec::new();
    let text = Comparison {
        direction: Direction::Request,
        text_mode: true,
    };
    let body = Comparison {
        direction: Direction::Request,
        text_mode: false,
    };

    for (new_segment, old_segment) in new.path.segments().iter().zip(old.path.segments()) {
        if let (
            PathSegment::Param {
                name,
                pattern: wider,
            },
            PathSegment::Param {
                pattern: narrower, ..
            },
        ) = (new_segment, old_segment)
        {
            accepts_all(wider, narrower, &child_path("path", name), text, &mut reasons);
        }
    }
    keyed_accepts_all(&new.query, &old.query, "query", text, &mut reasons);
    keyed_accepts_all(&new.headers, &old.headers, "headers", text, &mut reasons);
    accepts_all(&new.request_body, &old.request_body, "body", body, &mut reasons);

    reasons
        .into_iter()
        .map(|reason| format!("request {reason}"))
        .collect()
}

fn response_reasons(old: &Scenario, new: &Scenario) -> Vec<String> {
    let mut reasons = Vec::new();
    let text = Comparison {
        direction: Direction::Response,
        text_mode: true,
    };
    let body = Comparison {
        direction: Direction::Response,
        text_mode: false,
    };

    keyed_accepts_all(
        &old.response_headers.lowercase_keys(),
        &new.response_headers.lowercase_keys(),
        "headers",
        text,
        &mut reasons,
    );
    accepts_all(&old.response_body, &new.response_body, "body", body, &mut reasons);

    reasons
        .into_iter()
        .map(|reason| format!("response {reason}"))
        .collect()
}

fn same_shapes(old: &[&Scenario], new: &[&Scenario]) -> bool {
    old.len() == new.len()
        && old.iter().zip(new).all(|(a, b)| {
            a.path == b.path
                && a.query == b.query
                && a.headers == b.headers
                && a.request_body == b.request_body
                && a.response_headers == b.response_headers
                && a.response_body == b.response_body
        })
}

/// Record a reason for every way `wider` fails to accept something
/// `narrower` accepts.
fn accepts_all(
    wider: &Pattern,
    narrower: &Pattern,
    path: &str,
    cmp: Comparison,
    reasons: &mut Vec<String>,
) {
    let at = |message: String| format!("{path}: {message}");

    match (wider, narrower) {
        (Pattern::Any, _) => {}
        (Pattern::Typed { kind, constraints }, _)
            if cmp.text_mode && is_unconstrained_string(*kind, constraints) && is_scalar(narrower) => {}
        (_, Pattern::Any) => {
            reasons.push(at(format!("any value is no longer accepted, now {wider}")))
        }

        (_, Pattern::Exact(value)) => {
            if !accepts_value(wider, value, cmp) {
                reasons.push(at(format!("{value} is no longer accepted by {wider}")));
            }
        }
        (_, Pattern::Enumerated(values)) => {
            let dropped: Vec<String> = values
                .iter()
                .filter(|v| !accepts_value(wider, v, cmp))
                .map(|v| v.to_string())
                .collect();
            if !dropped.is_empty() {
                reasons.push(at(format!(
                    "values [{}] are no longer accepted",
                    dropped.join(", ")
                )));
            }
        }

        (
            Pattern::Typed {
                kind: wide_kind,
                constraints: wide,
            },
            Pattern::Typed {
                kind: narrow_kind,
                constraints: narrow,
            },
        ) => {
            if wide_kind != narrow_kind {
                let (from, to) = narrower_label(cmp, narrow_kind.name(), wide_kind.name());
                reasons.push(at(format!("type changed from {from} to {to}")));
            } else {
                for problem in constraint_narrowing(wide, narrow) {
                    reasons.push(at(problem));
                }
            }
        }
        (
            Pattern::Typed {
                kind: ScalarKind::String,
                constraints,
            },
            Pattern::Regex(_),
        ) if constraints.min_length.is_none() && constraints.max_length.is_none() => {}
        (Pattern::Regex(wide), Pattern::Regex(narrow)) => {
            if wide.source() != narrow.source() {
                let (from, to) = narrower_label(cmp, narrow.source(), wide.source());
                reasons.push(at(format!("pattern changed from /{from}/ to /{to}/")));
            }
        }

        (
            Pattern::ListOf {
                element: wide_element,
                min_items: wide_min,
                max_items: wide_max,
            },
            Pattern::ListOf {
                element: narrow_element,
                min_items: narrow_min,
                max_items: narrow_max,
            },
        ) => {
            if !min_contains(wide_min.map(|n| n as f64), narrow_min.map(|n| n as f64))
                || !max_contains(wide_max.map(|n| n as f64), narrow_max.map(|n| n as f64))
            {
                reasons.push(at("list length bounds were narrowed".to_string()));
            }
            accepts_all(wide_element, narrow_element, &format!("{path}[]"), cmp, reasons);
        }

        (Pattern::KeyedMap(wide), Pattern::KeyedMap(narrow)) => {
            keyed_accepts_all(wide, narrow, path, cmp, reasons)
        }

        (Pattern::TreeElement(wide), Pattern::TreeElement(narrow)) => {
            element_accepts_all(wide, narrow, path, cmp, reasons)
        }

        _ => {
            let (from, to) = narrower_label(cmp, &narrower.to_string(), &wider.to_string());
            reasons.push(at(format!("type changed from {from} to {to}")));
        }
    }
}

/// (old, new) in reading order for messages.
fn narrower_label<T: ToString + ?Sized>(cmp: Comparison, narrower: &T, wider: &T) -> (String, String) {
    match cmp.direction {
        Direction::Request => (narrower.to_string(), wider.to_string()),
        Direction::Response => (wider.to_string(), narrower.to_string()),
    }
}

fn keyed_accepts_all(
    wide: &KeyedPatterns,
    narrow: &KeyedPatterns,
    path: &str,
    cmp: Comparison,
    reasons: &mut Vec<String>,
) {
    for (key, wide_pattern) in wide.iter() {
        let key_path = child_path(path, key);
        let required = !wide.is_optional(key);
        match narrow.get(key) {
            Some(narrow_pattern) => {
                if required && narrow.is_optional(key) {
                    reasons.push(format!(
                        "{key_path}: {}",
                        match cmp.direction {
                            Direction::Request => "optional key became required",
                            Direction::Response => "required key became optional",
                        }
                    ));
                }
                accepts_all(wide_pattern, narrow_pattern, &key_path, cmp, reasons);
            }
            None if required => reasons.push(format!(
                "{key_path}: {}",
                match cmp.direction {
                    Direction::Request => "required key was added",
                    Direction::Response => "required key was removed",
                }
            )),
            None => {}
        }
    }

    if cmp.direction == Direction::Response {
        for (key, _) in narrow.iter() {
            if wide.get(key).is_none() && !narrow.is_optional(key) {
                reasons.push(format!(
                    "{}: required key was added",
                    child_path(path, key)
                ));
            }
        }
    }
}

fn element_accepts_all(
    wide: &ElementPattern,
    narrow: &ElementPattern,
    path: &str,
    cmp: Comparison,
    reasons: &mut Vec<String>,
) {
    if local_name(&wide.name) != local_name(&narrow.name) {
        let (from, to) = narrower_label(cmp, narrow.name.as_str(), wide.name.as_str());
        reasons.push(format!("{path}: element changed from <{from}> to <{to}>"));
        return;
    }

    let text_cmp = Comparison {
        text_mode: true,
        ..cmp
    };
    keyed_accepts_all(
        &prefixed_attributes(&wide.attributes),
        &prefixed_attributes(&narrow.attributes),
        path,
        text_cmp,
        reasons,
    );
    match (&wide.text, &narrow.text) {
        (Some(wide_text), Some(narrow_text)) => {
            accepts_all(wide_text, narrow_text, path, text_cmp, reasons)
        }
        (Some(wide_text), None) => accepts_all(wide_text, &Pattern::Any, path, text_cmp, reasons),
        (None, _) => {}
    }

    for wide_child in &wide.children {
        let name = child_name(wide_child);
        let element_path = child_path(path, &name);
        match narrow.children.iter().find(|c| child_name(c) == name) {
            Some(narrow_child) => {
                if !occurs_contains(wide_child.occurs, narrow_child.occurs) {
                    reasons.push(format!("{element_path}: occurrence bounds were narrowed"));
                }
                accepts_all(
                    &wide_child.pattern,
                    &narrow_child.pattern,
                    &element_path,
                    cmp,
                    reasons,
                );
            }
            None if wide_child.occurs.min > 0 => reasons.push(format!(
                "{element_path}: {}",
                match cmp.direction {
                    Direction::Request => "required element was added",
                    Direction::Response => "required element was removed",
                }
            )),
            None => {}
        }
    }

    // Undeclared child elements are always rejected by the matcher
    for narrow_child in &narrow.children {
        let name = child_name(narrow_child);
        if !wide.children.iter().any(|c| child_name(c) == name) {
            reasons.push(format!(
                "{}: {}",
                child_path(path, &name),
                match cmp.direction {
                    Direction::Request => "element is no longer accepted",
                    Direction::Response => "element was added",
                }
            ));
        }
    }

    // Children are matched by position, so shared children must keep their order
    let wide_order = shared_child_names(&wide.children, &narrow.children);
    let narrow_order = shared_child_names(&narrow.children, &wide.children);
    if wide_order != narrow_order {
        let (from, to) = narrower_label(
            cmp,
            narrow_order.join(", ").as_str(),
            wide_order.join(", ").as_str(),
        );
        reasons.push(format!("{path}: child element order changed from ({from}) to ({to})"));
    }
}

/// Names of `children` that `other` also declares, in declaration order.
fn shared_child_names(children: &[ChildPattern], other: &[ChildPattern]) -> Vec<String> {
    children
        .iter()
        .map(child_name)
        .filter(|name| other.iter().any(|c| child_name(c) == *name))
        .collect()
}

fn prefixed_attributes(attributes: &KeyedPatterns) -> KeyedPatterns {
    let mut out = KeyedPatterns::new();
    for (key, pattern) in attributes.iter() {
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        out.insert(format!("@{key}"), pattern.clone(), attributes.is_optional(key));
    }
    out
}

fn child_name(child: &ChildPattern) -> String {
    match &child.pattern {
        Pattern::TreeElement(element) => local_name(&element.name).to_string(),
        _ => "*".to_string(),
    }
}

fn occurs_contains(wide: Occurs, narrow: Occurs) -> bool {
    wide.min <= narrow.min
        && match (wide.max, narrow.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(w), Some(n)) => w >= n,
        }
}

/// Whether `pattern` accepts a concrete value.
fn accepts_value(pattern: &Pattern, value: &Value, cmp: Comparison) -> bool {
    let options = crate::pattern::MatchOptions {
        strict_keys: false,
        text_mode: cmp.text_mode,
    };
    pattern.matches_at(value, "", options).is_ok()
}

fn is_scalar(pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Typed { .. } | Pattern::Regex(_) => true,
        Pattern::Exact(value) => !matches!(value, Value::List(_) | Value::Map(_) | Value::Tree(_)),
        Pattern::Enumerated(values) => values
            .iter()
            .all(|v| !matches!(v, Value::List(_) | Value::Map(_) | Value::Tree(_))),
        _ => false,
    }
}

fn is_unconstrained_string(kind: ScalarKind, constraints: &Constraints) -> bool {
    kind == ScalarKind::String && constraints.min_length.is_none() && constraints.max_length.is_none()
}

fn constraint_narrowing(wide: &Constraints, narrow: &Constraints) -> Vec<String> {
    let mut problems = Vec::new();
    if !min_contains(wide.min, narrow.min) {
        problems.push("minimum was raised".to_string());
    }
    if !max_contains(wide.max, narrow.max) {
        problems.push("maximum was lowered".to_string());
    }
    let as_f64 = |n: Option<usize>| n.map(|n| n as f64);
    if !min_contains(as_f64(wide.min_length), as_f64(narrow.min_length)) {
        problems.push("minimum length was raised".to_string());
    }
    if !max_contains(as_f64(wide.max_length), as_f64(narrow.max_length)) {
        problems.push("maximum length was lowered".to_string());
    }
    problems
}

fn min_contains(wide: Option<f64>, narrow: Option<f64>) -> bool {
    match (wide, narrow) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(w), Some(n)) => w <= n,
    }
}

fn max_contains(wide: Option<f64>, narrow: Option<f64>) -> bool {
    match (wide, narrow) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(w), Some(n)) => w >= n,
    }
}

/// Report shape consumed by the reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityReport {
    pub specifications: Vec<SpecificationReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationReport {
    pub specification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    pub operations: Vec<OperationReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub path: String,
    pub method: String,
    pub response_code: u16,
}

impl CompatibilityReport {
    pub fn from_rows(
        specification: &str,
        service_type: Option<&str>,
        rows: &[CompatibilityRow],
    ) -> Self {
        Self {
            specifications: vec![SpecificationReport {
                specification: specification.to_string(),
                service_type: service_type.map(str::to_string),
                operations: rows
                    .iter()
                    .map(|row| OperationReport {
                        path: row.path.clone(),
                        method: row.method.clone(),
                        response_code: row.response_code,
                    })
                    .collect(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::RegexPattern;
    use crate::scenario::PathPattern;

    fn scenario(method: &str, path: &str, status: u16) -> Scenario {
        Scenario::new(
            format!("{method} {path}"),
            method,
            PathPattern::parse(path).unwrap(),
            status,
        )
    }

    fn order_body(keys: KeyedPatterns) -> Pattern {
        Pattern::KeyedMap(keys)
    }

    fn create_order(request: KeyedPatterns, response: KeyedPatterns) -> Scenario {
        scenario("POST", "/orders", 201)
            .with_request_body(order_body(request))
            .with_response_body(order_body(response))
    }

    fn base_request() -> KeyedPatterns {
        KeyedPatterns::new()
            .required("qty", Pattern::number())
            .required("sku", Pattern::string())
    }

    fn base_response() -> KeyedPatterns {
        KeyedPatterns::new()
            .required("id", Pattern::number())
            .required("state", Pattern::Enumerated(vec![Value::string("pending")]))
    }

    fn single_status(old: Scenario, new: Scenario) -> CompatibilityRow {
        let rows = check(&[old], &[new]);
        assert_eq!(rows.len(), 1, "{rows:?}");
        rows.into_iter().next().unwrap()
    }

    #[test]
    fn test_identical_contracts_are_unchanged() {
        let old = create_order(base_request(), base_response());
        let row = single_status(old.clone(), old);
        assert_eq!(row.status, CompatibilityStatus::Unchanged);
        assert_eq!(row.path, "/orders");
        assert_eq!(row.method, "POST");
        assert_eq!(row.response_code, 201);
    }

    #[test]
    fn test_removed_operation_is_breaking() {
        let rows = check(&[scenario("GET", "/users", 200)], &[]);
        assert_eq!(rows[0].status, CompatibilityStatus::Breaking);
        assert!(has_breaking_changes(&rows));
    }

    #[test]
    fn test_added_operation_is_informational() {
        let rows = check(&[], &[scenario("GET", "/users", 200)]);
        assert_eq!(rows[0].status, CompatibilityStatus::Unchanged);
        assert!(!has_breaking_changes(&rows));
    }

    #[test]
    fn test_making_required_request_key_optional_is_compatible() {
        let old = create_order(base_request(), base_response());
        let new = create_order(
            KeyedPatterns::new()
                .required("qty", Pattern::number())
                .optional("sku", Pattern::string()),
            base_response(),
        );
        assert_eq!(single_status(old, new).status, CompatibilityStatus::Compatible);
    }

    #[test]
    fn test_relaxing_each_required_key_never_breaks() {
        let old = create_order(base_request(), base_response());
        for (key, _) in base_request().iter() {
            let mut relaxed = KeyedPatterns::new();
            for (k, p) in base_request().iter() {
                relaxed.insert(k, p.clone(), k == key);
            }
            let new = create_order(relaxed, base_response());
            assert_ne!(
                single_status(old.clone(), new).status,
                CompatibilityStatus::Breaking
            );
        }
    }

    #[test]
    fn test_adding_required_request_key_is_breaking() {
        let old = create_order(base_request(), base_response());
        let new = create_order(
            base_request().required("coupon", Pattern::string()),
            base_response(),
        );
        let row = single_status(old, new);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(
            row.reasons,
            vec!["request body.coupon: required key was added".to_string()]
        );
    }

    #[test]
    fn test_adding_optional_request_key_is_compatible() {
        let old = create_order(base_request(), base_response());
        let new = create_order(
            base_request().optional("coupon", Pattern::string()),
            base_response(),
        );
        assert_eq!(single_status(old, new).status, CompatibilityStatus::Compatible);
    }

    #[test]
    fn test_request_type_and_range_changes() {
        let with_qty = |qty: Pattern| {
            create_order(KeyedPatterns::new().required("qty", qty), base_response())
        };
        let ranged = |min: Option<f64>, max: Option<f64>| Pattern::Typed {
            kind: ScalarKind::Number,
            constraints: Constraints {
                min,
                max,
                ..Default::default()
            },
        };

        let old = with_qty(ranged(Some(1.0), Some(10.0)));
        let widened = with_qty(ranged(Some(0.0), None));
        assert_eq!(
            single_status(old.clone(), widened).status,
            CompatibilityStatus::Compatible
        );

        let narrowed = with_qty(ranged(Some(2.0), Some(10.0)));
        assert_eq!(
            single_status(old.clone(), narrowed).status,
            CompatibilityStatus::Breaking
        );

        let retyped = with_qty(Pattern::string());
        let row = single_status(old, retyped);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert!(row.reasons[0].contains("type changed from number to string"));
    }

    #[test]
    fn test_enum_superset_is_compatible() {
        let with_color = |values: &[&str]| {
            create_order(
                KeyedPatterns::new().required(
                    "color",
                    Pattern::Enumerated(values.iter().map(|v| Value::string(*v)).collect()),
                ),
                base_response(),
            )
        };

        let old = with_color(&["red", "blue"]);
        assert_eq!(
            single_status(old.clone(), with_color(&["red", "blue", "green"])).status,
            CompatibilityStatus::Compatible
        );
        assert_eq!(
            single_status(old, with_color(&["red"])).status,
            CompatibilityStatus::Breaking
        );
    }

    #[test]
    fn test_response_changes() {
        let old = create_order(base_request(), base_response());

        let removed = create_order(
            base_request(),
            KeyedPatterns::new().required("id", Pattern::number()),
        );
        let row = single_status(old.clone(), removed);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(
            row.reasons,
            vec!["response body.state: required key was removed".to_string()]
        );

        let optional_added = create_order(
            base_request(),
            base_response().optional("eta", Pattern::string()),
        );
        assert_eq!(
            single_status(old.clone(), optional_added).status,
            CompatibilityStatus::Compatible
        );

        let enum_grew = create_order(
            base_request(),
            KeyedPatterns::new().required("id", Pattern::number()).required(
                "state",
                Pattern::Enumerated(vec![Value::string("pending"), Value::string("lost")]),
            ),
        );
        assert_eq!(
            single_status(old, enum_grew).status,
            CompatibilityStatus::Breaking
        );
    }

    #[test]
    fn test_status_code_changes() {
        let old = vec![scenario("GET", "/users", 200), scenario("GET", "/users", 404)];
        let new = vec![scenario("GET", "/users", 200), scenario("GET", "/users", 500)];

        let rows = check(&old, &new);
        let by_code: Vec<(u16, CompatibilityStatus)> =
            rows.iter().map(|r| (r.response_code, r.status)).collect();
        assert_eq!(
            by_code,
            vec![
                (200, CompatibilityStatus::Unchanged),
                (404, CompatibilityStatus::Compatible),
                (500, CompatibilityStatus::Breaking),
            ]
        );
    }

    #[test]
    fn test_path_parameters_compare_in_text_mode() {
        let old = vec![scenario("GET", "/users/{id:number}", 200)];
        let widened = vec![scenario("GET", "/users/{id}", 200)];
        let rows = check(&old, &widened);
        assert_eq!(rows[0].status, CompatibilityStatus::Compatible);

        let rows = check(&widened, &old);
        assert_eq!(rows[0].status, CompatibilityStatus::Breaking);
        assert_eq!(rows[0].reasons[0], "request path.id: type changed from string to number");
    }

    #[test]
    fn test_headers_and_query_use_the_same_rule() {
        let old = scenario("GET", "/search", 200)
            .with_query("q", Pattern::string(), false)
            .with_header("X-Tenant", Pattern::string(), false);

        let relaxed = scenario("GET", "/search", 200)
            .with_query("q", Pattern::string(), true)
            .with_header("X-Tenant", Pattern::string(), true);
        assert_eq!(
            single_status(old.clone(), relaxed).status,
            CompatibilityStatus::Compatible
        );

        let stricter = old.clone().with_header("Authorization", Pattern::string(), false);
        let row = single_status(old, stricter);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(
            row.reasons,
            vec!["request headers.authorization: required key was added".to_string()]
        );
    }

    #[test]
    fn test_regex_changes() {
        let with_code = |p: Pattern| {
            scenario("GET", "/codes", 200).with_query("code", p, false)
        };
        let regex = |s: &str| Pattern::Regex(RegexPattern::new(s).unwrap());

        let old = with_code(regex("[A-Z]{3}"));
        assert_eq!(
            single_status(old.clone(), with_code(Pattern::string())).status,
            CompatibilityStatus::Compatible
        );
        assert_eq!(
            single_status(old.clone(), with_code(regex("[A-Z]{4}"))).status,
            CompatibilityStatus::Breaking
        );

        // Regex inclusion is not decided; any source change is breaking
        let row = single_status(old, with_code(regex("[A-Z]+")));
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(
            row.reasons,
            vec!["request query.code: pattern changed from /[A-Z]{3}/ to /[A-Z]+/"]
        );
    }

    #[test]
    fn test_xml_element_changes() {
        let item = |occurs: Occurs| {
            ElementPattern::new("order").with_child(
                Pattern::TreeElement(
                    ElementPattern::new("item").with_attribute("sku", Pattern::string()),
                ),
                occurs,
            )
        };
        let soap = |element: ElementPattern| {
            scenario("POST", "/ws", 200).with_request_body(Pattern::TreeElement(element))
        };

        let old = soap(item(Occurs::ONCE));
        assert_eq!(
            single_status(old.clone(), soap(item(Occurs::MANY))).status,
            CompatibilityStatus::Compatible
        );
        assert_eq!(
            single_status(soap(item(Occurs::MANY)), old.clone()).status,
            CompatibilityStatus::Breaking
        );

        let extra = soap(item(Occurs::ONCE).with_child(
            Pattern::TreeElement(ElementPattern::new("note")),
            Occurs::ONCE,
        ));
        let row = single_status(old.clone(), extra);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(row.reasons, vec!["request body.note: required element was added"]);

        let optional_note = soap(item(Occurs::ONCE).with_child(
            Pattern::TreeElement(ElementPattern::new("note")),
            Occurs::OPTIONAL,
        ));
        assert_eq!(
            single_status(old, optional_note).status,
            CompatibilityStatus::Compatible
        );
    }

    #[test]
    fn test_xml_child_reordering_is_breaking() {
        let order = |first: &str, second: &str| {
            scenario("POST", "/ws", 200).with_request_body(Pattern::TreeElement(
                ElementPattern::new("o")
                    .with_child(Pattern::TreeElement(ElementPattern::new(first)), Occurs::ONCE)
                    .with_child(Pattern::TreeElement(ElementPattern::new(second)), Occurs::ONCE),
            ))
        };

        // The old contract's request no longer matches the new pattern
        let new_request = order("b", "a");
        let old_document = Value::parse_xml("<o><a/><b/></o>").unwrap();
        assert!(new_request.request_body.matches(&old_document).is_err());

        let row = single_status(order("a", "b"), new_request);
        assert_eq!(row.status, CompatibilityStatus::Breaking);
        assert_eq!(
            row.reasons,
            vec!["request body: child element order changed from (a, b) to (b, a)"]
        );

        let optional_between = scenario("POST", "/ws", 200).with_request_body(
            Pattern::TreeElement(
                ElementPattern::new("o")
                    .with_child(Pattern::TreeElement(ElementPattern::new("a")), Occurs::ONCE)
                    .with_child(Pattern::TreeElement(ElementPattern::new("x")), Occurs::OPTIONAL)
                    .with_child(Pattern::TreeElement(ElementPattern::new("b")), Occurs::ONCE),
            ),
        );
        assert_eq!(
            single_status(order("a", "b"), optional_between).status,
            CompatibilityStatus::Compatible
        );
    }

    #[test]
    fn test_report_shape() {
        let rows = check(
            &[scenario("GET", "/users", 200)],
            &[scenario("GET", "/users", 200)],
        );
        let report = CompatibilityReport::from_rows("users", Some("SOAP"), &rows);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "specifications": [{
                    "specification": "users",
                    "serviceType": "SOAP",
                    "operations": [{"path": "/users", "method": "GET", "responseCode": 200}]
                }]
            })
        );

        let report = CompatibilityReport::from_rows("users", None, &rows);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["specifications"][0].get("serviceType").is_none());
    }
}
