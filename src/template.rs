//! Template engine for literal response bodies.
//!
//! Uses Handlebars for template rendering with the request and the
//! bindings captured while matching.

use crate::matcher::Bindings;
use crate::scenario::HttpRequest;
use crate::value::Value;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Path parameters from URL template matching
    pub path: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers (lower-cased names)
    pub headers: HashMap<String, String>,
    /// Request method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Request body as text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (for JSON bodies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl TemplateContext {
    pub fn new(request: &HttpRequest, bindings: &Bindings) -> Self {
        let body = match &request.body {
            Value::Null => None,
            other => Some(other.serialize()),
        };
        let json = match &request.body {
            Value::Map(_) | Value::List(_) => Some(request.body.to_json()),
            _ => None,
        };

        Self {
            path: bindings.path_params.clone(),
            query: bindings.query_params.clone(),
            headers: bindings.headers.clone(),
            method: request.method.clone(),
            request_path: request.path.clone(),
            body,
            json,
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        // Register custom helpers
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Bodies are JSON, XML or plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against a request.
    pub fn render(
        &self,
        template: &str,
        request: &HttpRequest,
        bindings: &Bindings,
    ) -> Result<String, handlebars::RenderError> {
        let ctx = TemplateContext::new(request, bindings);
        self.handlebars.render_template(template, &ctx)
    }

    /// Render a JSON value with templates in string fields.
    pub fn render_json(
        &self,
        json: &serde_json::Value,
        request: &HttpRequest,
        bindings: &Bindings,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        let ctx = TemplateContext::new(request, bindings);
        self.render_json_value(json, &ctx)
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        match value {
            serde_json::Value::String(s) if s.contains("{{") => {
                let rendered = self.handlebars.render_template(s, ctx)?;
                Ok(serde_json::Value::String(rendered))
            }
            serde_json::Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> = arr
                    .iter()
                    .map(|v| self.render_json_value(v, ctx))
                    .collect();
                Ok(serde_json::Value::Array(rendered?))
            }
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Custom Handlebars helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let Some(param) = h.param(0).map(|v| v.value()) else {
        return Ok(());
    };
    // Strings holding JSON are re-parsed, anything else is written as JSON
    let json = match param.as_str() {
        Some(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(json) => json,
            Err(_) => {
                out.write(s)?;
                return Ok(());
            }
        },
        None => param.clone(),
    };
    out.write(&serde_json::to_string(&json).unwrap_or_default())?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h
        .param(0)
        .and_then(|v| v.value().as_i64())
        .unwrap_or(0);
    let max = h
        .param(1)
        .and_then(|v| v.value().as_i64())
        .unwrap_or(100);

    if min > max {
        return Err(handlebars::RenderErrorReason::Other(format!(
            "random: min ({min}) is greater than max ({max})"
        ))
        .into());
    }

    let mut rng = rand::thread_rng();
    let value = rng.gen_range(min..=max);
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(v) if !v.is_null() => {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    out.write(s)?;
                    return Ok(());
                }
            } else {
                out.write(&v.to_string())?;
                return Ok(());
            }
        }
        _ => {}
    }

    out.write(default)?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Bindings {
        Bindings::default()
    }

    #[test]
    fn test_simple_template() {
        let engine = TemplateEngine::new();
        let mut ctx = bindings();
        ctx.path_params.insert("id".to_string(), "123".to_string());
        let request = HttpRequest::new("GET", "/users/123");

        let result = engine
            .render("User ID: {{path.id}} via {{method}} {{request_path}}", &request, &ctx)
            .unwrap();

        assert_eq!(result, "User ID: 123 via GET /users/123");
    }

    #[test]
    fn test_query_params() {
        let engine = TemplateEngine::new();
        let mut ctx = bindings();
        ctx.query_params.insert("page".to_string(), "1".to_string());

        let result = engine
            .render("Page: {{query.page}}", &HttpRequest::new("GET", "/list"), &ctx)
            .unwrap();

        assert_eq!(result, "Page: 1");
    }

    #[test]
    fn test_headers() {
        let engine = TemplateEngine::new();
        let mut ctx = bindings();
        ctx.headers
            .insert("user-agent".to_string(), "test-client".to_string());

        let result = engine
            .render("Client: {{headers.user-agent}}", &HttpRequest::new("GET", "/"), &ctx)
            .unwrap();

        assert_eq!(result, "Client: test-client");
    }

    #[test]
    fn test_request_body() {
        let engine = TemplateEngine::new();
        let request = HttpRequest::new("POST", "/users")
            .with_body(Value::parse_json(r#"{"name":"John","tags":["a"]}"#).unwrap());

        let result = engine
            .render("Name: {{json.name}} Tags: {{json json.tags}}", &request, &bindings())
            .unwrap();

        assert_eq!(result, r#"Name: John Tags: ["a"]"#);
    }

    #[test]
    fn test_xml_request_body() {
        let engine = TemplateEngine::new();
        let request =
            HttpRequest::new("POST", "/soap").with_body(Value::parse_xml("<ping>1</ping>").unwrap());

        let result = engine
            .render("Echo: {{body}}", &request, &bindings())
            .unwrap();

        assert_eq!(result, "Echo: <ping>1</ping>");
    }

    #[test]
    fn test_uuid_helper() {
        let engine = TemplateEngine::new();

        let result = engine
            .render("ID: {{uuid}}", &HttpRequest::new("GET", "/"), &bindings())
            .unwrap();

        // UUID format: xxxxxxxx-xxxx-4xxx-xxxx-xxxxxxxxxxxx
        assert!(result.starts_with("ID: "));
        let uuid = &result[4..];
        assert_eq!(uuid.len(), 36);
        assert!(uuid.chars().nth(8) == Some('-'));
    }

    #[test]
    fn test_random_helper() {
        let engine = TemplateEngine::new();
        let request = HttpRequest::new("GET", "/");

        let result = engine.render("{{random 1 6}}", &request, &bindings()).unwrap();
        let n: i64 = result.parse().unwrap();
        assert!((1..=6).contains(&n));

        assert_eq!(
            engine.render("{{random 7 7}}", &request, &bindings()).unwrap(),
            "7"
        );

        let err = engine
            .render("{{random 10 1}}", &request, &bindings())
            .unwrap_err();
        assert!(err.to_string().contains("greater than max"));

        // Default max is 100
        assert!(engine.render("{{random 200}}", &request, &bindings()).is_err());
    }

    #[test]
    fn test_default_helper() {
        let engine = TemplateEngine::new();

        let result = engine
            .render(
                "Value: {{default query.missing \"default_value\"}}",
                &HttpRequest::new("GET", "/"),
                &bindings(),
            )
            .unwrap();

        assert_eq!(result, "Value: default_value");
    }

    #[test]
    fn test_upper_lower_helpers() {
        let engine = TemplateEngine::new();
        let mut ctx = bindings();
        ctx.path_params.insert("name".to_string(), "John".to_string());

        let result = engine
            .render(
                "Upper: {{upper path.name}}, Lower: {{lower path.name}}",
                &HttpRequest::new("GET", "/"),
                &ctx,
            )
            .unwrap();

        assert_eq!(result, "Upper: JOHN, Lower: john");
    }

    #[test]
    fn test_render_json() {
        let engine = TemplateEngine::new();
        let mut ctx = bindings();
        ctx.path_params.insert("id".to_string(), "123".to_string());

        let json = serde_json::json!({
            "id": "{{path.id}}",
            "name": "User {{path.id}}",
            "static": "no template",
            "count": 3
        });

        let result = engine
            .render_json(&json, &HttpRequest::new("GET", "/users/123"), &ctx)
            .unwrap();

        assert_eq!(result["id"], "123");
        assert_eq!(result["name"], "User 123");
        assert_eq!(result["static"], "no template");
        assert_eq!(result["count"], 3);
    }
}
