//! SOAP operations.
//!
//! A WSDL converter describes each operation by its endpoint, SOAPAction and
//! payload elements. Each operation becomes an ordinary POST scenario whose
//! request and response bodies are wrapped in a SOAP envelope.

use crate::error::DefinitionError;
use crate::pattern::{ElementPattern, Occurs, Pattern};
use crate::scenario::{PathPattern, Scenario};
use crate::value::Value;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Status of every SOAP operation response.
pub const SOAP_STATUS: u16 = 200;

/// One SOAP operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapOperation {
    pub name: String,
    /// Endpoint path
    pub path: String,
    pub soap_action: Option<String>,
    /// Payload element inside the request `Body`
    pub request: Option<ElementPattern>,
    /// Payload element inside the response `Body`
    pub response: Option<ElementPattern>,
}

impl SoapOperation {
    /// Expand into a POST scenario.
    pub fn to_scenario(&self) -> Result<Scenario, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        let path = PathPattern::parse(&self.path)?;
        let mut scenario = Scenario::new(self.name.clone(), "POST", path, SOAP_STATUS)
            .with_request_body(Pattern::TreeElement(request_envelope(self.request.as_ref())))
            .with_response_header("Content-Type", Pattern::exact(Value::string("text/xml")))
            .with_response_body(Pattern::TreeElement(response_envelope(
                self.response.as_ref(),
            )));

        if let Some(action) = &self.soap_action {
            // Clients send the action both bare and quoted
            scenario = scenario.with_header(
                "SOAPAction",
                Pattern::Enumerated(vec![
                    Value::string(action.clone()),
                    Value::string(format!("\"{action}\"")),
                ]),
                false,
            );
        }
        scenario.description = Some(format!("SOAP operation {}", self.name));
        Ok(scenario)
    }
}

/// Request envelopes are matched on local names so any prefix is accepted.
fn request_envelope(payload: Option<&ElementPattern>) -> ElementPattern {
    let header = ElementPattern::new("Header").with_child(Pattern::Any, Occurs::MANY);
    let mut body = ElementPattern::new("Body");
    if let Some(payload) = payload {
        body = body.with_child(Pattern::TreeElement(payload.clone()), Occurs::ONCE);
    }
    ElementPattern::new("Envelope")
        .with_child(Pattern::TreeElement(header), Occurs::OPTIONAL)
        .with_child(Pattern::TreeElement(body), Occurs::ONCE)
}

fn response_envelope(payload: Option<&ElementPattern>) -> ElementPattern {
    let mut body = ElementPattern::new("soapenv:Body");
    if let Some(payload) = payload {
        body = body.with_child(Pattern::TreeElement(payload.clone()), Occurs::ONCE);
    }
    ElementPattern::new("soapenv:Envelope")
        .with_attribute("xmlns:soapenv", Pattern::exact(Value::string(SOAP_ENVELOPE_NS)))
        .with_child(Pattern::TreeElement(body), Occurs::ONCE)
}
