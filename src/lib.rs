//! Zentinel Contract Stub
//!
//! A contract-driven stub server and backward-compatibility checker. A
//! contract lists scenarios (request patterns paired with response
//! patterns); the stub server answers HTTP requests from the best matching
//! scenario and the checker compares two versions of a contract.
//!
//! # Features
//!
//! - **Unified Values**: JSON, XML and scalars share one structural model
//! - **Typed Patterns**: Exact, typed, enumerated, regex, list, map and XML element matchers
//! - **Example Generation**: Every pattern can produce a value it accepts
//! - **Diagnostic Matching**: Unmatched requests list every candidate's mismatches
//! - **Dynamic Expectations**: Register scenarios at runtime ahead of the contract
//! - **SOAP Operations**: Enveloped POST scenarios from WSDL converter output
//! - **Compatibility Reports**: Per-operation Compatible / Breaking / Unchanged rows
//!
//! # Example Contract
//!
//! ```yaml
//! scenarios:
//!   - name: get-user
//!     request:
//!       method: GET
//!       path: /users/{id:number}
//!     response:
//!       status: 200
//!       body:
//!         type: object
//!         properties:
//!           - name: id
//!             type: number
//!           - name: name
//!             type: string
//! ```

pub mod compat;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod pattern;
pub mod scenario;
pub mod server;
pub mod soap;
pub mod template;
pub mod value;

pub use compat::{CompatibilityReport, CompatibilityRow, CompatibilityStatus};
pub use config::{ContractConfig, ScenarioDefinition};
pub use engine::StubEngine;
pub use error::{DefinitionError, ParseError, ServerError};
pub use matcher::{MatchResult, Matcher};
pub use pattern::{Mismatch, MismatchReason, Pattern};
pub use scenario::{HttpRequest, HttpResponse, Scenario};
pub use server::{ServerState, StubServer};
pub use value::Value;
