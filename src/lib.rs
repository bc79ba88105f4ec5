//! Stub Resolver
//!
//! The resolution core of an HTTP stub server: given the stubs whose request
//! pattern matched, pick the one that applies, build its response and
//! advance its scenario.
//!
//! # Features
//!
//! - **Priority Selection**: Lower priority value wins, absent means 5
//! - **Scenarios**: Named state machines gate stubs and move on each match
//! - **Charset-Aware Bodies**: Text bodies follow the `Content-Type` charset
//! - **Fault Injection**: Reset, empty, malformed or garbage responses
//!
//! # Example Configuration
//!
//! ```yaml
//! stubs:
//!   - request:
//!       method: [POST]
//!       path:
//!         type: exact
//!         value: /cart
//!     response:
//!       status: 201
//!     scenarioName: checkout
//!     newScenarioState: cart
//!
//!   - request:
//!       path:
//!         type: exact
//!         value: /pay
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           paid: true
//!     priority: 1
//!     scenarioName: checkout
//!     requiredScenarioState: cart
//!     newScenarioState: paid
//! ```

pub mod charset;
pub mod config;
pub mod error;
pub mod fault;
pub mod headers;
pub mod mapping;
pub mod matcher;
pub mod registry;
pub mod response;
pub mod scenario;
pub mod transport;

pub use config::{ResolverConfig, StubDefinition};
pub use error::{Error, Result};
pub use fault::Fault;
pub use mapping::{StubId, StubMapping};
pub use matcher::Request;
pub use registry::Registry;
pub use response::Response;
pub use scenario::Scenario;
