//! Content-Blocker Detection Gate
//!
//! This library infers whether the visiting browser runs content-blocking
//! software and gates usage behind a dismissible modal with a countdown
//! that ends in a forced redirect.
//!
//! # Components
//!
//! - **Probes** ([`probes`]): bait elements, bait URLs, browser identification
//! - **Fusion** ([`fusion`]): replaceable policy combining one attempt's signals
//! - **Voting** ([`voting`]): majority over repeated attempts
//! - **Engine** ([`engine`]): runs cycles, guards re-entrancy, keeps reports
//! - **Monitor** ([`monitor`]): the [`AdGate`] controller and its state machine
//! - **Gate** ([`gate`]): countdown, recheck, and redirect
//!
//! Host concerns (document, network, browser flags, modal, navigation) sit
//! behind the traits in [`host`]. [`memory::MemoryHost`] implements all of
//! them in memory; [`transport::HttpTransport`] implements the network.
//!
//! # Usage
//!
//! ```rust,ignore
//! use adgate::{AdGate, GateConfig, GateEvent, GateOptions, Host, MemoryHost};
//!
//! let options = GateOptions::from_json(r#"{"timeoutSeconds": 20}"#)?;
//! let host = MemoryHost::new().shared();
//! let gate = AdGate::new(GateConfig::from_options(options), Host::memory(host));
//!
//! gate.init();
//! // ... later, from the modal's button:
//! gate.handle_event(GateEvent::DismissRequested);
//! // ... on page teardown:
//! gate.destroy();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod host;
pub mod memory;
pub mod monitor;
pub mod probes;
pub mod timer;
pub mod transport;
pub mod voting;

pub use config::{GateConfig, GateOptions};
pub use engine::{AttemptRecord, DetectionEngine, DetectionReport};
pub use error::{ConfigError, GateError, GateResult};
pub use fusion::{CustomRule, FusionPolicy, FusionRule, ProbeResult, ProbeSignals};
pub use gate::GateEvent;
pub use host::{
    BaitElement, BaitRequest, BrowserEnv, BrowserSignals, ComputedVisibility, Document, GateView,
    Host, Navigator, NodeId, Transport,
};
pub use memory::{GateDisplay, MemoryHost, ViewEvent};
pub use monitor::{AdGate, GateSnapshot, MonitorState};
pub use transport::HttpTransport;
pub use voting::{majority_threshold, majority_vote, VoteTally};
