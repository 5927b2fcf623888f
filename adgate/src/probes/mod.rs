//! Signal probes
//!
//! Each probe is an independent read-only observer of the host:
//!
//! - [`bait`]: inserts ad-like elements and checks whether host styling hid them
//! - [`network`]: requests ad-like URLs and checks for network-layer failures
//! - [`browser`]: checks browser self-identification flags
//!
//! Probes never mutate controller state and leave no residual DOM nodes
//! or pending requests behind.

pub mod bait;
pub mod browser;
pub mod network;

pub use bait::{BaitElementProbe, BaitSelector};
pub use browser::BlockingBrowserProbe;
pub use network::BaitUrlProbe;
