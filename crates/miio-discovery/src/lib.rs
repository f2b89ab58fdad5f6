//! # miio-discovery
//!
//! Blocking LAN discovery for miIO devices.
//!
//! This crate drives the wire format from `miio-proto` over real UDP
//! sockets. It answers two questions:
//!
//! - "what devices are on this network?": [`DiscoveryEngine::discover`]
//!   broadcasts probes and collects every valid response, keyed by the
//!   responding IP address.
//! - "is this one device reachable?": [`DiscoveryEngine::probe_device`]
//!   sends directed probes at a single address and returns the first
//!   valid response, retrying a few times before giving up.
//!
//! # Session shape (for beginners)
//!
//! UDP gives no delivery guarantees, and consumer devices on wireless
//! networks drop packets routinely. A discovery session therefore does not
//! try to make any single packet reliable; it repeats cheap probe rounds
//! until a deadline:
//!
//! ```text
//! loop until session deadline:
//!     send probe (broadcast + each unicast target)
//!     drain responses for up to 2s
//!     pause 1s
//! ```
//!
//! A device that misses one round is caught by the next. Duplicate
//! responses from the same address simply overwrite the earlier record.
//!
//! Everything here is synchronous; run separate engines on separate
//! threads if concurrent sessions are needed.

pub mod engine;

pub use engine::{DiscoveryConfig, DiscoveryEngine, DiscoveryError};
