//! Aspects is a modular Rust library of in-process runtime services that
//! applications embed to gain the operational machinery production systems
//! need, without wiring it up from scratch every time.
//!
//! If you need any of those:
//!
//! * a keyed cache with TTL, eviction policies and statistics
//! * an in-process publish/subscribe event bus with pattern matching
//! * counters, gauges, histograms, summaries and timers with multi-format
//!   export
//! * health checks, resource monitors and rule-based alerting
//! * multi-channel notification dispatch with retry, rate limiting and
//!   aggregation
//!
//! then Aspects is a tool of choice for you.
//!
//! Every subsystem is usable standalone; composition is the caller's choice.
//! The library is embedded in another process — it is not a server and
//! defines no CLI, transport or wire protocol.
//!
//! # Features
//! Aspects can be used as a component library in a modular fashion by
//! enabling or disabling [Cargo features]:
//!
//! - **default**: All features are enabled by default.
//! - **cache**: Enables the cache engine ([`cache`]).
//! - **events**: Enables the event bus, store and aggregator ([`events`]).
//! - **metrics**: Enables the metric registry and exporters ([`metrics`]).
//! - **monitoring**: Enables health/resource/alert orchestration
//!   ([`monitoring`]).
//! - **notifications**: Enables the notification dispatcher
//!   ([`notifications`]).
//!
//! [Cargo features]: https://doc.rust-lang.org/stable/cargo/reference/features.html#the-features-section

#![warn(missing_docs)]

mod util;

#[cfg(feature = "cache")]
pub mod cache;

#[cfg(feature = "events")]
pub mod events;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "monitoring")]
pub mod monitoring;

#[cfg(feature = "notifications")]
pub mod notifications;

/// A generic operational error produced by user-supplied code.
///
/// Event handlers, cache loaders, resource collectors and notification
/// channels all return this type, so applications can surface whatever error
/// type they already use. The library never inspects these errors beyond
/// formatting them; they are captured at the dispatch site and routed to the
/// relevant error-handling contract instead of propagating to the caller that
/// triggered the dispatch.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operational result that has [`Error`] as an error variant.
pub type Result<T> = std::result::Result<T, Error>;
