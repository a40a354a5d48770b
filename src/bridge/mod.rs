//! Connection bridge.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Cloneable handle: lifecycle, calls, subscriptions |
//! | [`BridgeBuilder`] | Fluent configuration builder |
//! | [`BridgeConfig`] | Validated runtime configuration |
//! | [`BridgeEvent`] | Local notifications |
//! | [`ConnectionState`] | Lifecycle state machine |
//! | [`ReconnectPolicy`] | Exponential backoff settings |
//! | [`ConnectionStats`] | Traffic counters |
//!
//! # Lifecycle
//!
//! ```text
//! Uninstantiated ──connect()──► Connecting ──opened──► Open ──first frame──► Ready
//!                                   │  ▲                 │                     │
//!                     refused/timeout  │ retry fires     │ lost (code ≠ 1000)  │
//!                                   ▼  │                 ▼                     │
//!                               Reconnecting ◄───────────┴─────────────────────┘
//!                                   │
//!                         attempts exhausted ──► Error ──reconnect()──► Connecting
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for bridge configuration.
pub mod builder;

/// Bridge configuration and defaults.
pub mod config;

/// Core bridge handle.
pub mod core;

/// Pending request table.
pub mod correlator;

/// Local notifications.
pub mod events;

/// Liveness probe timer.
pub mod heartbeat;

/// Reconnect backoff policy and scheduler.
pub mod reconnect;

/// Inbound frame classification and subscriber registry.
pub mod router;

/// Lifecycle states and transitions.
pub mod state;

/// Connection counters.
pub mod stats;

mod event_loop;

#[cfg(test)]
mod tests;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use config::BridgeConfig;
pub use core::Bridge;
pub use correlator::Settlement;
pub use events::BridgeEvent;
pub use reconnect::ReconnectPolicy;
pub use router::EventHandler;
pub use state::{ConnectionState, StateChange};
pub use stats::ConnectionStats;
