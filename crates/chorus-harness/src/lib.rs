//! Deterministic simulation harness for chorus session testing.
//!
//! [`SimGroup`] plays the delivery service and [`SimEngine`] implements
//! [`chorus_core::GroupSessionEngine`] over the same CBOR protocol, so whole
//! sessions can be driven from seeded, reproducible traffic. [`ModelSession`]
//! is the reference model for property tests.

pub mod messages;
pub mod model;
pub mod sim_engine;
pub mod sim_group;

pub use model::{ExpectedCommit, ModelSession, Operation};
pub use sim_engine::{DEFAULT_PROTOCOL_VERSION, SimEngine};
pub use sim_group::{AddResult, SimGroup};

/// Install a test-friendly tracing subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
