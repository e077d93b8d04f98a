//! Deterministic test harness for the Parlor relay.
//!
//! Seeded implementations of `Environment` and `Outbox` so relay behavior can
//! be replayed exactly from a seed.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and the real relay hub,
//! and their results and observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod outbox;
pub mod sim_env;

pub use model::{
    ClientId, Coverage, ModelWorld, NAME_POOL, ObservableState, Operation, OperationError,
    OperationResult, Received, SenderChoice, pool_name, public_key_for,
};
pub use outbox::RecordingOutbox;
pub use sim_env::SimEnv;
