//! Reference model for model-based testing.
//!
//! The model tracks participants, connections and delivery counts with plain
//! collections and no cryptography. It is the oracle the real hub is checked
//! against.
//!
//! # Design Principles
//!
//! - Simplicity: the model should be obviously correct
//! - Deterministic: same inputs produce same outputs

pub mod operation;
mod world;

pub use operation::{
    ClientId, Coverage, NAME_POOL, Operation, OperationError, OperationResult, SenderChoice,
    pool_name, public_key_for,
};
pub use world::{ModelWorld, ObservableState, Received};
