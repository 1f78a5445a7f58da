//! Policy iteration for the Sutton & Barto car rental problem.
//!
//! The crate enumerates the full MDP up front: every (state, action)
//! pair with its pseudo-state and transfer fee, and every daily
//! rentals/returns outcome per pseudo-state with its Poisson probability
//! and reward. It then alternates policy evaluation and epsilon-soft
//! policy improvement over those tables until the policy is stable.
//! Intermediate value and policy tables can be checkpointed to
//! tab-separated CSV files and resumed.

pub mod config;
pub mod error;
pub mod model;
pub mod probs;
pub mod solver;
pub mod state;
pub mod store;

pub use config::{Config, Variant};
pub use error::{Error, Result};
pub use model::{TransferTable, TransitionTable};
pub use probs::ProbTable;
pub use solver::{PolicyIteration, PolicyTable, ValueTable};
pub use state::{Action, State};
pub use store::CheckpointStore;
