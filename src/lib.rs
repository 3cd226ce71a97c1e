//! Evaluates a Kubernetes host against a declarative security benchmark.
//!
//! A run resolves node facts (running component binaries, present config
//! files), substitutes them into the benchmark document, loads the
//! Controls -> Group -> Check graph, executes the selected checks and tallies
//! the outcome.

pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod facts;
pub mod filter;
pub mod loader;
pub mod model;
pub mod probe;
pub mod report;
pub mod substitute;

pub use engine::{AuditEngine, RunReport, Runner};
pub use error::{ConfigError, EngineError, LoadError};
pub use filter::{FilterOpts, Predicate};
pub use model::{Check, Controls, Group, NodeType, State, Summary};
