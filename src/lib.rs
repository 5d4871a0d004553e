//! Anvil - a self-healing tool pipeline
//!
//! A tool whose generated implementation breaks at runtime is regenerated
//! by an oracle, verified in a sandbox, reviewed by an audit gate and only
//! then promoted. Every implementation is kept as an immutable version so a
//! bad generation never destroys the last one that worked.

pub mod audit;
pub mod domain;
pub mod error;
pub mod generator;
pub mod id;
pub mod llm;
pub mod pipeline;
pub mod sandbox;
pub mod storage;
pub mod store;

pub use error::{AnvilError, Result};
pub use pipeline::{Pipeline, PipelineConfig};
