//! Storage layer for Anvil - JSONL persistence with an in-memory cache.
//!
//! Each collection is one `<collection>.jsonl` file under the data
//! directory. Records are keyed by their `id` field.

mod jsonl;
mod traits;

pub use jsonl::JsonlStorage;
pub use traits::{Filter, FilterOp, HasId, Storage};
