//! Version store for Anvil.
//!
//! Persists tools and their versions using an append-only log plus a
//! separate pointer table:
//! - **versions**: immutable source records (never rewritten)
//! - **lifecycle**: mutable per-version state
//! - **active**: tool name -> active version
//!
//! # Example
//!
//! ```ignore
//! use anvil::store::VersionStore;
//! use anvil::domain::{GeneratedBy, Signature};
//!
//! let store = VersionStore::open("/tmp/anvil")?;
//! store.register("weather", "fetch current temperature", &Signature::parse("(city: string) -> number")?)?;
//! let v = store.append_candidate("weather", "def run(city):\n    ...", GeneratedBy::Build)?;
//! ```

mod records;
mod version_store;

pub use records::{ACTIVE, ActivePointer, LIFECYCLE, Lifecycle, TOOLS, VERSIONS, VersionRecord};
pub use version_store::VersionStore;
