//! Persistence layer for dbsage.
//!
//! The only persisted state is the set of saved connections, kept in a JSON
//! file under the per-user application directory.

mod connections;

pub use connections::{ConnectionSet, ConnectionStore};
