#![forbid(unsafe_code)]

//! SQLite-backed [`cf_core::NodeStore`].

mod store;

pub use store::{SqliteNodeStore, StoreError};
