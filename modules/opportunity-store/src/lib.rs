//! Postgres persistence for the enrichment core.
//!
//! Owns the concept and opportunity tables. Every batch read is a single
//! `= ANY($1)` query; every write is a single statement.

pub mod error;
pub mod rows;
pub mod store;

pub use error::{Result, StoreError};
pub use rows::StoredOpportunity;
pub use store::OpportunityStore;
