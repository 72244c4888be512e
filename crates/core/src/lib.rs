//! Domain models and contracts for the comanda offline-first POS core.
//!
//! This crate is storage- and transport-agnostic: it defines the entities,
//! the sync domain model (queue items, statuses, retry policy) and the
//! repository traits that `comanda-storage-sqlite` implements and
//! `comanda-sync` consumes.

pub mod customers;
pub mod errors;
pub mod menu;
pub mod orders;
pub mod sync;

pub use errors::{DatabaseError, Error, Result};
