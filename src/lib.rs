//! Storage layer and achievement engine for a social gaming backend.
//!
//! [`store::Store`] is the entry point: it records users, friendships, the
//! game catalog and best scores, and grants score-threshold achievements in
//! the same transaction that raises a best score. The grant decision itself
//! lives in [`rules`] as a pure function.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod prelude;
pub mod rules;
pub mod seed;
pub mod store;
