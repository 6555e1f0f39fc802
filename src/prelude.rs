//! Prelude module that provides common imports
//!
//! Import as `use crate::prelude::*` in modules that need them.

// anyhow::Result is the Result type for migrations
pub use anyhow::Result;

pub use crate::error::StoreError;
pub use crate::store::{DynStore, Store};
