//! # lectern-core
//!
//! Core types, traits, and abstractions for the lectern chat runtime.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the database layer and the migration tooling depend on.

pub mod error;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod path;
pub mod settings;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use metadata::{Annotation, MessageMetadata};
pub use models::*;
pub use path::HierarchyPath;
pub use settings::{merge_settings, GroupSettings};
pub use traits::*;
pub use uuid_utils::{is_v7, new_v7};
