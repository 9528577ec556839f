//! # gqlsync Testkit
//!
//! Test utilities for gqlsync.
//!
//! This crate provides:
//! - Blog-schema fixtures: typed operations, result builders and stores
//! - Property-based test generators using proptest
//! - An overlay harness that checks optimistic resolution against a model
//!
//! ## Usage
//!
//! ```rust
//! use gqlsync_testkit::prelude::*;
//!
//! let store = seeded_store(&[Post::new("1", "Hello")]);
//! let data = store.materialize(&ListPostsQuery).unwrap();
//! assert_eq!(data.ids(), vec!["1"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
