//! # irpack Testkit
//!
//! Test utilities for irpack.
//!
//! This crate provides:
//! - Flusher fixtures over temporary directories
//! - An in-memory uploader that decodes what it receives
//! - Crash simulation helpers for buffer directories
//! - Record generators and proptest strategies
//! - Concurrent load helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use irpack_testkit::prelude::*;
//!
//! #[test]
//! fn survives_crash() {
//!     with_disk_flusher(|t| {
//!         t.flush("app", &records(3));
//!         t.crash();
//!         t.restart();
//!         assert_eq!(t.uploader.messages_for("app").len(), 3);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod uploader;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::uploader::*;
}

pub use fixtures::*;
pub use generators::*;
pub use uploader::*;
