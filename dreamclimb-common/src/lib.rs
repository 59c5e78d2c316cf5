//! # DreamClimb Common Library
//!
//! Shared code for the DreamClimb survey backend:
//! - Database initialization and schema
//! - Row models (catalog and submissions)
//! - Common error types

pub mod db;
pub mod error;

pub use error::{Error, Result};
