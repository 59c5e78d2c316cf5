//! # DreamClimb Survey API (dreamclimb-api)
//!
//! Collects survey responses from climbers about problems they have topped
//! and their style preferences, for training the recommendation model.
//!
//! **Purpose:** Resolve a soft respondent identity (fingerprint / email /
//! update code), upsert exactly one submission per identity, validate
//! problem and tag references against the catalog, and serve the
//! questionnaire HTTP endpoints.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod retention;
pub mod taxonomy;

pub use error::{Error, Result};
