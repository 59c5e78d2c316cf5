//! Database access layer
//!
//! Schema creation and row models shared by the API server and the
//! retention batch job.

pub mod init;
pub mod models;

pub use init::{create_schema, init_database};
