//! HTTP API for the questionnaire service

pub mod handlers;
pub mod server;

pub use server::{run, AppContext};
