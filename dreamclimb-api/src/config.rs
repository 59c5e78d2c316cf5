//! dreamclimb-api specific configuration

use std::path::PathBuf;

/// Survey API configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
}
