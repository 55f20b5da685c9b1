use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::ReportConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: ReportConfig,
    /// Drives report renders and the concurrent roster/event fetches.
    pub runtime: tokio::runtime::Runtime,
}
