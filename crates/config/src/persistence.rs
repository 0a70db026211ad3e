#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Persistence {
    /// Optional path to the state database. Stores live in memory without it.
    pub state_path: Option<PathBuf>,
}
