use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// One entry of the batch settings script: a device name pattern and the
/// commands applied, in order, to every device whose name matches it.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub commands: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Unable to read {path}. {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid script file. {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid name pattern \"{pattern}\". {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// Loads an ordered list of script entries from a JSON document.
pub fn load(path: &Path) -> Result<Vec<ScriptEntry>, ScriptError> {
    let contents = fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

impl ScriptEntry {
    /// Whether this entry's name pattern matches a device name.
    pub fn matches(&self, device_name: &str) -> Result<bool, ScriptError> {
        let pattern = glob::Pattern::new(&self.name).map_err(|source| ScriptError::Pattern {
            pattern: self.name.clone(),
            source,
        })?;
        Ok(pattern.matches(device_name))
    }
}
