//! Run record for generated images
//!
//! After a batch run the CLI writes `pixforge-run.toml` next to the images:
//! what was asked for, which model produced each file, its hash and cost, and
//! why any item failed. Useful for auditing spend and reproducing a run.

use crate::batch::{BatchOptions, BatchOutcome};
use pixforge_core::{PixforgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const RECORD_FILE_NAME: &str = "pixforge-run.toml";

/// One item's line in the record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEntry {
    pub index: u32,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub revised_prompt: Option<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Settings the run used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOptions {
    pub default_model: String,
    pub format: String,
    pub parallel: usize,
    pub stop_on_error: bool,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub generated_at: String,
    pub provider: String,
    pub total_cost: f64,
    #[serde(default)]
    pub run_error: Option<String>,
    pub options: RecordOptions,
    #[serde(default)]
    pub entries: Vec<RecordEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    run: RunRecord,
}

impl RunRecord {
    /// Snapshot a finished run with a fresh run id and timestamp
    pub fn from_outcome(provider: &str, options: &BatchOptions, outcome: &BatchOutcome) -> Self {
        let entries = outcome
            .results
            .iter()
            .map(|result| {
                let saved = result.outcome.as_ref().ok();
                RecordEntry {
                    index: result.index,
                    prompt: result.prompt.clone(),
                    model: saved.map(|s| s.model.clone()),
                    path: saved.map(|s| s.path.to_string_lossy().to_string()),
                    content_hash: saved.map(|s| s.content_hash.to_prefixed_hex()),
                    revised_prompt: saved.and_then(|s| s.revised_prompt.clone()),
                    cost: result.cost(),
                    error: result.error().map(|e| e.to_string()),
                }
            })
            .collect();

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            provider: provider.to_string(),
            total_cost: outcome.total_cost(),
            run_error: outcome.error.as_ref().map(|e| e.to_string()),
            options: RecordOptions {
                default_model: options.default_model.clone(),
                format: options.format.to_string(),
                parallel: options.parallel,
                stop_on_error: options.stop_on_error,
                delay_ms: options.delay_ms,
            },
            entries,
        }
    }

    /// Read a record written by [`RunRecord::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: RecordFile = toml::from_str(&content)?;
        Ok(file.run)
    }

    /// Write the record as TOML, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = RecordFile { run: self.clone() };
        let content = toml::to_string_pretty(&file).map_err(|e| {
            PixforgeError::TomlSer(format!("Failed to serialize run record: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
