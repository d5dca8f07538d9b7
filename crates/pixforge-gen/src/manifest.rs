//! Batch manifest parsing
//!
//! Two input shapes are accepted:
//! - text: one prompt per line, blank lines and `#` comments ignored
//! - JSON: an array of `{prompt, model?, size?, quality?, style?}` objects,
//!   optionally wrapped as `{"items": [...]}`
//!
//! Items are numbered from 1 in input order.

use crate::batch::Item;
use pixforge_core::{PixforgeError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct JsonItem {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    style: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonManifest {
    List(Vec<JsonItem>),
    Wrapped { items: Vec<JsonItem> },
}

/// Parse a plain-text manifest
pub fn parse_text(source: &str) -> Result<Vec<Item>> {
    let items: Vec<Item> = source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .zip(1u32..)
        .map(|(prompt, index)| Item::new(index, prompt))
        .collect();

    if items.is_empty() {
        return Err(PixforgeError::ManifestEmpty(
            "no prompts found (only blank lines or comments)".to_string(),
        ));
    }
    Ok(items)
}

/// Parse a JSON manifest
pub fn parse_json(source: &str) -> Result<Vec<Item>> {
    let entries = match serde_json::from_str::<JsonManifest>(source)? {
        JsonManifest::List(items) | JsonManifest::Wrapped { items } => items,
    };

    if entries.is_empty() {
        return Err(PixforgeError::ManifestEmpty("JSON manifest has no items".to_string()));
    }

    entries
        .into_iter()
        .zip(1u32..)
        .map(|(entry, index)| {
            let prompt = entry.prompt.trim();
            if prompt.is_empty() {
                return Err(PixforgeError::ValidationFailed(format!(
                    "manifest item {} has an empty prompt",
                    index
                )));
            }
            Ok(Item {
                index,
                prompt: prompt.to_string(),
                model: non_blank(entry.model),
                size: non_blank(entry.size),
                quality: non_blank(entry.quality),
                style: non_blank(entry.style),
            })
        })
        .collect()
}

/// Parse a manifest file, picking the format from the extension or content
pub fn parse_file(path: &Path) -> Result<Vec<Item>> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
        || content.trim_start().starts_with(['[', '{']);

    tracing::debug!(path = %path.display(), json = is_json, "parsing manifest");
    if is_json {
        parse_json(&content)
    } else {
        parse_text(&content)
    }
}

/// Empty strings mean "use the run default"
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
