//! Legacy-format conversion.
//!
//! The GitHub mirror still serves the historical, loosely-structured JSON
//! schema. Replica backends convert it into canonical v2 records on the
//! fly so downstream consumers only ever see one shape.

use serde_json::{Map, Value};
use tracing::debug;

/// Legacy baseline labels that map onto canonical baseline identifiers.
fn normalize_baseline(baseline: &str) -> String {
    match baseline {
        "stable diffusion 1" => "stable_diffusion_1".to_string(),
        "stable diffusion 2" => "stable_diffusion_2_768".to_string(),
        "stable diffusion 2 512" => "stable_diffusion_2_512".to_string(),
        other => other.to_string(),
    }
}

/// Fields that only exist in the legacy schema and are not carried over.
const LEGACY_ONLY_FIELDS: [&str; 4] = ["type", "available", "download_all", "config"];

/// Convert one legacy record into its canonical v2 shape.
fn convert_legacy_record(name: &str, legacy: &Value) -> Value {
    let mut record = Map::new();
    let Some(legacy_map) = legacy.as_object() else {
        return Value::Object(record);
    };

    record.insert("name".to_string(), Value::String(name.to_string()));

    for (key, value) in legacy_map {
        if key == "name" || LEGACY_ONLY_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if key == "baseline" {
            if let Some(baseline) = value.as_str() {
                record.insert(
                    "baseline".to_string(),
                    Value::String(normalize_baseline(baseline)),
                );
                continue;
            }
        }
        record.insert(key.clone(), value.clone());
    }

    // Rebuild the download list: join download entries with the sha256
    // sums recorded on the legacy config files, keyed by file name.
    let config = legacy_map.get("config").and_then(|c| c.as_object());
    let files = config
        .and_then(|c| c.get("files"))
        .and_then(|f| f.as_array())
        .cloned()
        .unwrap_or_default();
    let downloads = config
        .and_then(|c| c.get("download"))
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

    let sha_for = |file_name: &str| -> Option<String> {
        files.iter().find_map(|f| {
            let path = f.get("path")?.as_str()?;
            if path == file_name || path.ends_with(&format!("/{}", file_name)) {
                f.get("sha256sum")?.as_str().map(String::from)
            } else {
                None
            }
        })
    };

    let converted: Vec<Value> = downloads
        .iter()
        .filter_map(|d| {
            let entry = d.as_object()?;
            let file_name = entry.get("file_name").and_then(|v| v.as_str());
            let file_url = entry.get("file_url").and_then(|v| v.as_str());
            let mut out = Map::new();
            if let Some(file_name) = file_name {
                out.insert("file_name".to_string(), Value::String(file_name.to_string()));
                if let Some(sha) = sha_for(file_name) {
                    out.insert("sha256sum".to_string(), Value::String(sha));
                }
            }
            if let Some(file_url) = file_url {
                out.insert("file_url".to_string(), Value::String(file_url.to_string()));
            }
            Some(Value::Object(out))
        })
        .collect();

    let mut download_config = Map::new();
    download_config.insert("download".to_string(), Value::Array(converted));
    record.insert("config".to_string(), Value::Object(download_config));

    Value::Object(record)
}

/// Convert a whole legacy category document into canonical v2 format.
pub fn convert_legacy_category(legacy: &Value) -> Value {
    let mut result = Map::new();
    if let Some(models) = legacy.as_object() {
        for (name, record) in models {
            result.insert(name.clone(), convert_legacy_record(name, record));
        }
        debug!("Converted {} legacy records", result.len());
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_legacy() -> Value {
        json!({
            "Deliberate": {
                "name": "Deliberate",
                "type": "ckpt",
                "description": "A general purpose model",
                "baseline": "stable diffusion 1",
                "version": "3.0",
                "style": "generalist",
                "nsfw": false,
                "available": true,
                "download_all": false,
                "config": {
                    "files": [
                        {"path": "deliberate.safetensors", "sha256sum": "abc123"}
                    ],
                    "download": [
                        {
                            "file_name": "deliberate.safetensors",
                            "file_path": "",
                            "file_url": "https://huggingface.co/org/deliberate/resolve/main/deliberate.safetensors"
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_convert_maps_baseline_and_downloads() {
        let converted = convert_legacy_category(&sample_legacy());
        let record = &converted["Deliberate"];

        assert_eq!(record["baseline"], "stable_diffusion_1");
        assert_eq!(record["description"], "A general purpose model");
        assert_eq!(record["nsfw"], false);

        let downloads = record["config"]["download"].as_array().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0]["file_name"], "deliberate.safetensors");
        assert_eq!(downloads[0]["sha256sum"], "abc123");
        assert!(downloads[0]["file_url"]
            .as_str()
            .unwrap()
            .starts_with("https://huggingface.co/"));
    }

    #[test]
    fn test_legacy_only_fields_are_dropped() {
        let converted = convert_legacy_category(&sample_legacy());
        let record = converted["Deliberate"].as_object().unwrap();

        assert!(!record.contains_key("type"));
        assert!(!record.contains_key("available"));
        assert!(!record.contains_key("download_all"));
        // config survives only in its rebuilt form
        assert!(record["config"].as_object().unwrap().contains_key("download"));
        assert!(!record["config"].as_object().unwrap().contains_key("files"));
    }

    #[test]
    fn test_unknown_baseline_passes_through() {
        let legacy = json!({
            "SDXL 1.0": {"name": "SDXL 1.0", "baseline": "stable_diffusion_xl", "config": {}}
        });
        let converted = convert_legacy_category(&legacy);
        assert_eq!(converted["SDXL 1.0"]["baseline"], "stable_diffusion_xl");
    }

    #[test]
    fn test_record_without_downloads_gets_empty_list() {
        let legacy = json!({"Bare": {"name": "Bare"}});
        let converted = convert_legacy_category(&legacy);
        assert_eq!(
            converted["Bare"]["config"]["download"].as_array().unwrap().len(),
            0
        );
    }
}
