use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

const OMITTED: &str = "<omitted>";

/// Outcome of one generation request, written next to its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptInput {
    pub flow: String,
    pub model: Option<String>,
    pub request: Value,
    pub response: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

pub fn build_receipt(input: &ReceiptInput, receipt_path: &Path) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert("created_at".to_string(), Value::String(now_utc_iso()));
    root.insert("flow".to_string(), Value::String(input.flow.clone()));
    root.insert(
        "model".to_string(),
        input.model.clone().map(Value::String).unwrap_or(Value::Null),
    );
    root.insert("request".to_string(), sanitize_payload(&input.request));
    root.insert("response".to_string(), sanitize_payload(&input.response));
    root.insert(
        "warnings".to_string(),
        Value::Array(input.warnings.iter().cloned().map(Value::String).collect()),
    );
    root.insert(
        "success".to_string(),
        Value::Bool(input.error.is_none()),
    );
    if let Some(error) = &input.error {
        root.insert("error".to_string(), Value::String(error.clone()));
    }

    let mut artifacts = Map::new();
    artifacts.insert(
        "files".to_string(),
        Value::Array(input.artifacts.iter().cloned().map(Value::String).collect()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "metadata".to_string(),
        sanitize_payload(&Value::Object(input.metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// `out.mp4` gets `out.mp4.receipt.json` beside it.
pub fn receipt_path_for(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".receipt.json");
    artifact.with_file_name(name)
}

/// Replaces inline image payloads so receipts stay small and never embed
/// uploaded files.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) if text.starts_with("data:") => Value::String(OMITTED.to_string()),
        Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "imageurl" | "image_url"
                ) && !row.is_null()
                {
                    out.insert(key.clone(), Value::String(OMITTED.to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{build_receipt, receipt_path_for, write_receipt, ReceiptInput, RECEIPT_SCHEMA_VERSION};

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = receipt_path_for(&temp.path().join("out.mp4"));
        let mut metadata = Map::new();
        metadata.insert("elapsed_ms".to_string(), json!(12));

        let input = ReceiptInput {
            flow: "advanced-video".to_string(),
            model: Some("dryrun-video-1".to_string()),
            request: json!({
                "prompt": "a cat surfing",
                "imageUrl": "data:image/png;base64,AAAA",
                "duration": 5
            }),
            response: json!({"success": true, "filePath": "/tmp/out.mp4"}),
            warnings: vec!["steps clamped".to_string()],
            artifacts: vec!["/tmp/out.mp4".to_string()],
            error: None,
            metadata,
        };
        let payload = build_receipt(&input, &path);
        write_receipt(&path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["prompt"], json!("a cat surfing"));
        assert_eq!(parsed["request"]["imageUrl"], json!("<omitted>"));
        assert_eq!(parsed["success"], json!(true));
        assert_eq!(parsed["artifacts"]["files"], json!(["/tmp/out.mp4"]));
        assert_eq!(path, temp.path().join("out.mp4.receipt.json"));
        Ok(())
    }

    #[test]
    fn failed_receipt_records_error_and_strips_nested_data_urls() {
        let input = ReceiptInput {
            flow: "selfie".to_string(),
            model: None,
            request: json!({"images": ["data:image/png;base64,BBBB"], "imageUrl": null}),
            response: Value::Null,
            warnings: Vec::new(),
            artifacts: Vec::new(),
            error: Some("Provider timeout".to_string()),
            metadata: Map::new(),
        };
        let payload = build_receipt(&input, std::path::Path::new("/tmp/r.json"));
        assert_eq!(payload["success"], json!(false));
        assert_eq!(payload["error"], json!("Provider timeout"));
        assert_eq!(payload["request"]["images"], json!(["<omitted>"]));
        assert_eq!(payload["request"]["imageUrl"], Value::Null);
    }
}
