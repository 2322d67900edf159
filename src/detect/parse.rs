//! Conversion of a decoded provider response into `DetectionRecord`s.
//!
//! The provider payload is treated as opaque JSON. Malformed entries are
//! dropped one at a time; only a payload with no recognisable prediction list
//! is rejected as a whole.

use serde_json::{Map, Value};

use super::record::{DetectionBatch, DetectionRecord};
use crate::error::{MalformedDetection, ProviderError};

/// Parse a provider response.
///
/// Accepts either `{"predictions": [...], ...}` or a bare array of prediction
/// objects. Each prediction needs `class`, `x`, `y`, `width`, `height` and
/// `confidence`.
pub fn parse_response(payload: &Value) -> Result<DetectionBatch, ProviderError> {
    let (entries, meta) = match payload {
        Value::Array(entries) => (entries.as_slice(), None),
        Value::Object(map) => match map.get("predictions") {
            Some(Value::Array(entries)) => (entries.as_slice(), Some(map)),
            Some(other) => {
                return Err(ProviderError::MalformedPayload(format!(
                    "`predictions` is not an array (found {})",
                    json_kind(other)
                )))
            }
            None => {
                return Err(ProviderError::MalformedPayload(
                    "response has no `predictions` field".to_string(),
                ))
            }
        },
        other => {
            return Err(ProviderError::MalformedPayload(format!(
                "expected object or array, found {}",
                json_kind(other)
            )))
        }
    };

    let mut batch = DetectionBatch {
        records: Vec::with_capacity(entries.len()),
        ..DetectionBatch::default()
    };
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                log::debug!("dropping detection #{}: {}", index, err);
                batch.dropped += 1;
            }
        }
    }
    if batch.dropped > 0 {
        log::warn!(
            "dropped {} malformed detection(s), kept {}",
            batch.dropped,
            batch.records.len()
        );
    }

    if let Some(meta) = meta {
        batch.image_size = image_size(meta);
        batch.image_id = meta
            .get("image_id")
            .or_else(|| meta.get("inference_id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
    }
    Ok(batch)
}

/// Parse one prediction object into a validated record.
pub fn parse_entry(entry: &Value) -> Result<DetectionRecord, MalformedDetection> {
    let obj = entry.as_object().ok_or(MalformedDetection::NotAnObject)?;
    let class_label = obj
        .get("class")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|class| !class.is_empty())
        .ok_or(MalformedDetection::MissingClass)?;
    let x = number(obj, "x")?;
    let y = number(obj, "y")?;
    let width = number(obj, "width")?;
    let height = number(obj, "height")?;
    let confidence = number(obj, "confidence")?;

    // Range checks happen on the f64 values so that e.g. 1.0000001 is not
    // rounded into range by the f32 conversion.
    if width <= 0.0 || height <= 0.0 {
        return Err(MalformedDetection::NonPositiveSize { width, height });
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(MalformedDetection::ConfidenceOutOfRange(confidence));
    }

    DetectionRecord::new(
        class_label,
        x as f32,
        y as f32,
        width as f32,
        height as f32,
        confidence as f32,
    )
}

fn number(obj: &Map<String, Value>, field: &'static str) -> Result<f64, MalformedDetection> {
    obj.get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or(MalformedDetection::MissingField(field))
}

fn image_size(meta: &Map<String, Value>) -> Option<(u32, u32)> {
    let image = meta.get("image")?.as_object()?;
    let width = image.get("width")?.as_u64()?;
    let height = image.get("height")?.as_u64()?;
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
