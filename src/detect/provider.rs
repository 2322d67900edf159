use serde_json::Value;

use super::parse::parse_response;
use super::record::DetectionBatch;
use crate::error::ProviderError;

/// Remote detection service seam.
///
/// A provider takes an encoded image (JPEG/PNG bytes) and returns the decoded
/// response body untouched. Interpreting the body is the job of
/// [`parse_response`]; a provider never retries on failure.
pub trait DetectionProvider: Send {
    /// Provider identifier for logs.
    fn name(&self) -> &'static str;

    /// Submit one image and return the raw response.
    fn detect(&mut self, image: &[u8]) -> Result<Value, ProviderError>;

    /// Submit one image and parse the response into validated records.
    fn detect_batch(&mut self, image: &[u8]) -> Result<DetectionBatch, ProviderError> {
        let payload = self.detect(image)?;
        let batch = parse_response(&payload)?;
        log::info!(
            "{}: {} detection(s), {} dropped",
            self.name(),
            batch.len(),
            batch.dropped
        );
        Ok(batch)
    }
}

/// Provider returning a canned response. Used offline and in tests.
pub struct StubProvider {
    response: Value,
    calls: u64,
}

impl StubProvider {
    pub fn new(response: Value) -> Self {
        Self { response, calls: 0 }
    }

    /// Number of `detect` calls served.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(serde_json::json!({ "predictions": [] }))
    }
}

impl DetectionProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &[u8]) -> Result<Value, ProviderError> {
        if image.is_empty() {
            return Err(ProviderError::Transport("empty image payload".to_string()));
        }
        self.calls += 1;
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stub_provider_serves_canned_batch() {
        let mut provider = StubProvider::new(json!({
            "predictions": [
                {"x": 10, "y": 10, "width": 4, "height": 4, "confidence": 0.6, "class": "missing"},
                {"x": 10, "y": 10, "width": 4, "height": 4, "confidence": 7, "class": "missing"}
            ]
        }));
        let batch = provider.detect_batch(b"jpeg").unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.dropped, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn stub_provider_rejects_empty_payload() {
        let mut provider = StubProvider::default();
        assert!(matches!(
            provider.detect(&[]),
            Err(ProviderError::Transport(_))
        ));
        assert_eq!(provider.calls(), 0);
    }
}
