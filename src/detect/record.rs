use serde::{Deserialize, Serialize};

use crate::error::MalformedDetection;

/// Class reported by the shelf detector for an empty facing.
pub const MISSING_CLASS: &str = "missing";

/// One detected region in source-image pixel space (2D) or scene units (3D).
///
/// Geometry is center-based: `center_x`/`center_y` locate the middle of the
/// box, `width`/`height` its full extent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_label: String,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl DetectionRecord {
    /// Build a record, rejecting geometry or confidence that breaks the invariants.
    pub fn new(
        class_label: impl Into<String>,
        center_x: f32,
        center_y: f32,
        width: f32,
        height: f32,
        confidence: f32,
    ) -> Result<Self, MalformedDetection> {
        let record = Self {
            class_label: class_label.into(),
            center_x,
            center_y,
            width,
            height,
            confidence,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), MalformedDetection> {
        if self.class_label.trim().is_empty() {
            return Err(MalformedDetection::MissingClass);
        }
        if !self.center_x.is_finite() {
            return Err(MalformedDetection::MissingField("x"));
        }
        if !self.center_y.is_finite() {
            return Err(MalformedDetection::MissingField("y"));
        }
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
        {
            return Err(MalformedDetection::NonPositiveSize {
                width: self.width as f64,
                height: self.height as f64,
            });
        }
        if self.confidence.is_nan() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(MalformedDetection::ConfidenceOutOfRange(
                self.confidence as f64,
            ));
        }
        Ok(())
    }

    pub fn is_class(&self, class: &str) -> bool {
        self.class_label == class
    }

    /// Top-left corner of the box: `(cx - w/2, cy - h/2)`.
    pub fn top_left(&self) -> (f32, f32) {
        (
            self.center_x - self.width / 2.0,
            self.center_y - self.height / 2.0,
        )
    }

    /// Bottom-right corner of the box: `(cx + w/2, cy + h/2)`.
    pub fn bottom_right(&self) -> (f32, f32) {
        (
            self.center_x + self.width / 2.0,
            self.center_y + self.height / 2.0,
        )
    }

    /// Confidence rendered as a whole percentage, e.g. `"85%"`.
    pub fn confidence_label(&self) -> String {
        confidence_label(self.confidence)
    }
}

/// Format a `0..=1` confidence as a rounded percentage string.
///
/// Halves round away from zero, so `0.875` reads `"88%"`.
pub fn confidence_label(confidence: f32) -> String {
    let percent = (confidence as f64 * 100.0).round().clamp(0.0, 100.0);
    format!("{}%", percent as u32)
}

/// Records that survived validation plus what the provider told us about the frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub records: Vec<DetectionRecord>,
    /// Number of entries dropped as malformed. Diagnostic only.
    pub dropped: usize,
    /// Source dimensions reported alongside the predictions, when present.
    pub image_size: Option<(u32, u32)>,
    /// Provider-side identifier for the inference, when present.
    pub image_id: Option<String>,
}

impl DetectionBatch {
    pub fn from_records(records: Vec<DetectionRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn count_class(&self, class: &str) -> usize {
        self.records.iter().filter(|r| r.is_class(class)).count()
    }

    pub fn of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a DetectionRecord> {
        self.records.iter().filter(move |r| r.is_class(class))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_follow_center_geometry() {
        let record = DetectionRecord::new(MISSING_CLASS, 100.0, 100.0, 40.0, 20.0, 0.85).unwrap();
        assert_eq!(record.top_left(), (80.0, 90.0));
        assert_eq!(record.bottom_right(), (120.0, 110.0));
    }

    #[test]
    fn confidence_label_rounds_half_up() {
        assert_eq!(confidence_label(0.85), "85%");
        assert_eq!(confidence_label(0.875), "88%");
        assert_eq!(confidence_label(0.0), "0%");
        assert_eq!(confidence_label(1.0), "100%");
    }

    #[test]
    fn invalid_records_rejected() {
        assert_eq!(
            DetectionRecord::new(MISSING_CLASS, 1.0, 1.0, 0.0, 5.0, 0.5).unwrap_err(),
            MalformedDetection::NonPositiveSize {
                width: 0.0,
                height: 5.0
            }
        );
        assert!(matches!(
            DetectionRecord::new(MISSING_CLASS, 1.0, 1.0, 5.0, 5.0, 1.5),
            Err(MalformedDetection::ConfidenceOutOfRange(_))
        ));
        assert_eq!(
            DetectionRecord::new("  ", 1.0, 1.0, 5.0, 5.0, 0.5).unwrap_err(),
            MalformedDetection::MissingClass
        );
    }

    #[test]
    fn batch_counts_by_class() {
        let batch = DetectionBatch::from_records(vec![
            DetectionRecord::new(MISSING_CLASS, 1.0, 1.0, 2.0, 2.0, 0.5).unwrap(),
            DetectionRecord::new("product", 5.0, 5.0, 2.0, 2.0, 0.9).unwrap(),
            DetectionRecord::new(MISSING_CLASS, 9.0, 9.0, 2.0, 2.0, 0.7).unwrap(),
        ]);
        assert_eq!(batch.count_class(MISSING_CLASS), 2);
        assert_eq!(batch.of_class("product").count(), 1);
        assert_eq!(batch.len(), 3);
    }
}
