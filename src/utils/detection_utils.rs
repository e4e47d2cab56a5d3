use std::collections::HashMap;
use std::io::Cursor;
use std::sync::OnceLock;

use image::imageops::FilterType;
use image::DynamicImage;
use reqwest::blocking::{multipart, Client};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error};

use crate::config::CONFIG;
use crate::error::SafetyGuardError;
use crate::utils::image_utils::draw_detections;

/// Canonical protective equipment every worker must wear, in reporting order.
pub const REQUIRED_PPE: [&str; 4] = ["helmet", "vest", "gloves", "boots"];

/// The effective required-equipment list (configurable, defaults to
/// [`REQUIRED_PPE`]).
pub fn required_ppe() -> &'static [String] {
    &CONFIG.detection.required_ppe
}

/// One raw detection as returned by the model API.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Detection {
    /// Pixel coordinates `[x1, y1, x2, y2]` in the inference resolution.
    #[serde(deserialize_with = "deserialize_box")]
    pub r#box: [u32; 4],
    #[serde(deserialize_with = "float_to_u8")]
    pub cls: u8,
    pub cls_name: String,
    #[serde(deserialize_with = "deserialize_conf")]
    pub conf: u8,
}

fn float_to_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let f = f32::deserialize(deserializer)?;
    Ok((f * 1.0) as u8)
}

fn deserialize_box<'de, D>(deserializer: D) -> Result<[u32; 4], D::Error>
where
    D: Deserializer<'de>,
{
    let vec: Vec<f32> = Vec::deserialize(deserializer)?;
    if vec.len() != 4 {
        return Err(serde::de::Error::custom("detection box must have 4 values"));
    }
    Ok([vec[0] as u32, vec[1] as u32, vec[2] as u32, vec[3] as u32])
}

fn deserialize_conf<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let f = f32::deserialize(deserializer)?;
    Ok((f * 100.0) as u8)
}

/// Per-frame compliance verdict produced by [`detect_ppe`].
#[derive(Debug, Clone)]
pub struct ComplianceResult {
    /// Frame with boxes and labels burned in, at the inference resolution
    /// (not necessarily the input resolution).
    pub annotated_frame: DynamicImage,
    /// Required items with no detection, in canonical order, no duplicates.
    pub missing_items: Vec<String>,
    /// Detected item tallies; never overlaps `missing_items`.
    pub item_counts: HashMap<String, u32>,
}

impl ComplianceResult {
    pub fn is_compliant(&self) -> bool {
        self.missing_items.is_empty()
    }
}

/// Boundary to the pre-trained object-detection model.
pub trait DetectionModelTrait: Send + Sync {
    /// Run inference on an RGB frame, returning detections at or above the
    /// confidence threshold.
    fn predict(
        &self,
        frame: &DynamicImage,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, SafetyGuardError>;

    /// Resolve a class index through the model's own class table.
    fn class_name(&self, class_id: u8) -> Option<&str>;
}

/// Production model client: posts frames to the inference API configured in
/// `[model]` and parses the JSON detection list.
pub struct HttpDetectionModel {
    api_url: String,
    class_names: Vec<String>,
    // Created on first use: blocking clients may only be built on the
    // inspection loop thread, never inside the async runtime.
    client: OnceLock<Client>,
}

impl HttpDetectionModel {
    pub fn from_config() -> Self {
        Self {
            api_url: CONFIG.model.api_url.clone(),
            class_names: CONFIG.model.class_names.clone(),
            client: OnceLock::new(),
        }
    }
}

impl DetectionModelTrait for HttpDetectionModel {
    fn predict(
        &self,
        frame: &DynamicImage,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, SafetyGuardError> {
        let mut buffer = Cursor::new(Vec::new());
        frame.write_to(&mut buffer, image::ImageFormat::Png)?;

        let part = multipart::Part::bytes(buffer.into_inner())
            .file_name("frame.png")
            .mime_str("image/png")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("conf", conf_threshold.to_string());

        let detections: Vec<Detection> = self
            .client
            .get_or_init(Client::new)
            .post(&self.api_url)
            .multipart(form)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(detections)
    }

    fn class_name(&self, class_id: u8) -> Option<&str> {
        self.class_names.get(class_id as usize).map(String::as_str)
    }
}

/// Detect PPE equipment on one frame.
///
/// Never fails: invalid input degrades to a no-op result and any error in the
/// resize/inference/annotation pipeline degrades to the worst-case assumption
/// that every required item is missing.
pub fn detect_ppe(
    model: &dyn DetectionModelTrait,
    frame: &DynamicImage,
    conf_threshold: f32,
) -> ComplianceResult {
    if frame.width() == 0 || frame.height() == 0 {
        debug!("Skipping detection on an empty frame");
        return ComplianceResult {
            annotated_frame: frame.clone(),
            missing_items: Vec::new(),
            item_counts: HashMap::new(),
        };
    }

    match run_pipeline(model, frame, conf_threshold) {
        Ok(result) => result,
        Err(err) => {
            error!("Detection error: {}", err);
            worst_case(frame.clone())
        }
    }
}

fn run_pipeline(
    model: &dyn DetectionModelTrait,
    frame: &DynamicImage,
    conf_threshold: f32,
) -> Result<ComplianceResult, SafetyGuardError> {
    let resized = resize_for_inference(frame);

    let detections = model.predict(&resized, conf_threshold)?;
    if detections.is_empty() {
        debug!("No detections, assuming all required equipment is missing");
        return Ok(worst_case(resized));
    }

    // Labels resolve through the model's class table; indices the table does
    // not cover keep the label carried on the wire.
    let labeled: Vec<(Detection, String)> = detections
        .into_iter()
        .map(|detection| {
            let label = model
                .class_name(detection.cls)
                .map(str::to_string)
                .unwrap_or_else(|| detection.cls_name.clone());
            (detection, label)
        })
        .collect();

    let mut item_counts: HashMap<String, u32> = HashMap::new();
    for (_, label) in &labeled {
        *item_counts.entry(label.clone()).or_insert(0) += 1;
    }

    let missing_items = missing_from(&item_counts);
    let annotated_frame = draw_detections(resized, &labeled)?;

    Ok(ComplianceResult {
        annotated_frame,
        missing_items,
        item_counts,
    })
}

/// Resize to the fixed inference height, preserving aspect ratio with the
/// width truncated to an integer.
fn resize_for_inference(frame: &DynamicImage) -> DynamicImage {
    let target_height = CONFIG.detection.target_height;
    let new_width =
        ((target_height as f64 / frame.height() as f64) * frame.width() as f64) as u32;
    frame.resize_exact(new_width.max(1), target_height, FilterType::Triangle)
}

fn missing_from(item_counts: &HashMap<String, u32>) -> Vec<String> {
    required_ppe()
        .iter()
        .filter(|item| !item_counts.contains_key(*item))
        .cloned()
        .collect()
}

fn worst_case(frame: DynamicImage) -> ComplianceResult {
    ComplianceResult {
        annotated_frame: frame,
        missing_items: required_ppe().to_vec(),
        item_counts: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn test_frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(64, 48))
    }

    fn test_detection(cls: u8, cls_name: &str) -> Detection {
        Detection {
            r#box: [10, 10, 50, 50],
            cls,
            cls_name: cls_name.to_string(),
            conf: 85,
        }
    }

    struct StubModel {
        detections: Vec<Detection>,
        class_names: Vec<String>,
        should_fail: bool,
    }

    impl StubModel {
        fn new() -> Self {
            Self {
                detections: Vec::new(),
                class_names: REQUIRED_PPE.iter().map(|item| item.to_string()).collect(),
                should_fail: false,
            }
        }

        fn with_detections(mut self, detections: Vec<Detection>) -> Self {
            self.detections = detections;
            self
        }

        fn with_failure(mut self) -> Self {
            self.should_fail = true;
            self
        }
    }

    impl DetectionModelTrait for StubModel {
        fn predict(
            &self,
            _frame: &DynamicImage,
            _conf_threshold: f32,
        ) -> Result<Vec<Detection>, SafetyGuardError> {
            if self.should_fail {
                return Err(SafetyGuardError::Other("Mock detection failure".to_string()));
            }
            Ok(self.detections.clone())
        }

        fn class_name(&self, class_id: u8) -> Option<&str> {
            self.class_names.get(class_id as usize).map(String::as_str)
        }
    }

    #[test]
    fn zero_detections_mean_everything_missing() {
        let model = StubModel::new();
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert_eq!(result.missing_items, REQUIRED_PPE.to_vec());
        assert!(result.item_counts.is_empty());
    }

    #[test]
    fn subset_of_detections_yields_the_complement_missing() {
        let model = StubModel::new().with_detections(vec![
            test_detection(1, "vest"),
            test_detection(2, "gloves"),
            test_detection(3, "boots"),
        ]);
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert_eq!(result.missing_items, vec!["helmet"]);
        assert_eq!(result.item_counts.len(), 3);
        for item in &result.missing_items {
            assert!(!result.item_counts.contains_key(item));
        }
    }

    #[test]
    fn compliant_frame_has_no_missing_items_and_four_counts() {
        let model = StubModel::new().with_detections(vec![
            test_detection(0, "helmet"),
            test_detection(1, "vest"),
            test_detection(2, "gloves"),
            test_detection(3, "boots"),
        ]);
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert!(result.is_compliant());
        assert_eq!(result.item_counts.len(), 4);
        assert!(result.item_counts.values().all(|count| *count > 0));
    }

    #[test]
    fn duplicate_detections_are_tallied() {
        let model = StubModel::new().with_detections(vec![
            test_detection(2, "gloves"),
            test_detection(2, "gloves"),
        ]);
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert_eq!(result.item_counts.get("gloves"), Some(&2));
        assert_eq!(result.missing_items, vec!["helmet", "vest", "boots"]);
    }

    #[test]
    fn empty_frame_is_a_noop() {
        let model = StubModel::new().with_failure();
        let frame = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let result = detect_ppe(&model, &frame, 0.5);
        assert!(result.missing_items.is_empty());
        assert!(result.item_counts.is_empty());
        assert_eq!(result.annotated_frame.width(), 0);
    }

    #[test]
    fn model_failure_degrades_to_worst_case() {
        let model = StubModel::new().with_failure();
        let frame = test_frame();
        let result = detect_ppe(&model, &frame, 0.5);
        assert_eq!(result.missing_items, REQUIRED_PPE.to_vec());
        assert!(result.item_counts.is_empty());
        // The original frame comes back untouched
        assert_eq!(result.annotated_frame.width(), frame.width());
        assert_eq!(result.annotated_frame.height(), frame.height());
    }

    #[test]
    fn deterministic_model_makes_detection_idempotent() {
        let model = StubModel::new().with_detections(vec![test_detection(0, "helmet")]);
        let frame = test_frame();
        let first = detect_ppe(&model, &frame, 0.5);
        let second = detect_ppe(&model, &frame, 0.5);
        assert_eq!(first.missing_items, second.missing_items);
        assert_eq!(first.item_counts, second.item_counts);
    }

    #[test]
    fn annotated_frame_is_at_inference_resolution() {
        let model = StubModel::new().with_detections(vec![test_detection(0, "helmet")]);
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert_eq!(result.annotated_frame.height(), 640);
        // 64x48 input scaled to height 640 with the width truncated
        assert_eq!(result.annotated_frame.width(), 853);
    }

    #[test]
    fn unknown_class_index_falls_back_to_wire_label() {
        let model = StubModel::new().with_detections(vec![test_detection(9, "goggles")]);
        let result = detect_ppe(&model, &test_frame(), 0.5);
        assert_eq!(result.item_counts.get("goggles"), Some(&1));
        assert_eq!(result.missing_items, REQUIRED_PPE.to_vec());
    }

    #[test]
    fn detection_json_is_parsed_with_float_conversions() {
        let raw = r#"[{"box": [10.0, 20.5, 110.9, 220.0], "cls": 1.0, "cls_name": "vest", "conf": 0.87}]"#;
        let detections: Vec<Detection> = serde_json::from_str(raw).unwrap();
        assert_eq!(detections[0].r#box, [10, 20, 110, 220]);
        assert_eq!(detections[0].cls, 1);
        assert_eq!(detections[0].conf, 87);
    }
}
