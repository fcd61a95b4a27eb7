use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Bounding box of one detected face, in source image pixels.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
}

/// Verdict for a single image, or the summary part of a video verdict.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    pub is_deepfake: bool,
    pub confidence: f32,
    pub faces_detected: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faces: Vec<FaceBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock seconds spent on the analysis.
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn failed(error: String, processing_time: f64) -> Self {
        Self {
            is_deepfake: false,
            confidence: 0.0,
            faces_detected: 0,
            faces: Vec::new(),
            message: None,
            error: Some(error),
            processing_time,
            timestamp: Utc::now(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FrameAnalysis {
    pub frame_number: u64,
    pub is_deepfake: bool,
    pub confidence: f32,
    pub faces_detected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VideoAnalysisResult {
    #[serde(flatten)]
    pub summary: AnalysisResult,
    /// Share of sampled frames flagged individually, in percent.
    pub deepfake_percentage: f32,
    pub total_frames: u64,
    pub analyzed_frames: usize,
    pub duration: f64,
    pub frame_analyses: Vec<FrameAnalysis>,
}

impl VideoAnalysisResult {
    pub fn failed(error: String, processing_time: f64) -> Self {
        Self {
            summary: AnalysisResult::failed(error, processing_time),
            deepfake_percentage: 0.0,
            total_frames: 0,
            analyzed_frames: 0,
            duration: 0.0,
            frame_analyses: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_params: Option<u64>,
    pub confidence_threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn video_result_flattens_summary_fields() {
        let result = VideoAnalysisResult::failed("cannot open".into(), 0.5);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["is_deepfake"], false);
        assert_eq!(json["error"], "cannot open");
        assert_eq!(json["analyzed_frames"], 0);
        assert!(json.get("summary").is_none());
        assert!(json.get("faces").is_none());
    }

    #[test]
    fn media_kind_uses_lowercase_names() {
        assert_eq!(MediaKind::Video.to_string(), "video");
        assert_eq!(MediaKind::from_str("image").unwrap(), MediaKind::Image);
        assert_eq!(serde_json::to_value(MediaKind::Image).unwrap(), "image");
    }
}
