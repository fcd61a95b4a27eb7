use chrono::Utc;
use image::{DynamicImage, ImageReader, RgbImage};
use shared::{AnalysisResult, FaceBox, FrameAnalysis};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::DetectionError;
use super::face::FaceDetector;
use super::model::Classifier;
use super::preprocess::to_input_tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Classified,
    NoFace,
    /// Faces found but no classifier is loaded.
    ClassifierUnavailable,
    FaceDetectorUnavailable,
}

impl UnitOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            UnitOutcome::Classified => "Analysis completed successfully",
            UnitOutcome::NoFace => "No face detected in the image",
            UnitOutcome::ClassifierUnavailable => {
                "Classifier not loaded; running in degraded mode"
            }
            UnitOutcome::FaceDetectorUnavailable => {
                "Face detector not loaded; running in degraded mode"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitVerdict {
    pub is_deepfake: bool,
    pub confidence: f32,
    pub faces: Vec<FaceBox>,
    pub outcome: UnitOutcome,
}

impl UnitVerdict {
    fn without_score(faces: Vec<FaceBox>, outcome: UnitOutcome) -> Self {
        Self {
            is_deepfake: false,
            confidence: 0.0,
            faces,
            outcome,
        }
    }
}

/// Face detection followed by classification for one image or frame.
#[derive(Clone)]
pub struct UnitAnalyzer {
    classifier: Option<Arc<dyn Classifier>>,
    faces: Option<Arc<dyn FaceDetector>>,
    threshold: f32,
    input_size: (u32, u32),
}

impl UnitAnalyzer {
    pub fn new(
        classifier: Option<Arc<dyn Classifier>>,
        faces: Option<Arc<dyn FaceDetector>>,
        threshold: f32,
        input_size: (u32, u32),
    ) -> Self {
        Self {
            classifier,
            faces,
            threshold,
            input_size,
        }
    }

    pub fn classifier(&self) -> Option<&dyn Classifier> {
        self.classifier.as_deref()
    }

    pub fn has_face_detector(&self) -> bool {
        self.faces.is_some()
    }

    /// The classifier runs only when at least one face is present.
    pub fn evaluate(&self, image: &DynamicImage) -> Result<UnitVerdict, DetectionError> {
        let Some(detector) = &self.faces else {
            return Ok(UnitVerdict::without_score(
                Vec::new(),
                UnitOutcome::FaceDetectorUnavailable,
            ));
        };

        let faces = detector.detect(&image.to_luma8())?;
        if faces.is_empty() {
            return Ok(UnitVerdict::without_score(faces, UnitOutcome::NoFace));
        }

        let Some(classifier) = &self.classifier else {
            return Ok(UnitVerdict::without_score(
                faces,
                UnitOutcome::ClassifierUnavailable,
            ));
        };

        let input = to_input_tensor(image, self.input_size);
        let confidence = classifier.predict(&input)?;
        if !confidence.is_finite() {
            return Err(DetectionError::Inference(format!(
                "classifier returned a non-finite score: {}",
                confidence
            )));
        }
        let confidence = confidence.clamp(0.0, 1.0);

        Ok(UnitVerdict {
            is_deepfake: confidence > self.threshold,
            confidence,
            faces,
            outcome: UnitOutcome::Classified,
        })
    }

    /// Decodes and analyzes an image file. Failures end up in `error`.
    pub fn analyze_image(&self, path: &Path) -> AnalysisResult {
        let started = Instant::now();

        match self.decode(path).and_then(|image| self.evaluate(&image)) {
            Ok(verdict) => AnalysisResult {
                is_deepfake: verdict.is_deepfake,
                confidence: verdict.confidence,
                faces_detected: verdict.faces.len(),
                faces: verdict.faces,
                message: Some(verdict.outcome.message().to_string()),
                error: None,
                processing_time: started.elapsed().as_secs_f64(),
                timestamp: Utc::now(),
            },
            Err(e) => {
                log::error!("Image analysis failed for {}: {}", path.display(), e);
                AnalysisResult::failed(e.to_string(), started.elapsed().as_secs_f64())
            }
        }
    }

    pub fn analyze_frame(&self, frame_number: u64, frame: RgbImage) -> FrameAnalysis {
        match self.evaluate(&DynamicImage::ImageRgb8(frame)) {
            Ok(verdict) => FrameAnalysis {
                frame_number,
                is_deepfake: verdict.is_deepfake,
                confidence: verdict.confidence,
                faces_detected: verdict.faces.len(),
                error: None,
            },
            Err(e) => {
                log::error!("Analysis of frame {} failed: {}", frame_number, e);
                FrameAnalysis {
                    frame_number,
                    is_deepfake: false,
                    confidence: 0.0,
                    faces_detected: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, DetectionError> {
        Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::testing::{
        FailingClassifier, FixedFaces, FixedScore, MeanIntensity, solid_image, write_png,
    };

    fn analyzer(score: f32, faces: usize) -> UnitAnalyzer {
        UnitAnalyzer::new(
            Some(Arc::new(FixedScore(score))),
            Some(Arc::new(FixedFaces(faces))),
            0.7,
            (32, 32),
        )
    }

    #[test]
    fn verdict_is_confidence_above_threshold() {
        let image = solid_image(64, 200);
        for step in 0..=100 {
            let c = step as f32 / 100.0;
            let verdict = analyzer(c, 1).evaluate(&image).unwrap();
            assert_eq!(verdict.confidence, c);
            assert_eq!(verdict.is_deepfake, c > 0.7, "confidence {c}");
        }
        assert!(!analyzer(0.7, 1).evaluate(&image).unwrap().is_deepfake);
        assert!(analyzer(0.700_001, 1).evaluate(&image).unwrap().is_deepfake);
    }

    #[test]
    fn no_face_skips_the_classifier() {
        let analyzer = UnitAnalyzer::new(
            Some(Arc::new(FailingClassifier)),
            Some(Arc::new(FixedFaces(0))),
            0.7,
            (32, 32),
        );
        let verdict = analyzer.evaluate(&solid_image(64, 200)).unwrap();

        assert_eq!(verdict.outcome, UnitOutcome::NoFace);
        assert!(verdict.faces.is_empty());
        assert_eq!(verdict.confidence, 0.0);
        assert!(!verdict.is_deepfake);
    }

    #[test]
    fn classifier_output_is_clamped() {
        let verdict = analyzer(1.8, 2).evaluate(&solid_image(64, 10)).unwrap();
        assert_eq!(verdict.confidence, 1.0);
        assert!(verdict.is_deepfake);
        assert_eq!(verdict.faces.len(), 2);
    }

    #[test]
    fn non_finite_scores_are_errors() {
        assert!(analyzer(f32::NAN, 1).evaluate(&solid_image(8, 1)).is_err());
    }

    #[test]
    fn missing_classifier_reports_degraded_mode() {
        let analyzer = UnitAnalyzer::new(None, Some(Arc::new(FixedFaces(1))), 0.7, (32, 32));
        let verdict = analyzer.evaluate(&solid_image(64, 255)).unwrap();

        assert_eq!(verdict.outcome, UnitOutcome::ClassifierUnavailable);
        assert_eq!(verdict.faces.len(), 1);
        assert_eq!(verdict.confidence, 0.0);
        assert!(!verdict.is_deepfake);
    }

    #[test]
    fn classifier_sees_normalized_pixels() {
        let analyzer = UnitAnalyzer::new(
            Some(Arc::new(MeanIntensity)),
            Some(Arc::new(FixedFaces(1))),
            0.7,
            (16, 16),
        );
        let bright = analyzer.evaluate(&solid_image(40, 255)).unwrap();
        let dark = analyzer.evaluate(&solid_image(40, 51)).unwrap();

        assert!((bright.confidence - 1.0).abs() < 1e-5);
        assert!(bright.is_deepfake);
        assert!((dark.confidence - 0.2).abs() < 1e-5);
        assert!(!dark.is_deepfake);
    }

    #[test]
    fn image_file_analysis_reports_faces_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        write_png(&path, 48, 180);

        let result = analyzer(0.93, 1).analyze_image(&path);
        assert!(result.is_deepfake);
        assert_eq!(result.confidence, 0.93);
        assert_eq!(result.faces_detected, 1);
        assert_eq!(result.faces.len(), 1);
        assert!(result.error.is_none());
        assert_eq!(
            result.message.as_deref(),
            Some("Analysis completed successfully")
        );
    }

    #[test]
    fn face_absent_image_yields_zero_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landscape.png");
        write_png(&path, 48, 30);

        let result = analyzer(0.99, 0).analyze_image(&path);
        assert_eq!(result.faces_detected, 0);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_deepfake);
        assert_eq!(result.message.as_deref(), Some("No face detected in the image"));
    }

    #[test]
    fn corrupt_image_is_captured_in_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let result = analyzer(0.99, 1).analyze_image(&path);
        assert!(result.error.is_some());
        assert!(!result.is_deepfake);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.faces_detected, 0);
    }

    #[test]
    fn missing_file_is_captured_in_result() {
        let result = analyzer(0.99, 1).analyze_image(Path::new("/nonexistent/image.png"));
        assert!(result.has_error());
    }

    #[test]
    fn failing_frame_carries_its_error() {
        let analyzer = UnitAnalyzer::new(
            Some(Arc::new(FailingClassifier)),
            Some(Arc::new(FixedFaces(1))),
            0.7,
            (16, 16),
        );
        let analysis = analyzer.analyze_frame(12, solid_image(16, 90).to_rgb8());
        assert_eq!(analysis.frame_number, 12);
        assert!(analysis.error.is_some());
        assert_eq!(analysis.confidence, 0.0);
    }
}
