use chrono::Utc;
use shared::{AnalysisResult, ModelInfo, VideoAnalysisResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::DetectionError;
use super::aggregate::aggregate;
use super::analyzer::{UnitAnalyzer, UnitOutcome};
use super::face::{FaceDetector, RustfaceDetector};
use super::model::{self, Classifier};
use super::sampler::{SampledFrames, SamplingPlan, sample_frames};
use super::video::{FfmpegBackend, VideoBackend};
use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub input_size: (u32, u32),
    pub max_frames: usize,
}

impl DetectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confidence_threshold: config.model.confidence_threshold,
            input_size: config.model.input_size,
            max_frames: config.video.max_frames,
        }
    }
}

/// Owns the classifier, face detector and video decoder.
///
/// Built once at startup and shared read-only between request handlers.
pub struct DetectionService {
    analyzer: UnitAnalyzer,
    video: Arc<dyn VideoBackend>,
    settings: DetectionSettings,
}

impl DetectionService {
    pub fn new(
        classifier: Option<Arc<dyn Classifier>>,
        faces: Option<Arc<dyn FaceDetector>>,
        video: Arc<dyn VideoBackend>,
        settings: DetectionSettings,
    ) -> Self {
        let analyzer = UnitAnalyzer::new(
            classifier,
            faces,
            settings.confidence_threshold,
            settings.input_size,
        );
        Self {
            analyzer,
            video,
            settings,
        }
    }

    /// Loads the configured models. A missing model aborts startup unless
    /// `allow_degraded` is set, in which case the service runs without it.
    pub fn from_config(config: &Config) -> Result<Self, DetectionError> {
        let classifier = match model::load_classifier(config) {
            Ok(classifier) => {
                log::info!("Classifier loaded: {}", config.model_path().display());
                Some(classifier)
            }
            Err(e) if config.allow_degraded => {
                log::warn!(
                    "Classifier unavailable ({}); starting in degraded mode, verdicts will not be scored",
                    e
                );
                None
            }
            Err(e) => {
                log::error!("Failed to load classifier: {}", e);
                return Err(e);
            }
        };

        let faces: Option<Arc<dyn FaceDetector>> =
            match RustfaceDetector::load(&config.face_detection) {
                Ok(detector) => Some(Arc::new(detector)),
                Err(e) if config.allow_degraded => {
                    log::warn!(
                        "Face detector unavailable ({}); starting in degraded mode, no faces will be found",
                        e
                    );
                    None
                }
                Err(e) => {
                    log::error!("Failed to load face detector: {}", e);
                    return Err(e);
                }
            };

        Ok(Self::new(
            classifier,
            faces,
            Arc::new(FfmpegBackend::new(&config.video)),
            DetectionSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn is_model_loaded(&self) -> bool {
        self.analyzer.classifier().is_some()
    }

    pub fn is_face_detector_loaded(&self) -> bool {
        self.analyzer.has_face_detector()
    }

    pub fn model_info(&self) -> ModelInfo {
        model::model_info(self.analyzer.classifier(), self.settings.confidence_threshold)
    }

    pub fn analyze_image(&self, path: &Path) -> AnalysisResult {
        self.analyzer.analyze_image(path)
    }

    /// Samples frames, analyzes each one and aggregates the verdicts.
    pub fn analyze_video(&self, path: &Path) -> VideoAnalysisResult {
        let started = Instant::now();

        let mut source = match self.video.open(path) {
            Ok(source) => source,
            Err(e) => {
                log::error!("Video analysis failed for {}: {}", path.display(), e);
                return VideoAnalysisResult::failed(e.to_string(), started.elapsed().as_secs_f64());
            }
        };

        let metadata = *source.metadata();
        let plan = SamplingPlan::new(metadata.total_frames, self.settings.max_frames);
        log::info!(
            "Sampling up to {} frames every {} of {:?} from {}",
            plan.target,
            plan.interval,
            metadata.total_frames,
            path.display()
        );

        let SampledFrames {
            analyses: frames,
            error,
        } = sample_frames(source.as_mut(), &plan, |frame_number, frame| {
            self.analyzer.analyze_frame(frame_number, frame)
        });
        drop(source);

        // A decoder that fails before the first frame is a failed analysis,
        // not an empty video.
        if frames.is_empty() {
            if let Some(e) = error {
                log::error!("No frames decoded from {}: {}", path.display(), e);
                let mut failed =
                    VideoAnalysisResult::failed(e.to_string(), started.elapsed().as_secs_f64());
                failed.total_frames = metadata.total_frames.unwrap_or(0);
                failed.duration = metadata.duration();
                return failed;
            }
        }

        let verdict = aggregate(&frames, self.settings.confidence_threshold);
        let message = if frames.is_empty() {
            "No frames could be read from the video"
        } else if !self.is_face_detector_loaded() {
            UnitOutcome::FaceDetectorUnavailable.message()
        } else if !self.is_model_loaded() {
            UnitOutcome::ClassifierUnavailable.message()
        } else {
            UnitOutcome::Classified.message()
        };

        VideoAnalysisResult {
            summary: AnalysisResult {
                is_deepfake: verdict.is_deepfake,
                confidence: verdict.confidence,
                faces_detected: verdict.max_faces,
                faces: Vec::new(),
                message: Some(message.to_string()),
                error: None,
                processing_time: started.elapsed().as_secs_f64(),
                timestamp: Utc::now(),
            },
            deepfake_percentage: verdict.deepfake_percentage,
            total_frames: metadata.total_frames.unwrap_or(0),
            analyzed_frames: frames.len(),
            duration: metadata.duration(),
            frame_analyses: frames,
        }
    }
}
