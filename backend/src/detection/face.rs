use image::GrayImage;
use rustface::ImageData;
use shared::FaceBox;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;

use super::DetectionError;
use crate::config::FaceDetectionConfig;

/// Finds face regions on a grayscale raster.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, DetectionError>;
}

// rustface detectors are not Send, so each thread keeps its own instance.
thread_local! {
    static DETECTORS: RefCell<HashMap<PathBuf, Box<dyn rustface::Detector>>> =
        RefCell::new(HashMap::new());
}

/// SeetaFace funnel cascade detector backed by the `rustface` crate.
pub struct RustfaceDetector {
    model_path: PathBuf,
    settings: FaceDetectionConfig,
}

impl RustfaceDetector {
    /// Validates the model file by building one detector eagerly.
    pub fn load(settings: &FaceDetectionConfig) -> Result<Self, DetectionError> {
        let detector = Self {
            model_path: settings.model_path.clone(),
            settings: settings.clone(),
        };
        detector.build()?;
        log::info!(
            "Face detector model loaded from {}",
            detector.model_path.display()
        );
        Ok(detector)
    }

    fn build(&self) -> Result<Box<dyn rustface::Detector>, DetectionError> {
        if !self.model_path.exists() {
            return Err(DetectionError::ModelLoad(format!(
                "face model not found at {}",
                self.model_path.display()
            )));
        }
        let path = self.model_path.to_str().ok_or_else(|| {
            DetectionError::ModelLoad(format!(
                "face model path is not valid UTF-8: {}",
                self.model_path.display()
            ))
        })?;

        let mut detector = rustface::create_detector(path)
            .map_err(|e| DetectionError::ModelLoad(format!("{}: {}", path, e)))?;
        detector.set_min_face_size(self.settings.min_face_size.max(20));
        detector.set_score_thresh(self.settings.score_threshold);
        detector.set_pyramid_scale_factor(self.settings.pyramid_scale_factor);
        let step = self.settings.slide_window_step.max(1);
        detector.set_slide_window_step(step, step);
        Ok(detector)
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, DetectionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        DETECTORS.with(|cell| {
            let mut detectors = cell.borrow_mut();
            let detector = match detectors.entry(self.model_path.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    log::debug!("Building face detector for current thread");
                    entry.insert(self.build()?)
                }
            };

            let data = ImageData::new(image.as_raw(), width, height);
            let faces = detector
                .detect(&data)
                .into_iter()
                .map(|face| {
                    let bbox = face.bbox();
                    FaceBox {
                        x: bbox.x(),
                        y: bbox.y(),
                        width: bbox.width(),
                        height: bbox.height(),
                        score: face.score(),
                    }
                })
                .collect();
            Ok(faces)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_a_load_error() {
        let settings = FaceDetectionConfig {
            model_path: PathBuf::from("/nonexistent/seeta_fd_frontal_v1.0.bin"),
            ..FaceDetectionConfig::default()
        };
        let err = RustfaceDetector::load(&settings).err().unwrap();
        assert!(matches!(err, DetectionError::ModelLoad(_)));
    }

    fn unchecked(model_path: PathBuf) -> RustfaceDetector {
        RustfaceDetector {
            settings: FaceDetectionConfig {
                model_path: model_path.clone(),
                ..FaceDetectionConfig::default()
            },
            model_path,
        }
    }

    #[test]
    fn empty_image_has_no_faces() {
        let detector = unchecked(PathBuf::from("/nonexistent/model.bin"));
        assert!(detector.detect(&GrayImage::new(0, 0)).unwrap().is_empty());
    }

    #[test]
    fn detector_built_on_first_use_reports_missing_model() {
        let detector = unchecked(PathBuf::from("/nonexistent/model.bin"));
        let err = detector.detect(&GrayImage::new(32, 32)).unwrap_err();
        assert!(matches!(err, DetectionError::ModelLoad(_)));
    }

    /// Runs against real SeetaFace weights when `SEETA_FD_MODEL` points at them.
    #[test]
    fn flat_image_has_no_faces_with_real_model() {
        let Some(path) = std::env::var_os("SEETA_FD_MODEL") else {
            return;
        };
        let settings = FaceDetectionConfig {
            model_path: PathBuf::from(path),
            ..FaceDetectionConfig::default()
        };
        let detector = RustfaceDetector::load(&settings).unwrap();
        let image = GrayImage::from_pixel(64, 64, image::Luma([128]));
        assert!(detector.detect(&image).unwrap().is_empty());
        // Second call reuses the thread's cached detector.
        assert!(detector.detect(&image).unwrap().is_empty());
    }
}
