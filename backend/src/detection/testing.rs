//! In-process stand-ins for the external detection capabilities.

use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use shared::FaceBox;
use std::io::Cursor;
use std::path::Path;

use super::DetectionError;
use super::face::FaceDetector;
use super::model::{Classifier, ClassifierDetails};
use super::video::{FrameSource, VideoBackend, VideoMetadata};

fn details() -> ClassifierDetails {
    ClassifierDetails {
        name: "stub".to_string(),
        input_shape: vec![1, 3, 224, 224],
        output_shape: vec![1, 1],
        total_params: 1234,
    }
}

/// Always returns the same score.
pub struct FixedScore(pub f32);

impl Classifier for FixedScore {
    fn predict(&self, _input: &Array4<f32>) -> Result<f32, DetectionError> {
        Ok(self.0)
    }

    fn details(&self) -> ClassifierDetails {
        details()
    }
}

/// Scores an input by its mean normalized intensity.
pub struct MeanIntensity;

impl Classifier for MeanIntensity {
    fn predict(&self, input: &Array4<f32>) -> Result<f32, DetectionError> {
        Ok(input.mean().unwrap_or(0.0))
    }

    fn details(&self) -> ClassifierDetails {
        details()
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn predict(&self, _input: &Array4<f32>) -> Result<f32, DetectionError> {
        Err(DetectionError::Inference("stub failure".to_string()))
    }

    fn details(&self) -> ClassifierDetails {
        details()
    }
}

/// Reports `n` faces on every image.
pub struct FixedFaces(pub usize);

impl FaceDetector for FixedFaces {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, DetectionError> {
        Ok((0..self.0)
            .map(|i| FaceBox {
                x: i as i32 * 10,
                y: 0,
                width: image.width().min(10),
                height: image.height().min(10),
                score: 3.0,
            })
            .collect())
    }
}

/// Reports one face when the image is brighter than mid-gray.
pub struct BrightFaces;

impl FaceDetector for BrightFaces {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, DetectionError> {
        let pixels = image.as_raw();
        let mean = pixels.iter().map(|p| u64::from(*p)).sum::<u64>() / pixels.len().max(1) as u64;
        if mean > 128 {
            FixedFaces(1).detect(image)
        } else {
            Ok(Vec::new())
        }
    }
}

pub fn solid_image(size: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb([value, value, value])))
}

pub fn png_bytes(size: u32, value: u8) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    solid_image(size, value)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn write_png(path: &Path, size: u32, value: u8) {
    std::fs::write(path, png_bytes(size, value)).unwrap();
}

/// Solid frames of one brightness; optionally fails mid-stream.
pub struct SyntheticVideo {
    metadata: VideoMetadata,
    frames: u64,
    read: u64,
    fail_at: Option<u64>,
    brightness: u8,
}

impl SyntheticVideo {
    pub fn new(frames: u64, reported: Option<u64>) -> Self {
        Self {
            metadata: VideoMetadata {
                total_frames: reported,
                fps: 25.0,
                width: 16,
                height: 16,
                stream_duration: None,
            },
            frames,
            read: 0,
            fail_at: None,
            brightness: 200,
        }
    }

    pub fn failing_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }

    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.read
    }
}

impl FrameSource for SyntheticVideo {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, DetectionError> {
        if self.fail_at == Some(self.read) {
            return Err(DetectionError::FrameRead("stub decode failure".to_string()));
        }
        if self.read >= self.frames {
            return Ok(None);
        }
        self.read += 1;
        let v = self.brightness;
        Ok(Some(RgbImage::from_pixel(
            self.metadata.width,
            self.metadata.height,
            Rgb([v, v, v]),
        )))
    }
}

/// Opens every path as the same synthetic clip.
pub struct SyntheticBackend {
    pub frames: u64,
    pub reported: Option<u64>,
    pub brightness: u8,
}

impl VideoBackend for SyntheticBackend {
    fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>, DetectionError> {
        Ok(Box::new(
            SyntheticVideo::new(self.frames, self.reported).with_brightness(self.brightness),
        ))
    }
}

pub struct BrokenBackend;

impl VideoBackend for BrokenBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DetectionError> {
        Err(DetectionError::VideoOpen(format!(
            "cannot open {}",
            path.display()
        )))
    }
}

/// Reports a frame count but fails on the very first frame.
pub struct UndecodableBackend {
    pub reported: Option<u64>,
}

impl VideoBackend for UndecodableBackend {
    fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>, DetectionError> {
        Ok(Box::new(SyntheticVideo::new(0, self.reported).failing_at(0)))
    }
}
