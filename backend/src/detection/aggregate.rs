use shared::FrameAnalysis;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoVerdict {
    pub is_deepfake: bool,
    /// Mean confidence over all sampled frames.
    pub confidence: f32,
    /// Percentage (0..=100) of frames flagged individually.
    pub deepfake_percentage: f32,
    /// Largest face count seen in a single frame.
    pub max_faces: usize,
}

pub fn aggregate(frames: &[FrameAnalysis], threshold: f32) -> VideoVerdict {
    if frames.is_empty() {
        return VideoVerdict {
            is_deepfake: false,
            confidence: 0.0,
            deepfake_percentage: 0.0,
            max_faces: 0,
        };
    }

    let count = frames.len() as f64;
    let mean = frames.iter().map(|f| f64::from(f.confidence)).sum::<f64>() / count;
    let flagged = frames.iter().filter(|f| f.is_deepfake).count() as f64;
    let confidence = (mean as f32).clamp(0.0, 1.0);

    VideoVerdict {
        is_deepfake: confidence > threshold,
        confidence,
        deepfake_percentage: (flagged / count * 100.0) as f32,
        max_faces: frames.iter().map(|f| f.faces_detected).max().unwrap_or(0),
    }
}
