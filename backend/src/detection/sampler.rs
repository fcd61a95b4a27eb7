use image::RgbImage;
use shared::FrameAnalysis;

use super::DetectionError;
use super::video::FrameSource;

/// Which frames of a video get analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Upper bound on analyzed frames.
    pub target: usize,
    /// Distance between analyzed frame indices.
    pub interval: u64,
}

impl SamplingPlan {
    /// Picks `min(cap, total)` frames spaced `max(1, total / cap)` apart,
    /// starting at frame 0. An unknown total samples consecutive frames up
    /// to the cap.
    pub fn new(total_frames: Option<u64>, cap: usize) -> Self {
        match total_frames {
            Some(total) if cap > 0 => Self {
                target: total.min(cap as u64) as usize,
                interval: (total / cap as u64).max(1),
            },
            Some(_) => Self {
                target: 0,
                interval: 1,
            },
            None => Self {
                target: cap,
                interval: 1,
            },
        }
    }

    pub fn is_sampled(&self, frame_index: u64) -> bool {
        frame_index % self.interval == 0
    }

    /// Frame indices the plan visits if the stream is long enough.
    #[cfg(test)]
    pub fn indices(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.target as u64).map(move |i| i * self.interval)
    }
}

#[derive(Debug)]
pub struct SampledFrames {
    pub analyses: Vec<FrameAnalysis>,
    /// Decode failure that ended sampling before the plan was fulfilled.
    pub error: Option<DetectionError>,
}

/// Reads `source` sequentially and hands every sampled frame to `analyze`.
///
/// Stops when the plan is fulfilled, the stream ends, or a frame fails to
/// decode; analyses collected before a decode failure are kept.
pub fn sample_frames<F>(
    source: &mut dyn FrameSource,
    plan: &SamplingPlan,
    mut analyze: F,
) -> SampledFrames
where
    F: FnMut(u64, RgbImage) -> FrameAnalysis,
{
    let mut analyses = Vec::with_capacity(plan.target);
    let mut error = None;
    let mut frame_index = 0u64;

    while analyses.len() < plan.target {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Stopping frame sampling at frame {}: {}", frame_index, e);
                error = Some(e);
                break;
            }
        };

        if plan.is_sampled(frame_index) {
            analyses.push(analyze(frame_index, frame));
        }
        frame_index += 1;
    }

    if analyses.len() < plan.target {
        log::debug!(
            "Video ended after {} frames; sampled {} of {}",
            frame_index,
            analyses.len(),
            plan.target
        );
    }
    SampledFrames { analyses, error }
}
