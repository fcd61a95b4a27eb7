use serde::Serialize;
use shared::{AnalysisResult, MediaKind, VideoAnalysisResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    images: AtomicU64,
    videos: AtomicU64,
    deepfakes: AtomicU64,
    processing_micros: AtomicU64,
}

/// Process-local analysis counters. Reset on restart.
#[derive(Clone)]
pub struct StatsService {
    counters: Arc<Counters>,
    started_at: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub total_analyses: u64,
    pub successful_analyses: u64,
    pub failed_analyses: u64,
    pub image_analyses: u64,
    pub video_analyses: u64,
    pub deepfakes_detected: u64,
    /// Mean seconds per analysis.
    pub average_processing_time: f64,
    pub uptime_seconds: u64,
}

impl StatsService {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            started_at: Instant::now(),
        }
    }

    pub fn record_image(&self, result: &AnalysisResult) {
        self.record(MediaKind::Image, result);
    }

    pub fn record_video(&self, result: &VideoAnalysisResult) {
        self.record(MediaKind::Video, &result.summary);
    }

    fn record(&self, kind: MediaKind, result: &AnalysisResult) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        match kind {
            MediaKind::Image => c.images.fetch_add(1, Ordering::Relaxed),
            MediaKind::Video => c.videos.fetch_add(1, Ordering::Relaxed),
        };
        if result.has_error() {
            c.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            c.successful.fetch_add(1, Ordering::Relaxed);
        }
        if result.is_deepfake {
            c.deepfakes.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (result.processing_time.max(0.0) * 1_000_000.0) as u64;
        c.processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let total = c.total.load(Ordering::Relaxed);
        let micros = c.processing_micros.load(Ordering::Relaxed);
        let average_processing_time = if total == 0 {
            0.0
        } else {
            micros as f64 / total as f64 / 1_000_000.0
        };

        StatsSnapshot {
            total_analyses: total,
            successful_analyses: c.successful.load(Ordering::Relaxed),
            failed_analyses: c.failed.load(Ordering::Relaxed),
            image_analyses: c.images.load(Ordering::Relaxed),
            video_analyses: c.videos.load(Ordering::Relaxed),
            deepfakes_detected: c.deepfakes.load(Ordering::Relaxed),
            average_processing_time,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for StatsService {
    fn default() -> Self {
        Self::new()
    }
}
