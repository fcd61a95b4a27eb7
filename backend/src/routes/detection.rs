use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use shared::{AnalysisResult, MediaKind, ModelInfo, VideoAnalysisResult};
use std::path::Path;

use super::error::ApiError;
use crate::detection::service::DetectionService;
use crate::stats::{StatsService, StatsSnapshot};
use crate::storage::upload_store::{StoredUpload, UploadStore};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/detection")
            .route("/health", web::get().to(detection_health))
            .route("/image", web::post().to(detect_image))
            .route("/video", web::post().to(detect_video))
            .route("/batch", web::post().to(detect_batch))
            .route("/model/info", web::get().to(model_info))
            .route("/model/status", web::get().to(model_status))
            .route("/stats", web::get().to(stats)),
    );
}

/// Client-facing hints for a single-file endpoint.
struct UploadHints {
    missing: &'static str,
    empty: &'static str,
}

const IMAGE_HINTS: UploadHints = UploadHints {
    missing: "Please send an image in the 'file' field",
    empty: "Please select an image to analyze",
};

const VIDEO_HINTS: UploadHints = UploadHints {
    missing: "Please send a video in the 'file' field",
    empty: "Please select a video to analyze",
};

const BATCH_HINTS: UploadHints = UploadHints {
    missing: "Please send one or more files in the 'files' field",
    empty: "Please select files to analyze",
};

/// A single analysis echoed back together with the upload it came from.
#[derive(Serialize)]
struct UploadAnalysis<T> {
    #[serde(flatten)]
    result: T,
    filename: String,
    file_size: u64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<MediaKind>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AnalysisPayload {
    Image(AnalysisResult),
    Video(VideoAnalysisResult),
}

impl AnalysisPayload {
    fn summary(&self) -> &AnalysisResult {
        match self {
            AnalysisPayload::Image(result) => result,
            AnalysisPayload::Video(result) => &result.summary,
        }
    }

    fn record(&self, stats: &StatsService) {
        match self {
            AnalysisPayload::Image(result) => stats.record_image(result),
            AnalysisPayload::Video(result) => stats.record_video(result),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchItem {
    Analyzed(UploadAnalysis<AnalysisPayload>),
    Rejected { error: String, filename: String },
}

impl BatchItem {
    fn rejected(error: impl Into<String>, filename: impl Into<String>) -> Self {
        BatchItem::Rejected {
            error: error.into(),
            filename: filename.into(),
        }
    }

    /// Mirrors whether the serialized item carries an `error` key.
    fn has_error(&self) -> bool {
        match self {
            BatchItem::Analyzed(analysis) => analysis.result.summary().has_error(),
            BatchItem::Rejected { .. } => true,
        }
    }
}

#[derive(Serialize)]
struct BatchResponse {
    results: Vec<BatchItem>,
    total_files: usize,
    processed_files: usize,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct ModelStatus {
    model_loaded: bool,
    face_detector_loaded: bool,
    confidence_threshold: f32,
    image_size: (u32, u32),
    max_frames_per_video: usize,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    snapshot: StatsSnapshot,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct DetectionHealth {
    status: &'static str,
    model_loaded: bool,
    model_info: ModelInfo,
    timestamp: DateTime<Utc>,
}

fn field_filename(field: &Field) -> String {
    field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .unwrap_or_default()
        .to_string()
}

/// Pulls the `file` field out of the form and streams it to scratch storage.
async fn receive_upload(
    payload: &mut Multipart,
    store: &UploadStore,
    kind: MediaKind,
    hints: &UploadHints,
) -> Result<StoredUpload, ApiError> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field_filename(&field);
        if filename.is_empty() {
            return Err(ApiError::EmptyFilename(hints.empty));
        }
        return Ok(store.store(kind, &filename, &mut field).await?);
    }
    Err(ApiError::MissingFile(hints.missing))
}

/// Runs `analyze` on the blocking pool, then drops the scratch file
/// whatever the outcome.
async fn analyze_upload<T, F>(
    service: &web::Data<DetectionService>,
    store: &UploadStore,
    upload: &StoredUpload,
    analyze: F,
) -> Result<T, ApiError>
where
    F: FnOnce(&DetectionService, &Path) -> T + Send + 'static,
    T: Send + 'static,
{
    let service = service.clone();
    let path = upload.path.clone();
    let outcome = web::block(move || analyze(&service, &path)).await;
    store.discard(upload).await;
    Ok(outcome?)
}

fn analyze_image(service: &DetectionService, path: &Path) -> AnalysisPayload {
    AnalysisPayload::Image(service.analyze_image(path))
}

fn analyze_video(service: &DetectionService, path: &Path) -> AnalysisPayload {
    AnalysisPayload::Video(service.analyze_video(path))
}

fn analyze_as(kind: MediaKind) -> fn(&DetectionService, &Path) -> AnalysisPayload {
    match kind {
        MediaKind::Image => analyze_image,
        MediaKind::Video => analyze_video,
    }
}

fn log_verdict(filename: &str, summary: &AnalysisResult) {
    match &summary.error {
        Some(error) => log::warn!("Analysis of {} failed: {}", filename, error),
        None => log::info!(
            "Analysis of {} finished: deepfake={} confidence={:.3} faces={} in {:.2}s",
            filename,
            summary.is_deepfake,
            summary.confidence,
            summary.faces_detected,
            summary.processing_time
        ),
    }
}

async fn detect_single(
    kind: MediaKind,
    hints: &UploadHints,
    service: web::Data<DetectionService>,
    store: web::Data<UploadStore>,
    stats: web::Data<StatsService>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let upload = receive_upload(&mut payload, &store, kind, hints).await?;
    log::info!("Starting {} analysis: {}", kind, upload.original_name);

    let result = analyze_upload(&service, &store, &upload, analyze_as(kind)).await?;
    result.record(&stats);
    log_verdict(&upload.original_name, result.summary());

    Ok(HttpResponse::Ok().json(UploadAnalysis {
        result,
        filename: upload.original_name,
        file_size: upload.size,
        kind: None,
    }))
}

async fn detect_image(
    service: web::Data<DetectionService>,
    store: web::Data<UploadStore>,
    stats: web::Data<StatsService>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    detect_single(MediaKind::Image, &IMAGE_HINTS, service, store, stats, payload).await
}

async fn detect_video(
    service: web::Data<DetectionService>,
    store: web::Data<UploadStore>,
    stats: web::Data<StatsService>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    detect_single(MediaKind::Video, &VIDEO_HINTS, service, store, stats, payload).await
}

async fn detect_batch(
    service: web::Data<DetectionService>,
    store: web::Data<UploadStore>,
    stats: web::Data<StatsService>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut results = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field_filename(&field);
        if filename.is_empty() {
            if results.is_empty() {
                return Err(ApiError::EmptyFilename(BATCH_HINTS.empty));
            }
            results.push(BatchItem::rejected("No file selected", filename));
            continue;
        }

        let Some(kind) = store.classify(&filename) else {
            log::warn!("Skipping unsupported batch file {}", filename);
            results.push(BatchItem::rejected("Unsupported file type", filename));
            continue;
        };

        let upload = match store.store(kind, &filename, &mut field).await {
            Ok(upload) => upload,
            Err(e) => {
                log::warn!("Could not store batch file {}: {}", filename, e);
                results.push(BatchItem::rejected(e.to_string(), filename));
                continue;
            }
        };

        match analyze_upload(&service, &store, &upload, analyze_as(kind)).await {
            Ok(result) => {
                result.record(&stats);
                log_verdict(&filename, result.summary());
                results.push(BatchItem::Analyzed(UploadAnalysis {
                    result,
                    filename,
                    file_size: upload.size,
                    kind: Some(kind),
                }));
            }
            Err(e) => {
                log::error!("Batch analysis of {} failed: {}", filename, e);
                results.push(BatchItem::rejected(e.message(), filename));
            }
        }
    }

    if results.is_empty() {
        return Err(ApiError::MissingFile(BATCH_HINTS.missing));
    }

    let processed_files = results.iter().filter(|item| !item.has_error()).count();
    log::info!(
        "Batch finished: {} of {} files processed",
        processed_files,
        results.len()
    );

    Ok(HttpResponse::Ok().json(BatchResponse {
        total_files: results.len(),
        processed_files,
        results,
        timestamp: Utc::now(),
    }))
}

async fn model_info(service: web::Data<DetectionService>) -> HttpResponse {
    HttpResponse::Ok().json(service.model_info())
}

async fn model_status(service: web::Data<DetectionService>) -> HttpResponse {
    let settings = service.settings();
    HttpResponse::Ok().json(ModelStatus {
        model_loaded: service.is_model_loaded(),
        face_detector_loaded: service.is_face_detector_loaded(),
        confidence_threshold: settings.confidence_threshold,
        image_size: settings.input_size,
        max_frames_per_video: settings.max_frames,
        timestamp: Utc::now(),
    })
}

async fn stats(stats: web::Data<StatsService>) -> HttpResponse {
    HttpResponse::Ok().json(StatsResponse {
        snapshot: stats.snapshot(),
        timestamp: Utc::now(),
    })
}

async fn detection_health(service: web::Data<DetectionService>) -> HttpResponse {
    let model_loaded = service.is_model_loaded();
    HttpResponse::Ok().json(DetectionHealth {
        status: if model_loaded { "healthy" } else { "degraded" },
        model_loaded,
        model_info: service.model_info(),
        timestamp: Utc::now(),
    })
}
