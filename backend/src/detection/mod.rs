pub mod aggregate;
pub mod analyzer;
pub mod face;
pub mod model;
pub mod preprocess;
pub mod sampler;
pub mod service;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not open video: {0}")]
    VideoOpen(String),
    #[error("Could not read video frame: {0}")]
    FrameRead(String),
    #[cfg(feature = "torch")]
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("Model inference failed: {0}")]
    Inference(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
}
