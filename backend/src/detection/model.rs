use ndarray::Array4;
use shared::ModelInfo;
use std::sync::Arc;

use super::DetectionError;
use crate::config::Config;

/// Static description of a loaded classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierDetails {
    pub name: String,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
    pub total_params: u64,
}

/// A pre-trained deepfake classifier.
///
/// Takes one normalized NCHW tensor with batch size 1 and returns the
/// probability that the unit is synthetic. Implementations are shared across
/// request threads and must not mutate observable state during `predict`.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<f32, DetectionError>;

    fn details(&self) -> ClassifierDetails;
}

pub fn model_info(classifier: Option<&dyn Classifier>, confidence_threshold: f32) -> ModelInfo {
    match classifier {
        Some(classifier) => {
            let details = classifier.details();
            ModelInfo {
                loaded: true,
                model_name: Some(details.name),
                input_shape: Some(details.input_shape),
                output_shape: Some(details.output_shape),
                total_params: Some(details.total_params),
                confidence_threshold,
                message: None,
            }
        }
        None => ModelInfo {
            loaded: false,
            model_name: None,
            input_shape: None,
            output_shape: None,
            total_params: None,
            confidence_threshold,
            message: Some("Model not loaded".to_string()),
        },
    }
}

/// Reduces raw model output to the probability of the "fake" class.
///
/// A single output is read as a probability. Wider outputs are treated as
/// logits and passed through softmax first.
#[cfg(any(test, feature = "torch"))]
pub fn fake_probability(output: &[f32], fake_class_index: usize) -> Result<f32, DetectionError> {
    let probability = match output {
        [] => {
            return Err(DetectionError::Inference(
                "model returned an empty output".to_string(),
            ));
        }
        [single] => *single,
        logits => {
            if fake_class_index >= logits.len() {
                return Err(DetectionError::Inference(format!(
                    "fake class index {} out of range for {} outputs",
                    fake_class_index,
                    logits.len()
                )));
            }
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            exps[fake_class_index] / sum
        }
    };

    if !probability.is_finite() {
        return Err(DetectionError::Inference(format!(
            "model returned a non-finite score: {}",
            probability
        )));
    }
    Ok(probability.clamp(0.0, 1.0))
}

/// Loads the classifier weights named by the configuration.
pub fn load_classifier(config: &Config) -> Result<Arc<dyn Classifier>, DetectionError> {
    let path = config.model_path();
    if !path.exists() {
        return Err(DetectionError::ModelLoad(format!(
            "weights not found at {}",
            path.display()
        )));
    }
    load_from_path(config, &path)
}

#[cfg(feature = "torch")]
fn load_from_path(
    config: &Config,
    path: &std::path::Path,
) -> Result<Arc<dyn Classifier>, DetectionError> {
    let classifier = torch::TorchClassifier::load(
        path,
        config.model.input_size,
        config.model.fake_class_index,
    )?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "torch"))]
fn load_from_path(
    _config: &Config,
    path: &std::path::Path,
) -> Result<Arc<dyn Classifier>, DetectionError> {
    Err(DetectionError::ModelLoad(format!(
        "cannot load {}: built without the `torch` feature",
        path.display()
    )))
}

#[cfg(feature = "torch")]
pub mod torch {
    use ndarray::Array4;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tch::{CModule, Device, Kind, Tensor};

    use super::{ClassifierDetails, fake_probability};
    use crate::detection::DetectionError;

    impl From<tch::TchError> for DetectionError {
        fn from(err: tch::TchError) -> Self {
            DetectionError::Inference(err.to_string())
        }
    }

    /// TorchScript classifier. The module is locked per forward pass.
    #[derive(Clone)]
    pub struct TorchClassifier {
        model: Arc<Mutex<CModule>>,
        device: Device,
        details: ClassifierDetails,
        fake_class_index: usize,
    }

    impl TorchClassifier {
        pub fn load(
            path: &Path,
            input_size: (u32, u32),
            fake_class_index: usize,
        ) -> Result<Self, DetectionError> {
            let device = Device::cuda_if_available();
            let mut module = CModule::load_on_device(path, device)
                .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;
            module.set_eval();

            let total_params = module
                .named_parameters()
                .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
                .iter()
                .map(|(_, tensor)| tensor.numel() as u64)
                .sum();

            let (width, height) = input_size;
            let input_shape = vec![1, 3, i64::from(height), i64::from(width)];
            let probe = Tensor::zeros(input_shape.as_slice(), (Kind::Float, device));
            let output = tch::no_grad(|| module.forward_ts(&[probe]))
                .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            log::info!(
                "Loaded TorchScript model {} on {:?} ({} parameters)",
                name,
                device,
                total_params
            );

            Ok(Self {
                model: Arc::new(Mutex::new(module)),
                device,
                details: ClassifierDetails {
                    name,
                    input_shape,
                    output_shape: output.size(),
                    total_params,
                },
                fake_class_index,
            })
        }
    }

    impl super::Classifier for TorchClassifier {
        fn predict(&self, input: &Array4<f32>) -> Result<f32, DetectionError> {
            let shape: Vec<i64> = input.shape().iter().map(|dim| *dim as i64).collect();
            let contiguous = input.as_standard_layout();
            let data = contiguous.as_slice().ok_or_else(|| {
                DetectionError::Preprocessing("input tensor is not contiguous".to_string())
            })?;
            let tensor = Tensor::from_slice(data)
                .view(shape.as_slice())
                .to_device(self.device);

            let output = {
                let model = self
                    .model
                    .lock()
                    .map_err(|_| DetectionError::Inference("model lock poisoned".to_string()))?;
                tch::no_grad(|| model.forward_ts(&[tensor]))?
            };

            let flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
            let values = Vec::<f32>::try_from(&flat)?;
            fake_probability(&values, self.fake_class_index)
        }

        fn details(&self) -> ClassifierDetails {
            self.details.clone()
        }
    }
}
