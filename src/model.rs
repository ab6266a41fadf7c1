// Model runtime boundary: safetensors weights executed through Candle

use crate::orchestration::catalog::ModelSource;
use crate::{AnalysisError, Result};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Func, VarBuilder};
use candle_transformers::models::resnet;
use serde::{Deserialize, Serialize};

/// Name of the final linear layer weight, used to infer the class count
const HEAD_WEIGHT: &str = "fc.weight";

/// Backbone used to rebuild a model from its weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Resnet18,
    Resnet34,
    Resnet50,
}

impl Architecture {
    fn build(&self, nclasses: usize, vb: VarBuilder<'static>) -> candle_core::Result<Func<'static>> {
        match self {
            Self::Resnet18 => resnet::resnet18(nclasses, vb),
            Self::Resnet34 => resnet::resnet34(nclasses, vb),
            Self::Resnet50 => resnet::resnet50(nclasses, vb),
        }
    }
}

/// A loaded model mapping a `(1, H, W, 3)` tensor to a probability vector
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>>;

    /// Number of classes the model emits, when known after loading
    fn output_len(&self) -> Option<usize> {
        None
    }
}

/// Trait for model loading backends
pub trait ModelLoader: Send + Sync {
    /// Load the model described by `source`. Called at most once per model.
    fn load(&self, source: &ModelSource) -> Result<Box<dyn Classifier>>;
}

/// Loads ResNet classifiers from safetensors files
pub struct CandleLoader {
    device: Device,
}

impl CandleLoader {
    /// Create a loader on the GPU when available, or on the CPU when forced
    pub fn new(use_cpu: bool) -> Result<Self> {
        let device = if use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)?
        };
        tracing::info!("Model device: {:?}", device);
        Ok(Self { device })
    }
}

impl ModelLoader for CandleLoader {
    fn load(&self, source: &ModelSource) -> Result<Box<dyn Classifier>> {
        let path = &source.path;
        tracing::debug!("Mapping weights from {}", path.display());

        // SAFETY: model files are treated as read-only for the process lifetime.
        let tensors = unsafe { MmapedSafetensors::new(path) }.map_err(|e| {
            AnalysisError::ModelLoading(format!("{}: {}", path.display(), e))
        })?;

        let nclasses = {
            let head = tensors.get(HEAD_WEIGHT).map_err(|e| {
                AnalysisError::ModelLoading(format!(
                    "{}: missing {} ({})",
                    path.display(),
                    HEAD_WEIGHT,
                    e
                ))
            })?;
            head.shape().first().copied().ok_or_else(|| {
                AnalysisError::ModelLoading(format!("{}: scalar {}", path.display(), HEAD_WEIGHT))
            })?
        };

        let vb = VarBuilder::from_backend(Box::new(tensors), DType::F32, self.device.clone());
        let net = source.architecture.build(nclasses, vb).map_err(|e| {
            AnalysisError::ModelLoading(format!(
                "{}: weights do not fit {:?}: {}",
                path.display(),
                source.architecture,
                e
            ))
        })?;

        Ok(Box::new(CandleClassifier {
            net,
            device: self.device.clone(),
            nclasses,
        }))
    }
}

struct CandleClassifier {
    net: Func<'static>,
    device: Device,
    nclasses: usize,
}

impl Classifier for CandleClassifier {
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>> {
        // Preprocessed tensors are NHWC; the backbone wants NCHW
        let input = input
            .to_device(&self.device)?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        let logits = self.net.forward(&input)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok(probs.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    fn output_len(&self) -> Option<usize> {
        Some(self.nclasses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::catalog::InputShape;
    use crate::preprocess::preprocess;
    use candle_nn::VarMap;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::PathBuf;

    #[test]
    fn test_architecture_names() {
        let arch: Architecture = serde_json::from_str("\"resnet50\"").unwrap();
        assert_eq!(arch, Architecture::Resnet50);
        assert_eq!(Architecture::default(), Architecture::Resnet18);
    }

    #[test]
    fn test_loader_rejects_non_safetensors_file() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("organ_classifier.safetensors");
        std::fs::write(&path, b"definitely not weights").unwrap();

        let loader = CandleLoader::new(true).unwrap();
        let source = ModelSource {
            path,
            architecture: Architecture::Resnet18,
            input: InputShape::default(),
        };
        let err = loader.load(&source).err().expect("garbage weights must not load");
        assert!(matches!(err, AnalysisError::ModelLoading(_)));
    }

    #[test]
    fn test_loader_runs_resnet18_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        resnet::resnet18(3, vb).unwrap();
        varmap.save(&path).unwrap();

        let loader = CandleLoader::new(true).unwrap();
        let source = ModelSource {
            path,
            architecture: Architecture::Resnet18,
            input: InputShape::default(),
        };
        let model = loader.load(&source).unwrap();
        assert_eq!(model.output_len(), Some(3));

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([200, 40, 90])));
        let input = preprocess(&image, 32, 32).unwrap();
        let probs = model.predict(&input).unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-3);
    }
}
