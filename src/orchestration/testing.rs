// Test doubles for the model runtime

use super::catalog::{InputShape, OrganClass, SpecialistConfig};
use crate::model::{Classifier, ModelLoader};
use crate::orchestration::catalog::ModelSource;
use crate::{AnalysisError, Result};
use candle_core::Tensor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Create `path` (and its parents) with placeholder weight bytes
pub(crate) fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"weights").unwrap();
}

/// Built-in specialist record under `root`, with a small input resolution.
/// The model file is created; the class list only when `classes` is given.
pub(crate) fn specialist_config(
    root: &Path,
    organ: OrganClass,
    classes: Option<&str>,
) -> SpecialistConfig {
    let mut config = SpecialistConfig::builtin(organ, root);
    config.model.input = InputShape::new(32, 24);
    touch(&config.model.path);
    if let Some(classes) = classes {
        std::fs::write(&config.classes_path, classes).unwrap();
    }
    config
}

#[derive(Clone)]
enum Behavior {
    Output(Vec<f32>),
    ExpectInput { dims: Vec<usize>, output: Vec<f32> },
    Fail(String),
}

/// Loader handing out canned classifiers per model path and counting loads
#[derive(Default)]
pub(crate) struct StubLoader {
    behaviors: HashMap<PathBuf, Behavior>,
    loads: AtomicUsize,
    delay: Duration,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, path: PathBuf, output: Vec<f32>) -> Self {
        self.behaviors.insert(path, Behavior::Output(output));
        self
    }

    /// Like `with_output`, but prediction fails unless the input has `dims`
    pub fn with_expected_input(mut self, path: PathBuf, dims: &[usize], output: Vec<f32>) -> Self {
        self.behaviors.insert(
            path,
            Behavior::ExpectInput {
                dims: dims.to_vec(),
                output,
            },
        );
        self
    }

    pub fn with_failure(mut self, path: PathBuf, message: &str) -> Self {
        self.behaviors.insert(path, Behavior::Fail(message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, source: &ModelSource) -> Result<Box<dyn Classifier>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.behaviors.get(&source.path) {
            Some(behavior) => Ok(Box::new(StubClassifier(behavior.clone()))),
            None => Err(AnalysisError::ModelLoading(format!(
                "no stub for {}",
                source.path.display()
            ))),
        }
    }
}

struct StubClassifier(Behavior);

impl Classifier for StubClassifier {
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>> {
        match &self.0 {
            Behavior::Output(output) => Ok(output.clone()),
            Behavior::ExpectInput { dims, output } => {
                if input.dims() == dims.as_slice() {
                    Ok(output.clone())
                } else {
                    Err(AnalysisError::InferenceRuntime(format!(
                        "expected input {:?}, got {:?}",
                        dims,
                        input.dims()
                    )))
                }
            }
            Behavior::Fail(message) => Err(AnalysisError::InferenceRuntime(message.clone())),
        }
    }
}
