// Orchestrator - two-stage organ -> specialist inference with graceful degradation

use super::catalog::{ModelCatalog, OrganClass};
use super::registry::{ModelRegistry, SpecialistLookup};
use super::translator::DiagnosisTranslator;
use super::types::{AnalysisResponse, OrganFinding, PredictionResult, SpecialistFinding};
use crate::model::ModelLoader;
use crate::preprocess::{decode_image, open_image, preprocess};
use crate::{AnalysisError, Result};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Label reported when the organ classifier points past the known organs
pub const UNKNOWN_LABEL: &str = "unknown";

/// Runs the organ classifier, then the matching specialist when one is usable
pub struct Orchestrator {
    registry: ModelRegistry,
    translator: DiagnosisTranslator,
}

impl Orchestrator {
    pub fn new(catalog: ModelCatalog, loader: Arc<dyn ModelLoader>) -> Self {
        let catalog = Arc::new(catalog);
        Self {
            translator: DiagnosisTranslator::new(Arc::clone(&catalog)),
            registry: ModelRegistry::new(catalog, loader),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Decode uploaded bytes and analyze them
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<AnalysisResponse> {
        let image = decode_image(bytes)?;
        self.analyze(&image)
    }

    pub fn analyze_file(&self, path: &Path) -> Result<AnalysisResponse> {
        let image = open_image(path)?;
        self.analyze(&image)
    }

    /// Classify the organ, then refine with its specialist.
    ///
    /// Only organ-stage failures are returned. Anything going wrong in the
    /// specialist stage is logged and leaves `specialist` empty.
    pub fn analyze(&self, image: &DynamicImage) -> Result<AnalysisResponse> {
        let (organ, organ_classifier) = self.classify_organ(image)?;

        let specialist = organ.and_then(|organ| self.refine_or_degrade(organ, image));

        Ok(AnalysisResponse {
            organ_classifier,
            image_width: image.width(),
            image_height: image.height(),
            specialist,
        })
    }

    fn classify_organ(&self, image: &DynamicImage) -> Result<(Option<OrganClass>, OrganFinding)> {
        let handle = self.registry.organ_classifier()?;
        let input = handle.input();
        let tensor = preprocess(image, input.width, input.height)?;
        let output = handle.model().predict(&tensor)?;
        ensure_finite(&output, "organ classifier")?;

        let (index, probability) = argmax(&output).ok_or_else(|| {
            AnalysisError::InferenceRuntime("organ classifier produced an empty output".into())
        })?;

        let label = match handle.classes().get(index) {
            Some(label) => label.clone(),
            None => {
                tracing::warn!(
                    "Organ classifier predicted index {} but only {} organs are known",
                    index,
                    handle.classes().len()
                );
                UNKNOWN_LABEL.to_string()
            }
        };
        let organ = OrganClass::from_index(index);
        tracing::debug!(organ = %label, confidence = probability * 100.0, "Organ classified");

        let prediction = PredictionResult {
            label,
            confidence: probability * 100.0,
            probabilities: probability_map(handle.classes(), &output),
        };
        let exam_type = &self.registry.catalog().organ_classifier.exam_type;

        Ok((organ, OrganFinding::new(exam_type.as_str(), prediction)))
    }

    fn refine_or_degrade(&self, organ: OrganClass, image: &DynamicImage) -> Option<SpecialistFinding> {
        match self.refine(organ, image) {
            Ok(finding) => finding,
            Err(AnalysisError::ModelNotFound { path }) => {
                tracing::warn!(
                    "{} specialist unavailable ({} missing); returning organ-level result",
                    organ,
                    path.display()
                );
                None
            }
            Err(e) => {
                tracing::warn!("{} specialist failed: {}; returning organ-level result", organ, e);
                None
            }
        }
    }

    fn refine(&self, organ: OrganClass, image: &DynamicImage) -> Result<Option<SpecialistFinding>> {
        let handle = match self.registry.specialist(organ)? {
            SpecialistLookup::Ready(handle) => handle,
            SpecialistLookup::NotConfigured => {
                tracing::debug!("No specialist configured for {}", organ);
                return Ok(None);
            }
        };

        let Some(config) = handle.specialist() else {
            return Ok(None);
        };
        if handle.classes().is_empty() {
            tracing::debug!("{} specialist has no classes; skipping", organ);
            return Ok(None);
        }

        let input = handle.input();
        let tensor = preprocess(image, input.width, input.height)?;
        let output = handle.model().predict(&tensor)?;
        ensure_finite(&output, &format!("{} specialist", organ))?;

        if output.len() != handle.classes().len() {
            return Err(AnalysisError::InferenceRuntime(format!(
                "{} specialist emitted {} values for {} classes",
                organ,
                output.len(),
                handle.classes().len()
            )));
        }

        let (index, probability) = argmax(&output).ok_or_else(|| {
            AnalysisError::InferenceRuntime(format!("{} specialist produced an empty output", organ))
        })?;
        let predicted_class = handle.classes()[index].clone();
        let diagnosis = self.translator.translate(organ, &predicted_class).to_string();
        tracing::debug!(%organ, class = %predicted_class, "Specialist refined diagnosis");

        Ok(Some(SpecialistFinding {
            exam_type: config.exam_type.clone(),
            predicted_class,
            diagnosis,
            confidence: probability * 100.0,
            probabilities: probability_map(handle.classes(), &output),
        }))
    }
}

/// Reject outputs carrying NaN or infinities
fn ensure_finite(values: &[f32], model: &str) -> Result<()> {
    match values.iter().position(|value| !value.is_finite()) {
        Some(idx) => Err(AnalysisError::InferenceRuntime(format!(
            "{} produced a non-finite value {} at index {}",
            model, values[idx], idx
        ))),
        None => Ok(()),
    }
}

/// Index and value of the highest entry; the first one wins ties
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, value)| match best {
            Some((_, top)) if top.total_cmp(&value).is_ge() => best,
            _ => Some((idx, value)),
        })
}

fn probability_map(labels: &[String], values: &[f32]) -> BTreeMap<String, f32> {
    labels
        .iter()
        .zip(values)
        .map(|(label, value)| (label.clone(), *value))
        .collect()
}
