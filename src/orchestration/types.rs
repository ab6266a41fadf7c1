// Result types produced by the orchestration pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interpretation of one model's probability vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Label at the arg-max position
    pub label: String,
    /// Arg-max probability scaled to `[0, 100]`
    pub confidence: f32,
    /// Probability for every known label
    pub probabilities: BTreeMap<String, f32>,
}

/// Organ-level finding, always present in a successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganFinding {
    #[serde(rename = "examType")]
    pub exam_type: String,
    pub diagnosis: String,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

impl OrganFinding {
    pub fn new(exam_type: impl Into<String>, prediction: PredictionResult) -> Self {
        Self {
            exam_type: exam_type.into(),
            diagnosis: prediction.label,
            confidence: prediction.confidence,
            probabilities: prediction.probabilities,
        }
    }
}

/// Fine-grained finding from an organ's specialist model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistFinding {
    #[serde(rename = "examType")]
    pub exam_type: String,
    pub predicted_class: String,
    pub diagnosis: String,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

/// Structured outcome of one `analyze` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub organ_classifier: OrganFinding,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist: Option<SpecialistFinding>,
}
