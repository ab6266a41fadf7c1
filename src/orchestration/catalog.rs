// Static per-organ model configuration

use crate::model::Architecture;
use crate::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Organs the first-stage classifier can recognize
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OrganClass {
    Brain,
    Colon,
    Breast,
    Skin,
    Lung,
}

impl OrganClass {
    /// All organs, in the order of the organ classifier's output vector
    pub const ALL: [OrganClass; 5] = [
        OrganClass::Brain,
        OrganClass::Colon,
        OrganClass::Breast,
        OrganClass::Skin,
        OrganClass::Lung,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OrganClass::Brain => "Brain",
            OrganClass::Colon => "Colon",
            OrganClass::Breast => "Breast",
            OrganClass::Skin => "Skin",
            OrganClass::Lung => "Lung",
        }
    }

    /// Directory name used for this organ's specialist files
    pub fn key(&self) -> &'static str {
        match self {
            OrganClass::Brain => "brain",
            OrganClass::Colon => "colon",
            OrganClass::Breast => "breast",
            OrganClass::Skin => "skin",
            OrganClass::Lung => "lung",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for OrganClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrganClass {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|organ| organ.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AnalysisError::InvalidConfig(format!("unknown organ: {}", s)))
    }
}

/// Resolution a model expects its input tensor to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 3,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "input resolution {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.channels != 3 {
            return Err(AnalysisError::InvalidConfig(format!(
                "models take 3-channel input, got {}",
                self.channels
            )));
        }
        Ok(())
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

/// Where a model lives and how to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSource {
    pub path: PathBuf,
    pub architecture: Architecture,
    pub input: InputShape,
}

/// Configuration of the first-stage organ classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model: ModelSource,
    pub exam_type: String,
}

impl ClassifierConfig {
    pub fn builtin(model_root: &Path) -> Self {
        Self {
            model: ModelSource {
                path: model_root.join("organ_classifier.safetensors"),
                architecture: Architecture::Resnet18,
                input: InputShape::default(),
            },
            exam_type: "Organ classification".to_string(),
        }
    }
}

/// Configuration of one organ's specialist model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistConfig {
    pub organ: OrganClass,
    pub model: ModelSource,
    pub classes_path: PathBuf,
    pub exam_type: String,
    pub translations: BTreeMap<String, String>,
}

impl SpecialistConfig {
    /// Default record for `organ`, with files under `<model_root>/<organ>/`
    pub fn builtin(organ: OrganClass, model_root: &Path) -> Self {
        let (exam_type, table): (&str, &[(&str, &str)]) = match organ {
            OrganClass::Brain => (
                "Brain MRI",
                &[
                    ("glioma", "Glioma tumor detected"),
                    ("meningioma", "Meningioma tumor detected"),
                    ("notumor", "No tumor detected"),
                    ("pituitary", "Pituitary tumor detected"),
                ],
            ),
            OrganClass::Colon => (
                "Colon histopathology",
                &[
                    ("colon_aca", "Colon adenocarcinoma"),
                    ("colon_n", "Benign colon tissue"),
                ],
            ),
            OrganClass::Breast => (
                "Breast ultrasound",
                &[
                    ("benign", "Benign breast lesion"),
                    ("malignant", "Malignant breast lesion"),
                    ("normal", "Normal breast tissue"),
                ],
            ),
            OrganClass::Skin => (
                "Dermoscopy",
                &[
                    ("akiec", "Actinic keratosis / intraepithelial carcinoma"),
                    ("bcc", "Basal cell carcinoma"),
                    ("bkl", "Benign keratosis-like lesion"),
                    ("df", "Dermatofibroma"),
                    ("mel", "Melanoma"),
                    ("nv", "Melanocytic nevus"),
                    ("vasc", "Vascular lesion"),
                ],
            ),
            OrganClass::Lung => (
                "Lung histopathology",
                &[
                    ("lung_aca", "Lung adenocarcinoma"),
                    ("lung_n", "Benign lung tissue"),
                    ("lung_scc", "Lung squamous cell carcinoma"),
                ],
            ),
        };

        let dir = model_root.join(organ.key());
        Self {
            organ,
            model: ModelSource {
                path: dir.join("model.safetensors"),
                architecture: Architecture::Resnet18,
                input: InputShape::default(),
            },
            classes_path: dir.join("classes.json"),
            exam_type: exam_type.to_string(),
            translations: table
                .iter()
                .map(|(raw, friendly)| (raw.to_string(), friendly.to_string()))
                .collect(),
        }
    }
}

/// Immutable set of model records, fixed at process start
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    pub organ_classifier: ClassifierConfig,
    specialists: BTreeMap<OrganClass, SpecialistConfig>,
}

impl ModelCatalog {
    /// Organ classifier plus a default specialist for every organ
    pub fn builtin(model_root: &Path) -> Self {
        Self {
            organ_classifier: ClassifierConfig::builtin(model_root),
            specialists: OrganClass::ALL
                .into_iter()
                .map(|organ| (organ, SpecialistConfig::builtin(organ, model_root)))
                .collect(),
        }
    }

    /// Organ classifier only; no organ gets refined
    pub fn organ_only(organ_classifier: ClassifierConfig) -> Self {
        Self {
            organ_classifier,
            specialists: BTreeMap::new(),
        }
    }

    pub fn with_specialist(mut self, config: SpecialistConfig) -> Self {
        self.specialists.insert(config.organ, config);
        self
    }

    pub fn without_specialist(mut self, organ: OrganClass) -> Self {
        self.specialists.remove(&organ);
        self
    }

    pub fn specialist(&self, organ: OrganClass) -> Option<&SpecialistConfig> {
        self.specialists.get(&organ)
    }

    pub fn specialists(&self) -> impl Iterator<Item = &SpecialistConfig> {
        self.specialists.values()
    }

    pub fn validate(&self) -> Result<()> {
        self.organ_classifier.model.input.validate()?;
        for config in self.specialists.values() {
            config.model.input.validate()?;
        }
        Ok(())
    }
}
