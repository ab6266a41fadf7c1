//! Configuration file support
//!
//! Settings are layered: built-in catalog, then an optional TOML file, then
//! `ORGANSCOPE_*` environment variables, then command-line flags.

use crate::model::Architecture;
use crate::orchestration::catalog::{
    ClassifierConfig, InputShape, ModelCatalog, ModelSource, OrganClass, SpecialistConfig,
};
use crate::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ORGANSCOPE_CONFIG";
pub const MODEL_ROOT_ENV: &str = "ORGANSCOPE_MODEL_ROOT";
pub const FORCE_CPU_ENV: &str = "ORGANSCOPE_FORCE_CPU";

const CONFIG_FILE: &str = "organscope.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory that relative model paths are resolved against
    #[serde(default = "default_model_root")]
    pub model_root: PathBuf,

    /// Run models on the CPU even when a GPU is available
    #[serde(default)]
    pub use_cpu: bool,

    #[serde(default)]
    pub organ_classifier: ModelOverride,

    /// Keyed by organ name (`brain`, `colon`, ...)
    #[serde(default)]
    pub specialists: BTreeMap<String, SpecialistOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistOverride {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,
    /// Merged over the built-in translation table
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

// Defaults

fn default_model_root() -> PathBuf {
    PathBuf::from("models")
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_root: default_model_root(),
            use_cpu: false,
            organ_classifier: ModelOverride::default(),
            specialists: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| AnalysisError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Save settings to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load settings from `explicit`, `$ORGANSCOPE_CONFIG`, or the first default
    /// location that exists, then apply environment overrides.
    ///
    /// A path given explicitly or through the environment must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut settings = match requested {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) => {
                    tracing::debug!("Using config file {}", path.display());
                    Self::from_file(path)?
                }
                None => Self::default(),
            },
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply `ORGANSCOPE_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(MODEL_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.model_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup(FORCE_CPU_ENV) {
            self.use_cpu = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Build the immutable model catalog these settings describe
    pub fn catalog(&self) -> Result<ModelCatalog> {
        let root = self.model_root.as_path();
        let classifier = self.classifier_config();

        let mut overrides = BTreeMap::new();
        for (key, value) in &self.specialists {
            overrides.insert(key.parse::<OrganClass>()?, value);
        }

        let mut catalog = ModelCatalog::organ_only(classifier);
        for organ in OrganClass::ALL {
            let builtin = SpecialistConfig::builtin(organ, root);
            match overrides.get(&organ) {
                Some(over) if !over.enabled => {
                    tracing::debug!("{} specialist disabled by configuration", organ);
                }
                Some(over) => catalog = catalog.with_specialist(self.merge(builtin, over)),
                None => catalog = catalog.with_specialist(builtin),
            }
        }

        catalog.validate()?;
        Ok(catalog)
    }

    fn classifier_config(&self) -> ClassifierConfig {
        let mut config = ClassifierConfig::builtin(&self.model_root);
        let over = &self.organ_classifier;
        if let Some(path) = &over.model {
            config.model.path = self.resolve(path);
        }
        if let Some(arch) = over.architecture {
            config.model.architecture = arch;
        }
        config.model.input = InputShape {
            width: over.width.unwrap_or(config.model.input.width),
            height: over.height.unwrap_or(config.model.input.height),
            channels: over.channels.unwrap_or(config.model.input.channels),
        };
        if let Some(exam_type) = &over.exam_type {
            config.exam_type = exam_type.clone();
        }
        config
    }

    fn merge(&self, mut config: SpecialistConfig, over: &SpecialistOverride) -> SpecialistConfig {
        config.model = ModelSource {
            path: over
                .model
                .as_deref()
                .map(|p| self.resolve(p))
                .unwrap_or(config.model.path),
            architecture: over.architecture.unwrap_or(config.model.architecture),
            input: InputShape {
                width: over.width.unwrap_or(config.model.input.width),
                height: over.height.unwrap_or(config.model.input.height),
                channels: config.model.input.channels,
            },
        };
        if let Some(classes) = &over.classes {
            config.classes_path = self.resolve(classes);
        }
        if let Some(exam_type) = &over.exam_type {
            config.exam_type = exam_type.clone();
        }
        config.translations.extend(over.translations.clone());
        config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_root.join(path)
        }
    }
}

/// `./organscope.toml`, else `<config dir>/organscope/organscope.toml`, if either exists
pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("organscope").join(CONFIG_FILE))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
model_root = "/srv/models"
use_cpu = true

[organ_classifier]
model = "organs/v2.safetensors"
architecture = "resnet34"
width = 256
height = 256

[specialists.skin]
enabled = false

[specialists.brain]
classes = "/etc/organscope/brain_classes.json"
architecture = "resnet50"
exam_type = "Brain MRI (T1)"

[specialists.brain.translations]
notumor = "No abnormality found"
ependymoma = "Ependymoma"
"#;

    #[test]
    fn test_defaults_when_empty() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        let catalog = settings.catalog().unwrap();
        assert_eq!(catalog, ModelCatalog::builtin(Path::new("models")));
    }

    #[test]
    fn test_file_overrides_builtin_catalog() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        assert!(settings.use_cpu);

        let catalog = settings.catalog().unwrap();
        let organs = &catalog.organ_classifier.model;
        assert_eq!(organs.path, Path::new("/srv/models/organs/v2.safetensors"));
        assert_eq!(organs.architecture, Architecture::Resnet34);
        assert_eq!(organs.input, InputShape::new(256, 256));

        assert!(catalog.specialist(OrganClass::Skin).is_none());

        let brain = catalog.specialist(OrganClass::Brain).unwrap();
        assert_eq!(brain.model.path, Path::new("/srv/models/brain/model.safetensors"));
        assert_eq!(brain.classes_path, Path::new("/etc/organscope/brain_classes.json"));
        assert_eq!(brain.model.architecture, Architecture::Resnet50);
        assert_eq!(brain.exam_type, "Brain MRI (T1)");
        assert_eq!(brain.translations["notumor"], "No abnormality found");
        assert_eq!(brain.translations["ependymoma"], "Ependymoma");
        assert_eq!(brain.translations["glioma"], "Glioma tumor detected");

        let lung = catalog.specialist(OrganClass::Lung).unwrap();
        assert_eq!(lung, &SpecialistConfig::builtin(OrganClass::Lung, Path::new("/srv/models")));
    }

    #[test]
    fn test_unknown_organ_rejected() {
        let settings: Settings = toml::from_str("[specialists.liver]\nenabled = true\n").unwrap();
        assert!(matches!(settings.catalog(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_rgb_input_rejected() {
        let settings: Settings = toml::from_str("[organ_classifier]\nchannels = 1\n").unwrap();
        assert!(matches!(settings.catalog(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            MODEL_ROOT_ENV => Some("/data/weights".to_string()),
            FORCE_CPU_ENV => Some("TRUE".to_string()),
            _ => None,
        });
        assert_eq!(settings.model_root, Path::new("/data/weights"));
        assert!(settings.use_cpu);

        settings.apply_overrides(|key| (key == FORCE_CPU_ENV).then(|| "0".to_string()));
        assert!(!settings.use_cpu);
        assert_eq!(settings.model_root, Path::new("/data/weights"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.to_file(&path).unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "model_root = [").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }
}
