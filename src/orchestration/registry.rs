// ModelRegistry - lazily loads models and keeps them for the process lifetime

use super::catalog::{InputShape, ModelCatalog, OrganClass, SpecialistConfig};
use crate::model::{Classifier, ModelLoader};
use crate::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// A loaded model together with the labels of its output positions
pub struct ModelHandle {
    model: Box<dyn Classifier>,
    classes: Vec<String>,
    input: InputShape,
    specialist: Option<SpecialistConfig>,
}

impl ModelHandle {
    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn input(&self) -> InputShape {
        self.input
    }

    /// Owning specialist record; `None` for the organ classifier
    pub fn specialist(&self) -> Option<&SpecialistConfig> {
        self.specialist.as_ref()
    }
}

/// Outcome of asking for an organ's specialist
pub enum SpecialistLookup {
    Ready(Arc<ModelHandle>),
    NotConfigured,
}

/// Cache state of one model, as reported by [`ModelRegistry::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SlotState {
    NotConfigured,
    Pending,
    Loading,
    Loaded { classes: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub organ_classifier: SlotState,
    pub specialists: BTreeMap<String, SlotState>,
}

type Slot = Mutex<Option<Arc<ModelHandle>>>;

/// Loads each configured model at most once and hands out shared references
pub struct ModelRegistry {
    catalog: Arc<ModelCatalog>,
    loader: Arc<dyn ModelLoader>,
    organ_classifier: Slot,
    specialists: HashMap<OrganClass, Slot>,
}

impl ModelRegistry {
    pub fn new(catalog: Arc<ModelCatalog>, loader: Arc<dyn ModelLoader>) -> Self {
        let specialists = catalog
            .specialists()
            .map(|config| (config.organ, Mutex::new(None)))
            .collect();

        Self {
            catalog,
            loader,
            organ_classifier: Mutex::new(None),
            specialists,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The organ classifier, loaded on first use
    pub fn organ_classifier(&self) -> Result<Arc<ModelHandle>> {
        load_once(&self.organ_classifier, || self.load_organ_classifier())
    }

    /// The specialist for `organ`, loaded on first use
    pub fn specialist(&self, organ: OrganClass) -> Result<SpecialistLookup> {
        let (Some(config), Some(slot)) = (self.catalog.specialist(organ), self.specialists.get(&organ))
        else {
            return Ok(SpecialistLookup::NotConfigured);
        };

        let handle = load_once(slot, || self.load_specialist(config))?;
        Ok(SpecialistLookup::Ready(handle))
    }

    /// Load the organ classifier and every configured specialist up front.
    ///
    /// Only an organ classifier failure is returned; specialist failures are
    /// logged and retried on first use.
    pub fn warm_up(&self) -> Result<()> {
        self.organ_classifier()?;
        for config in self.catalog.specialists() {
            if let Err(e) = self.specialist(config.organ) {
                tracing::warn!(organ = %config.organ, error = %e, "Specialist not preloaded");
            }
        }
        Ok(())
    }

    pub fn status(&self) -> RegistryStatus {
        let specialists = OrganClass::ALL
            .into_iter()
            .map(|organ| {
                let state = self
                    .specialists
                    .get(&organ)
                    .map(peek)
                    .unwrap_or(SlotState::NotConfigured);
                (organ.key().to_string(), state)
            })
            .collect();

        RegistryStatus {
            organ_classifier: peek(&self.organ_classifier),
            specialists,
        }
    }

    fn load_organ_classifier(&self) -> Result<ModelHandle> {
        let config = &self.catalog.organ_classifier;
        require_file(&config.model.path)?;

        tracing::info!("Loading organ classifier from {}", config.model.path.display());
        let model = self.loader.load(&config.model)?;

        if let Some(len) = model.output_len() {
            if len != OrganClass::ALL.len() {
                tracing::warn!(
                    "Organ classifier emits {} classes but {} organs are configured; \
                     out-of-range predictions will be labelled unknown",
                    len,
                    OrganClass::ALL.len()
                );
            }
        }

        Ok(ModelHandle {
            model,
            classes: OrganClass::ALL
                .iter()
                .map(|organ| organ.label().to_string())
                .collect(),
            input: config.model.input,
            specialist: None,
        })
    }

    fn load_specialist(&self, config: &SpecialistConfig) -> Result<ModelHandle> {
        require_file(&config.model.path)?;
        require_file(&config.classes_path)?;

        tracing::info!(
            "Loading {} specialist from {}",
            config.organ,
            config.model.path.display()
        );
        let model = self.loader.load(&config.model)?;

        let text = std::fs::read_to_string(&config.classes_path)?;
        let classes = parse_class_list(&text, &config.classes_path);
        tracing::debug!("{} specialist has {} classes", config.organ, classes.len());

        Ok(ModelHandle {
            model,
            classes,
            input: config.model.input,
            specialist: Some(config.clone()),
        })
    }
}

/// Run `load` under the slot's lock unless the slot is already filled.
/// A failed load leaves the slot empty.
fn load_once<F>(slot: &Slot, load: F) -> Result<Arc<ModelHandle>>
where
    F: FnOnce() -> Result<ModelHandle>,
{
    let mut guard = lock(slot);
    if let Some(handle) = guard.as_ref() {
        return Ok(Arc::clone(handle));
    }

    let handle = Arc::new(load()?);
    *guard = Some(Arc::clone(&handle));
    Ok(handle)
}

// A panic mid-load never fills the slot, so a poisoned slot is still consistent
fn lock(slot: &Slot) -> MutexGuard<'_, Option<Arc<ModelHandle>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn peek(slot: &Slot) -> SlotState {
    let state = |cached: &Option<Arc<ModelHandle>>| match cached {
        Some(handle) => SlotState::Loaded {
            classes: handle.classes.len(),
        },
        None => SlotState::Pending,
    };

    match slot.try_lock() {
        Ok(guard) => state(&guard),
        Err(TryLockError::Poisoned(poisoned)) => state(&poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => SlotState::Loading,
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AnalysisError::ModelNotFound {
            path: path.to_path_buf(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassListFile {
    Bare(Vec<String>),
    Wrapped { classes: Vec<String> },
}

/// Parse a class-list file: either `[...]` or `{"classes": [...]}`.
/// Anything else yields an empty list.
pub fn parse_class_list(text: &str, origin: &Path) -> Vec<String> {
    match serde_json::from_str::<ClassListFile>(text) {
        Ok(ClassListFile::Bare(classes)) | Ok(ClassListFile::Wrapped { classes }) => classes,
        Err(e) => {
            tracing::warn!(
                "Unrecognized class list in {} ({}); specialist disabled",
                origin.display(),
                e
            );
            Vec::new()
        }
    }
}
