// Orchestration system - organ classification routed to per-organ specialists

pub mod catalog;
pub mod orchestrator;
pub mod registry;
pub mod translator;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{ClassifierConfig, InputShape, ModelCatalog, ModelSource, OrganClass, SpecialistConfig};
pub use orchestrator::{Orchestrator, UNKNOWN_LABEL};
pub use registry::{ModelHandle, ModelRegistry, RegistryStatus, SlotState, SpecialistLookup};
pub use translator::DiagnosisTranslator;
pub use types::*;
