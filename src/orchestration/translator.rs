// DiagnosisTranslator - maps raw specialist labels to human-facing diagnoses

use super::catalog::{ModelCatalog, OrganClass};
use std::sync::Arc;

/// Reads translation tables straight from the shared catalog
#[derive(Debug, Clone)]
pub struct DiagnosisTranslator {
    catalog: Arc<ModelCatalog>,
}

impl DiagnosisTranslator {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    /// Friendly diagnosis for `raw_label`, or the label itself when unmapped
    pub fn translate<'a>(&'a self, organ: OrganClass, raw_label: &'a str) -> &'a str {
        self.catalog
            .specialist(organ)
            .and_then(|config| config.translations.get(raw_label))
            .map(String::as_str)
            .unwrap_or(raw_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::catalog::SpecialistConfig;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn builtin() -> DiagnosisTranslator {
        DiagnosisTranslator::new(Arc::new(ModelCatalog::builtin(Path::new("m"))))
    }

    #[test]
    fn test_translate_mapped_label() {
        let translator = builtin();
        assert_eq!(
            translator.translate(OrganClass::Brain, "notumor"),
            "No tumor detected"
        );
        assert_eq!(translator.translate(OrganClass::Skin, "mel"), "Melanoma");
    }

    #[test]
    fn test_unmapped_label_is_identity_for_every_organ() {
        let translator = builtin();
        for organ in OrganClass::ALL {
            for label in ["", "class_7", "GLIOMA", "lung_n "] {
                assert_eq!(translator.translate(organ, label), label);
            }
        }
    }

    #[test]
    fn test_tables_are_per_organ() {
        let root = Path::new("m");
        let mut colon = SpecialistConfig::builtin(OrganClass::Colon, root);
        colon.translations = BTreeMap::from([("n".into(), "Normal colon".into())]);
        let catalog = ModelCatalog::builtin(root).with_specialist(colon);
        let translator = DiagnosisTranslator::new(Arc::new(catalog));

        assert_eq!(translator.translate(OrganClass::Colon, "n"), "Normal colon");
        assert_eq!(translator.translate(OrganClass::Lung, "n"), "n");
    }

    #[test]
    fn test_unconfigured_organ_is_identity() {
        let catalog = ModelCatalog::builtin(Path::new("m")).without_specialist(OrganClass::Skin);
        let translator = DiagnosisTranslator::new(Arc::new(catalog));
        assert_eq!(translator.translate(OrganClass::Skin, "mel"), "mel");
    }
}
