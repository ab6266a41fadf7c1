// organscope - two-stage medical image classification
// An organ classifier picks the body organ, then that organ's specialist model
// refines it into a diagnosis. Specialist problems never fail a request.

pub mod config;
pub mod error;
pub mod model;
pub mod orchestration;
pub mod preprocess;

pub use config::Settings;
pub use error::{AnalysisError, ErrorKind, Result};
pub use model::{Architecture, CandleLoader, Classifier, ModelLoader};
pub use orchestration::{AnalysisResponse, ModelCatalog, OrganClass, Orchestrator};
pub use preprocess::{decode_image, preprocess};
