pub mod gate;
pub mod gemini;
pub mod verdict;

pub use gate::{Classifier, ClassifierGate};
pub use gemini::GeminiClassifier;
pub use verdict::ClassificationVerdict;
