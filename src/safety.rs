mod classifier;
mod context;

#[cfg(test)]
mod tests;

pub use classifier::{
    load_classification_config, ClassificationConfig, SafetyClassification, SafetyClassifier,
    SafetyLevel,
};
