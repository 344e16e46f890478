// Supervised stage: score every customer with a fraud probability.

use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use log::info;
use ndarray::{Array1, Array2};

use crate::error::{PipelineError, Result};

pub trait FraudClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()>;

    // Probability of label 1 for each row, in row order.
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub max_iterations: u64,
    // L2 penalty.
    pub alpha: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            max_iterations: 100,
            alpha: 1.0,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "classifier needs at least one iteration".to_string(),
            ));
        }
        if !(self.alpha >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

// Sigmoid output unit over standardized features, trained with linfa's
// logistic regression.
pub struct LogisticClassifier {
    config: ClassifierConfig,
    model: Option<FittedLogisticRegression<f64, usize>>,
}

impl LogisticClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        LogisticClassifier { config, model: None }
    }
}

impl FraudClassifier for LogisticClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
        self.config.validate()?;
        if features.nrows() != labels.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "{} feature rows for {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if let Some(&first) = labels.iter().next() {
            if labels.iter().all(|&l| l == first) {
                return Err(PipelineError::DegenerateLabels(first));
            }
        }

        info!(
            "Fitting logistic classifier on {} rows x {} columns",
            features.nrows(),
            features.ncols()
        );
        let dataset = Dataset::new(features.clone(), labels.clone());
        let model = LogisticRegression::default()
            .max_iterations(self.config.max_iterations)
            .alpha(self.config.alpha)
            .fit(&dataset)
            .map_err(|e| PipelineError::Classifier(e.to_string()))?;
        self.model = Some(model);
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::Classifier("predict called before fit".to_string()))?;
        let proba = model.predict_probabilities(features);
        // linfa picks its own positive class; flip when that is not label 1
        if model.labels().pos.class == 1 {
            Ok(proba)
        } else {
            Ok(proba.mapv(|p| 1.0 - p))
        }
    }
}
