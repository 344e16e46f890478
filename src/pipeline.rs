// Stage wiring: scale, map, select, label, classify.
//
// Each stage hands its output to the next by value or reference; nothing is
// written back into an earlier stage.

use log::{info, warn};
use ndarray::{Array1, Array2};

use crate::classifier::{ClassifierConfig, FraudClassifier};
use crate::csv_reader::CreditDataset;
use crate::error::{PipelineError, Result};
use crate::labels::{build_labels, FraudLabels};
use crate::outliers::{OutlierSelection, WinnerIndex};
use crate::scaler::{ScaledMatrix, StandardScaler};
use crate::som::{Coord, SelfOrganizingMap, SomConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub som: SomConfig,
    pub selection: OutlierSelection,
    pub classifier: ClassifierConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.som.validate()?;
        self.selection.validate()?;
        self.classifier.validate()
    }
}

// What the SOM saw in one selected node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub coord: Coord,
    pub mid: f64,
    pub customers: usize,
    pub approved: usize,
    pub not_approved: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FraudScore {
    pub customer_id: u64,
    pub probability: f64,
}

// Output of the unsupervised half.
#[derive(Debug, Clone)]
pub struct OutlierReport {
    pub winner_index: WinnerIndex,
    // One entry per selected node, in selection order.
    pub nodes: Vec<NodeSummary>,
    pub fraud: FraudLabels,
    pub quantization_error: f64,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outliers: OutlierReport,
    // Ascending by probability.
    pub scores: Vec<FraudScore>,
}

// Runs the unsupervised stage end to end
// Inputs: dataset and pipeline config
// Outputs: OutlierReport with winner index, node summaries, labels and quantization error
// Key steps:
// 1. Min-max scale the id + feature matrix
// 2. Train the SOM and build the winner index
// 3. Select outlier nodes from the distance map
// 4. Build labels and summarize the selected nodes
pub fn detect_outliers(dataset: &CreditDataset, config: &PipelineConfig) -> Result<OutlierReport> {
    config.validate()?;
    if dataset.is_empty() {
        return Err(PipelineError::MalformedInput("dataset has no rows".to_string()));
    }

    let scaled = ScaledMatrix::from_raw(&dataset.som_matrix())?;
    info!(
        "Scaled {} rows x {} columns into [0, 1]",
        scaled.nrows(),
        scaled.ncols()
    );

    let mut som = SelfOrganizingMap::new(&config.som, scaled.ncols())?;
    som.initialize_weights(&scaled.values)?;
    som.train(&scaled.values, config.som.iterations)?;
    let quantization_error = som.quantization_error(&scaled.values);
    info!("Quantization error after training: {:.4}", quantization_error);

    let distance_map = som.distance_map();
    let winner_index = WinnerIndex::build(&som, &scaled.values);
    let selected = config.selection.select(&distance_map, &winner_index)?;
    info!("Selected outlier nodes: {:?}", selected);

    let fraud = build_labels(&winner_index, &selected, &scaled, &dataset.customer_ids())?;
    let nodes = summarize_nodes(dataset, &winner_index, &selected, &distance_map);

    Ok(OutlierReport {
        winner_index,
        nodes,
        fraud,
        quantization_error,
    })
}

// Scores every customer with a fraud probability
// Inputs: dataset, labels from the SOM stage, classifier
// Outputs: one FraudScore per customer, sorted ascending by probability
// Key steps:
// 1. Skip the fit when the labels hold a single class
// 2. Otherwise standardize the non-id columns, fit and predict
// 3. Pair probabilities with ids and sort
pub fn score_customers<C: FraudClassifier>(
    dataset: &CreditDataset,
    fraud: &FraudLabels,
    classifier: &mut C,
) -> Result<Vec<FraudScore>> {
    if fraud.labels.len() != dataset.len() {
        return Err(PipelineError::ShapeMismatch(format!(
            "{} labels for {} rows",
            fraud.labels.len(),
            dataset.len()
        )));
    }

    let flagged = fraud.flagged();
    let proba = if flagged == 0 || flagged == dataset.len() {
        // one class only: nothing to fit, every customer gets that class
        let constant = if flagged == 0 { 0.0 } else { 1.0 };
        warn!(
            "All {} customers share label {}; skipping classifier fit",
            dataset.len(),
            constant
        );
        Array1::from_elem(dataset.len(), constant)
    } else {
        let (features, _) = StandardScaler::fit_transform(&dataset.classifier_matrix())?;
        classifier.fit(&features, &fraud.labels)?;
        classifier.predict_proba(&features)?
    };

    let mut scores: Vec<FraudScore> = dataset
        .customer_ids()
        .into_iter()
        .zip(proba.iter())
        .map(|(customer_id, &probability)| FraudScore {
            customer_id,
            probability,
        })
        .collect();
    scores.sort_by(|a, b| a.probability.total_cmp(&b.probability));
    Ok(scores)
}

pub fn run<C: FraudClassifier>(
    dataset: &CreditDataset,
    config: &PipelineConfig,
    classifier: &mut C,
) -> Result<PipelineReport> {
    let outliers = detect_outliers(dataset, config)?;
    let scores = score_customers(dataset, &outliers.fraud, classifier)?;
    Ok(PipelineReport { outliers, scores })
}

pub fn summarize_nodes(
    dataset: &CreditDataset,
    index: &WinnerIndex,
    selected: &[Coord],
    distance_map: &Array2<f64>,
) -> Vec<NodeSummary> {
    selected
        .iter()
        .map(|&coord| {
            let rows = index.get(coord).unwrap_or_default();
            let approved = rows
                .iter()
                .filter(|&&r| {
                    dataset
                        .applications
                        .get(r)
                        .map_or(false, |app| app.approved == 1)
                })
                .count();
            NodeSummary {
                coord,
                mid: distance_map.get(coord).copied().unwrap_or(0.0),
                customers: rows.len(),
                approved,
                not_approved: rows.len() - approved,
            }
        })
        .collect()
}
