// Two-stage fraud screen: a self-organizing map flags outlying credit-card
// applications, then a logistic classifier scores every customer.
use std::error::Error;

use classifier::{ClassifierConfig, LogisticClassifier};
use csv_reader::read_applications;
use log::info;
use outliers::OutlierSelection;
use pipeline::{run, FraudScore, NodeSummary, PipelineConfig};
use som::SomConfig;

mod classifier;
mod csv_reader;
mod error;
mod labels;
mod outliers;
mod pipeline;
mod scaler;
mod som;

const CSV_FILE_PATH: &str = "Credit_Card_Applications.csv";
const GRID_WIDTH: usize = 10;
const GRID_HEIGHT: usize = 10;
const SIGMA: f64 = 1.0;
const LEARNING_RATE: f64 = 0.5;
const SOM_ITERATIONS: usize = 100;
const SOM_SEED: u64 = 42;
const OUTLIER_NODES: usize = 2;

// Prints what each selected node holds: its MID and the approval mix of its customers
fn print_node_summary(node: &NodeSummary) {
    println!(
        "Node ({}, {})  MID {:.3}  customers {:>3}  approved {:>3}  not approved {:>3}",
        node.coord.0, node.coord.1, node.mid, node.customers, node.approved, node.not_approved
    );
}

// Prints (customer id, probability) pairs, lowest probability first
fn print_scores(scores: &[FraudScore]) {
    println!("{:>12}  {:>11}", "CustomerID", "Probability");
    for score in scores {
        println!("{:>12}  {:>11.6}", score.customer_id, score.probability);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dataset = read_applications(CSV_FILE_PATH)?;
    info!(
        "{} applications, {} features",
        dataset.len(),
        dataset.n_features()
    );

    let config = PipelineConfig {
        som: SomConfig {
            width: GRID_WIDTH,
            height: GRID_HEIGHT,
            sigma: SIGMA,
            learning_rate: LEARNING_RATE,
            iterations: SOM_ITERATIONS,
            seed: Some(SOM_SEED),
        },
        selection: OutlierSelection::TopK(OUTLIER_NODES),
        classifier: ClassifierConfig::default(),
    };
    let mut classifier = LogisticClassifier::new(config.classifier.clone());
    let report = run(&dataset, &config, &mut classifier)?;

    println!(
        "\nSOM: {} of {} nodes occupied, quantization error {:.4}",
        report.outliers.winner_index.occupied(),
        GRID_WIDTH * GRID_HEIGHT,
        report.outliers.quantization_error
    );
    println!("\nSuspicious SOM nodes:");
    for node in &report.outliers.nodes {
        print_node_summary(node);
    }

    println!(
        "\nCustomers in suspicious nodes ({} rows flagged):",
        report.outliers.fraud.flagged()
    );
    for id in &report.outliers.fraud.fraud_ids {
        println!("{}", id);
    }

    println!("\nFraud probabilities:");
    print_scores(&report.scores);

    Ok(())
}
