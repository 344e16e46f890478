use std::collections::HashSet;

use log::{debug, info};
use ndarray::{Array1, Array2};

use crate::error::{PipelineError, Result};
use crate::outliers::WinnerIndex;
use crate::scaler::ScaledMatrix;
use crate::som::Coord;

// Customers pulled out of the selected nodes and the matching 0/1 targets.
#[derive(Debug, Clone, PartialEq)]
pub struct FraudLabels {
    // Distinct ids in the order they were first recovered.
    pub fraud_ids: Vec<u64>,
    // One entry per dataset row, 1 when that row's id was recovered.
    pub labels: Array1<usize>,
}

impl FraudLabels {
    pub fn flagged(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }
}

// Turns the selected SOM nodes into fraud ids and a 0/1 label per customer
// Inputs: winner index, selected node coords, scaled SOM input, customer ids in dataset order
// Outputs: FraudLabels with the recovered ids and one label per row
// Key steps:
// 1. Gather the rows won by the selected nodes
// 2. Undo the min-max scaling and read the id back out of column 0
// 3. Mark every customer whose id was recovered
pub fn build_labels(
    index: &WinnerIndex,
    selected: &[Coord],
    scaled: &ScaledMatrix,
    customer_ids: &[u64],
) -> Result<FraudLabels> {
    if customer_ids.len() != scaled.nrows() {
        return Err(PipelineError::ShapeMismatch(format!(
            "{} customer ids for {} scaled rows",
            customer_ids.len(),
            scaled.nrows()
        )));
    }

    let rows = index.collect_rows(selected);
    if let Some(&bad) = rows.iter().find(|&&r| r >= scaled.nrows()) {
        return Err(PipelineError::ShapeMismatch(format!(
            "winner index refers to row {} of a {}-row matrix",
            bad,
            scaled.nrows()
        )));
    }

    let gathered = gather_rows(&scaled.values, &rows);
    let frauds = scaled.scaler.inverse_transform(&gathered)?;
    debug!("Recovered {} candidate rows from {} nodes", frauds.nrows(), selected.len());

    let mut fraud_ids = Vec::new();
    let mut seen = HashSet::new();
    for id in frauds.column(0).iter().map(|v| v.round() as u64) {
        if seen.insert(id) {
            fraud_ids.push(id);
        }
    }

    let labels: Array1<usize> = customer_ids
        .iter()
        .map(|id| usize::from(seen.contains(id)))
        .collect();

    info!("Flagged {} distinct customers as suspected fraud", fraud_ids.len());
    Ok(FraudLabels { fraud_ids, labels })
}

// Zero indices yield a 0 x ncols matrix.
fn gather_rows(values: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), values.ncols()), |(i, j)| values[[rows[i], j]])
}
