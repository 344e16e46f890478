use std::fs::File;
use std::io::Read;

use log::{debug, info};
use ndarray::Array2;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

// One credit-card application: the id column, the numeric attributes and the
// approval class, in file order.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(try_from = "Vec<f64>")]
pub struct Application {
    pub customer_id: u64,
    pub features: Vec<f64>,
    pub approved: u8,
}

impl TryFrom<Vec<f64>> for Application {
    type Error = String;

    fn try_from(mut cells: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        if cells.len() < 3 {
            return Err(format!(
                "expected an id, at least one feature and a class, found {} columns",
                cells.len()
            ));
        }
        if let Some(pos) = cells.iter().position(|v| !v.is_finite()) {
            return Err(format!("column {} is not a finite number", pos + 1));
        }

        let class = cells.pop().unwrap_or_default();
        let approved = match class {
            c if c == 0.0 => 0,
            c if c == 1.0 => 1,
            c => return Err(format!("class must be 0 or 1, found {}", c)),
        };

        let id = cells.remove(0);
        if id < 0.0 || id.fract() != 0.0 {
            return Err(format!("customer id must be a non-negative integer, found {}", id));
        }

        Ok(Application {
            customer_id: id as u64,
            features: cells,
            approved,
        })
    }
}

// The loaded dataset. Row order is the file order and never changes.
#[derive(Debug, Clone)]
pub struct CreditDataset {
    pub applications: Vec<Application>,
    pub feature_names: Vec<String>,
}

impl CreditDataset {
    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn customer_ids(&self) -> Vec<u64> {
        self.applications.iter().map(|a| a.customer_id).collect()
    }

    // Id followed by the features: the unsupervised input. The id rides along
    // as column 0 so it survives the min-max round trip.
    pub fn som_matrix(&self) -> Array2<f64> {
        let shape = (self.len(), self.n_features() + 1);
        Array2::from_shape_fn(shape, |(i, j)| {
            let app = &self.applications[i];
            match j {
                0 => app.customer_id as f64,
                _ => app.features[j - 1],
            }
        })
    }

    // Every column except the id: features plus the approval class.
    pub fn classifier_matrix(&self) -> Array2<f64> {
        let n_features = self.n_features();
        Array2::from_shape_fn((self.len(), n_features + 1), |(i, j)| {
            let app = &self.applications[i];
            if j < n_features {
                app.features[j]
            } else {
                app.approved as f64
            }
        })
    }
}

pub fn read_applications(file_path: &str) -> Result<CreditDataset> {
    info!("Reading applications from {}", file_path);
    let file = File::open(file_path)?;
    read_applications_from(file)
}

// Loads applications from any CSV source
// Inputs: reader over CSV text with a header row
// Outputs: CreditDataset with feature names taken from the header
// Key steps:
// 1. Check the header has an id, features and a class
// 2. Deserialize each record into an Application
// 3. Reject ragged rows and an empty file
pub fn read_applications_from<R: Read>(reader: R) -> Result<CreditDataset> {
    let mut rdr = csv::Reader::from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 3 {
        return Err(PipelineError::MalformedInput(format!(
            "header has {} columns; need an id, at least one feature and a class",
            headers.len()
        )));
    }
    let feature_names: Vec<String> = headers
        .iter()
        .skip(1)
        .take(headers.len() - 2)
        .map(str::to_string)
        .collect();

    let applications: Vec<Application> = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<Application>, csv::Error>>()?;

    if applications.is_empty() {
        return Err(PipelineError::MalformedInput("dataset has no rows".to_string()));
    }
    debug!(
        "Loaded {} applications with {} features each",
        applications.len(),
        feature_names.len()
    );

    Ok(CreditDataset {
        applications,
        feature_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    const SAMPLE: &str = "CustomerID,A1,A2,A3,Class\n\
                          15776156,1,22.08,11.46,0\n\
                          15739548,0,22.67,7,0\n\
                          15662854,0,29.58,1.75,1\n";

    #[test]
    fn test_reads_id_features_and_class() {
        let dataset = read_applications_from(SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.feature_names, vec!["A1", "A2", "A3"]);
        assert_eq!(dataset.customer_ids(), vec![15776156, 15739548, 15662854]);
        assert_eq!(dataset.applications[0].features, vec![1.0, 22.08, 11.46]);
        assert_eq!(dataset.applications[2].approved, 1);
    }

    #[test]
    fn test_matrix_views() {
        let dataset = read_applications_from(SAMPLE.as_bytes()).unwrap();
        let som = dataset.som_matrix();
        assert_eq!(som.dim(), (3, 4));
        assert_eq!(som[[1, 0]], 15739548.0);

        let clf = dataset.classifier_matrix();
        assert_eq!(clf.dim(), (3, 4));
        assert_eq!(clf[[2, 3]], 1.0);
        assert_eq!(clf[[0, 0]], 1.0);
    }

    #[test]
    fn test_reads_from_file() {
        let dir = TempDir::new("som_fraud_screen").unwrap();
        let path = dir.path().join("apps.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let dataset = read_applications(path.to_str().unwrap()).unwrap();
        assert_eq!(dataset.n_features(), 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = read_applications("definitely/not/here.csv");
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_non_numeric_cell_rejected() {
        let csv = "CustomerID,A1,Class\n1,abc,0\n";
        let result = read_applications_from(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::Csv(_))));
    }

    #[test]
    fn test_short_row_rejected() {
        let csv = "CustomerID,A1,A2,Class\n1,2.0,3.0,0\n2,4.0,1\n";
        let result = read_applications_from(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::Csv(_))));
    }

    #[test]
    fn test_bad_class_rejected() {
        let csv = "CustomerID,A1,Class\n1,2.0,3\n";
        let err = read_applications_from(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("class must be 0 or 1"));
    }

    #[test]
    fn test_fractional_id_rejected() {
        let csv = "CustomerID,A1,Class\n1.5,2.0,1\n";
        let err = read_applications_from(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("customer id"));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let csv = "CustomerID,A1,Class\n";
        let result = read_applications_from(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::MalformedInput(_))));
    }

    #[test]
    fn test_too_few_columns_rejected() {
        let csv = "CustomerID,Class\n1,0\n";
        let result = read_applications_from(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::MalformedInput(_))));
    }
}
