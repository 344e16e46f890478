// Column-wise feature scaling.
//
// `MinMaxScaler` feeds the SOM and must be invertible so flagged rows can be
// mapped back to customer ids. `StandardScaler` feeds the classifier. The two
// are fitted on different matrices and never share state.

use log::debug;
use ndarray::{Array1, Array2, Axis, Zip};

use crate::error::{PipelineError, Result};

// Per-column (min, max) fitted on one matrix. Constant columns map to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(PipelineError::MalformedInput(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }
        let min = data.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
        debug!("Fitted min-max scaler on {} columns", min.len());
        Ok(MinMaxScaler { min, max })
    }

    pub fn fit_transform(data: &Array2<f64>) -> Result<(Array2<f64>, MinMaxScaler)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaled, scaler))
    }

    pub fn n_columns(&self) -> usize {
        self.min.len()
    }

    // max - min, with constant columns widened to 1 so they land on 0.
    fn range(&self) -> Array1<f64> {
        Zip::from(&self.min)
            .and(&self.max)
            .map_collect(|&lo, &hi| if hi > lo { hi - lo } else { 1.0 })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(data)?;
        let range = self.range();
        Ok((data - &self.min) / &range)
    }

    pub fn inverse_transform(&self, scaled: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(scaled)?;
        let range = self.range();
        Ok(scaled * &range + &self.min)
    }

    fn check_columns(&self, data: &Array2<f64>) -> Result<()> {
        if data.ncols() != self.n_columns() {
            return Err(PipelineError::ShapeMismatch(format!(
                "scaler fitted on {} columns, got {}",
                self.n_columns(),
                data.ncols()
            )));
        }
        Ok(())
    }
}

// The SOM input: min-max scaled rows together with the scaler that produced them.
#[derive(Debug, Clone)]
pub struct ScaledMatrix {
    pub values: Array2<f64>,
    pub scaler: MinMaxScaler,
}

impl ScaledMatrix {
    pub fn from_raw(raw: &Array2<f64>) -> Result<Self> {
        let (values, scaler) = MinMaxScaler::fit_transform(raw)?;
        Ok(ScaledMatrix { values, scaler })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }
}

// Zero mean, unit (population) variance per column.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    const MIN_STD: f64 = 1e-12;

    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        let mean = data.mean_axis(Axis(0)).ok_or_else(|| {
            PipelineError::MalformedInput("cannot standardize an empty matrix".to_string())
        })?;
        let std = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < Self::MIN_STD { 1.0 } else { s });
        Ok(StandardScaler { mean, std })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "scaler fitted on {} columns, got {}",
                self.mean.len(),
                data.ncols()
            )));
        }
        Ok((data - &self.mean) / &self.std)
    }

    pub fn fit_transform(data: &Array2<f64>) -> Result<(Array2<f64>, StandardScaler)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaled, scaler))
    }
}
