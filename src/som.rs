// Self-organizing map over a rectangular grid.
//
// Nodes are addressed as `(x, y)` with `x < width` and `y < height`. Each node
// carries a weight vector with the same length as an input row. Training is
// online: one random row per iteration, Gaussian neighborhood, with sigma and
// learning rate both decaying as `v0 / (1 + t / (T / 2))`.

use std::collections::BTreeMap;

use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayView1, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};

// Grid coordinate of a node.
pub type Coord = (usize, usize);

const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SomConfig {
    pub width: usize,
    pub height: usize,
    pub sigma: f64,
    pub learning_rate: f64,
    pub iterations: usize,
    // `None` draws the seed from the OS; winning coordinates then change run to run.
    pub seed: Option<u64>,
}

impl Default for SomConfig {
    fn default() -> Self {
        SomConfig {
            width: 10,
            height: 10,
            sigma: 1.0,
            learning_rate: 0.5,
            iterations: 100,
            seed: Some(42),
        }
    }
}

impl SomConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "grid must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.sigma > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct SelfOrganizingMap {
    width: usize,
    height: usize,
    input_len: usize,
    sigma: f64,
    learning_rate: f64,
    weights: Array3<f64>,
    rng: StdRng,
}

impl SelfOrganizingMap {
    pub fn new(config: &SomConfig, input_len: usize) -> Result<Self> {
        config.validate()?;
        if input_len == 0 {
            return Err(PipelineError::InvalidConfig(
                "input length must be at least 1".to_string(),
            ));
        }

        let mut rng = match config.seed {
            Some(seed) => {
                info!("Seeding SOM with {}", seed);
                StdRng::seed_from_u64(seed)
            }
            None => {
                info!("SOM is unseeded; node layout will differ between runs");
                StdRng::from_entropy()
            }
        };
        let weights = Array3::from_shape_simple_fn((config.width, config.height, input_len), || {
            rng.gen::<f64>()
        });

        Ok(SelfOrganizingMap {
            width: config.width,
            height: config.height,
            input_len,
            sigma: config.sigma,
            learning_rate: config.learning_rate,
            weights,
            rng,
        })
    }

    pub fn shape(&self) -> Coord {
        (self.width, self.height)
    }

    // Overwrite every node with a randomly chosen row of `data`.
    pub fn initialize_weights(&mut self, data: &Array2<f64>) -> Result<()> {
        self.check_data(data)?;
        for x in 0..self.width {
            for y in 0..self.height {
                let pick = self.rng.gen_range(0..data.nrows());
                self.weights
                    .slice_mut(s![x, y, ..])
                    .assign(&data.row(pick));
            }
        }
        debug!(
            "Initialized {}x{} nodes from data rows",
            self.width, self.height
        );
        Ok(())
    }

    // Online training, one random row per iteration
    // Inputs: scaled rows, iteration count
    // Outputs: updated weights
    // Key steps:
    // 1. Draw a row with the map's RNG
    // 2. Find its winning node
    // 3. Pull every node toward the row, weighted by the decayed neighborhood
    pub fn train(&mut self, data: &Array2<f64>, iterations: usize) -> Result<()> {
        self.check_data(data)?;
        if iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }

        info!(
            "Training {}x{} SOM for {} iterations (sigma={}, learning_rate={})",
            self.width, self.height, iterations, self.sigma, self.learning_rate
        );
        for t in 0..iterations {
            let pick = self.rng.gen_range(0..data.nrows());
            let row = data.row(pick);
            let winner = self.winner(row);
            self.update(row, winner, t, iterations);
        }
        Ok(())
    }

    fn update(&mut self, row: ArrayView1<f64>, winner: Coord, t: usize, max_iter: usize) {
        let decay = 1.0 + t as f64 / (max_iter as f64 / 2.0);
        let eta = self.learning_rate / decay;
        let sig = self.sigma / decay;
        let denom = 2.0 * sig * sig;

        let gx: Vec<f64> = (0..self.width)
            .map(|x| (-((x as f64 - winner.0 as f64).powi(2)) / denom).exp())
            .collect();
        let gy: Vec<f64> = (0..self.height)
            .map(|y| (-((y as f64 - winner.1 as f64).powi(2)) / denom).exp())
            .collect();

        for x in 0..self.width {
            for y in 0..self.height {
                let h = eta * gx[x] * gy[y];
                let mut node = self.weights.slice_mut(s![x, y, ..]);
                Zip::from(&mut node)
                    .and(&row)
                    .for_each(|w, &v| *w += h * (v - *w));
            }
        }
    }

    fn node_distance(&self, node: Coord, row: ArrayView1<f64>) -> f64 {
        let w = self.weights.slice(s![node.0, node.1, ..]);
        Zip::from(&w)
            .and(&row)
            .fold(0.0, |acc, &a, &b| acc + (a - b) * (a - b))
            .sqrt()
    }

    // Best-matching node for `row`; ties go to the first node in row-major order.
    pub fn winner(&self, row: ArrayView1<f64>) -> Coord {
        let mut best = (0, 0);
        let mut best_dist = f64::INFINITY;
        for x in 0..self.width {
            for y in 0..self.height {
                let d = self.node_distance((x, y), row);
                if d < best_dist {
                    best_dist = d;
                    best = (x, y);
                }
            }
        }
        best
    }

    // Mean inter-neuron distance per node, divided by the largest value.
    pub fn distance_map(&self) -> Array2<f64> {
        let mut map = Array2::<f64>::zeros((self.width, self.height));
        for x in 0..self.width {
            for y in 0..self.height {
                let here = self.weights.slice(s![x, y, ..]);
                let mut total = 0.0;
                let mut count = 0;
                for (dx, dy) in NEIGHBOR_OFFSETS {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    if nx < 0 || ny < 0 || nx >= self.width as isize || ny >= self.height as isize {
                        continue;
                    }
                    total += self.node_distance((nx as usize, ny as usize), here);
                    count += 1;
                }
                if count > 0 {
                    map[[x, y]] = total / count as f64;
                }
            }
        }

        let max = map.fold(0.0_f64, |acc, &v| acc.max(v));
        if max > 0.0 {
            map.mapv_inplace(|v| v / max);
        }
        map
    }

    // Row indices grouped by winning node. Nodes nobody wins are absent.
    pub fn win_map(&self, data: &Array2<f64>) -> BTreeMap<Coord, Vec<usize>> {
        let mut buckets: BTreeMap<Coord, Vec<usize>> = BTreeMap::new();
        for (i, row) in data.rows().into_iter().enumerate() {
            buckets.entry(self.winner(row)).or_default().push(i);
        }
        buckets
    }

    // Mean distance from each row to its winning node.
    pub fn quantization_error(&self, data: &Array2<f64>) -> f64 {
        if data.nrows() == 0 {
            return 0.0;
        }
        let total: f64 = data
            .rows()
            .into_iter()
            .map(|row| self.node_distance(self.winner(row), row))
            .sum();
        total / data.nrows() as f64
    }

    fn check_data(&self, data: &Array2<f64>) -> Result<()> {
        if data.nrows() == 0 {
            return Err(PipelineError::MalformedInput(
                "cannot train a SOM on zero rows".to_string(),
            ));
        }
        if data.ncols() != self.input_len {
            return Err(PipelineError::ShapeMismatch(format!(
                "SOM expects rows of length {}, got {}",
                self.input_len,
                data.ncols()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use ndarray::array;

    fn config(width: usize, height: usize) -> SomConfig {
        SomConfig {
            width,
            height,
            iterations: 200,
            seed: Some(7),
            ..SomConfig::default()
        }
    }

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.05, 0.0],
            [0.05, 0.0, 0.02],
            [0.02, 0.03, 0.01],
            [1.0, 0.95, 1.0],
            [0.97, 1.0, 0.99],
            [0.95, 0.98, 1.0],
        ]
    }

    #[test]
    fn test_config_validation() {
        assert!(SomConfig::default().validate().is_ok());
        assert!(SomConfig { width: 0, ..SomConfig::default() }.validate().is_err());
        assert!(SomConfig { sigma: 0.0, ..SomConfig::default() }.validate().is_err());
        assert!(SomConfig { learning_rate: -0.1, ..SomConfig::default() }.validate().is_err());
        assert!(SomConfig { iterations: 0, ..SomConfig::default() }.validate().is_err());
    }

    #[test]
    fn test_initialize_weights_uses_data_rows() {
        let data = two_blobs();
        let mut som = SelfOrganizingMap::new(&config(3, 3), 3).unwrap();
        som.initialize_weights(&data).unwrap();
        for x in 0..3 {
            for y in 0..3 {
                let node = som.weights.slice(s![x, y, ..]);
                assert!(data.rows().into_iter().any(|row| row == node));
            }
        }
    }

    #[test]
    fn test_rejects_wrong_row_length() {
        let mut som = SelfOrganizingMap::new(&config(2, 2), 4).unwrap();
        assert!(matches!(
            som.train(&two_blobs(), 10),
            Err(PipelineError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_winner_is_nearest_node() {
        let mut som = SelfOrganizingMap::new(&config(2, 1), 2).unwrap();
        som.weights.slice_mut(s![0, 0, ..]).assign(&array![0.0, 0.0]);
        som.weights.slice_mut(s![1, 0, ..]).assign(&array![1.0, 1.0]);
        assert_eq!(som.winner(array![0.9, 0.8].view()), (1, 0));
        assert_eq!(som.winner(array![0.1, 0.2].view()), (0, 0));
        // equidistant: first node wins
        assert_eq!(som.winner(array![0.5, 0.5].view()), (0, 0));
    }

    #[test]
    fn test_training_separates_blobs() {
        let data = two_blobs();
        let mut som = SelfOrganizingMap::new(&config(2, 1), 3).unwrap();
        som.initialize_weights(&data).unwrap();
        som.train(&data, 200).unwrap();

        let low = som.winner(data.row(0));
        let high = som.winner(data.row(3));
        assert_ne!(low, high);
        for i in 0..3 {
            assert_eq!(som.winner(data.row(i)), low);
            assert_eq!(som.winner(data.row(i + 3)), high);
        }
        assert!(som.quantization_error(&data) < 0.3);
    }

    #[test]
    fn test_same_seed_same_layout() {
        let data = two_blobs();
        let run = || {
            let mut som = SelfOrganizingMap::new(&config(3, 3), 3).unwrap();
            som.initialize_weights(&data).unwrap();
            som.train(&data, 50).unwrap();
            som.win_map(&data)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_win_map_covers_every_row_once() {
        let data = two_blobs();
        let mut som = SelfOrganizingMap::new(&config(3, 3), 3).unwrap();
        som.initialize_weights(&data).unwrap();
        som.train(&data, 100).unwrap();

        let buckets = som.win_map(&data);
        let mut seen: Vec<usize> = buckets.values().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..data.nrows()).collect::<Vec<_>>());
        assert!(buckets.values().all(|rows| !rows.is_empty()));
    }

    #[test]
    fn test_distance_map_is_normalized() {
        let mut som = SelfOrganizingMap::new(&config(3, 3), 2).unwrap();
        som.weights.fill(0.0);
        som.weights.slice_mut(s![2, 2, ..]).assign(&array![3.0, 4.0]);

        let map = som.distance_map();
        assert_eq!(map.dim(), (3, 3));
        let max = map.fold(0.0_f64, |acc, &v| acc.max(v));
        assert!(approx_eq!(f64, max, 1.0, epsilon = 1e-12));
        // the odd node stands out from all three of its neighbors
        assert_eq!(map[[2, 2]], 1.0);
        assert_eq!(map[[0, 0]], 0.0);
        // (1, 1) sees the odd node as one of 8 neighbors: (5/8) / 5
        assert!(approx_eq!(f64, map[[1, 1]], 0.125, epsilon = 1e-12));
    }

    #[test]
    fn test_distance_map_of_flat_grid_is_zero() {
        let mut som = SelfOrganizingMap::new(&config(2, 2), 2).unwrap();
        som.weights.fill(0.5);
        assert!(som.distance_map().iter().all(|&v| v == 0.0));
    }
}
