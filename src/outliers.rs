use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;
use ndarray::Array2;

use crate::error::{PipelineError, Result};
use crate::som::{Coord, SelfOrganizingMap};

// Which rows landed on which node after training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WinnerIndex {
    buckets: BTreeMap<Coord, Vec<usize>>,
}

impl WinnerIndex {
    pub fn build(som: &SelfOrganizingMap, data: &Array2<f64>) -> Self {
        let index = WinnerIndex::from_buckets(som.win_map(data));
        debug!(
            "{} of {} nodes won at least one row",
            index.occupied(),
            som.shape().0 * som.shape().1
        );
        index
    }

    pub fn from_buckets<I>(buckets: I) -> Self
    where
        I: IntoIterator<Item = (Coord, Vec<usize>)>,
    {
        WinnerIndex {
            buckets: buckets.into_iter().collect(),
        }
    }

    // Rows won by `coord`, or `None` when no row picked that node.
    pub fn get(&self, coord: Coord) -> Option<&[usize]> {
        self.buckets.get(&coord).map(Vec::as_slice)
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.buckets.contains_key(&coord)
    }

    pub fn occupied(&self) -> usize {
        self.buckets.len()
    }

    // Row indices of every selected node, in selection order. Missing nodes add nothing.
    pub fn collect_rows(&self, selected: &[Coord]) -> Vec<usize> {
        selected
            .iter()
            .filter_map(|&coord| self.get(coord))
            .flatten()
            .copied()
            .collect()
    }
}

// How suspicious nodes are picked from the distance map.
#[derive(Debug, Clone, PartialEq)]
pub enum OutlierSelection {
    // Coordinates read off a plotted distance map. Only valid for the run they came from.
    Manual(Vec<Coord>),
    // The `k` occupied nodes with the highest mean inter-neuron distance.
    TopK(usize),
    // Every node whose normalized distance is at least this value.
    Threshold(f64),
}

impl Default for OutlierSelection {
    fn default() -> Self {
        OutlierSelection::TopK(2)
    }
}

impl OutlierSelection {
    pub fn validate(&self) -> Result<()> {
        match self {
            OutlierSelection::TopK(0) => Err(PipelineError::InvalidConfig(
                "top-k selection needs k >= 1".to_string(),
            )),
            OutlierSelection::Threshold(t) if !t.is_finite() => Err(
                PipelineError::InvalidConfig(format!("threshold must be finite, got {}", t)),
            ),
            _ => Ok(()),
        }
    }

    pub fn select(&self, distance_map: &Array2<f64>, index: &WinnerIndex) -> Result<Vec<Coord>> {
        self.validate()?;
        let selected = match self {
            OutlierSelection::Manual(coords) => coords.clone(),
            OutlierSelection::TopK(k) => ranked(distance_map)
                .into_iter()
                .filter(|(coord, _)| index.contains(*coord))
                .take(*k)
                .map(|(coord, _)| coord)
                .collect(),
            OutlierSelection::Threshold(t) => ranked(distance_map)
                .into_iter()
                .take_while(|(_, mid)| mid >= t)
                .map(|(coord, _)| coord)
                .collect(),
        };
        for coord in &selected {
            let mid = distance_map.get(*coord).copied().unwrap_or(f64::NAN);
            debug!("Selected node {:?} (MID {:.3})", coord, mid);
        }
        Ok(selected)
    }
}

// Nodes by descending distance, ties in coordinate order.
fn ranked(distance_map: &Array2<f64>) -> Vec<(Coord, f64)> {
    let mut nodes: Vec<(Coord, f64)> = distance_map
        .indexed_iter()
        .map(|(coord, &mid)| (coord, mid))
        .collect();
    nodes.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn map() -> Array2<f64> {
        array![[0.2, 1.0, 0.4], [0.9, 0.1, 0.9], [0.3, 0.5, 0.0]]
    }

    fn index() -> WinnerIndex {
        WinnerIndex::from_buckets(vec![
            ((0, 0), vec![0, 4]),
            ((1, 0), vec![1]),
            ((1, 2), vec![2, 5]),
            ((2, 1), vec![3]),
        ])
    }

    #[test]
    fn test_missing_coord_lookup() {
        let index = index();
        assert_eq!(index.get((0, 0)), Some(&[0, 4][..]));
        assert_eq!(index.get((0, 1)), None);
        assert_eq!(index.occupied(), 4);
    }

    #[test]
    fn test_collect_rows_keeps_selection_order() {
        let rows = index().collect_rows(&[(1, 2), (2, 2), (0, 0)]);
        assert_eq!(rows, vec![2, 5, 0, 4]);
        assert!(index().collect_rows(&[(2, 2)]).is_empty());
    }

    #[test]
    fn test_top_k_skips_empty_nodes() {
        // (0, 1) has the highest distance but nobody won it
        let selected = OutlierSelection::TopK(2).select(&map(), &index()).unwrap();
        assert_eq!(selected, vec![(1, 0), (1, 2)]);
    }

    #[test]
    fn test_top_k_larger_than_occupied() {
        let selected = OutlierSelection::TopK(10).select(&map(), &index()).unwrap();
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_threshold_selection() {
        let selected = OutlierSelection::Threshold(0.9).select(&map(), &index()).unwrap();
        assert_eq!(selected, vec![(0, 1), (1, 0), (1, 2)]);
    }

    #[test]
    fn test_manual_selection_passes_through() {
        let coords = vec![(5, 3), (8, 3)];
        let selected = OutlierSelection::Manual(coords.clone())
            .select(&map(), &index())
            .unwrap();
        assert_eq!(selected, coords);
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(matches!(
            OutlierSelection::TopK(0).select(&map(), &index()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
