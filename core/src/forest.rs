//! Random forest of CART trees (Gini impurity, bootstrap samples,
//! √d candidate features per split).

use crate::{
    error::{RiskError, RiskResult},
    rng::StageRng,
    types::{Label, Matrix},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators:      usize,
    pub max_depth:         Option<usize>,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Fraction of class-1 samples that reached this leaf.
        probability: f64,
    },
    Split {
        feature:   usize,
        threshold: f64,
        left:      usize,
        right:     usize,
    },
}

/// Arena-allocated tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { probability } => return *probability,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(
        params: &ForestParams,
        x: &Matrix,
        y: &[Label],
        rng: &mut StageRng,
    ) -> RiskResult<Self> {
        let n = x.len();
        let d = x.first().map(Vec::len).ok_or_else(|| RiskError::training("empty training matrix"))?;
        if params.n_estimators == 0 {
            return Err(RiskError::training("random forest needs at least one tree"));
        }
        let max_features = ((d as f64).sqrt() as usize).max(1);
        let builder = TreeBuilder {
            x,
            y,
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            max_features,
        };

        let trees = (0..params.n_estimators)
            .map(|_| {
                let mut tree_rng = rng.fork("tree");
                let sample: Vec<usize> = (0..n).map(|_| tree_rng.next_index(n)).collect();
                builder.build(sample, &mut tree_rng)
            })
            .collect();
        Ok(Self { trees })
    }

    /// Mean of the per-tree leaf probabilities.
    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_proba_row(row)).sum();
        total / self.trees.len() as f64
    }
}

// ── Tree construction ────────────────────────────────────────────────────────

struct TreeBuilder<'a> {
    x:                 &'a Matrix,
    y:                 &'a [Label],
    max_depth:         Option<usize>,
    min_samples_split: usize,
    max_features:      usize,
}

struct BestSplit {
    feature:   usize,
    threshold: f64,
    impurity:  f64,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl TreeBuilder<'_> {
    fn build(&self, sample: Vec<usize>, rng: &mut StageRng) -> DecisionTree {
        let mut nodes = Vec::new();
        self.grow(&mut nodes, sample, 0, rng);
        DecisionTree { nodes }
    }

    /// Grow the subtree for `sample`, returning its node index.
    fn grow(&self, nodes: &mut Vec<Node>, sample: Vec<usize>, depth: usize, rng: &mut StageRng) -> usize {
        let positives = sample.iter().filter(|&&i| self.y[i] == 1).count();
        let probability = positives as f64 / sample.len().max(1) as f64;
        let idx = nodes.len();
        nodes.push(Node::Leaf { probability });

        let pure = positives == 0 || positives == sample.len();
        let depth_reached = self.max_depth.is_some_and(|m| depth >= m);
        if pure || depth_reached || sample.len() < self.min_samples_split {
            return idx;
        }

        let Some(best) = self.best_split(&sample, positives, rng) else {
            return idx;
        };
        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&i| self.x[i][best.feature] <= best.threshold);

        let left_idx = self.grow(nodes, left, depth + 1, rng);
        let right_idx = self.grow(nodes, right, depth + 1, rng);
        nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }

    fn best_split(&self, sample: &[usize], positives: usize, rng: &mut StageRng) -> Option<BestSplit> {
        let d = self.x[0].len();
        let mut features: Vec<usize> = (0..d).collect();
        rng.shuffle(&mut features);
        features.truncate(self.max_features);

        let n = sample.len();
        let parent = gini(positives, n);
        let mut best: Option<BestSplit> = None;

        for &feature in &features {
            let mut order: Vec<(f64, Label)> = sample.iter().map(|&i| (self.x[i][feature], self.y[i])).collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for k in 1..n {
                left_pos += usize::from(order[k - 1].1);
                if order[k].0 <= order[k - 1].0 {
                    continue;
                }
                let right_pos = positives - left_pos;
                let impurity = (k as f64 * gini(left_pos, k)
                    + (n - k) as f64 * gini(right_pos, n - k))
                    / n as f64;
                if impurity < parent - 1e-12 && best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (order[k - 1].0 + order[k].0) / 2.0,
                        impurity,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{RngBank, StageSlot};

    fn xor_free_data() -> (Matrix, Vec<Label>) {
        let x: Matrix = (0..30).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<Label> = (0..30).map(|i| u8::from(i >= 15)).collect();
        (x, y)
    }

    #[test]
    fn single_deep_tree_fits_training_data() {
        let (x, y) = xor_free_data();
        let builder = TreeBuilder { x: &x, y: &y, max_depth: None, min_samples_split: 2, max_features: 2 };
        let mut rng = RngBank::new(3).for_stage(StageSlot::Forest);
        let tree = builder.build((0..30).collect(), &mut rng);
        for (row, label) in x.iter().zip(&y) {
            assert_eq!(tree.predict_proba_row(row), f64::from(*label));
        }
    }

    #[test]
    fn depth_limit_is_respected() {
        let (x, y) = xor_free_data();
        let builder = TreeBuilder { x: &x, y: &y, max_depth: Some(0), min_samples_split: 2, max_features: 2 };
        let mut rng = RngBank::new(3).for_stage(StageSlot::Forest);
        let tree = builder.build((0..30).collect(), &mut rng);
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict_proba_row(&x[0]), 0.5);
    }

    #[test]
    fn forest_is_deterministic_for_a_seed() {
        let (x, y) = xor_free_data();
        let params = ForestParams { n_estimators: 15, max_depth: Some(4), min_samples_split: 2 };
        let a = RandomForest::fit(&params, &x, &y, &mut RngBank::new(9).for_stage(StageSlot::Forest)).unwrap();
        let b = RandomForest::fit(&params, &x, &y, &mut RngBank::new(9).for_stage(StageSlot::Forest)).unwrap();
        assert_eq!(a, b);
        assert!(a.predict_proba_row(&[28.0, 0.0]) > 0.5);
        assert!(a.predict_proba_row(&[1.0, 1.0]) < 0.5);
    }
}
