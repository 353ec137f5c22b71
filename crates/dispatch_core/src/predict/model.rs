//! The rejection model: a small feed-forward network trained on offer
//! outcomes.
//!
//! Topology is fixed: dense(10→16, ReLU) → dropout(0.2, training only) →
//! dense(16→8, ReLU) → dense(8→1, sigmoid). Training is plain per-sample SGD
//! on binary cross-entropy. The trained network serializes to disk with
//! bincode so a restart does not lose it.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub const INPUT: usize = 10;
pub const HIDDEN1: usize = 16;
pub const HIDDEN2: usize = 8;

/// Fixed seed keeps weight init and dropout masks reproducible.
const TRAIN_SEED: u64 = 42;

fn relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    w1: Vec<Vec<f64>>, // HIDDEN1 x INPUT
    b1: Vec<f64>,
    w2: Vec<Vec<f64>>, // HIDDEN2 x HIDDEN1
    b2: Vec<f64>,
    w3: Vec<f64>, // HIDDEN2
    b3: f64,
}

impl Mlp {
    /// Xavier-uniform initialization.
    pub fn new(rng: &mut StdRng) -> Self {
        fn layer(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<Vec<f64>> {
            let limit = (6.0 / (rows + cols) as f64).sqrt();
            (0..rows)
                .map(|_| (0..cols).map(|_| rng.gen_range(-limit..limit)).collect())
                .collect()
        }
        let limit3 = (6.0 / (HIDDEN2 + 1) as f64).sqrt();
        Self {
            w1: layer(rng, HIDDEN1, INPUT),
            b1: vec![0.0; HIDDEN1],
            w2: layer(rng, HIDDEN2, HIDDEN1),
            b2: vec![0.0; HIDDEN2],
            w3: (0..HIDDEN2).map(|_| rng.gen_range(-limit3..limit3)).collect(),
            b3: 0.0,
        }
    }

    /// Inference pass, no dropout. Returns P(reject) in [0, 1].
    pub fn forward(&self, x: &[f64; INPUT]) -> f64 {
        let mut h1 = [0.0; HIDDEN1];
        for (i, row) in self.w1.iter().enumerate() {
            let z: f64 = row.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f64>() + self.b1[i];
            h1[i] = relu(z);
        }
        let mut h2 = [0.0; HIDDEN2];
        for (j, row) in self.w2.iter().enumerate() {
            let z: f64 = row.iter().zip(h1.iter()).map(|(w, v)| w * v).sum::<f64>() + self.b2[j];
            h2[j] = relu(z);
        }
        let out: f64 = self
            .w3
            .iter()
            .zip(h2.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.b3;
        sigmoid(out)
    }

    /// Train a fresh network with per-sample SGD and inverted dropout on the
    /// first hidden layer. Returns the trained network and the mean BCE loss
    /// of the final epoch.
    pub fn train(
        samples: &[([f64; INPUT], f64)],
        epochs: usize,
        learning_rate: f64,
        dropout_rate: f64,
        ) -> (Self, f64) {
        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);
        let mut net = Self::new(&mut rng);
        let keep = 1.0 - dropout_rate;
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut last_epoch_loss = f64::NAN;

        for _ in 0..epochs.max(1) {
            // Fisher-Yates shuffle of the visit order.
            for i in (1..order.len()).rev() {
                let j = rng.gen_range(0..=i);
                order.swap(i, j);
            }
            let mut epoch_loss = 0.0;

            for &idx in &order {
                let (x, target) = &samples[idx];

                // Forward with dropout mask on h1.
                let mut z1 = [0.0; HIDDEN1];
                let mut h1 = [0.0; HIDDEN1];
                let mut mask = [0.0; HIDDEN1];
                for i in 0..HIDDEN1 {
                    z1[i] = net.w1[i]
                        .iter()
                        .zip(x.iter())
                        .map(|(w, v)| w * v)
                        .sum::<f64>()
                        + net.b1[i];
                    let dropped = dropout_rate > 0.0 && rng.gen::<f64>() < dropout_rate;
                    mask[i] = if dropped { 0.0 } else { 1.0 / keep };
                    h1[i] = relu(z1[i]) * mask[i];
                }
                let mut z2 = [0.0; HIDDEN2];
                let mut h2 = [0.0; HIDDEN2];
                for j in 0..HIDDEN2 {
                    z2[j] = net.w2[j]
                        .iter()
                        .zip(h1.iter())
                        .map(|(w, v)| w * v)
                        .sum::<f64>()
                        + net.b2[j];
                    h2[j] = relu(z2[j]);
                }
                let z3: f64 = net
                    .w3
                    .iter()
                    .zip(h2.iter())
                    .map(|(w, v)| w * v)
                    .sum::<f64>()
                    + net.b3;
                let y = sigmoid(z3);

                let eps = 1e-12;
                epoch_loss -=
                    target * (y + eps).ln() + (1.0 - target) * (1.0 - y + eps).ln();

                // Backward. Sigmoid + BCE collapses to (y - t) at the output
                // pre-activation.
                let delta_out = y - target;

                let mut delta_h2 = [0.0; HIDDEN2];
                for j in 0..HIDDEN2 {
                    if z2[j] > 0.0 {
                        delta_h2[j] = delta_out * net.w3[j];
                    }
                }
                let mut delta_h1 = [0.0; HIDDEN1];
                for i in 0..HIDDEN1 {
                    if z1[i] > 0.0 && mask[i] > 0.0 {
                        let upstream: f64 =
                            (0..HIDDEN2).map(|j| delta_h2[j] * net.w2[j][i]).sum();
                        delta_h1[i] = upstream * mask[i];
                    }
                }

                for j in 0..HIDDEN2 {
                    net.w3[j] -= learning_rate * delta_out * h2[j];
                }
                net.b3 -= learning_rate * delta_out;
                for j in 0..HIDDEN2 {
                    for i in 0..HIDDEN1 {
                        net.w2[j][i] -= learning_rate * delta_h2[j] * h1[i];
                    }
                    net.b2[j] -= learning_rate * delta_h2[j];
                }
                for i in 0..HIDDEN1 {
                    for k in 0..INPUT {
                        net.w1[i][k] -= learning_rate * delta_h1[i] * x[k];
                    }
                    net.b1[i] -= learning_rate * delta_h1[i];
                }
            }

            last_epoch_loss = epoch_loss / samples.len().max(1) as f64;
        }

        (net, last_epoch_loss)
    }

    pub fn save(&self, path: &Path) -> Result<(), DispatchError> {
        let bytes =
            bincode::serialize(self).map_err(|e| DispatchError::ModelIo(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| DispatchError::ModelIo(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let bytes = fs::read(path).map_err(|e| DispatchError::ModelIo(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| DispatchError::ModelIo(e.to_string()))
    }
}
