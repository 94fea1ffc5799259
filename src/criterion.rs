//! Loss functions.
//!
//! Each loss takes `(predictions, labels)` of identical `(batch, features)`
//! shape and exposes a scalar [`loss`](CrossEntropyLoss::loss) plus a
//! [`backward`](CrossEntropyLoss::backward) gradient with respect to the
//! predictions. Shape disagreement between predictions and labels is a
//! contract violation and panics.

use ndarray::{Array2, ArrayView1, Zip};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Categorical cross-entropy over probability rows.
///
/// `backward` returns `predictions - labels`: the combined derivative of
/// softmax followed by cross-entropy. It therefore assumes the predictions
/// already form a probability distribution, i.e. that the network ends in a
/// [`Softmax`](crate::layer::Softmax) layer (see the pairing note there).
#[derive(Default, Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossEntropyLoss;

/// Added to every probability before the log to avoid `ln(0)`.
const STABILIZER: f32 = 1e-4;

impl CrossEntropyLoss {
    /// Creates a new cross-entropy loss.
    pub fn new() -> Self {
        Self
    }

    /// Mean negative log-likelihood over the batch.
    pub fn loss(&self, probabilities: &Array2<f32>, labels: &Array2<f32>) -> f32 {
        assert_eq!(
            probabilities.dim(),
            labels.dim(),
            "CrossEntropyLoss::loss: prediction and label shapes do not match",
        );
        let batch_size = probabilities.nrows() as f32;
        let summed = (labels * &probabilities.mapv(|p| (p + STABILIZER).ln())).sum();
        -summed / batch_size
    }

    /// Fraction of rows whose arg-max column matches between predictions and
    /// labels.
    pub fn accuracy(&self, probabilities: &Array2<f32>, labels: &Array2<f32>) -> f32 {
        assert_eq!(
            probabilities.dim(),
            labels.dim(),
            "CrossEntropyLoss::accuracy: prediction and label shapes do not match",
        );
        let correct = probabilities
            .outer_iter()
            .zip(labels.outer_iter())
            .filter(|(prediction, label)| argmax(prediction.view()) == argmax(label.view()))
            .count();
        correct as f32 / probabilities.nrows() as f32
    }

    /// Gradient of the loss with respect to the predictions.
    pub fn backward(&self, probabilities: &Array2<f32>, labels: &Array2<f32>) -> Array2<f32> {
        assert_eq!(
            probabilities.dim(),
            labels.dim(),
            "CrossEntropyLoss::backward: prediction and label shapes do not match",
        );
        probabilities - labels
    }
}

fn argmax(row: ArrayView1<f32>) -> usize {
    let mut max = f32::NEG_INFINITY;
    let mut max_index = 0;
    for (i, &x) in row.iter().enumerate() {
        if x > max {
            max = x;
            max_index = i;
        }
    }
    max_index
}

/// Mean squared error.
///
/// `backward` returns the raw error `predictions - labels`, unscaled by 2 or
/// by the batch size; callers comparing against the analytic derivative must
/// account for this.
#[derive(Default, Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeanSquaredError;

impl MeanSquaredError {
    /// Creates a new mean-squared-error loss.
    pub fn new() -> Self {
        Self
    }

    /// Sum of squared errors divided by the batch size.
    pub fn loss(&self, predictions: &Array2<f32>, labels: &Array2<f32>) -> f32 {
        assert_eq!(
            predictions.dim(),
            labels.dim(),
            "MeanSquaredError::loss: prediction and label shapes do not match",
        );
        let batch_size = predictions.nrows() as f32;
        (predictions - labels).mapv(|e| e * e).sum() / batch_size
    }

    /// Gradient of the loss with respect to the predictions.
    pub fn backward(&self, predictions: &Array2<f32>, labels: &Array2<f32>) -> Array2<f32> {
        assert_eq!(
            predictions.dim(),
            labels.dim(),
            "MeanSquaredError::backward: prediction and label shapes do not match",
        );
        predictions - labels
    }
}

/// Robust (Huber) loss.
///
/// Per element, errors within the threshold contribute the quadratic
/// `0.5 * e^2`; larger errors contribute the linear
/// `threshold * |e| - 0.5 * threshold^2`. The branch taken per element is
/// cached by [`loss`](HuberLoss::loss) and reused by
/// [`backward`](HuberLoss::backward), which must therefore run on the same
/// inputs as the most recent `loss` call.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HuberLoss {
    threshold: f32,
    #[cfg_attr(feature = "serde", serde(skip))]
    quadratic_mask: Option<Array2<bool>>,
}

impl Default for HuberLoss {
    fn default() -> Self {
        Self::new(1.)
    }
}

impl HuberLoss {
    /// Creates a Huber loss with the given branch threshold.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            quadratic_mask: None,
        }
    }

    /// Mean per-element Huber value over all elements.
    pub fn loss(&mut self, predictions: &Array2<f32>, labels: &Array2<f32>) -> f32 {
        assert_eq!(
            predictions.dim(),
            labels.dim(),
            "HuberLoss::loss: prediction and label shapes do not match",
        );
        let threshold = self.threshold;
        let error = predictions - labels;
        let mask = error.mapv(|e| e.abs() <= threshold);
        let per_element = Zip::from(&error).and(&mask).map_collect(|&e, &quadratic| {
            if quadratic {
                0.5 * e * e
            } else {
                threshold * e.abs() - 0.5 * threshold * threshold
            }
        });
        self.quadratic_mask = Some(mask);
        per_element.sum() / per_element.len() as f32
    }

    /// Gradient of the loss with respect to the predictions, using the branch
    /// mask cached by the most recent [`loss`](Self::loss) call.
    pub fn backward(&self, predictions: &Array2<f32>, labels: &Array2<f32>) -> Array2<f32> {
        let mask = self
            .quadratic_mask
            .as_ref()
            .expect("HuberLoss::backward called before loss");
        let threshold = self.threshold;
        let error = predictions - labels;
        assert_eq!(
            error.dim(),
            mask.dim(),
            "HuberLoss::backward: shapes do not match the cached branch mask",
        );
        Zip::from(&error).and(mask).map_collect(|&e, &quadratic| {
            if quadratic {
                e
            } else if e >= 0. {
                threshold
            } else {
                -threshold
            }
        })
    }
}
