//! Layers.
//!
//! A [`Layer`] is one differentiable unit of a sequential
//! [`Network`](crate::network::Network): it computes its output from its
//! input, caches whatever its own backward pass needs, and (for parameterized
//! layers) accumulates parameter gradients that a bound
//! [`UpdateRule`](crate::optimizer::UpdateRule) later turns into updates.

use crate::{
    init::{random_weights, InitScheme},
    optimizer::{Optimizer, UpdateRule},
};
use anyhow::{ensure, Result};
use ndarray::{Array2, Axis, Zip};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A trait for layers of a feed-forward network.
///
/// # Contract
/// [`forward`](Layer::forward) must not mutate parameters and must cache the
/// state its own [`backward`](Layer::backward) needs. `backward` consumes the
/// cache of the most recent `forward`: calling it first is a contract
/// violation (it panics on the missing cache), and calling it twice without
/// an intervening `forward` reuses the stale cache.
pub trait Layer {
    /// Name of the layer, used in diagnostics.
    fn name(&self) -> &'static str;
    /// Computes the output for `input`.
    fn forward(&mut self, input: &Array2<f32>) -> Array2<f32>;
    /// Propagates `grad`, the loss gradient with respect to this layer's
    /// output, returning the gradient with respect to its input.
    ///
    /// Parameterized layers also store their parameter gradients as a side
    /// effect.
    fn backward(&mut self, grad: &Array2<f32>) -> Array2<f32>;
    /// Binds one fresh update rule per trainable parameter tensor.
    fn register_optimizer(&mut self, optimizer: &dyn Optimizer);
    /// Subtracts each bound rule's update from its parameter. No-op for
    /// stateless layers.
    fn step(&mut self);
}

/// Builder for creating a [`Dense`] layer.
pub struct DenseBuilder {
    inputs: usize,
    outputs: usize,
    batch_size: usize,
    use_bias: bool,
    scheme: InitScheme,
    seed: Option<u64>,
}

impl DenseBuilder {
    /// Batch size of the inputs this layer will see. Default is 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
    /// Whether to add a `(1, outputs)` bias row broadcast over the batch
    /// axis. Default is false.
    pub fn bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }
    /// Weight initialization scheme. Default is
    /// [`GlorotUniform`](InitScheme::GlorotUniform).
    pub fn init_scheme(mut self, scheme: InitScheme) -> Self {
        self.scheme = scheme;
        self
    }
    /// Seeds the weight draws for deterministic initialization. The bias
    /// stream is offset by one so it does not repeat the weight stream.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    /// Builds the layer.
    ///
    /// **Errors**
    ///
    /// If any of the batch, input, or output dimensions is zero.
    pub fn build(self) -> Result<Dense> {
        let Self {
            inputs,
            outputs,
            batch_size,
            use_bias,
            scheme,
            seed,
        } = self;
        ensure!(
            inputs > 0 && outputs > 0,
            "Dense requires nonzero input and output widths, got {}x{}",
            inputs,
            outputs,
        );
        ensure!(batch_size > 0, "Dense requires a nonzero batch size");
        let weights = random_weights(inputs, outputs, scheme, seed);
        let bias = use_bias
            .then(|| random_weights(1, outputs, scheme, seed.map(|s| s.wrapping_add(1))));
        Ok(Dense {
            output_shape: [batch_size, outputs],
            weights,
            bias,
            weights_grad: Array2::zeros((inputs, outputs)),
            bias_grad: use_bias.then(|| Array2::zeros((1, outputs))),
            input_cache: None,
            weight_rule: None,
            bias_rule: None,
        })
    }
}

/// Affine (fully-connected) layer: `y = x · W [+ b]`.
///
/// Weights are `(inputs, outputs)`; the optional bias is `(1, outputs)`,
/// broadcast over the batch axis.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dense {
    output_shape: [usize; 2],
    weights: Array2<f32>,
    bias: Option<Array2<f32>>,
    weights_grad: Array2<f32>,
    bias_grad: Option<Array2<f32>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    input_cache: Option<Array2<f32>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    weight_rule: Option<Box<dyn UpdateRule>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    bias_rule: Option<Box<dyn UpdateRule>>,
}

impl Dense {
    /// A builder for a layer mapping `inputs` features to `outputs` features.
    pub fn builder(inputs: usize, outputs: usize) -> DenseBuilder {
        DenseBuilder {
            inputs,
            outputs,
            batch_size: 1,
            use_bias: false,
            scheme: InitScheme::default(),
            seed: None,
        }
    }
    /// The `(batch_size, outputs)` shape this layer produces.
    pub fn output_shape(&self) -> [usize; 2] {
        self.output_shape
    }
    /// The weight matrix.
    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }
    /// Mutable access to the weight matrix.
    pub fn weights_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weights
    }
    /// The bias row, if enabled.
    pub fn bias(&self) -> Option<&Array2<f32>> {
        self.bias.as_ref()
    }
    /// Mutable access to the bias row, if enabled.
    pub fn bias_mut(&mut self) -> Option<&mut Array2<f32>> {
        self.bias.as_mut()
    }
    /// The weight gradient from the most recent backward pass.
    pub fn weights_grad(&self) -> &Array2<f32> {
        &self.weights_grad
    }
    /// The bias gradient from the most recent backward pass, if enabled.
    pub fn bias_grad(&self) -> Option<&Array2<f32>> {
        self.bias_grad.as_ref()
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str {
        "Dense"
    }

    fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        assert_eq!(
            input.ncols(),
            self.weights.nrows(),
            "Dense::forward: input width does not match the weight matrix",
        );
        self.input_cache = Some(input.clone());
        let mut output = input.dot(&self.weights);
        if let Some(bias) = &self.bias {
            output += bias;
        }
        output
    }

    fn backward(&mut self, grad: &Array2<f32>) -> Array2<f32> {
        let input = self
            .input_cache
            .as_ref()
            .expect("Dense::backward called before forward");
        assert_eq!(
            grad.nrows(),
            input.nrows(),
            "Dense::backward: batch size does not match the cached input",
        );
        // (inputs, batch) x (batch, outputs)
        self.weights_grad = input.t().dot(grad);
        if let Some(bias_grad) = &mut self.bias_grad {
            *bias_grad = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
        }
        // (batch, outputs) x (outputs, inputs)
        grad.dot(&self.weights.t())
    }

    fn register_optimizer(&mut self, optimizer: &dyn Optimizer) {
        self.weight_rule = Some(optimizer.bind());
        if self.bias.is_some() {
            self.bias_rule = Some(optimizer.bind());
        }
    }

    fn step(&mut self) {
        if let Some(rule) = &mut self.weight_rule {
            self.weights -= &rule.weight_update(&self.weights_grad);
        }
        if let (Some(rule), Some(bias), Some(bias_grad)) =
            (&mut self.bias_rule, &mut self.bias, &self.bias_grad)
        {
            *bias -= &rule.weight_update(bias_grad);
        }
    }
}

/// Rectified linear activation: `max(x, 0)`.
#[derive(Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Relu {
    #[cfg_attr(feature = "serde", serde(skip))]
    output: Option<Array2<f32>>,
}

impl Relu {
    /// Creates a new Relu layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Relu {
    fn name(&self) -> &'static str {
        "Relu"
    }

    fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        let output = input.mapv(|x| x.max(0.));
        self.output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad: &Array2<f32>) -> Array2<f32> {
        let output = self
            .output
            .as_ref()
            .expect("Relu::backward called before forward");
        assert_eq!(
            grad.dim(),
            output.dim(),
            "Relu::backward: gradient shape does not match the cached output",
        );
        // The mask comes from the cached post-activation output, so an input
        // of exactly zero blocks its gradient.
        Zip::from(grad)
            .and(output)
            .map_collect(|&g, &y| if y > 0. { g } else { 0. })
    }

    fn register_optimizer(&mut self, _optimizer: &dyn Optimizer) {}

    fn step(&mut self) {}
}

/// Row-wise normalized exponential.
///
/// Rows are shifted by their maximum before exponentiation so the forward
/// pass is invariant to adding a constant to a row.
///
/// # Cross-entropy pairing
/// `backward` does **not** apply the softmax Jacobian. It only divides the
/// incoming gradient by the batch size, because
/// [`CrossEntropyLoss::backward`](crate::criterion::CrossEntropyLoss::backward)
/// already produces the combined softmax + cross-entropy derivative
/// `probabilities - labels`. Pairing this layer with any other loss, or
/// stacking two softmax layers, silently yields incorrect gradients.
#[derive(Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Softmax {
    #[cfg_attr(feature = "serde", serde(skip))]
    output: Option<Array2<f32>>,
}

impl Softmax {
    /// Creates a new Softmax layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Softmax {
    fn name(&self) -> &'static str {
        "Softmax"
    }

    fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        let mut output = input.clone();
        for mut row in output.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            row.mapv_inplace(|x| (x - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|x| x / sum);
        }
        self.output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad: &Array2<f32>) -> Array2<f32> {
        let output = self
            .output
            .as_ref()
            .expect("Softmax::backward called before forward");
        assert_eq!(
            grad.nrows(),
            output.nrows(),
            "Softmax::backward: batch size does not match the cached output",
        );
        grad / grad.nrows() as f32
    }

    fn register_optimizer(&mut self, _optimizer: &dyn Optimizer) {}

    fn step(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Sgd;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_input(batch: usize, width: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((batch, width), || rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn dense_forward_applies_weights_and_bias() {
        let mut dense = Dense::builder(2, 2)
            .batch_size(2)
            .bias(true)
            .seed(0)
            .build()
            .unwrap();
        dense.weights_mut().assign(&array![[1., 0.], [0., 1.]]);
        dense.bias_mut().unwrap().assign(&array![[0.5, -0.5]]);
        let output = dense.forward(&array![[1., 2.], [3., 4.]]);
        assert_relative_eq!(output, array![[1.5, 1.5], [3.5, 3.5]]);
        assert_eq!(dense.output_shape(), [2, 2]);
    }

    #[test]
    fn dense_gradients_match_finite_differences() {
        let batch = 3;
        let inputs = 4;
        let outputs = 2;
        let mut dense = Dense::builder(inputs, outputs)
            .batch_size(batch)
            .bias(true)
            .seed(42)
            .build()
            .unwrap();
        let x = random_input(batch, inputs, 1);

        // Analytic gradients for the objective L = sum(forward(x)).
        let y = dense.forward(&x);
        let upstream = dense.backward(&Array2::ones(y.raw_dim()));

        let eps = 1e-3;
        for i in 0..inputs {
            for j in 0..outputs {
                let orig = dense.weights()[[i, j]];
                dense.weights_mut()[[i, j]] = orig + eps;
                let plus = dense.forward(&x).sum();
                dense.weights_mut()[[i, j]] = orig - eps;
                let minus = dense.forward(&x).sum();
                dense.weights_mut()[[i, j]] = orig;
                let numeric = (plus - minus) / (2. * eps);
                assert_relative_eq!(
                    dense.weights_grad()[[i, j]],
                    numeric,
                    epsilon = 1e-3,
                    max_relative = 1e-2,
                );
            }
        }
        for j in 0..outputs {
            let orig = dense.bias().unwrap()[[0, j]];
            dense.bias_mut().unwrap()[[0, j]] = orig + eps;
            let plus = dense.forward(&x).sum();
            dense.bias_mut().unwrap()[[0, j]] = orig - eps;
            let minus = dense.forward(&x).sum();
            dense.bias_mut().unwrap()[[0, j]] = orig;
            let numeric = (plus - minus) / (2. * eps);
            assert_relative_eq!(
                dense.bias_grad().unwrap()[[0, j]],
                numeric,
                epsilon = 1e-3,
                max_relative = 1e-2,
            );
        }
        for b in 0..batch {
            for i in 0..inputs {
                let mut x_plus = x.clone();
                x_plus[[b, i]] += eps;
                let plus = dense.forward(&x_plus).sum();
                let mut x_minus = x.clone();
                x_minus[[b, i]] -= eps;
                let minus = dense.forward(&x_minus).sum();
                let numeric = (plus - minus) / (2. * eps);
                assert_relative_eq!(
                    upstream[[b, i]],
                    numeric,
                    epsilon = 1e-3,
                    max_relative = 1e-2,
                );
            }
        }
    }

    #[test]
    fn dense_step_applies_bound_updates() {
        let mut dense = Dense::builder(2, 2)
            .batch_size(1)
            .bias(true)
            .seed(3)
            .build()
            .unwrap();
        dense.register_optimizer(&Sgd::new(0.5));
        let before = dense.weights().clone();
        let bias_before = dense.bias().unwrap().clone();
        dense.forward(&array![[1., -1.]]);
        dense.backward(&array![[1., 1.]]);
        let expected_weights = &before - &(dense.weights_grad() * 0.5);
        let expected_bias = &bias_before - &(dense.bias_grad().unwrap() * 0.5);
        dense.step();
        assert_relative_eq!(dense.weights(), &expected_weights);
        assert_relative_eq!(dense.bias().unwrap(), &expected_bias);
    }

    #[test]
    fn dense_rejects_zero_widths() {
        assert!(Dense::builder(0, 3).build().is_err());
        assert!(Dense::builder(3, 0).build().is_err());
        assert!(Dense::builder(3, 3).batch_size(0).build().is_err());
    }

    #[test]
    #[should_panic(expected = "input width")]
    fn dense_forward_panics_on_width_mismatch() {
        let mut dense = Dense::builder(3, 2).build().unwrap();
        dense.forward(&array![[1., 2.]]);
    }

    #[test]
    fn relu_masks_by_cached_output() {
        let mut relu = Relu::new();
        let output = relu.forward(&array![[-1., 0., 2.], [3., -0.5, 0.]]);
        assert_relative_eq!(output, array![[0., 0., 2.], [3., 0., 0.]]);
        let grad = relu.backward(&array![[1., 1., 1.], [1., 1., 1.]]);
        // An input of exactly zero blocks its gradient.
        assert_relative_eq!(grad, array![[0., 0., 1.], [1., 0., 0.]]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut softmax = Softmax::new();
        let output = softmax.forward(&random_input(5, 7, 2));
        for row in output.rows() {
            assert_relative_eq!(row.sum(), 1., epsilon = 1e-5);
        }
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let input = random_input(4, 3, 9);
        let mut softmax = Softmax::new();
        let base = softmax.forward(&input);
        let shifted = softmax.forward(&(&input + 100.));
        assert_relative_eq!(base, shifted, epsilon = 1e-5);
    }

    #[test]
    fn softmax_backward_rescales_by_batch_size() {
        let mut softmax = Softmax::new();
        softmax.forward(&random_input(4, 3, 5));
        let grad = Array2::from_elem((4, 3), 2.);
        assert_relative_eq!(softmax.backward(&grad), Array2::from_elem((4, 3), 0.5));
    }
}
