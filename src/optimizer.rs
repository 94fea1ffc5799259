//! Parameter update rules.
//!
//! An [`Optimizer`] holds hyperparameters only and acts as a factory:
//! [`bind`](Optimizer::bind) creates an independent [`UpdateRule`] for each
//! trainable parameter tensor, so per-parameter state such as Adam's moment
//! estimates never aliases across parameters.

use ndarray::{Array2, Zip};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Converts an accumulated gradient into the quantity subtracted from the
/// parameter that owns this rule.
pub trait UpdateRule {
    /// Returns the update for `grad`.
    ///
    /// May mutate internal state (moment estimates, step counters). The same
    /// rule instance must always see gradients of the same shape.
    fn weight_update(&mut self, grad: &Array2<f32>) -> Array2<f32>;
}

/// A gradient-descent configuration that can be bound to parameters.
pub trait Optimizer {
    /// Creates a fresh [`UpdateRule`] for one parameter tensor.
    fn bind(&self) -> Box<dyn UpdateRule>;
}

/// Plain scaled-gradient descent.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    /// Creates an SGD configuration with the given learning rate.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn bind(&self) -> Box<dyn UpdateRule> {
        Box::new(SgdRule {
            learning_rate: self.learning_rate,
        })
    }
}

struct SgdRule {
    learning_rate: f32,
}

impl UpdateRule for SgdRule {
    fn weight_update(&mut self, grad: &Array2<f32>) -> Array2<f32> {
        grad * self.learning_rate
    }
}

/// Adaptive moment estimation (Adam).
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
}

impl Adam {
    /// Creates an Adam configuration with the default decay coefficients
    /// (`beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`).
    pub fn new(learning_rate: f32) -> Self {
        Self::builder(learning_rate).build()
    }

    /// An Adam builder for overriding the decay coefficients.
    pub fn builder(learning_rate: f32) -> AdamBuilder {
        AdamBuilder {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl Optimizer for Adam {
    fn bind(&self) -> Box<dyn UpdateRule> {
        Box::new(AdamRule {
            config: *self,
            first_moment: None,
            second_moment: None,
            timestep: 1,
        })
    }
}

/// Builder for creating an [`Adam`] configuration.
pub struct AdamBuilder {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
}

impl AdamBuilder {
    /// Decay coefficient of the first moment estimate. Default is 0.9.
    pub fn beta1(mut self, beta1: f32) -> Self {
        self.beta1 = beta1;
        self
    }
    /// Decay coefficient of the second moment estimate. Default is 0.999.
    pub fn beta2(mut self, beta2: f32) -> Self {
        self.beta2 = beta2;
        self
    }
    /// Numerical stability term added to the denominator. Default is 1e-8.
    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
    /// Builds the configuration.
    pub fn build(self) -> Adam {
        let Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self;
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        }
    }
}

struct AdamRule {
    config: Adam,
    first_moment: Option<Array2<f32>>,
    second_moment: Option<Array2<f32>>,
    timestep: i32,
}

impl UpdateRule for AdamRule {
    fn weight_update(&mut self, grad: &Array2<f32>) -> Array2<f32> {
        let Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        // Moments are allocated lazily at the shape of the first gradient and
        // persist for the lifetime of the bound parameter.
        let first = self
            .first_moment
            .get_or_insert_with(|| Array2::zeros(grad.raw_dim()));
        let second = self
            .second_moment
            .get_or_insert_with(|| Array2::zeros(grad.raw_dim()));

        first.zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1. - beta1) * g);
        second.zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1. - beta2) * g * g);

        let correction1 = 1. - beta1.powi(self.timestep);
        let correction2 = 1. - beta2.powi(self.timestep);
        self.timestep += 1;

        Zip::from(&*first).and(&*second).map_collect(|&m, &v| {
            let first_hat = m / correction1;
            let second_hat = v / correction2;
            first_hat * learning_rate / (second_hat.sqrt() + epsilon)
        })
    }
}
