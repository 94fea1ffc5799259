//! Weight initialization.
//!
//! Trainable parameters are drawn element by element from a Glorot (Xavier)
//! distribution scaled by the fan-in and fan-out of the parameter tensor.

use ndarray::Array2;
use rand::{
    distributions::{Distribution, Uniform},
    rngs::StdRng,
    SeedableRng,
};
use rand_distr::Normal;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Initialization scheme for trainable parameters.
#[derive(Default, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InitScheme {
    /// Uniform on `(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`.
    #[default]
    GlorotUniform,
    /// Normal with mean 0 and standard deviation `sqrt(2 / (fan_in + fan_out))`.
    GlorotNormal,
}

enum Dist {
    Uniform(Uniform<f32>),
    Normal(Normal<f32>),
}

/// A stream of random values for initializing one parameter tensor.
///
/// Each distribution owns its own generator, seeded from the OS by default.
/// Pass an explicit seed for deterministic draws in tests.
pub struct WeightDistribution {
    dist: Dist,
    rng: StdRng,
}

impl WeightDistribution {
    /// Creates a distribution for a parameter with the given fan-in / fan-out.
    pub fn new(scheme: InitScheme, fan_in: usize, fan_out: usize) -> Self {
        Self::from_rng(scheme, fan_in, fan_out, StdRng::from_entropy())
    }

    /// Creates a deterministic distribution seeded with `seed`.
    pub fn with_seed(scheme: InitScheme, fan_in: usize, fan_out: usize, seed: u64) -> Self {
        Self::from_rng(scheme, fan_in, fan_out, StdRng::seed_from_u64(seed))
    }

    fn from_rng(scheme: InitScheme, fan_in: usize, fan_out: usize, rng: StdRng) -> Self {
        let fan_sum = (fan_in + fan_out) as f32;
        let dist = match scheme {
            InitScheme::GlorotUniform => {
                let limit = (6. / fan_sum).sqrt();
                Dist::Uniform(Uniform::new(-limit, limit))
            }
            InitScheme::GlorotNormal => {
                let std_dev = (2. / fan_sum).sqrt();
                Dist::Normal(Normal::new(0., std_dev).expect("standard deviation is finite"))
            }
        };
        Self { dist, rng }
    }

    /// Draws the next value.
    pub fn draw(&mut self) -> f32 {
        match &self.dist {
            Dist::Uniform(dist) => dist.sample(&mut self.rng),
            Dist::Normal(dist) => dist.sample(&mut self.rng),
        }
    }
}

/// Returns a freshly initialized parameter tensor of shape `(fan_in, fan_out)`.
pub fn random_weights(
    fan_in: usize,
    fan_out: usize,
    scheme: InitScheme,
    seed: Option<u64>,
) -> Array2<f32> {
    let mut dist = match seed {
        Some(seed) => WeightDistribution::with_seed(scheme, fan_in, fan_out, seed),
        None => WeightDistribution::new(scheme, fan_in, fan_out),
    };
    Array2::from_shape_simple_fn((fan_in, fan_out), || dist.draw())
}
