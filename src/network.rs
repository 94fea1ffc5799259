//! The sequential network container.

use crate::{layer::Layer, optimizer::Optimizer};
use ndarray::Array2;
use std::fmt;
use tracing::warn;

/// An ordered sequence of layers.
///
/// Insertion order is execution order: [`forward`](Network::forward) runs the
/// layers front to back and [`backward`](Network::backward) runs them in
/// reverse. [`register_optimizer`](Network::register_optimizer) and
/// [`step`](Network::step) fan out to every layer.
///
/// A network is not designed for concurrent use; callers must serialize
/// access or give each thread its own network and optimizer instances.
#[derive(Default)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    has_optimizer: bool,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `layer` to the end of the network.
    pub fn add(&mut self, layer: impl Layer + 'static) -> &mut Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// The number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the network has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `input` through every layer in order.
    ///
    /// An empty network is reported and yields an empty tensor.
    pub fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        if self.layers.is_empty() {
            warn!("no layers specified");
            return Array2::zeros((0, 0));
        }
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current);
        }
        current
    }

    /// Propagates the loss gradient through every layer in reverse order,
    /// leaving each layer's parameter gradients populated for
    /// [`step`](Network::step).
    ///
    /// Calling this without a registered optimizer, or on an empty network,
    /// is reported and leaves all gradients untouched.
    pub fn backward(&mut self, loss_grad: &Array2<f32>) {
        if !self.has_optimizer {
            warn!("no registered optimizer");
            return;
        }
        if self.layers.is_empty() {
            warn!("no layers specified");
            return;
        }
        let mut grad = loss_grad.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
    }

    /// Registers `optimizer` with every layer, each of which binds a fresh
    /// update rule per trainable parameter.
    pub fn register_optimizer(&mut self, optimizer: &dyn Optimizer) {
        self.has_optimizer = true;
        for layer in &mut self.layers {
            layer.register_optimizer(optimizer);
        }
    }

    /// Applies the cached gradients on every layer.
    pub fn step(&mut self) {
        for layer in &mut self.layers {
            layer.step();
        }
    }
}

/// Lists the layer names in execution order.
impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layer::{Dense, Relu},
        optimizer::Sgd,
    };
    use ndarray::array;

    #[test]
    fn empty_network_forward_is_neutral() {
        let mut net = Network::new();
        let output = net.forward(&array![[1., 2.]]);
        assert_eq!(output.dim(), (0, 0));
    }

    #[test]
    fn backward_without_optimizer_is_a_no_op() {
        let mut net = Network::new();
        net.add(Dense::builder(2, 2).seed(0).build().unwrap())
            .add(Relu::new());
        // Degraded condition: reported, but must not panic on the missing
        // forward cache because no layer is reached.
        net.backward(&array![[1., 1.]]);
    }

    #[test]
    fn forward_chains_layers_in_order() {
        let mut net = Network::new();
        let mut dense = Dense::builder(2, 2).batch_size(1).seed(1).build().unwrap();
        dense.weights_mut().assign(&array![[1., 0.], [0., 1.]]);
        net.add(dense).add(Relu::new());
        let output = net.forward(&array![[-3., 2.]]);
        assert_eq!(output, array![[0., 2.]]);
        assert_eq!(net.len(), 2);
    }

    #[test]
    fn debug_lists_layer_names_in_order() {
        let mut net = Network::new();
        net.add(Dense::builder(2, 2).seed(0).build().unwrap())
            .add(Relu::new());
        assert_eq!(format!("{:?}", net), r#"["Dense", "Relu"]"#);
    }

    #[test]
    fn training_cycle_updates_parameters() {
        let mut net = Network::new();
        net.add(
            Dense::builder(2, 2)
                .batch_size(2)
                .bias(true)
                .seed(4)
                .build()
                .unwrap(),
        );
        net.register_optimizer(&Sgd::new(0.1));
        let input = array![[1., 0.], [0., 1.]];
        let before = net.forward(&input);
        net.backward(&array![[1., 1.], [1., 1.]]);
        net.step();
        let after = net.forward(&input);
        assert_ne!(before, after);
    }
}
