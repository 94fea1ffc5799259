/*!
Feed-forward neural networks with hand-derived gradients.

A [`Network`] is a fixed, manually ordered sequence of [layers](layer):
forward propagation runs the layers in order, backward propagation runs them
in reverse, and a [criterion](criterion) between the two turns the final
output and the target labels into a scalar loss and its gradient. Each
trainable parameter is updated through its own bound
[update rule](optimizer), so optimizer state never aliases across
parameters.

All tensors are [`ndarray::Array2<f32>`] with the batch on axis 0.

# Example

Train a small classifier on a one-hot encoded batch:

```
use gradnet::{
    criterion::CrossEntropyLoss,
    layer::{Dense, Relu, Softmax},
    network::Network,
    optimizer::Sgd,
};
use ndarray::array;

# fn main() -> anyhow::Result<()> {
let input = array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]];
let labels = array![[1., 0.], [0., 1.], [0., 1.], [1., 0.]];

let mut net = Network::new();
net.add(Dense::builder(2, 4).batch_size(4).bias(true).seed(0).build()?)
    .add(Relu::new())
    .add(Dense::builder(4, 2).batch_size(4).bias(true).seed(1).build()?)
    .add(Softmax::new());
net.register_optimizer(&Sgd::new(0.1));

let criterion = CrossEntropyLoss::new();
for _ in 0..10 {
    let output = net.forward(&input);
    let _loss = criterion.loss(&output, &labels);
    let grad = criterion.backward(&output, &labels);
    net.backward(&grad);
    net.step();
}
# Ok(())
# }
```
*/

pub mod criterion;
pub mod init;
pub mod layer;
pub mod network;
pub mod optimizer;

pub use network::Network;
