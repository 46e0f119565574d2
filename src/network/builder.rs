use nnssa_shape_inference::Shape;

use super::{FeatureDesc, Layer, LayerOp, NeuralNetwork};

/// Accumulates the layers of a network as they are emitted.
///
/// One builder exists for each function that is being lowered. Builders for
/// loop and branch subgraphs are finished into networks that are then owned
/// by the control-flow layer in the enclosing network.
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    network: NeuralNetwork,
}

impl NetworkBuilder {
    pub fn new() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    /// Create a builder with declared input and output features.
    pub fn with_features(inputs: &[(&str, Shape)], outputs: &[&str]) -> NetworkBuilder {
        let mut builder = NetworkBuilder::new();
        for (name, shape) in inputs {
            builder.add_input(name, shape.clone());
        }
        for name in outputs {
            builder.add_output(name);
        }
        builder
    }

    pub fn add_input(&mut self, name: &str, shape: Shape) {
        self.network
            .inputs
            .push(FeatureDesc::new(name, Some(shape)));
    }

    /// Declare an output. Its shape is filled in when shapes are propagated.
    pub fn add_output(&mut self, name: &str) {
        self.network.outputs.push(FeatureDesc::new(name, None));
    }

    /// Append a layer and return a reference to it.
    pub fn add_layer(
        &mut self,
        name: &str,
        op: impl LayerOp,
        inputs: &[&str],
        outputs: &[&str],
    ) -> &mut Layer {
        self.push_layer(Layer::new(name, op, inputs.iter().copied(), outputs.iter().copied()))
    }

    /// Append a layer whose parameters have already been boxed.
    pub fn add_boxed_layer(
        &mut self,
        name: &str,
        op: Box<dyn LayerOp>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> &mut Layer {
        self.push_layer(Layer {
            name: name.to_string(),
            inputs,
            outputs,
            op,
            input_tensors: Vec::new(),
            output_tensors: Vec::new(),
            fixed_output_shapes: None,
        })
    }

    fn push_layer(&mut self, layer: Layer) -> &mut Layer {
        self.network.layers.push(layer);
        let idx = self.network.layers.len() - 1;
        &mut self.network.layers[idx]
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub(crate) fn network_mut(&mut self) -> &mut NeuralNetwork {
        &mut self.network
    }

    /// Consume the builder and return the network.
    pub fn finish(self) -> NeuralNetwork {
        self.network
    }
}

#[cfg(test)]
mod tests {
    use super::NetworkBuilder;
    use crate::network::layers::{GetShape, Squeeze};

    #[test]
    fn test_network_builder() {
        let mut builder = NetworkBuilder::with_features(&[("x", vec![1, 4])], &["s"]);
        let layer = builder.add_layer("sq", Squeeze { axes: vec![0] }, &["x"], &["sq"]);
        assert_eq!(layer.kind(), "Squeeze");
        builder.add_layer("s", GetShape, &["sq"], &["s"]);

        let net = builder.finish();
        assert_eq!(net.layers.len(), 2);
        assert_eq!(net.inputs[0].shape, Some(vec![1, 4]));
        assert_eq!(net.outputs[0].name, "s");
        assert_eq!(net.outputs[0].shape, None);
        assert_eq!(net.producer("sq").map(|l| l.name.as_str()), Some("sq"));
    }
}
