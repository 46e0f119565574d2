//! Target operator networks produced by lowering.
//!
//! A [`NeuralNetwork`] is an ordered list of [`Layer`]s plus descriptors of
//! its input and output features. Each layer has a kind-specific parameter
//! object implementing [`LayerOp`], which also supplies the layer's shape
//! rule. Loop and branch layers own nested networks, exposed through
//! [`SubnetworkOp`].

use std::any::Any;
use std::fmt::Debug;

use nnssa_shape_inference::{InferShapesError, Shape};
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;

mod builder;
pub mod layers;

pub use builder::NetworkBuilder;

/// Parameters and shape rule of a target operator kind.
pub trait LayerOp: Any + Debug {
    /// Return the name of the target operator kind.
    fn kind(&self) -> &'static str;

    /// Compute the shapes of the layer's outputs from the shapes of its
    /// inputs.
    ///
    /// Kinds without a closed-form rule return
    /// [`InferShapesError::NotImplemented`] and rely on output shapes being
    /// supplied when the layer is created.
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError>;

    /// Return a JSON summary of the layer's parameters.
    fn params(&self) -> Value {
        Value::Null
    }

    /// Return the [`SubnetworkOp`] impl for layers with nested networks.
    fn as_subnetwork_op(&self) -> Option<&dyn SubnetworkOp> {
        None
    }

    fn as_subnetwork_op_mut(&mut self) -> Option<&mut dyn SubnetworkOp> {
        None
    }
}

impl dyn LayerOp {
    /// Downcast this layer's parameters to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}

/// Trait for layers which contain nested networks, such as loops and
/// branches.
pub trait SubnetworkOp: LayerOp {
    /// Return the nested networks in the order they are traversed.
    fn subnetworks(&self) -> SmallVec<[&NeuralNetwork; 2]>;

    fn subnetworks_mut(&mut self) -> SmallVec<[&mut NeuralNetwork; 2]>;
}

/// Recorded rank and dimensions of a tensor read or written by a layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TensorDesc {
    pub rank: usize,
    pub dims: Shape,
}

impl TensorDesc {
    pub fn new(shape: &[i64]) -> TensorDesc {
        TensorDesc {
            rank: shape.len(),
            dims: shape.to_vec(),
        }
    }
}

/// A target operator in a network.
#[derive(Debug)]
pub struct Layer {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub op: Box<dyn LayerOp>,

    /// Shape annotations for each input. Empty until shapes are propagated.
    pub input_tensors: Vec<TensorDesc>,

    /// Shape annotations for each output. Empty until shapes are propagated.
    pub output_tensors: Vec<TensorDesc>,

    /// Output shapes determined when the layer was emitted. These replace
    /// the layer's shape rule whenever shapes are propagated again.
    pub fixed_output_shapes: Option<Vec<Shape>>,
}

impl Layer {
    pub fn new(
        name: &str,
        op: impl LayerOp,
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Layer {
        Layer {
            name: name.to_string(),
            inputs: inputs.into_iter().map(|s| s.into()).collect(),
            outputs: outputs.into_iter().map(|s| s.into()).collect(),
            op: Box::new(op),
            input_tensors: Vec::new(),
            output_tensors: Vec::new(),
            fixed_output_shapes: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.op.kind()
    }

    /// Return the annotated output shapes, if every output is annotated.
    pub fn annotated_output_shapes(&self) -> Option<Vec<Shape>> {
        if self.output_tensors.len() != self.outputs.len() || self.outputs.is_empty() {
            return None;
        }
        Some(self.output_tensors.iter().map(|t| t.dims.clone()).collect())
    }

    fn summary(&self) -> Value {
        let mut summary = json!({
            "name": self.name,
            "kind": self.kind(),
            "inputs": self.inputs,
            "outputs": self.outputs,
            "input_shapes": self.input_tensors.iter().map(|t| &t.dims).collect::<Vec<_>>(),
            "output_shapes": self.output_tensors.iter().map(|t| &t.dims).collect::<Vec<_>>(),
        });
        let params = self.op.params();
        if !params.is_null() {
            summary["params"] = params;
        }
        if let Some(subnet_op) = self.op.as_subnetwork_op() {
            summary["subnetworks"] = subnet_op
                .subnetworks()
                .iter()
                .map(|net| net.summary_json())
                .collect();
        }
        summary
    }
}

/// Name and shape of a network input or output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeatureDesc {
    pub name: String,

    /// Shape of the feature. For outputs this is `None` until shapes have
    /// been propagated.
    pub shape: Option<Shape>,
}

impl FeatureDesc {
    pub fn new(name: &str, shape: Option<Shape>) -> FeatureDesc {
        FeatureDesc {
            name: name.to_string(),
            shape,
        }
    }
}

/// An ordered list of layers with declared input and output features.
#[derive(Debug, Default)]
pub struct NeuralNetwork {
    pub layers: Vec<Layer>,
    pub inputs: Vec<FeatureDesc>,
    pub outputs: Vec<FeatureDesc>,
}

impl NeuralNetwork {
    pub fn new() -> NeuralNetwork {
        NeuralNetwork::default()
    }

    /// Find a layer in this network by name. Nested networks are not
    /// searched.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Return the layer which writes `edge`, if any.
    pub fn producer(&self, edge: &str) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.outputs.iter().any(|o| o == edge))
    }

    /// Return the total number of layers, including those in nested
    /// networks.
    pub fn total_layers(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| {
                1 + layer
                    .op
                    .as_subnetwork_op()
                    .map(|op| op.subnetworks().iter().map(|n| n.total_layers()).sum())
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Return a JSON summary of the network's features, layers and shape
    /// annotations.
    pub fn summary_json(&self) -> Value {
        json!({
            "inputs": self.inputs,
            "outputs": self.outputs,
            "layers": self.layers.iter().map(|l| l.summary()).collect::<Vec<_>>(),
        })
    }

    fn collect_consumed(&self, consumed: &mut FxHashSet<String>) {
        for layer in &self.layers {
            consumed.extend(layer.inputs.iter().cloned());
            if let Some(subnet_op) = layer.op.as_subnetwork_op() {
                for net in subnet_op.subnetworks() {
                    net.collect_consumed(consumed);
                }
                if let Some(looped) = layer.op.downcast_ref::<layers::Loop>() {
                    consumed.insert(looped.condition_var.clone());
                }
            }
        }
    }

    fn retain_layers(&mut self, keep: &dyn Fn(&Layer) -> bool) -> usize {
        let before = self.layers.len();
        self.layers.retain(|layer| keep(layer));
        let mut removed = before - self.layers.len();
        for layer in self.layers.iter_mut() {
            if let Some(subnet_op) = layer.op.as_subnetwork_op_mut() {
                for net in subnet_op.subnetworks_mut() {
                    removed += net.retain_layers(keep);
                }
            }
        }
        removed
    }

    /// Remove constant layers whose output is not read by any layer in this
    /// network or its nested networks, and is not a network output.
    ///
    /// Returns the number of layers removed.
    pub fn remove_disconnected_constants(&mut self) -> usize {
        let mut consumed = FxHashSet::default();
        self.collect_consumed(&mut consumed);
        consumed.extend(self.outputs.iter().map(|o| o.name.clone()));

        self.retain_layers(&|layer| {
            layer.op.downcast_ref::<layers::LoadConstantNd>().is_none()
                || layer.outputs.iter().any(|o| consumed.contains(o))
        })
    }
}
