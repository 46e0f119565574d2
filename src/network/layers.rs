//! Parameters of each target operator kind.

use nnssa_shape_inference::ops;
use nnssa_shape_inference::{
    BinaryOp, Dim, InferShapes, InferShapesError, LogicalOp, ReductionOp, Shape, UnaryOp,
};
use rten_tensor::prelude::*;
use rten_tensor::Tensor;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;

use super::{LayerOp, NeuralNetwork, SubnetworkOp};

/// Implement [`LayerOp`] for a layer whose parameters serialize directly as
/// its summary.
macro_rules! impl_layer_op {
    ($layer:ty, $kind:literal, |$op:ident, $inputs:ident| $rule:expr) => {
        impl LayerOp for $layer {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn infer_shapes(&self, $inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
                let $op = self;
                $rule
            }

            fn params(&self) -> Value {
                serde_json::to_value(self).unwrap_or_default()
            }
        }
    };
}

/// Convert a tensor shape to a shape vector.
fn tensor_shape(tensor: &Tensor<f32>) -> Shape {
    tensor.shape().iter().map(|&d| d as Dim).collect()
}

/// Load a constant tensor.
#[derive(Debug)]
pub struct LoadConstantNd {
    pub value: Tensor<f32>,
}

impl LoadConstantNd {
    /// Create a constant layer. Scalars are stored as single-element
    /// vectors.
    pub fn new(value: Tensor<f32>) -> LoadConstantNd {
        let value = if value.ndim() == 0 {
            value.into_shape([1].as_slice())
        } else {
            value
        };
        LoadConstantNd { value }
    }
}

impl LayerOp for LoadConstantNd {
    fn kind(&self) -> &'static str {
        "LoadConstantNd"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        ops::LoadConstant {
            shape: &tensor_shape(&self.value),
        }
        .infer_shapes(inputs)
    }

    fn params(&self) -> Value {
        json!({ "shape": tensor_shape(&self.value) })
    }
}

#[derive(Debug, Serialize)]
pub struct Transpose {
    pub axes: Vec<usize>,
}

impl_layer_op!(Transpose, "Transpose", |op, inputs| {
    ops::Transpose { perm: &op.axes }.infer_shapes(inputs)
});

#[derive(Debug, Serialize)]
pub struct GetShape;

impl_layer_op!(GetShape, "GetShape", |_op, inputs| ops::GetShape
    .infer_shapes(inputs));

/// Allocate a tensor whose shape is the value of the input.
#[derive(Debug, Serialize)]
pub struct FillDynamic;

impl_layer_op!(FillDynamic, "FillDynamic", |_op, inputs| ops::FillDynamic
    .infer_shapes(inputs));

#[derive(Debug, Serialize)]
pub struct SliceStatic {
    pub begin_ids: Vec<i64>,
    pub end_ids: Vec<i64>,
    pub strides: Vec<i64>,
    pub begin_masks: Vec<bool>,
    pub end_masks: Vec<bool>,
}

impl SliceStatic {
    /// Create a slice with no begin or end masks.
    pub fn new(begin_ids: Vec<i64>, end_ids: Vec<i64>, strides: Vec<i64>) -> SliceStatic {
        let ndim = begin_ids.len();
        SliceStatic {
            begin_ids,
            end_ids,
            strides,
            begin_masks: vec![false; ndim],
            end_masks: vec![false; ndim],
        }
    }
}

impl_layer_op!(SliceStatic, "SliceStatic", |op, inputs| {
    ops::SliceStatic {
        begin: &op.begin_ids,
        end: &op.end_ids,
        strides: &op.strides,
        begin_masks: &op.begin_masks,
        end_masks: &op.end_masks,
    }
    .infer_shapes(inputs)
});

#[derive(Debug, Serialize)]
pub struct Squeeze {
    pub axes: Vec<i32>,
}

impl_layer_op!(Squeeze, "Squeeze", |op, inputs| {
    ops::Squeeze { axes: &op.axes }.infer_shapes(inputs)
});

#[derive(Debug, Serialize)]
pub struct ExpandDims {
    pub axes: Vec<i32>,
}

impl_layer_op!(ExpandDims, "ExpandDims", |op, inputs| {
    ops::ExpandDims { axes: &op.axes }.infer_shapes(inputs)
});

/// Range with start, end and step fixed at conversion time.
#[derive(Debug, Serialize)]
pub struct RangeStatic {
    pub start: f32,
    pub end: f32,
    pub step: f32,
}

impl_layer_op!(RangeStatic, "RangeStatic", |op, inputs| {
    ops::Range {
        params: Some((op.start, op.end, op.step)),
    }
    .infer_shapes(inputs)
});

/// Range whose end, start and step are layer inputs, in that order.
#[derive(Debug, Serialize)]
pub struct RangeDynamic;

impl_layer_op!(RangeDynamic, "RangeDynamic", |_op, inputs| {
    ops::Range { params: None }.infer_shapes(inputs)
});

/// Gather slices of the first input using indices in the second.
#[derive(Debug, Serialize)]
pub struct Gather {
    pub axis: i32,
}

impl_layer_op!(Gather, "Gather", |op, inputs| {
    ops::Gather { axis: op.axis }.infer_shapes(inputs)
});

/// Scatter slices into a container. Inputs are `[container, indices,
/// updates]`.
#[derive(Debug, Serialize)]
pub struct Scatter;

impl_layer_op!(Scatter, "Scatter", |_op, inputs| ops::Scatter.infer_shapes(inputs));

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum LogicalMode {
    LessThan,
    NotEqual,
    And,
}

/// Comparison or boolean operator producing a single flag.
#[derive(Debug, Serialize)]
pub struct Logical {
    pub mode: LogicalMode,
}

impl LayerOp for Logical {
    fn kind(&self) -> &'static str {
        match self.mode {
            LogicalMode::LessThan => "LessThan",
            LogicalMode::NotEqual => "NotEqual",
            LogicalMode::And => "LogicalAnd",
        }
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        LogicalOp.infer_shapes(inputs)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum BinaryMode {
    Add,
    Subtract,
    Multiply,
    Max,
    Min,
}

/// Elementwise binary operator with broadcasting.
#[derive(Debug, Serialize)]
pub struct Broadcastable {
    pub mode: BinaryMode,
}

impl LayerOp for Broadcastable {
    fn kind(&self) -> &'static str {
        match self.mode {
            BinaryMode::Add => "AddBroadcastable",
            BinaryMode::Subtract => "SubtractBroadcastable",
            BinaryMode::Multiply => "MultiplyBroadcastable",
            BinaryMode::Max => "MaxBroadcastable",
            BinaryMode::Min => "MinBroadcastable",
        }
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        BinaryOp.infer_shapes(inputs)
    }
}

#[derive(Debug, Serialize)]
pub struct ConcatNd {
    pub axis: i32,
}

impl_layer_op!(ConcatNd, "ConcatNd", |op, inputs| {
    ops::Concat { axis: op.axis }.infer_shapes(inputs)
});

/// Fully connected layer with a constant weight of shape
/// `[output_channels, input_channels]`.
#[derive(Debug)]
pub struct InnerProduct {
    pub weights: Tensor<f32>,
    pub bias: Option<Tensor<f32>>,
}

impl LayerOp for InnerProduct {
    fn kind(&self) -> &'static str {
        "InnerProduct"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let &[output_channels, input_channels] = self.weights.shape() else {
            return Err(InferShapesError::InvalidValue("inner product weight must be a matrix"));
        };
        ops::InnerProduct {
            input_channels,
            output_channels,
        }
        .infer_shapes(inputs)
    }

    fn params(&self) -> Value {
        json!({
            "weight_shape": tensor_shape(&self.weights),
            "has_bias": self.bias.is_some(),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum ActivationMode {
    Linear { alpha: f32, beta: f32 },
    Sigmoid,
    Relu,
    LeakyRelu { alpha: f32 },
    Tanh,
}

#[derive(Debug, Serialize)]
pub struct Activation {
    pub mode: ActivationMode,
}

impl_layer_op!(Activation, "Activation", |_op, inputs| UnaryOp
    .infer_shapes(inputs));

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum UnaryMode {
    Log,
    Rsqrt,
    Sqrt,
    Power { alpha: f32 },
}

#[derive(Debug, Serialize)]
pub struct Unary {
    pub mode: UnaryMode,
}

impl_layer_op!(Unary, "Unary", |_op, inputs| UnaryOp.infer_shapes(inputs));

/// Reverse the order of elements along the dimensions that are set in
/// `reverse_dim`.
#[derive(Debug, Serialize)]
pub struct Reverse {
    pub reverse_dim: Vec<bool>,
}

impl_layer_op!(Reverse, "Reverse", |op, inputs| {
    let [data] = inputs else {
        return Err(InferShapesError::IncorrectInputCount);
    };
    if data.len() != op.reverse_dim.len() {
        return Err(InferShapesError::IncorrectRank);
    }
    Ok([data.clone()].into())
});

/// Copy the input into the output edge.
#[derive(Debug, Serialize)]
pub struct CopyTensor;

impl_layer_op!(CopyTensor, "Copy", |_op, inputs| UnaryOp.infer_shapes(inputs));

#[derive(Debug, Serialize)]
pub struct StackNd {
    pub axis: i32,
}

impl_layer_op!(StackNd, "StackNd", |op, inputs| {
    ops::Stack { axis: op.axis }.infer_shapes(inputs)
});

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum Padding {
    Same,
    Valid,
}

/// 2D convolution with a constant kernel of shape `[height, width,
/// in_channels, out_channels]`.
///
/// There is no shape rule for this layer. Output shapes must be supplied
/// when it is created.
#[derive(Debug)]
pub struct Convolution {
    pub weights: Tensor<f32>,
    pub bias: Option<Tensor<f32>>,
    pub strides: [usize; 2],
    pub padding: Padding,
}

impl LayerOp for Convolution {
    fn kind(&self) -> &'static str {
        "Convolution"
    }

    fn infer_shapes(&self, _inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        Err(InferShapesError::NotImplemented("convolution output shape"))
    }

    fn params(&self) -> Value {
        json!({
            "kernel_shape": tensor_shape(&self.weights),
            "strides": self.strides,
            "padding": self.padding,
            "has_bias": self.bias.is_some(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReshapeStatic {
    pub target_shape: Shape,
}

impl_layer_op!(ReshapeStatic, "ReshapeStatic", |op, inputs| {
    ops::Reshape {
        shape: &op.target_shape,
    }
    .infer_shapes(inputs)
});

/// Reshape to a shape given by the value of the second input.
///
/// There is no shape rule for this layer. Output shapes must be supplied
/// when it is created.
#[derive(Debug, Serialize)]
pub struct ReshapeDynamic;

impl_layer_op!(ReshapeDynamic, "ReshapeDynamic", |_op, _inputs| {
    Err(InferShapesError::NotImplemented("reshape to a runtime shape"))
});

/// Embedding lookup with a constant table of shape `[embedding_size,
/// vocab_size]`.
#[derive(Debug)]
pub struct EmbeddingNd {
    pub vocab_size: usize,
    pub embedding_size: usize,
    pub weights: Tensor<f32>,
}

impl LayerOp for EmbeddingNd {
    fn kind(&self) -> &'static str {
        "EmbeddingNd"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        ops::Embedding {
            embedding_size: self.embedding_size,
        }
        .infer_shapes(inputs)
    }

    fn params(&self) -> Value {
        json!({
            "vocab_size": self.vocab_size,
            "embedding_size": self.embedding_size,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SoftmaxNd {
    pub axis: i32,
}

impl_layer_op!(SoftmaxNd, "SoftmaxNd", |op, inputs| {
    // The output shape is the input shape, but the axis must be valid.
    ops::ArgMax {
        axis: op.axis,
        keep_dims: true,
    }
    .infer_shapes(inputs)?;
    UnaryOp.infer_shapes(inputs)
});

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum ReduceMode {
    Sum,
    Mean,
}

#[derive(Debug, Serialize)]
pub struct Reduce {
    pub mode: ReduceMode,
    pub axes: Vec<i32>,
    pub keep_dims: bool,
    pub reduce_all: bool,
}

impl LayerOp for Reduce {
    fn kind(&self) -> &'static str {
        match self.mode {
            ReduceMode::Sum => "ReduceSum",
            ReduceMode::Mean => "ReduceMean",
        }
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        ReductionOp {
            axes: &self.axes,
            keep_dims: self.keep_dims,
            reduce_all: self.reduce_all,
        }
        .infer_shapes(inputs)
    }

    fn params(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ArgMax {
    pub axis: i32,
    pub keep_dims: bool,
}

impl_layer_op!(ArgMax, "ArgMax", |op, inputs| {
    ops::ArgMax {
        axis: op.axis,
        keep_dims: op.keep_dims,
    }
    .infer_shapes(inputs)
});

/// Split a tensor into equal parts along an axis.
#[derive(Debug, Serialize)]
pub struct SplitNd {
    pub axis: i32,
    pub num_splits: usize,
}

impl_layer_op!(SplitNd, "SplitNd", |op, inputs| {
    ops::Split {
        axis: op.axis,
        num_splits: op.num_splits,
    }
    .infer_shapes(inputs)
});

/// Batched matrix product.
///
/// With a constant `weights` matrix of shape `[rows, cols]` the layer has a
/// single input. Otherwise both operands are inputs.
#[derive(Debug, Default)]
pub struct BatchedMatMul {
    pub weights: Option<Tensor<f32>>,
    pub bias: Option<Tensor<f32>>,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl BatchedMatMul {
    fn weight_shape(&self) -> Result<Option<(usize, usize)>, InferShapesError> {
        match self.weights.as_ref().map(|w| w.shape()) {
            None => Ok(None),
            Some(&[rows, cols]) => Ok(Some((rows, cols))),
            Some(_) => Err(InferShapesError::InvalidValue(
                "matmul weight must be a matrix",
            )),
        }
    }
}

impl LayerOp for BatchedMatMul {
    fn kind(&self) -> &'static str {
        "BatchedMatMul"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        ops::BatchedMatMul {
            transpose_a: self.transpose_a,
            transpose_b: self.transpose_b,
            weight_shape: self.weight_shape()?,
        }
        .infer_shapes(inputs)
    }

    fn params(&self) -> Value {
        json!({
            "weight_shape": self.weights.as_ref().map(tensor_shape),
            "has_bias": self.bias.is_some(),
            "transpose_a": self.transpose_a,
            "transpose_b": self.transpose_b,
        })
    }
}

/// Repeatedly run `body` while the value of `condition_var`, computed by
/// `condition`, is true.
///
/// Loop-carried values are read and written by name from the enclosing
/// network, so the layer itself has no inputs or outputs.
#[derive(Debug)]
pub struct Loop {
    pub condition: NeuralNetwork,
    pub body: NeuralNetwork,
    pub condition_var: String,

    /// Upper bound on iterations. Zero means no bound.
    pub max_iterations: u64,
}

impl LayerOp for Loop {
    fn kind(&self) -> &'static str {
        "Loop"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        if !inputs.is_empty() {
            return Err(InferShapesError::IncorrectInputCount);
        }
        Ok(Vec::new())
    }

    fn params(&self) -> Value {
        json!({
            "condition_var": self.condition_var,
            "max_iterations": self.max_iterations,
        })
    }

    fn as_subnetwork_op(&self) -> Option<&dyn SubnetworkOp> {
        Some(self)
    }

    fn as_subnetwork_op_mut(&mut self) -> Option<&mut dyn SubnetworkOp> {
        Some(self)
    }
}

impl SubnetworkOp for Loop {
    fn subnetworks(&self) -> SmallVec<[&NeuralNetwork; 2]> {
        SmallVec::from_buf([&self.condition, &self.body])
    }

    fn subnetworks_mut(&mut self) -> SmallVec<[&mut NeuralNetwork; 2]> {
        SmallVec::from_buf([&mut self.condition, &mut self.body])
    }
}

/// Run `if_branch` if the predicate input is true, else `else_branch`.
#[derive(Debug)]
pub struct Branch {
    pub if_branch: NeuralNetwork,
    pub else_branch: NeuralNetwork,
}

impl LayerOp for Branch {
    fn kind(&self) -> &'static str {
        "Branch"
    }

    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [_predicate] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok(Vec::new())
    }

    fn as_subnetwork_op(&self) -> Option<&dyn SubnetworkOp> {
        Some(self)
    }

    fn as_subnetwork_op_mut(&mut self) -> Option<&mut dyn SubnetworkOp> {
        Some(self)
    }
}

impl SubnetworkOp for Branch {
    fn subnetworks(&self) -> SmallVec<[&NeuralNetwork; 2]> {
        SmallVec::from_buf([&self.if_branch, &self.else_branch])
    }

    fn subnetworks_mut(&mut self) -> SmallVec<[&mut NeuralNetwork; 2]> {
        SmallVec::from_buf([&mut self.if_branch, &mut self.else_branch])
    }
}
