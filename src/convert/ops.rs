//! Lowering routines for dataflow operators and tuple bookkeeping nodes.

use nnssa_shape_inference::{is_static_shape, Shape};
use rten_tensor::prelude::*;
use rten_tensor::Tensor;

use super::ConversionContext;
use crate::error::{convert_error, ConvertError, ConvertErrorImpl};
use crate::network::layers::{
    Activation, ActivationMode, ArgMax, BatchedMatMul, BinaryMode, Broadcastable, ConcatNd,
    Convolution, EmbeddingNd, ExpandDims, FillDynamic, Gather, GetShape, InnerProduct,
    LoadConstantNd, Logical, LogicalMode, Padding, RangeDynamic, RangeStatic, Reduce, ReduceMode,
    ReshapeDynamic, ReshapeStatic, Reverse, Scatter, SliceStatic, SoftmaxNd, SplitNd, Squeeze,
    StackNd, Transpose, Unary, UnaryMode,
};
use crate::ssa::{AttrValue, SsaNode};

const NO_INPUTS: [&str; 0] = [];

fn unsupported(node: &SsaNode) -> ConvertError {
    ConvertErrorImpl::UnsupportedOperator {
        name: node.name.clone(),
        op_type: node.op.clone(),
    }
    .into()
}

/// Check that a node has exactly `N` resolved inputs.
fn fixed_inputs<const N: usize>(
    node: &SsaNode,
    inputs: Vec<String>,
) -> Result<[String; N], ConvertError> {
    inputs.try_into().map_err(|inputs: Vec<String>| {
        convert_error!(
            UnresolvedInput,
            node.name,
            "expected {} inputs but found {}",
            N,
            inputs.len()
        )
    })
}

fn first_input<'i>(node: &SsaNode, inputs: &'i [String]) -> Result<&'i str, ConvertError> {
    inputs
        .first()
        .map(|s| s.as_str())
        .ok_or_else(|| convert_error!(UnresolvedInput, node.name, "node has no inputs"))
}

/// Return the statically known value of the node's `index`-th input.
fn const_input<'a>(
    ctx: &ConversionContext<'a>,
    node: &SsaNode,
    index: usize,
) -> Option<&'a Tensor<f32>> {
    node.inputs.get(index).and_then(|input| ctx.constant(input))
}

fn tensor_ints(tensor: &Tensor<f32>) -> Vec<i64> {
    tensor.iter().map(|&x| x as i64).collect()
}

/// Return the value of a single-element tensor.
fn scalar_value(tensor: &Tensor<f32>) -> Option<f32> {
    let mut values = tensor.iter();
    match (values.next(), values.next()) {
        (Some(&value), None) => Some(value),
        _ => None,
    }
}

fn to_i32(node: &SsaNode, values: Vec<i64>) -> Result<Vec<i32>, ConvertError> {
    values
        .into_iter()
        .map(|value| {
            i32::try_from(value).map_err(|_| {
                convert_error!(InvalidAttribute, node.name, "axis {} is out of range", value)
            })
        })
        .collect()
}

fn bool_attr(node: &SsaNode, name: &'static str) -> Result<bool, ConvertError> {
    Ok(node
        .attrs()
        .get(name)
        .map(|attr| attr.as_bool())
        .transpose()?
        .unwrap_or(false))
}

fn tensor_attr<'n>(
    node: &'n SsaNode,
    name: &'static str,
) -> Result<Option<&'n Tensor<f32>>, ConvertError> {
    node.attrs().get(name).map(|attr| attr.as_tensor()).transpose()
}

/// Return the output shapes recorded by the framework which produced the
/// program, if any.
fn output_shapes(node: &SsaNode) -> Result<Option<Vec<Shape>>, ConvertError> {
    let Some(attr) = node.attrs().get("_output_shapes") else {
        return Ok(None);
    };
    match attr.value() {
        AttrValue::Ints(ints) if ints.is_empty() => Ok(None),
        _ => Ok(Some(attr.as_int_lists()?.to_vec())),
    }
}

/// Axes for reductions, from the `reduction_indices` attribute or a constant
/// second input.
fn reduction_axes(ctx: &ConversionContext, node: &SsaNode) -> Result<Vec<i32>, ConvertError> {
    if let Some(attr) = node.attrs().get("reduction_indices") {
        return attr.as_i32_ints();
    }
    let Some(axes) = const_input(ctx, node, 1) else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "reduction axes are not known statically"
        ));
    };
    to_i32(node, tensor_ints(axes))
}

pub fn skip(_ctx: &mut ConversionContext, _node: &SsaNode) -> Result<(), ConvertError> {
    Ok(())
}

pub fn lower_const(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let Some(value) = node.value.clone() else {
        return Err(convert_error!(
            UnresolvedInput,
            node.name,
            "constant node has no value"
        ));
    };
    ctx.emit(
        &node.name,
        LoadConstantNd::new(value),
        NO_INPUTS,
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_make_tuple(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    ctx.bind(&node.name, inputs)
}

pub fn lower_get_tuple(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let index = node.attrs().require("index")?.as_usize()?;
    let inputs = ctx.resolve_inputs(node)?;
    let Some(edge) = inputs.get(index) else {
        return Err(convert_error!(
            UnresolvedInput,
            node.name,
            "tuple index {} is out of range for {} elements",
            index,
            inputs.len()
        ));
    };
    ctx.bind(&node.name, vec![edge.clone()])
}

pub fn lower_transpose(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;

    let perm = if node.inputs.len() > 1 {
        const_input(ctx, node, 1).map(tensor_ints)
    } else {
        node.attrs().get("dim").map(|attr| attr.as_ints()).transpose()?
    };
    let Some(perm) = perm else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "transpose permutation is not known statically"
        ));
    };
    let axes = perm
        .into_iter()
        .map(|axis| {
            usize::try_from(axis).map_err(|_| {
                convert_error!(
                    InvalidAttribute,
                    node.name,
                    "invalid permutation axis {}",
                    axis
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    ctx.emit(&node.name, Transpose { axes }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_shape(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let [data] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    ctx.emit(&node.name, GetShape, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_strided_slice(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let attrs = node.attrs();
    let Some(slices) = attrs.get("slice") else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "slice bounds are not known statically"
        ));
    };

    let (mut begin, mut end, mut strides) = (Vec::new(), Vec::new(), Vec::new());
    for slice in slices.as_int_lists()? {
        let &[b, e, s] = slice.as_slice() else {
            return Err(convert_error!(
                InvalidAttribute,
                node.name,
                "slice {:?} is not a [begin, end, stride] triple",
                slice
            ));
        };
        begin.push(b);
        end.push(e);
        strides.push(s);
    }

    let mut squeeze_axes = attrs
        .get("squeeze")
        .map(|attr| attr.as_i32_ints())
        .transpose()?
        .filter(|axes| !axes.is_empty());
    if let Some(axes) = &squeeze_axes {
        let out_shapes = output_shapes(node)?;
        let Some(out_shape) = out_shapes.as_ref().and_then(|shapes| shapes.first()) else {
            return Err(convert_error!(
                InvalidAttribute,
                node.name,
                "unable to determine output shape of slice with squeeze"
            ));
        };
        // Scalars are represented as single-element vectors, so squeezing a
        // single axis to produce one is a no-op.
        if out_shape.is_empty() && axes.len() == 1 {
            squeeze_axes = None;
        }
    }

    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let slice_output = if squeeze_axes.is_some() {
        format!("{}_slice_", node.name)
    } else {
        node.name.clone()
    };

    ctx.emit(
        &slice_output,
        SliceStatic::new(begin, end, strides),
        [data],
        [slice_output.as_str()],
    )?;

    if let Some(axes) = squeeze_axes {
        ctx.emit(
            &node.name,
            Squeeze { axes },
            [slice_output.as_str()],
            [node.name.as_str()],
        )?;
    }
    Ok(())
}

pub fn lower_range(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let [start, limit, delta] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;

    let params: Option<Vec<f32>> = (0..3)
        .map(|i| const_input(ctx, node, i).and_then(scalar_value))
        .collect();

    match params.as_deref() {
        Some(&[start_value, end, step]) => {
            ctx.emit(
                &node.name,
                RangeStatic {
                    start: start_value,
                    end,
                    step,
                },
                NO_INPUTS,
                [node.name.as_str()],
            )?;
        }
        _ => {
            ctx.emit(
                &node.name,
                RangeDynamic,
                [limit, start, delta],
                [node.name.as_str()],
            )?;
        }
    }
    Ok(())
}

pub fn lower_tensor_array(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let [size] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    let attrs = node.attrs();
    let element_shape = attrs.require("element_shape")?.as_ints()?;

    if let Some(array_size) = attrs.get("size").map(|attr| attr.as_usize()).transpose()? {
        let mut shape = vec![array_size];
        for &dim in &element_shape {
            let dim = usize::try_from(dim).map_err(|_| {
                convert_error!(
                    InvalidAttribute,
                    node.name,
                    "element shape {:?} is not static",
                    element_shape
                )
            })?;
            shape.push(dim);
        }
        ctx.emit(
            &node.name,
            LoadConstantNd::new(Tensor::zeros(&shape)),
            NO_INPUTS,
            [node.name.as_str()],
        )?;
        return Ok(());
    }

    // The array length is only known at runtime. Build the array shape from
    // the length and the element shape, then allocate it.
    let element_shape_name = format!("{}__element_shape", node.name);
    let element_shape_value = Tensor::from_data(
        &[element_shape.len()],
        element_shape.iter().map(|&dim| dim as f32).collect::<Vec<_>>(),
    );
    ctx.emit(
        &element_shape_name,
        LoadConstantNd::new(element_shape_value),
        NO_INPUTS,
        [element_shape_name.as_str()],
    )?;

    let array_shape_name = format!("{}__arr_shape", node.name);
    ctx.emit(
        &array_shape_name,
        ConcatNd { axis: 0 },
        [size.as_str(), element_shape_name.as_str()],
        [array_shape_name.as_str()],
    )?;

    ctx.emit(
        &node.name,
        FillDynamic,
        [array_shape_name.as_str()],
        [node.name.as_str()],
    )?;

    let mut shape = ctx.shape(&node.name).cloned().unwrap_or_default();
    let offset = shape.len().saturating_sub(element_shape.len());
    for (dim, &value) in shape[offset..].iter_mut().zip(&element_shape) {
        *dim = value;
    }
    ctx.overwrite_shape(&node.name, shape);
    Ok(())
}

pub fn lower_tensor_array_scatter(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let [indices, value, array] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    ctx.emit(
        &node.name,
        Scatter,
        [array, indices, value],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_tensor_array_read(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let [index, array] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    let slice_name = format!("{}_slice_", node.name);
    ctx.emit(
        &format!("{}_gather_", node.name),
        Gather { axis: 0 },
        [array, index],
        [slice_name.as_str()],
    )?;
    ctx.emit(
        &format!("{}_squeeze_", node.name),
        Squeeze { axes: vec![0] },
        [slice_name.as_str()],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_tensor_array_write(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let [index, value, array] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    let expanded = format!("{}_expanded", value);
    ctx.emit(
        &expanded,
        ExpandDims { axes: vec![0] },
        [value.as_str()],
        [expanded.as_str()],
    )?;
    ctx.emit(
        &node.name,
        Scatter,
        [array.as_str(), index.as_str(), expanded.as_str()],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_tensor_array_size(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let [array] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    let full_shape = format!("{}_full_shape", node.name);
    ctx.emit(&full_shape, GetShape, [array], [full_shape.as_str()])?;
    ctx.emit(
        &node.name,
        SliceStatic::new(vec![0], vec![1], vec![1]),
        [full_shape.as_str()],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_tensor_array_gather(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let [indices, array] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    ctx.emit(
        &node.name,
        Gather { axis: 0 },
        [array, indices],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_logical(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let mode = match node.op.as_str() {
        "Less" => LogicalMode::LessThan,
        "NotEqual" => LogicalMode::NotEqual,
        "LogicalAnd" => LogicalMode::And,
        _ => return Err(unsupported(node)),
    };
    let inputs: [String; 2] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    ctx.emit(&node.name, Logical { mode }, inputs, [node.name.as_str()])?;
    Ok(())
}

pub fn lower_binary(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let mode = match node.op.as_str() {
        "Add" | "BiasAdd" => BinaryMode::Add,
        "Sub" => BinaryMode::Subtract,
        "Mul" => BinaryMode::Multiply,
        "Maximum" => BinaryMode::Max,
        "Minimum" => BinaryMode::Min,
        _ => return Err(unsupported(node)),
    };
    let inputs: [String; 2] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    ctx.emit(&node.name, Broadcastable { mode }, inputs, [node.name.as_str()])?;
    Ok(())
}

pub fn lower_squared_difference(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let inputs: [String; 2] = fixed_inputs(node, ctx.resolve_inputs(node)?)?;
    let difference = format!("{}_sub_", node.name);
    ctx.emit(
        &difference,
        Broadcastable {
            mode: BinaryMode::Subtract,
        },
        inputs,
        [difference.as_str()],
    )?;
    ctx.emit(
        &node.name,
        Unary {
            mode: UnaryMode::Power { alpha: 2.0 },
        },
        [difference.as_str()],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_unary(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let mode = match node.op.as_str() {
        "Log" => UnaryMode::Log,
        "Rsqrt" => UnaryMode::Rsqrt,
        "Sqrt" => UnaryMode::Sqrt,
        _ => return Err(unsupported(node)),
    };
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    ctx.emit(&node.name, Unary { mode }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_pow(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let Some(alpha) = const_input(ctx, node, 1).and_then(|t| t.iter().next().copied()) else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "exponent is not known statically"
        ));
    };
    ctx.emit(
        &node.name,
        Unary {
            mode: UnaryMode::Power { alpha },
        },
        [data],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_activation(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let mode = match node.op.as_str() {
        "Sigmoid" => ActivationMode::Sigmoid,
        "Relu" => ActivationMode::Relu,
        "LeakyRelu" => ActivationMode::LeakyRelu {
            alpha: node.attrs().require("alpha")?.as_f32()?,
        },
        "Tanh" => ActivationMode::Tanh,
        "Identity" | "Cast" => ActivationMode::Linear {
            alpha: 1.0,
            beta: 0.0,
        },
        _ => return Err(unsupported(node)),
    };
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    ctx.emit(&node.name, Activation { mode }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_softmax(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let axis = node
        .attrs()
        .get("axis")
        .map(|attr| attr.as_i32())
        .transpose()?
        .unwrap_or(-1);
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    ctx.emit(&node.name, SoftmaxNd { axis }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_concat(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;

    // The last input is always the axis. An `axis` attribute, if present,
    // supplies its value.
    let data = match inputs.split_last() {
        Some((_axis, data)) if !data.is_empty() => data,
        _ => {
            return Err(convert_error!(
                UnresolvedInput,
                node.name,
                "nothing to concatenate"
            ));
        }
    };
    let axis = match node.attrs().get("axis") {
        Some(attr) => attr.as_i32()?,
        None => {
            let axis = node
                .inputs
                .last()
                .and_then(|input| ctx.constant(input))
                .and_then(scalar_value);
            let Some(axis) = axis else {
                return Err(convert_error!(
                    NotImplemented,
                    node.name,
                    "concatenation axis is not known statically"
                ));
            };
            axis as i32
        }
    };

    ctx.emit(&node.name, ConcatNd { axis }, data, [node.name.as_str()])?;
    Ok(())
}

pub fn lower_matmul(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let transpose_a = bool_attr(node, "transpose_a")? || bool_attr(node, "adj_x")?;
    let transpose_b = bool_attr(node, "transpose_b")? || bool_attr(node, "adj_y")?;
    let bias = tensor_attr(node, "bias")?.cloned();

    let (weights, data) = match inputs.len() {
        1 => {
            let weights = match tensor_attr(node, "W")? {
                Some(weights) => Some(weights),
                None => tensor_attr(node, "W_const")?,
            };
            let Some(weights) = weights else {
                return Err(convert_error!(
                    NotImplemented,
                    node.name,
                    "matrix product with one input and no weights"
                ));
            };
            (Some(weights.clone()), &inputs[..1])
        }
        2 => match const_input(ctx, node, 1) {
            Some(weights) => (Some(weights.clone()), &inputs[..1]),
            None => (None, &inputs[..]),
        },
        n => {
            return Err(convert_error!(
                UnresolvedInput,
                node.name,
                "expected 1 or 2 inputs but found {}",
                n
            ));
        }
    };

    let weights = match weights {
        Some(weights) if weights.ndim() != 2 => {
            return Err(convert_error!(
                InvalidAttribute,
                node.name,
                "weight has shape {:?}, expected a matrix",
                weights.shape()
            ));
        }
        // Constant weights are stored as `[input_channels, output_channels]`.
        Some(weights) if transpose_b => Some(weights.transposed().to_tensor()),
        weights => weights,
    };

    let op = BatchedMatMul {
        transpose_a,
        transpose_b: transpose_b && weights.is_none(),
        weights,
        bias,
    };
    ctx.emit(&node.name, op, data, [node.name.as_str()])?;
    Ok(())
}

pub fn lower_inner_product(
    ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let weights = node.attrs().require("W")?.as_tensor()?.clone();
    let bias = tensor_attr(node, "bias")?.cloned();
    ctx.emit(
        &node.name,
        InnerProduct { weights, bias },
        [data],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_conv2d(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let attrs = node.attrs();

    let weights = if inputs.len() == 1 {
        match tensor_attr(node, "W")? {
            Some(weights) => Some(weights),
            None => tensor_attr(node, "W_const")?,
        }
    } else {
        const_input(ctx, node, 1)
    };
    let Some(weights) = weights else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "convolution weights are not known statically"
        ));
    };
    if weights.ndim() != 4 {
        return Err(convert_error!(
            InvalidAttribute,
            node.name,
            "convolution weight has shape {:?}, expected rank 4",
            weights.shape()
        ));
    }

    let data_format = attrs
        .get("data_format")
        .map(|attr| attr.as_str())
        .transpose()?
        .unwrap_or("NHWC");
    let strides = attrs
        .get("strides")
        .map(|attr| attr.as_ints())
        .transpose()?
        .unwrap_or_else(|| vec![1; 4]);
    let &[_, s1, s2, s3] = strides.as_slice() else {
        return Err(convert_error!(
            InvalidAttribute,
            node.name,
            "expected 4 strides but found {:?}",
            strides
        ));
    };
    let (stride_h, stride_w) = if data_format == "NHWC" {
        (s1, s2)
    } else {
        (s2, s3)
    };
    let to_stride = |stride: i64| {
        usize::try_from(stride).ok().filter(|&s| s > 0).ok_or_else(|| {
            convert_error!(InvalidAttribute, node.name, "invalid stride {}", stride)
        })
    };
    let strides = [to_stride(stride_h)?, to_stride(stride_w)?];

    let padding = match attrs.require("padding")?.as_str()?.to_ascii_uppercase().as_str() {
        "SAME" => Padding::Same,
        "VALID" => Padding::Valid,
        other => {
            return Err(convert_error!(
                InvalidAttribute,
                node.name,
                "unsupported padding \"{}\"",
                other
            ));
        }
    };

    let op = Convolution {
        weights: weights.clone(),
        bias: tensor_attr(node, "bias")?.cloned(),
        strides,
        padding,
    };
    let out_shapes = output_shapes(node)?;
    ctx.emit_with_shapes(
        &node.name,
        op,
        [data],
        [node.name.as_str()],
        out_shapes.as_deref(),
    )?;
    Ok(())
}

pub fn lower_reshape(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let out_shapes = output_shapes(node)?;

    match out_shapes.as_ref().and_then(|shapes| shapes.first()) {
        Some(shape) if is_static_shape(shape) => {
            let target_shape = shape.clone();
            ctx.emit(
                &node.name,
                ReshapeStatic { target_shape },
                [data],
                [node.name.as_str()],
            )?;
        }
        _ => {
            ctx.emit_with_shapes(
                &node.name,
                ReshapeDynamic,
                &inputs,
                [node.name.as_str()],
                out_shapes.as_deref(),
            )?;
        }
    }
    Ok(())
}

pub fn lower_reduce(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let mode = match node.op.as_str() {
        "Sum" => ReduceMode::Sum,
        "Mean" => ReduceMode::Mean,
        _ => return Err(unsupported(node)),
    };
    let axes = reduction_axes(ctx, node)?;
    let keep_dims = bool_attr(node, "keep_dims")?;
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    ctx.emit(
        &node.name,
        Reduce {
            mode,
            axes,
            keep_dims,
            reduce_all: false,
        },
        [data],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_argmax(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let Some(&axis) = reduction_axes(ctx, node)?.first() else {
        return Err(convert_error!(
            InvalidAttribute,
            node.name,
            "no reduction axis"
        ));
    };
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    ctx.emit(
        &node.name,
        ArgMax {
            axis,
            keep_dims: false,
        },
        [data],
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_reverse(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let Some(axes) = const_input(ctx, node, 1) else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "reverse axes are not known statically"
        ));
    };
    let Some(rank) = ctx.shape(data).map(|shape| shape.len()) else {
        return Err(convert_error!(
            UnresolvedInput,
            node.name,
            "shape of \"{}\" is not known",
            data
        ));
    };

    let mut reverse_dim = vec![false; rank];
    for axis in tensor_ints(axes) {
        let resolved = if axis < 0 { axis + rank as i64 } else { axis };
        let Some(flag) = usize::try_from(resolved)
            .ok()
            .and_then(|axis| reverse_dim.get_mut(axis))
        else {
            return Err(convert_error!(
                InvalidAttribute,
                node.name,
                "axis {} is out of range for rank {}",
                axis,
                rank
            ));
        };
        *flag = true;
    }

    ctx.emit(&node.name, Reverse { reverse_dim }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_reverse_sequence(
    _ctx: &mut ConversionContext,
    node: &SsaNode,
) -> Result<(), ConvertError> {
    Err(convert_error!(
        NotImplemented,
        node.name,
        "ReverseSequence is not supported"
    ))
}

pub fn lower_expand_dims(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let axes = match const_input(ctx, node, 1) {
        Some(axes) => tensor_ints(axes),
        None if node.inputs.len() == 1 => node.attrs().require("axis")?.as_ints()?,
        None => {
            return Err(convert_error!(
                NotImplemented,
                node.name,
                "expand_dims axes are not known statically"
            ));
        }
    };
    let axes = to_i32(node, axes)?;
    ctx.emit(&node.name, ExpandDims { axes }, [data], [node.name.as_str()])?;
    Ok(())
}

pub fn lower_pack(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let axis = node
        .attrs()
        .get("axis")
        .map(|attr| attr.as_i32())
        .transpose()?
        .unwrap_or(0);
    ctx.emit(&node.name, StackNd { axis }, &inputs, [node.name.as_str()])?;
    Ok(())
}

pub fn lower_unpack(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let attrs = node.attrs();
    let num_splits = attrs.require("num")?.as_usize()?;
    let axis = attrs.require("axis")?.as_i32()?;
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;

    let outputs: Vec<String> = (0..num_splits)
        .map(|i| format!("{}_{}", node.name, i))
        .collect();
    let unsqueezed: Vec<String> = (0..num_splits)
        .map(|i| format!("{}_unsqueezed_{}", node.name, i))
        .collect();

    ctx.bind(&node.name, outputs.clone())?;
    ctx.emit(
        &node.name,
        SplitNd { axis, num_splits },
        [data],
        &unsqueezed,
    )?;
    for (input, output) in unsqueezed.iter().zip(&outputs) {
        ctx.emit(
            output,
            Squeeze { axes: vec![axis] },
            [input.as_str()],
            [output.as_str()],
        )?;
    }
    Ok(())
}

pub fn lower_split(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let attrs = node.attrs();
    let axis = attrs.require("split_dim")?.as_i32()?;
    let split = attrs.require("split")?.as_ints()?;
    let Some(&first) = split.first() else {
        return Err(convert_error!(
            InvalidAttribute,
            node.name,
            "split sizes are empty"
        ));
    };
    if split.iter().any(|&size| size != first) {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "uneven split {:?} is not supported",
            split
        ));
    }
    let num_splits = split.len();

    // The data is the last input. Earlier inputs hold the split axis.
    let inputs = ctx.resolve_inputs(node)?;
    let Some(data) = inputs.last() else {
        return Err(convert_error!(UnresolvedInput, node.name, "node has no inputs"));
    };

    let outputs: Vec<String> = (0..num_splits)
        .map(|i| format!("{}_{}_", node.name, i))
        .collect();
    ctx.bind(&node.name, outputs.clone())?;
    ctx.emit(
        &node.name,
        SplitNd { axis, num_splits },
        [data.as_str()],
        &outputs,
    )?;
    Ok(())
}

pub fn lower_gather(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let Some(data_and_indices) = inputs.get(..2) else {
        return Err(convert_error!(
            UnresolvedInput,
            node.name,
            "expected data and indices inputs"
        ));
    };
    ctx.emit(
        &node.name,
        Gather { axis: 0 },
        data_and_indices,
        [node.name.as_str()],
    )?;
    Ok(())
}

pub fn lower_embedding(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let inputs = ctx.resolve_inputs(node)?;
    let data = first_input(node, &inputs)?;
    let weights = match inputs.len() {
        1 => tensor_attr(node, "W")?,
        _ => const_input(ctx, node, 1),
    };
    let Some(weights) = weights else {
        return Err(convert_error!(
            NotImplemented,
            node.name,
            "embedding weights are not known statically"
        ));
    };

    let depth = node.attrs().require("depth")?.as_usize()?;
    let embedding_size = weights.shape().last().copied().unwrap_or(0);
    if embedding_size == 0 || weights.len() != depth * embedding_size {
        return Err(convert_error!(
            InvalidAttribute,
            node.name,
            "embedding weight of shape {:?} does not match depth {}",
            weights.shape(),
            depth
        ));
    }
    // Store the table as `[embedding_size, vocab_size]`.
    let weights = weights
        .clone()
        .into_shape([depth, embedding_size].as_slice())
        .transposed()
        .to_tensor();

    let expanded = format!("{}_expandim_", node.name);
    ctx.emit(
        &expanded,
        ExpandDims { axes: vec![-1] },
        [data],
        [expanded.as_str()],
    )?;
    ctx.emit(
        &node.name,
        EmbeddingNd {
            vocab_size: depth,
            embedding_size,
            weights,
        },
        [expanded.as_str()],
        [node.name.as_str()],
    )?;
    Ok(())
}
