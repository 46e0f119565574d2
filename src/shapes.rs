//! Shape propagation over lowered networks.
//!
//! [`propagate_layer`] is run on each layer as it is emitted during lowering.
//! [`propagate_shapes`] re-runs propagation over a complete network, including
//! nested loop and branch networks, and then writes or checks the shape
//! annotations of every layer.

use nnssa_shape_inference::{is_a_shape_of, InferShapesError, Shape};

use crate::error::{ConvertError, ConvertErrorImpl};
use crate::network::{Layer, NeuralNetwork, TensorDesc};
use crate::shape_table::ShapeTable;

/// Look up the shapes of a layer's inputs.
fn input_shapes(layer: &Layer, table: &ShapeTable) -> Result<Vec<Shape>, ConvertError> {
    layer
        .inputs
        .iter()
        .enumerate()
        .map(|(index, edge)| {
            table.get(edge).cloned().ok_or_else(|| {
                ConvertErrorImpl::MissingShape {
                    name: layer.name.clone(),
                    index,
                    edge: edge.clone(),
                }
                .into()
            })
        })
        .collect()
}

/// Compute a layer's output shapes and record them in `table`.
///
/// `explicit` output shapes, or else the layer's fixed output shapes, take
/// precedence over the layer's shape rule. Layers without a closed-form rule
/// fall back to their existing output annotations.
fn record_outputs(
    layer: &Layer,
    table: &mut ShapeTable,
    explicit: Option<&[Shape]>,
) -> Result<Vec<Shape>, ConvertError> {
    let inputs = input_shapes(layer, table)?;
    let outputs = match explicit.or(layer.fixed_output_shapes.as_deref()) {
        Some(shapes) => shapes.to_vec(),
        None => match layer.op.infer_shapes(&inputs) {
            Ok(shapes) => shapes,
            Err(InferShapesError::NotImplemented(what)) => layer
                .annotated_output_shapes()
                .ok_or_else(|| {
                    ConvertError::shape_error(
                        &layer.name,
                        InferShapesError::NotImplemented(what),
                        &inputs,
                    )
                })?,
            Err(err) => return Err(ConvertError::shape_error(&layer.name, err, &inputs)),
        },
    };

    if outputs.len() != layer.outputs.len() {
        return Err(ConvertError::shape_error(
            &layer.name,
            InferShapesError::InvalidValue("output count does not match the layer"),
            &inputs,
        ));
    }

    for (edge, shape) in layer.outputs.iter().zip(outputs) {
        table.record(edge, shape)?;
    }

    Ok(inputs)
}

/// Return the shape recorded for an edge that must already have one.
fn recorded_shape<'a>(
    layer: &Layer,
    index: usize,
    edge: &str,
    table: &'a ShapeTable,
) -> Result<&'a Shape, ConvertError> {
    table.get(edge).ok_or_else(|| {
        ConvertErrorImpl::MissingShape {
            name: layer.name.clone(),
            index,
            edge: edge.to_string(),
        }
        .into()
    })
}

/// Propagate shapes through a single newly-emitted layer.
///
/// Every input of `layer` must already have a shape in `table`. The output
/// shapes, computed from the layer's shape rule or taken from `explicit`, are
/// unified into `table`, and the layer's input and output annotations are
/// replaced with the resulting shapes. `explicit` shapes are kept as the
/// layer's fixed output shapes.
pub fn propagate_layer(
    layer: &mut Layer,
    table: &mut ShapeTable,
    explicit: Option<&[Shape]>,
) -> Result<(), ConvertError> {
    if let Some(shapes) = explicit {
        layer.fixed_output_shapes = Some(shapes.to_vec());
    }
    let inputs = record_outputs(layer, table, None)?;

    layer.input_tensors = inputs.iter().map(|shape| TensorDesc::new(shape)).collect();
    layer.output_tensors = layer
        .outputs
        .iter()
        .enumerate()
        .map(|(i, edge)| recorded_shape(layer, i, edge, table).map(|s| TensorDesc::new(s)))
        .collect::<Result<_, _>>()?;

    Ok(())
}

/// Propagate shapes through every layer of `network` and nested networks.
///
/// A loop body can widen the shape of an edge which its condition, or an
/// earlier layer of the body, has already read. Nested networks are therefore
/// propagated until the table stops changing. Recording only ever keeps or
/// widens a shape, so this terminates.
fn propagate_network(network: &NeuralNetwork, table: &mut ShapeTable) -> Result<(), ConvertError> {
    for layer in &network.layers {
        record_outputs(layer, table, None)?;
        let Some(subnet_op) = layer.op.as_subnetwork_op() else {
            continue;
        };
        loop {
            let before = table.clone();
            for subnet in subnet_op.subnetworks() {
                propagate_network(subnet, table)
                    .map_err(|err| ConvertError::subgraph_error(&layer.name, err))?;
            }
            if *table == before {
                break;
            }
        }
    }
    Ok(())
}

/// Write or check one list of layer annotations against `table`.
fn finalize_tensors(
    layer_name: &str,
    edges: &[String],
    annotations: &mut Vec<TensorDesc>,
    table: &ShapeTable,
) -> Result<(), ConvertError> {
    let shape_of = |index: usize, edge: &str| {
        table.get(edge).ok_or_else(|| {
            ConvertError::from(ConvertErrorImpl::MissingShape {
                name: layer_name.to_string(),
                index,
                edge: edge.to_string(),
            })
        })
    };

    if annotations.is_empty() {
        *annotations = edges
            .iter()
            .enumerate()
            .map(|(i, edge)| shape_of(i, edge).map(|s| TensorDesc::new(s)))
            .collect::<Result<_, _>>()?;
        return Ok(());
    }

    for (i, edge) in edges.iter().enumerate() {
        let shape = shape_of(i, edge)?;
        let annotated = annotations.get(i).map(|t| t.dims.as_slice()).unwrap_or(&[]);
        let compatible = is_a_shape_of(annotated, Some(shape.as_slice()))
            || is_a_shape_of(shape, Some(annotated));
        if !compatible {
            return Err(ConvertErrorImpl::AnnotationMismatch {
                name: layer_name.to_string(),
                edge: edge.clone(),
                annotated: annotated.to_vec(),
                inferred: shape.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Write or check the annotations of every layer in `network` and nested
/// networks.
fn finalize_network(
    network: &mut NeuralNetwork,
    table: &ShapeTable,
    overwrite: bool,
) -> Result<(), ConvertError> {
    for layer in network.layers.iter_mut() {
        if overwrite {
            layer.input_tensors.clear();
            layer.output_tensors.clear();
        }
        finalize_tensors(&layer.name, &layer.inputs, &mut layer.input_tensors, table)?;
        finalize_tensors(&layer.name, &layer.outputs, &mut layer.output_tensors, table)?;

        let name = layer.name.as_str();
        if let Some(subnet_op) = layer.op.as_subnetwork_op_mut() {
            for subnet in subnet_op.subnetworks_mut() {
                finalize_network(subnet, table, overwrite)
                    .map_err(|err| ConvertError::subgraph_error(name, err))?;
            }
        }
    }
    Ok(())
}

/// Propagate shapes through a complete network and finalize its layer
/// annotations.
///
/// The shape table is seeded from the network's input features and from
/// `known_inputs`. Propagation visits every layer in order, recursing into
/// loop condition and body networks and branch arms, and fails on the first
/// irreconcilable shape.
///
/// If `overwrite` is true, existing layer annotations and output feature
/// shapes are discarded and rewritten. Otherwise missing annotations are
/// written and existing ones must be compatible, in either direction, with
/// the propagated shapes.
///
/// Returns the final shape table.
pub fn propagate_shapes(
    network: &mut NeuralNetwork,
    known_inputs: &[(&str, Shape)],
    overwrite: bool,
) -> Result<ShapeTable, ConvertError> {
    let mut table = ShapeTable::new();
    for input in &network.inputs {
        if let Some(shape) = &input.shape {
            table.record(&input.name, shape.clone())?;
        }
    }
    for (name, shape) in known_inputs {
        table.record(name, shape.clone())?;
    }

    propagate_network(network, &mut table)?;
    finalize_network(network, &table, overwrite)?;

    for output in network.outputs.iter_mut() {
        let Some(shape) = table.get(&output.name) else {
            return Err(ConvertErrorImpl::UnresolvedInput {
                name: output.name.clone(),
                error: "network output is never written".into(),
            }
            .into());
        };
        match &output.shape {
            Some(existing)
                if !overwrite
                    && !(is_a_shape_of(existing, Some(shape.as_slice()))
                        || is_a_shape_of(shape, Some(existing.as_slice()))) =>
            {
                return Err(ConvertErrorImpl::ShapeConflict {
                    name: output.name.clone(),
                    existing: existing.clone(),
                    new: shape.clone(),
                }
                .into());
            }
            Some(_) if !overwrite => {}
            _ => output.shape = Some(shape.clone()),
        }
    }

    Ok(table)
}
