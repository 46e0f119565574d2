//! Lowering of SSA programs into target networks.
//!
//! [`SsaConverter`] validates a conversion request against the program's top
//! function and then lowers it node by node. Each node is dispatched to the
//! routine registered for its operator kind in a [`LoweringRegistry`], which
//! emits layers through a [`ConversionContext`]. Shapes are propagated
//! through each layer as soon as it is emitted, so routines can rely on the
//! shapes of all of their inputs being known.

use log::{debug, info};
use nnssa_shape_inference::{is_a_shape_of, is_static_shape, Shape};
use rten_tensor::Tensor;

use crate::env::{env_flag, TIMING_VAR, VERBOSE_VAR};
use crate::error::{convert_error, ConvertError, ConvertErrorImpl};
use crate::network::{FeatureDesc, Layer, LayerOp, NetworkBuilder, NeuralNetwork, TensorDesc};
use crate::shape_table::ShapeTable;
use crate::shapes::{propagate_layer, propagate_shapes};
use crate::ssa::topo::lowering_order;
use crate::ssa::{
    SsaFunction, SsaNode, SsaProgram, TensorRef, FUNCTION_ENTRY_OP, MAKE_TUPLE_OP,
    PLACEHOLDER_OP, RETURN_OP,
};
use crate::timer::Timer;

mod control_flow;
mod ops;
mod registry;
mod tuples;

#[cfg(test)]
mod tests;

pub use registry::{LowerOp, LoweringRegistry};
pub use tuples::TupleResolver;

/// Name of the function converted when none is specified.
pub const DEFAULT_TOP_FUNC: &str = "main";

/// Options which control diagnostics output during conversion.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// Log the time taken to lower each function.
    pub timing: bool,

    /// Print each emitted layer and its output shapes after conversion.
    pub verbose: bool,
}

impl Default for ConvertOptions {
    /// Read the options from the `NNSSA_TIMING` and `NNSSA_VERBOSE`
    /// environment variables.
    fn default() -> Self {
        ConvertOptions {
            timing: env_flag(TIMING_VAR, false),
            verbose: env_flag(VERBOSE_VAR, false),
        }
    }
}

/// Return true for node kinds which only update tuple bindings.
fn is_bookkeeping(op: &str) -> bool {
    [PLACEHOLDER_OP, FUNCTION_ENTRY_OP, RETURN_OP, MAKE_TUPLE_OP, "get_tuple"].contains(&op)
}

/// State of a single conversion.
///
/// The context owns the network builder for the function currently being
/// lowered, the shape table and the tuple bindings. Lowering a loop or branch
/// function temporarily replaces the builder with a fresh one, while the
/// shape table and bindings are shared by all functions.
pub struct ConversionContext<'a> {
    program: &'a SsaProgram,
    registry: &'a LoweringRegistry,

    /// Names of the functions being lowered. The last entry is the function
    /// whose nodes are currently being lowered.
    func_stack: Vec<&'a str>,

    builder: NetworkBuilder,
    shapes: ShapeTable,
    tuples: TupleResolver,
    timing: bool,
}

impl<'a> ConversionContext<'a> {
    fn new(
        program: &'a SsaProgram,
        registry: &'a LoweringRegistry,
        top_func: &'a str,
        builder: NetworkBuilder,
        timing: bool,
    ) -> ConversionContext<'a> {
        ConversionContext {
            program,
            registry,
            func_stack: vec![top_func],
            builder,
            shapes: ShapeTable::new(),
            tuples: TupleResolver::new(),
            timing,
        }
    }

    /// Return the name of the function being lowered.
    pub fn current_function_name(&self) -> &'a str {
        self.func_stack.last().copied().unwrap_or_default()
    }

    /// Return the function being lowered.
    pub fn current_function(&self) -> Result<&'a SsaFunction, ConvertError> {
        let name = self.current_function_name();
        self.program.function(name).ok_or_else(|| {
            ConvertErrorImpl::InvalidRequest(format!("function \"{}\" not found", name)).into()
        })
    }

    /// Look up a function of the program by name.
    ///
    /// The returned name borrows from the program, so it can outlive the
    /// node that referenced the function.
    pub fn function(&self, name: &str) -> Option<(&'a str, &'a SsaFunction)> {
        self.program
            .functions
            .get_key_value(name)
            .map(|(name, func)| (name.as_str(), func))
    }

    /// Return the node in the current function which produces `input`.
    pub fn input_node(&self, input: &TensorRef) -> Option<&'a SsaNode> {
        match input {
            TensorRef::Direct(name) => self.current_function().ok()?.node(name),
            TensorRef::TupleElement { .. } => None,
        }
    }

    /// Return the statically known value of `input`, if any.
    pub fn constant(&self, input: &TensorRef) -> Option<&'a Tensor<f32>> {
        self.input_node(input).and_then(|node| node.value.as_ref())
    }

    /// Expand a node's inputs into tensor edge names.
    pub fn resolve_inputs(&self, node: &SsaNode) -> Result<Vec<String>, ConvertError> {
        self.tuples.resolve(&node.name, &node.inputs)
    }

    /// Bind a tuple name to a list of edges.
    pub fn bind(&mut self, name: &str, edges: Vec<String>) -> Result<(), ConvertError> {
        self.tuples.bind(name, edges)
    }

    pub fn binding(&self, name: &str) -> Option<&[String]> {
        self.tuples.binding(name)
    }

    /// Return the shape recorded for an edge.
    pub fn shape(&self, edge: &str) -> Option<&Shape> {
        self.shapes.get(edge)
    }

    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    /// Replace the shape recorded for `edge` in the shape table and in the
    /// output annotation of the layer which produces it.
    ///
    /// The shape also becomes one of the layer's fixed output shapes, so it
    /// survives later propagation passes.
    pub(crate) fn overwrite_shape(&mut self, edge: &str, shape: Shape) {
        let layer = self
            .builder
            .network_mut()
            .layers
            .iter_mut()
            .rev()
            .find(|l| l.outputs.iter().any(|o| o == edge));
        if let Some(layer) = layer {
            let mut fixed = layer
                .fixed_output_shapes
                .take()
                .or_else(|| layer.annotated_output_shapes())
                .unwrap_or_default();
            fixed.resize(layer.outputs.len(), Vec::new());
            for (i, output) in layer.outputs.iter().enumerate() {
                if output == edge {
                    fixed[i] = shape.clone();
                    if let Some(desc) = layer.output_tensors.get_mut(i) {
                        *desc = TensorDesc::new(&shape);
                    }
                }
            }
            layer.fixed_output_shapes = Some(fixed);
        }
        self.shapes.overwrite(edge, shape);
    }

    /// Append a layer to the network for the current function and propagate
    /// shapes through it.
    pub fn emit(
        &mut self,
        name: &str,
        op: impl LayerOp,
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<&mut Layer, ConvertError> {
        self.emit_with_shapes(name, op, inputs, outputs, None)
    }

    /// Variant of [`emit`](ConversionContext::emit) which uses `explicit`
    /// output shapes, if given, instead of the layer's shape rule.
    pub fn emit_with_shapes(
        &mut self,
        name: &str,
        op: impl LayerOp,
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
        explicit: Option<&[Shape]>,
    ) -> Result<&mut Layer, ConvertError> {
        let layer = self.builder.add_boxed_layer(
            name,
            Box::new(op),
            inputs.into_iter().map(|s| s.into()).collect(),
            outputs.into_iter().map(|s| s.into()).collect(),
        );
        propagate_layer(layer, &mut self.shapes, explicit)?;
        Ok(layer)
    }

    /// Lower the function `func_name`, referenced by control-flow node
    /// `node_name`, into a new network.
    ///
    /// The function's entry node (or the function name, if it has no entry
    /// node) is bound to `args`. The function is pushed onto the function
    /// stack while it is lowered and popped afterwards, also on failure.
    /// `finish` runs after the function's nodes are lowered, while its
    /// network is still being built.
    pub(crate) fn lower_subfunction(
        &mut self,
        node_name: &str,
        func_name: &str,
        args: &[String],
        finish: impl FnOnce(&mut ConversionContext<'a>, &'a SsaFunction) -> Result<(), ConvertError>,
    ) -> Result<NeuralNetwork, ConvertError> {
        let (func_name, func) = self.function(func_name).ok_or_else(|| {
            convert_error!(
                ControlFlowMismatch,
                node_name,
                "function \"{}\" not found",
                func_name
            )
        })?;
        let entry_name = func.entry_node().map(|n| n.name.as_str()).unwrap_or(func_name);
        self.bind(entry_name, args.to_vec())?;

        let parent = std::mem::take(&mut self.builder);
        self.func_stack.push(func_name);
        let mut result = self.lower_current_function();
        if result.is_ok() {
            result = finish(self, func);
        }
        self.func_stack.pop();
        let subnet = std::mem::replace(&mut self.builder, parent).finish();

        result
            .map(|_| subnet)
            .map_err(|err| ConvertError::subgraph_error(node_name, err))
    }

    /// Lower all nodes of the current function in dependency order.
    fn lower_current_function(&mut self) -> Result<(), ConvertError> {
        let func_name = self.current_function_name();
        let func = self.current_function()?;
        let order = lowering_order(func_name, func)?;
        let registry = self.registry;

        info!("Converting function {} ({} nodes)", func_name, order.len());
        let mut timer = Timer::new();
        if self.timing {
            timer.start();
        }

        for (idx, node) in order.iter().enumerate() {
            debug!(
                "[{}/{}] Converting op {}: {}",
                idx + 1,
                order.len(),
                node.name,
                node.op
            );
            if node.value.is_some() && !is_bookkeeping(&node.op) {
                ops::lower_const(self, node)?;
            } else {
                registry.lower(self, node)?;
            }
        }

        if self.timing {
            timer.end();
            info!("Converted function {} in {:.3}ms", func_name, timer.elapsed_ms());
        }

        Ok(())
    }

    /// Expand output node names into the tensor edges which hold their
    /// values. Tuple-valued outputs contribute the edges they are bound to.
    fn output_edges(&self, names: &[String]) -> Vec<String> {
        let mut edges: Vec<String> = Vec::new();
        for name in names {
            let expanded = match self.binding(name) {
                Some(bound) => bound.to_vec(),
                None => vec![name.clone()],
            };
            for edge in expanded {
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
        }
        edges
    }

    fn finish(self) -> (NeuralNetwork, ShapeTable) {
        (self.builder.finish(), self.shapes)
    }
}

/// Converts the top function of an SSA program into a target network.
pub struct SsaConverter<'a> {
    program: &'a SsaProgram,
    top_func: &'a str,
    inputs: Vec<(String, Shape)>,
    outputs: Vec<String>,
    registry: LoweringRegistry,
    options: ConvertOptions,
}

impl<'a> SsaConverter<'a> {
    /// Prepare a conversion of `top_func` (default "main") in `program`.
    ///
    /// `inputs` specifies the shapes of some or all of the function's
    /// Placeholder inputs. Supplied shapes must be static and compatible with
    /// the shape declared on the Placeholder. Inputs which are not supplied
    /// use their declared shape, which must then be static.
    ///
    /// `outputs` selects the function outputs which become network outputs.
    /// By default all values which are not consumed inside the function are
    /// outputs. A tuple-valued output contributes one network output for each
    /// edge of its tuple.
    pub fn new(
        program: &'a SsaProgram,
        top_func: Option<&str>,
        inputs: Option<&[(&str, Shape)]>,
        outputs: Option<&[&str]>,
    ) -> Result<SsaConverter<'a>, ConvertError> {
        let top_name = top_func.unwrap_or(DEFAULT_TOP_FUNC);
        let Some((top_func, func)) = program.functions.get_key_value(top_name) else {
            return Err(ConvertErrorImpl::InvalidRequest(format!(
                "top level function \"{}\" not found in program",
                top_name
            ))
            .into());
        };
        let supplied = inputs.unwrap_or_default();

        for (name, _) in supplied {
            if !func.inputs().any(|node| node.name == *name) {
                return Err(ConvertErrorImpl::InvalidRequest(format!(
                    "\"{}\" is not an input of function \"{}\"",
                    name, top_func
                ))
                .into());
            }
        }

        let mut input_shapes = Vec::new();
        for node in func.inputs() {
            let declared = node.shape.as_deref();
            let shape = match supplied.iter().find(|(name, _)| *name == node.name) {
                Some((name, shape)) => {
                    if !is_static_shape(shape) {
                        return Err(ConvertErrorImpl::InvalidRequest(format!(
                            "supplied input \"{}\" has non-static shape {:?}",
                            name, shape
                        ))
                        .into());
                    }
                    if !is_a_shape_of(shape, declared) {
                        return Err(ConvertErrorImpl::InvalidRequest(format!(
                            "input \"{}\" expects a shape compatible with {:?}, but is given {:?}",
                            name, declared, shape
                        ))
                        .into());
                    }
                    shape.clone()
                }
                None => match declared {
                    Some(shape) if is_static_shape(shape) => shape.to_vec(),
                    _ => {
                        return Err(ConvertErrorImpl::InvalidRequest(format!(
                            "input \"{}\" has non-static shape {:?}, please provide its shape",
                            node.name, declared
                        ))
                        .into());
                    }
                },
            };
            let shape = if shape.is_empty() { vec![1] } else { shape };
            input_shapes.push((node.name.clone(), shape));
        }

        let func_outputs: Vec<&str> = func.outputs().map(|n| n.name.as_str()).collect();
        let outputs = match outputs {
            Some(names) => {
                if let Some(name) = names.iter().find(|name| !func_outputs.contains(*name)) {
                    return Err(ConvertErrorImpl::InvalidRequest(format!(
                        "\"{}\" is not an output of function \"{}\"",
                        name, top_func
                    ))
                    .into());
                }
                names.iter().map(|s| s.to_string()).collect()
            }
            None => func_outputs.iter().map(|s| s.to_string()).collect(),
        };

        Ok(SsaConverter {
            program,
            top_func,
            inputs: input_shapes,
            outputs,
            registry: LoweringRegistry::with_all_ops(),
            options: ConvertOptions::default(),
        })
    }

    /// Replace the diagnostics options.
    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the lowering table.
    pub fn with_registry(mut self, registry: LoweringRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Return the resolved shapes of the network inputs.
    pub fn input_shapes(&self) -> &[(String, Shape)] {
        &self.inputs
    }

    /// Lower the top function and return the resulting network.
    pub fn convert(&self) -> Result<NeuralNetwork, ConvertError> {
        let mut timer = Timer::new();
        timer.start();

        let input_features: Vec<(&str, Shape)> = self
            .inputs
            .iter()
            .map(|(name, shape)| (name.as_str(), shape.clone()))
            .collect();
        let builder = NetworkBuilder::with_features(&input_features, &[]);

        let mut ctx = ConversionContext::new(
            self.program,
            &self.registry,
            self.top_func,
            builder,
            self.options.timing,
        );
        for (name, shape) in &self.inputs {
            ctx.shapes.record(name, shape.clone())?;
        }
        ctx.lower_current_function()?;
        let output_edges = ctx.output_edges(&self.outputs);
        let (mut network, shapes) = ctx.finish();

        for edge in output_edges {
            if !shapes.contains(&edge) {
                return Err(ConvertErrorImpl::UnresolvedInput {
                    name: edge,
                    error: "network output is never written".into(),
                }
                .into());
            }
            network.outputs.push(FeatureDesc::new(&edge, None));
        }

        let removed = network.remove_disconnected_constants();
        if removed > 0 {
            debug!("Removed {} disconnected constant layers", removed);
        }

        // Lowering annotates each layer once, when it is emitted. Edges widened
        // later, such as loop-carried values, are only reflected in the
        // annotations of earlier readers after a full pass.
        propagate_shapes(&mut network, &[], true)?;

        timer.end();
        if self.options.timing {
            info!(
                "Converted {} layers in {:.3}ms",
                network.total_layers(),
                timer.elapsed_ms()
            );
        }
        if self.options.verbose {
            print_layers(&network, 0);
        }

        Ok(network)
    }
}

/// Print the layers of a network and its nested networks.
fn print_layers(network: &NeuralNetwork, depth: usize) {
    let indent = "  ".repeat(depth);
    for layer in &network.layers {
        let shapes: Vec<_> = layer.output_tensors.iter().map(|t| &t.dims).collect();
        println!(
            "{}{} ({}) inputs {:?} outputs {:?} shapes {:?}",
            indent,
            layer.name,
            layer.kind(),
            layer.inputs,
            layer.outputs,
            shapes
        );
        if let Some(subnet_op) = layer.op.as_subnetwork_op() {
            for subnet in subnet_op.subnetworks() {
                print_layers(subnet, depth + 1);
            }
        }
    }
}

/// Convert the "main" function of `program` into a target network.
///
/// See [`SsaConverter::new`] for the meaning of `inputs` and `outputs`.
pub fn convert(
    program: &SsaProgram,
    inputs: Option<&[(&str, Shape)]>,
    outputs: Option<&[&str]>,
) -> Result<NeuralNetwork, ConvertError> {
    SsaConverter::new(program, None, inputs, outputs)?.convert()
}
