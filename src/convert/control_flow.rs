//! Lowering of loops and branches.
//!
//! The target format has no notion of SSA values flowing out of a loop
//! iteration or a branch arm. Loop-carried values are instead overwritten in
//! place: the condition and body networks read the carried edges by name, and
//! the body copies each value it produces back onto the carried edge it
//! replaces. Branch arms similarly copy their results onto shared edges.

use super::ConversionContext;
use crate::error::{convert_error, ConvertError};
use crate::network::layers::{Branch, CopyTensor, Loop};
use crate::ssa::{SsaFunction, SsaNode, MAKE_TUPLE_OP};

/// Return the name of the function referenced by attribute `attr`.
fn function_attr<'n>(
    node: &'n SsaNode,
    attr: &'static str,
    what: &str,
) -> Result<&'n str, ConvertError> {
    match node.attrs().get(attr) {
        Some(value) => value.as_str(),
        None => Err(convert_error!(
            ControlFlowMismatch,
            node.name,
            "malformed {} node: missing \"{}\" attribute",
            what,
            attr
        )),
    }
}

/// Resolve the values returned by `func` into edge names. A function without
/// a return node returns nothing.
fn returned_edges(
    ctx: &ConversionContext,
    func: &SsaFunction,
) -> Result<Vec<String>, ConvertError> {
    match func.return_node() {
        Some(ret) => ctx.resolve_inputs(ret),
        None => Ok(Vec::new()),
    }
}

/// Emit copies of `sources` onto `targets`, skipping values which are
/// already on their target edge.
fn emit_copies(
    ctx: &mut ConversionContext,
    sources: &[String],
    targets: &[String],
) -> Result<(), ConvertError> {
    for (src, dst) in sources.iter().zip(targets) {
        if src == dst {
            continue;
        }
        let name = format!("copy_{}_{}", src, dst);
        ctx.emit(&name, CopyTensor, [src.as_str()], [dst.as_str()])?;
    }
    Ok(())
}

pub fn lower_while(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let [state] = node.inputs.as_slice() else {
        return Err(convert_error!(
            ControlFlowMismatch,
            node.name,
            "malformed loop node: expected one input but found {}",
            node.inputs.len()
        ));
    };
    if !ctx
        .input_node(state)
        .is_some_and(|input| input.op == MAKE_TUPLE_OP)
    {
        return Err(convert_error!(
            ControlFlowMismatch,
            node.name,
            "malformed loop node: input \"{}\" is not a tuple",
            state.node_name()
        ));
    }

    let carried = ctx.resolve_inputs(node)?;
    ctx.bind(&node.name, carried.clone())?;

    let cond_name = function_attr(node, "cond_function", "loop")?;
    let mut condition_edges = Vec::new();
    let condition = ctx.lower_subfunction(&node.name, cond_name, &carried, |ctx, func| {
        condition_edges = returned_edges(ctx, func)?;
        Ok(())
    })?;
    let [condition_var] = <[String; 1]>::try_from(condition_edges).map_err(|edges| {
        convert_error!(
            ControlFlowMismatch,
            node.name,
            "loop condition must return one value but returns {}",
            edges.len()
        )
    })?;

    let body_name = function_attr(node, "body_function", "loop")?;
    let body = ctx.lower_subfunction(&node.name, body_name, &carried, |ctx, func| {
        let returned = returned_edges(ctx, func)?;
        if returned.len() != carried.len() {
            return Err(convert_error!(
                ControlFlowMismatch,
                node.name,
                "loop body returns {} values for {} loop variables",
                returned.len(),
                carried.len()
            ));
        }
        emit_copies(ctx, &returned, &carried)
    })?;

    let op = Loop {
        condition,
        body,
        condition_var,
        max_iterations: 0,
    };
    ctx.emit(&node.name, op, [] as [&str; 0], [] as [&str; 0])?;
    Ok(())
}

pub fn lower_cond(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
    let Some(predicate) = node.inputs.first() else {
        return Err(convert_error!(
            ControlFlowMismatch,
            node.name,
            "malformed branch node: missing predicate"
        ));
    };
    let predicate = ctx
        .tuples
        .resolve(&node.name, std::slice::from_ref(predicate))?;
    let [predicate] = <[String; 1]>::try_from(predicate).map_err(|edges| {
        convert_error!(
            ControlFlowMismatch,
            node.name,
            "branch predicate must be one value but is {}",
            edges.len()
        )
    })?;

    let args = match node.inputs.get(1) {
        Some(args) => ctx.tuples.resolve(&node.name, std::slice::from_ref(args))?,
        None => Vec::new(),
    };

    let true_name = function_attr(node, "true_function", "branch")?;
    let false_name = function_attr(node, "false_function", "branch")?;

    // Number of values returned by the first arm, which the second arm must
    // match.
    let mut num_outputs: Option<usize> = None;
    let mut arms = Vec::with_capacity(2);
    for arm_name in [true_name, false_name] {
        let arm = ctx.lower_subfunction(&node.name, arm_name, &args, |ctx, func| {
            let returned = returned_edges(ctx, func)?;
            match num_outputs {
                Some(n) if n != returned.len() => {
                    return Err(convert_error!(
                        ControlFlowMismatch,
                        node.name,
                        "branch arms return {} and {} values",
                        n,
                        returned.len()
                    ));
                }
                _ => num_outputs = Some(returned.len()),
            }
            let outputs: Vec<String> = (0..returned.len())
                .map(|i| format!("{}_out_{}", node.name, i))
                .collect();
            emit_copies(ctx, &returned, &outputs)
        })?;
        arms.push(arm);
    }

    let outputs = (0..num_outputs.unwrap_or(0))
        .map(|i| format!("{}_out_{}", node.name, i))
        .collect();
    ctx.bind(&node.name, outputs)?;

    let [if_branch, else_branch] = <[_; 2]>::try_from(arms).map_err(|_| {
        convert_error!(ControlFlowMismatch, node.name, "branch must have two arms")
    })?;
    ctx.emit(
        &node.name,
        Branch {
            if_branch,
            else_branch,
        },
        [predicate],
        [] as [&str; 0],
    )?;
    Ok(())
}
