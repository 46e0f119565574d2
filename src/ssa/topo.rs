//! Ordering of the nodes of a function for lowering.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{SsaFunction, SsaNode};
use crate::error::{convert_error, ConvertError};

/// Return true if every consumer of `node` has a statically known value.
///
/// Such nodes only feed constant-folded subtrees and do not need to be
/// lowered.
fn feeds_only_constants(func: &SsaFunction, node: &SsaNode) -> bool {
    !node.outputs.is_empty()
        && node
            .outputs
            .iter()
            .all(|name| func.node(name).is_some_and(|n| n.value.is_some()))
}

/// Return the names of the nodes that `node` depends on, without duplicates.
fn dependencies(node: &SsaNode) -> impl Iterator<Item = &str> {
    let mut seen = FxHashSet::default();
    node.inputs
        .iter()
        .map(|input| input.node_name())
        .chain(node.control_inputs.iter().map(|s| s.as_str()))
        .filter(move |name| seen.insert(*name))
}

/// Return the nodes of `func` that need to be lowered, in dependency order.
///
/// Nodes whose consumers all have constant values are left out. Dependencies
/// on nodes outside of this restricted set are ignored. Among nodes whose
/// dependencies are satisfied, those defined first are visited first.
///
/// Fails if the restricted set contains a cycle.
pub(crate) fn lowering_order<'a>(
    func_name: &str,
    func: &'a SsaFunction,
) -> Result<Vec<&'a SsaNode>, ConvertError> {
    let restricted: Vec<&SsaNode> = func
        .nodes()
        .filter(|node| !feeds_only_constants(func, node))
        .collect();
    let in_set: FxHashSet<&str> = restricted.iter().map(|n| n.name.as_str()).collect();

    // Number of unvisited dependencies of each node, and the nodes which
    // depend on each node.
    let mut pending: FxHashMap<&str, usize> = FxHashMap::default();
    let mut dependents: FxHashMap<&str, Vec<&SsaNode>> = FxHashMap::default();
    for &node in &restricted {
        let mut count = 0;
        for dep in dependencies(node).filter(|dep| in_set.contains(dep)) {
            dependents.entry(dep).or_default().push(node);
            count += 1;
        }
        pending.insert(node.name.as_str(), count);
    }

    let mut frontier: VecDeque<&SsaNode> = restricted
        .iter()
        .copied()
        .filter(|node| pending.get(node.name.as_str()) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(restricted.len());

    while let Some(node) = frontier.pop_front() {
        order.push(node);
        let Some(deps) = dependents.get(node.name.as_str()) else {
            continue;
        };
        for &dependent in deps {
            if let Some(count) = pending.get_mut(dependent.name.as_str()) {
                *count -= 1;
                if *count == 0 {
                    frontier.push_back(dependent);
                }
            }
        }
    }

    if order.len() != restricted.len() {
        let visited: FxHashSet<&str> = order.iter().map(|n| n.name.as_str()).collect();
        let cyclic: Vec<&str> = restricted
            .iter()
            .map(|n| n.name.as_str())
            .filter(|name| !visited.contains(name))
            .collect();
        return Err(convert_error!(
            IllFormedGraph,
            func_name,
            "dependency cycle between nodes {:?}",
            cyclic
        ));
    }

    Ok(order)
}
