use rustc_hash::FxHashMap;

use crate::error::{convert_error, ConvertError, ConvertErrorImpl};
use crate::ssa::TensorRef;

/// Maps names of tuple-valued nodes to the tensor edges they stand for.
///
/// Bindings are created by tuple aggregation and selection nodes, by nodes
/// which lower to several outputs, and for the entry nodes of loop and branch
/// functions. A name can be bound only once per conversion.
#[derive(Debug, Default)]
pub struct TupleResolver {
    bindings: FxHashMap<String, Vec<String>>,
}

impl TupleResolver {
    pub fn new() -> TupleResolver {
        TupleResolver::default()
    }

    /// Bind `name` to a list of edges.
    pub fn bind(&mut self, name: &str, edges: Vec<String>) -> Result<(), ConvertError> {
        if self.bindings.contains_key(name) {
            return Err(ConvertErrorImpl::DuplicateBinding {
                name: name.to_string(),
            }
            .into());
        }
        self.bindings.insert(name.to_string(), edges);
        Ok(())
    }

    pub fn binding(&self, name: &str) -> Option<&[String]> {
        self.bindings.get(name).map(|edges| edges.as_slice())
    }

    /// Expand the inputs of node `node_name` into a flat list of edge names.
    ///
    /// A direct reference to a bound name is replaced by all of the binding's
    /// edges. Any other direct reference is passed through as-is. A reference
    /// to a tuple element selects one edge of a binding, which must exist.
    pub fn resolve(
        &self,
        node_name: &str,
        inputs: &[TensorRef],
    ) -> Result<Vec<String>, ConvertError> {
        let mut edges = Vec::with_capacity(inputs.len());
        for input in inputs {
            match input {
                TensorRef::Direct(name) => match self.bindings.get(name) {
                    Some(bound) => edges.extend(bound.iter().cloned()),
                    None => edges.push(name.clone()),
                },
                TensorRef::TupleElement { binding, index } => {
                    let bound = self.bindings.get(binding).ok_or_else(|| {
                        convert_error!(
                            UnresolvedInput,
                            node_name,
                            "\"{}\" is not a tuple",
                            binding
                        )
                    })?;
                    let edge = bound.get(*index).ok_or_else(|| {
                        convert_error!(
                            UnresolvedInput,
                            node_name,
                            "index {} is out of range for tuple \"{}\" of length {}",
                            index,
                            binding,
                            bound.len()
                        )
                    })?;
                    edges.push(edge.clone());
                }
            }
        }
        Ok(edges)
    }
}
