//! Data model for SSA programs.
//!
//! An [`SsaProgram`] is a set of named [`SsaFunction`]s. Each function is a
//! dataflow graph of [`SsaNode`]s in which every node produces exactly one
//! value, named after the node. Loops and branches refer to the functions
//! which implement their condition, body and arms by name via node
//! attributes.
//!
//! Programs are deserialized from JSON. A function is an array of nodes:
//!
//! ```json
//! {
//!   "functions": {
//!     "main": [
//!       {"name": "x", "op": "Placeholder", "shape": [1, 4]},
//!       {"name": "y", "op": "Sigmoid", "inputs": ["x"]}
//!     ]
//!   }
//! }
//! ```

use std::fmt;

use nnssa_shape_inference::Shape;
use rten_tensor::Tensor;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, ConvertErrorImpl};

pub mod attrs;
pub(crate) mod topo;

pub use attrs::{Attr, Attrs};

/// Operator kind of nodes which provide a function's external inputs.
pub const PLACEHOLDER_OP: &str = "Placeholder";

/// Operator kind of the node which represents the arguments of a function.
pub const FUNCTION_ENTRY_OP: &str = "function_entry";

/// Operator kind of the node which marks a function's return value.
pub const RETURN_OP: &str = "return";

/// Operator kind of nodes which aggregate values into a tuple.
pub const MAKE_TUPLE_OP: &str = "make_tuple";

/// Reference to a value used as a node input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorRef {
    /// The value produced by a node. If the node stands for a tuple, this
    /// refers to all elements of the tuple.
    Direct(String),

    /// A single element of a tuple-valued node.
    TupleElement { binding: String, index: usize },
}

impl TensorRef {
    /// Return the name of the node which produces the referenced value.
    pub fn node_name(&self) -> &str {
        match self {
            Self::Direct(name) => name,
            Self::TupleElement { binding, .. } => binding,
        }
    }
}

impl From<&str> for TensorRef {
    fn from(name: &str) -> Self {
        Self::Direct(name.to_string())
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Direct(name) => write!(f, "{}", name),
            Self::TupleElement { binding, index } => write!(f, "{}[{}]", binding, index),
        }
    }
}

/// Value of a node attribute.
///
/// Variants are tried in order when deserializing, so integral JSON numbers
/// become [`AttrValue::Int`] and lists of integers become
/// [`AttrValue::Ints`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    IntLists(Vec<Vec<i64>>),
    Tensor(Tensor<f32>),
}

impl AttrValue {
    /// Name of the value's type, for use in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
            Self::Bools(_) => "bools",
            Self::IntLists(_) => "int lists",
            Self::Tensor(_) => "tensor",
        }
    }
}

/// One instruction in an SSA function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SsaNode {
    /// Name of the node and of the value it produces.
    pub name: String,

    /// Operator kind.
    pub op: String,

    /// Values consumed by this node, in operator argument order.
    #[serde(default)]
    pub inputs: Vec<TensorRef>,

    /// Names of the nodes which consume this node's value.
    ///
    /// If this is empty when a function is constructed, it is filled in from
    /// the inputs of the other nodes in the function.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Nodes which must run before this one without consuming its value.
    #[serde(default)]
    pub control_inputs: Vec<String>,

    #[serde(default)]
    pub attrs: FxHashMap<String, AttrValue>,

    /// Constant value produced by the node, if known statically.
    #[serde(default)]
    pub value: Option<Tensor<f32>>,

    /// Declared shape of the value, if known. Dimensions may be unknown.
    #[serde(default)]
    pub shape: Option<Shape>,
}

impl SsaNode {
    /// Create a node with the given kind and inputs and no attributes.
    pub fn new(name: &str, op: &str, inputs: &[&str]) -> SsaNode {
        SsaNode {
            name: name.to_string(),
            op: op.to_string(),
            inputs: inputs.iter().map(|&name| name.into()).collect(),
            outputs: Vec::new(),
            control_inputs: Vec::new(),
            attrs: FxHashMap::default(),
            value: None,
            shape: None,
        }
    }

    /// Add an attribute to the node.
    pub fn with_attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    /// Set the constant value of the node.
    pub fn with_value(mut self, value: Tensor<f32>) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the declared shape of the node's value.
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Return an accessor for this node's attributes.
    pub fn attrs(&self) -> Attrs<'_> {
        Attrs::new(&self.name, &self.attrs)
    }
}

/// A named dataflow graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SsaNode>", into = "Vec<SsaNode>")]
pub struct SsaFunction {
    nodes: Vec<SsaNode>,
    index: FxHashMap<String, usize>,
}

impl SsaFunction {
    /// Create a function from a list of nodes.
    ///
    /// Fails if two nodes have the same name. Consumer lists of nodes are
    /// computed from the inputs of other nodes if not provided.
    pub fn new(mut nodes: Vec<SsaNode>) -> Result<SsaFunction, ConvertError> {
        let mut index = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(ConvertErrorImpl::IllFormedGraph {
                    name: node.name.clone(),
                    error: "node name is defined more than once".into(),
                }
                .into());
            }
        }

        let mut consumers: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for node in &nodes {
            let producers = node
                .inputs
                .iter()
                .map(|input| input.node_name())
                .chain(node.control_inputs.iter().map(|s| s.as_str()));
            for producer in producers {
                let entry = consumers.entry(producer.to_string()).or_default();
                if !entry.contains(&node.name) {
                    entry.push(node.name.clone());
                }
            }
        }
        for node in nodes.iter_mut() {
            if node.outputs.is_empty() {
                if let Some(names) = consumers.remove(&node.name) {
                    node.outputs = names;
                }
            }
        }

        Ok(SsaFunction { nodes, index })
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&SsaNode> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Iterate over nodes in definition order.
    pub fn nodes(&self) -> impl Iterator<Item = &SsaNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the nodes which provide external inputs to the function.
    pub fn inputs(&self) -> impl Iterator<Item = &SsaNode> {
        self.nodes.iter().filter(|n| n.op == PLACEHOLDER_OP)
    }

    /// Return the nodes whose values are not consumed inside the function.
    pub fn outputs(&self) -> impl Iterator<Item = &SsaNode> {
        self.nodes.iter().filter(|n| n.outputs.is_empty())
    }

    /// Return the node which represents the function's arguments, if any.
    pub fn entry_node(&self) -> Option<&SsaNode> {
        self.nodes.iter().find(|n| n.op == FUNCTION_ENTRY_OP)
    }

    /// Return the node which marks the function's return value, if any.
    pub fn return_node(&self) -> Option<&SsaNode> {
        self.nodes.iter().find(|n| n.op == RETURN_OP)
    }
}

impl TryFrom<Vec<SsaNode>> for SsaFunction {
    type Error = ConvertError;

    fn try_from(nodes: Vec<SsaNode>) -> Result<Self, Self::Error> {
        SsaFunction::new(nodes)
    }
}

impl From<SsaFunction> for Vec<SsaNode> {
    fn from(func: SsaFunction) -> Self {
        func.nodes
    }
}

/// A set of named functions, one of which is the entry point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SsaProgram {
    pub functions: FxHashMap<String, SsaFunction>,
}

impl SsaProgram {
    pub fn new() -> SsaProgram {
        SsaProgram::default()
    }

    /// Parse a program from its JSON representation.
    pub fn from_json(json: &str) -> Result<SsaProgram, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Add a function to the program, replacing any function with the same
    /// name.
    pub fn add_function(&mut self, name: &str, func: SsaFunction) {
        self.functions.insert(name.to_string(), func);
    }

    pub fn function(&self, name: &str) -> Option<&SsaFunction> {
        self.functions.get(name)
    }
}
