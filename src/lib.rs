//! nnssa lowers SSA dataflow programs into shape-annotated operator networks.
//!
//! # Programs
//!
//! The input to conversion is an [`SsaProgram`]: a set of named functions,
//! each a dataflow graph in which every node produces one value. Programs
//! are usually produced by tracing a trained model and are loaded from JSON
//! using [`SsaProgram::from_json`]. Loops and branches are expressed as nodes
//! which name the functions implementing their condition, body and arms.
//!
//! # Converting programs
//!
//! The basic workflow is:
//!
//! 1. Load the program.
//! 2. Create an [`SsaConverter`] for the top function, supplying the shapes
//!    of inputs whose declared shapes are not fully known, and optionally
//!    selecting the outputs.
//! 3. Call [`SsaConverter::convert`] to get a [`NeuralNetwork`].
//!
//! [`convert`] does steps 2 and 3 for the "main" function.
//!
//! During conversion each node is lowered into zero or more layers of the
//! target network, in dependency order. Tuple values are flattened into
//! lists of tensor edges, loops become [`Loop`](network::layers::Loop)
//! layers whose body copies each new value back onto the loop-carried edge,
//! and branches become [`Branch`](network::layers::Branch) layers. Shapes
//! are propagated through every layer as it is emitted, and each layer's
//! output shapes are recorded on the layer.
//!
//! Conversion either succeeds completely or fails with a [`ConvertError`]
//! naming the node, and the path of loop and branch nodes leading to it,
//! that could not be converted.
//!
//! # Extending conversion
//!
//! The mapping from SSA operator kinds to lowering routines is a
//! [`LoweringRegistry`]. Routines for new operator kinds, or replacements for
//! the built-in ones, can be registered and passed to
//! [`SsaConverter::with_registry`]. Shape rules for the target layer kinds
//! live in the `nnssa-shape-inference` crate.
//!
//! # Diagnostics
//!
//! Progress is logged using the [log](https://docs.rs/log) crate. Setting
//! `NNSSA_TIMING=1` logs the time taken to lower each function, and
//! `NNSSA_VERBOSE=1` prints every emitted layer with its output shapes once
//! conversion completes. See [`ConvertOptions`].

mod env;
mod error;
mod shape_table;
mod shapes;
mod timer;

pub mod convert;
pub mod network;
pub mod ssa;

pub use convert::{
    convert, ConversionContext, ConvertOptions, LowerOp, LoweringRegistry, SsaConverter,
    TupleResolver,
};
pub use error::{ConvertError, ConvertErrorKind};
pub use network::{FeatureDesc, Layer, LayerOp, NetworkBuilder, NeuralNetwork, TensorDesc};
pub use shape_table::ShapeTable;
pub use shapes::{propagate_layer, propagate_shapes};
pub use ssa::{AttrValue, SsaFunction, SsaNode, SsaProgram, TensorRef};

pub use nnssa_shape_inference::{Dim, Shape, UNKNOWN_DIM};
