//! Shape propagation rules for lowered operator networks.
//!
//! # About shape propagation
//!
//! The layers of a lowered network are annotated with the rank and dimension
//! sizes of every tensor they read and write. These annotations are computed
//! by tracing how each layer kind transforms the shapes of its inputs. For
//! example given an input `X` of shape `[3, 1]`:
//!
//! ```text
//! A = LoadConstantNd<shape=[1, 4]>()      // [1, 4]
//! B = AddBroadcastable(A, X)              // [3, 4]
//! C = ReduceSum<axes=[0]>(B)              // [4]
//! S = GetShape(C)                         // [1]
//! ```
//!
//! Shapes are plain vectors of integers. A dimension whose size is not known
//! statically is recorded as [`UNKNOWN_DIM`] (`-1`). The rank of a shape is
//! always known. Rules treat unknown dimensions as wildcards when checking
//! compatibility, but never assume that two unknown dimensions are equal.
//!
//! # Crate overview
//!
//! The main export of this crate is the [`InferShapes`] trait, plus types which
//! implement it in [`ops`]. Several layer kinds share the same rule, so there
//! is an M:1 mapping between layer kinds and implementations in this crate.
//!
//! The crate also provides the shape utilities used to reconcile shapes that
//! are recorded more than once for the same tensor: [`get_common_shape`],
//! [`is_a_shape_of`] and [`is_static_shape`].

mod infer_shapes;
pub mod ops;

pub use infer_shapes::{
    broadcast_shapes, get_common_shape, is_a_shape_of, is_static_shape, is_unknown, BinaryOp,
    Dim, InferShapes, InferShapesError, LogicalOp, ReductionOp, Shape, UnaryOp, UNKNOWN_DIM,
};
