//! Shape inference for the layer kinds of a lowered network.
//!
//! Layer kinds without a rule here either reuse one of the generic rules in
//! the crate root ([`UnaryOp`](crate::UnaryOp), [`BinaryOp`](crate::BinaryOp),
//! [`LogicalOp`](crate::LogicalOp), [`ReductionOp`](crate::ReductionOp)) or
//! have no closed-form rule and must be given explicit output shapes.

use crate::infer_shapes::{is_unknown, resolve_axis, Dim, InferShapes, InferShapesError, Shape};
use crate::UNKNOWN_DIM;

mod layout;
mod matmul;
mod reduce;
mod slice;
mod split;

pub use layout::{ExpandDims, Reshape, Squeeze, Stack, Transpose};
pub use matmul::{BatchedMatMul, InnerProduct};
pub use reduce::ArgMax;
pub use slice::SliceStatic;
pub use split::Split;

/// Merge two sizes for a dimension that must agree between inputs.
///
/// An unknown size takes the value of the other size.
pub(crate) fn merge_dim(a: Dim, b: Dim) -> Result<Dim, InferShapesError> {
    match (a, b) {
        (a, b) if a == b => Ok(a),
        (a, b) if is_unknown(a) => Ok(b),
        (a, b) if is_unknown(b) => Ok(a),
        _ => Err(InferShapesError::IncompatibleShapes),
    }
}

/// Concatenate inputs along an existing axis.
pub struct Concat {
    pub axis: i32,
}

impl InferShapes for Concat {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [first, rest @ ..] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let axis = resolve_axis(first.len(), self.axis)?;
        let mut out_shape = first.clone();

        for shape in rest {
            if shape.len() != out_shape.len() {
                return Err(InferShapesError::IncorrectRank);
            }
            for (i, (out_dim, &dim)) in out_shape.iter_mut().zip(shape).enumerate() {
                if i == axis {
                    *out_dim = if is_unknown(*out_dim) || is_unknown(dim) {
                        UNKNOWN_DIM
                    } else {
                        *out_dim + dim
                    };
                } else {
                    *out_dim = merge_dim(*out_dim, dim)?;
                }
            }
        }

        Ok([out_shape].into())
    }
}

/// Gather slices of `data` using `indices`.
///
/// Inputs are `[data, indices]`. The output shape is the data shape with the
/// dimension at `axis` replaced by the shape of the indices.
pub struct Gather {
    pub axis: i32,
}

impl InferShapes for Gather {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data, indices] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let axis = resolve_axis(data.len(), self.axis)?;

        let mut out_shape = Vec::with_capacity(data.len() - 1 + indices.len());
        out_shape.extend_from_slice(&data[..axis]);
        out_shape.extend_from_slice(indices);
        out_shape.extend_from_slice(&data[axis + 1..]);

        Ok([out_shape].into())
    }
}

/// Scatter slices into a container.
///
/// Inputs are `[container, indices, updates]`. The output has the shape of the
/// container.
pub struct Scatter;

impl InferShapes for Scatter {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [container, _indices, _updates] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok([container.clone()].into())
    }
}

/// Produce the shape of the input as a vector.
pub struct GetShape;

impl InferShapes for GetShape {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok([vec![data.len() as Dim]].into())
    }
}

/// Allocate a tensor whose shape is given by the value of a vector input.
///
/// Only the length of the shape vector is known statically, so every output
/// dimension is unknown.
pub struct FillDynamic;

impl InferShapes for FillDynamic {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [shape] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let &[rank] = shape.as_slice() else {
            return Err(InferShapesError::IncorrectRank);
        };
        if is_unknown(rank) {
            return Err(InferShapesError::NotImplemented(
                "fill with a shape vector of unknown length",
            ));
        }
        Ok([vec![UNKNOWN_DIM; rank as usize]].into())
    }
}

/// Produce a constant with a fixed shape.
pub struct LoadConstant<'a> {
    pub shape: &'a [Dim],
}

impl InferShapes for LoadConstant<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        if !inputs.is_empty() {
            return Err(InferShapesError::IncorrectInputCount);
        }
        Ok([self.shape.to_vec()].into())
    }
}

/// Produce a range of values.
///
/// When the start, limit and delta are given as inputs the length of the
/// output is unknown. Otherwise it is computed from the static parameters.
pub struct Range {
    /// Static `(start, limit, delta)` parameters.
    pub params: Option<(f32, f32, f32)>,
}

impl InferShapes for Range {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        match (inputs.len(), self.params) {
            (3, _) => Ok([vec![UNKNOWN_DIM]].into()),
            (0, Some((start, limit, delta))) => {
                if delta == 0. {
                    return Err(InferShapesError::InvalidValue("range delta is zero"));
                }
                let len = ((limit - start) / delta).ceil();
                if len < 1. {
                    return Err(InferShapesError::ZeroSizedOutput);
                }
                Ok([vec![len as Dim]].into())
            }
            _ => Err(InferShapesError::IncorrectInputCount),
        }
    }
}

/// Look up rows of an embedding table.
///
/// The trailing dimension of the input must be 1 and is replaced by the
/// embedding width.
pub struct Embedding {
    pub embedding_size: usize,
}

impl InferShapes for Embedding {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let Some((&last, _)) = data.split_last() else {
            return Err(InferShapesError::IncorrectRank);
        };
        if last != 1 {
            return Err(InferShapesError::IncompatibleShapes);
        }
        let mut out_shape = data.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.embedding_size as Dim;
        }
        Ok([out_shape].into())
    }
}
