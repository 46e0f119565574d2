//! Traits for shape inference and common implementations.

use std::fmt;

use smallvec::SmallVec;

/// Size of one tensor dimension. Negative values mean the size is unknown.
pub type Dim = i64;

/// Sentinel for a dimension whose size is not known statically.
pub const UNKNOWN_DIM: Dim = -1;

/// Sizes of each dimension of a tensor.
pub type Shape = Vec<Dim>;

/// Return true if `dim` is a statically unknown size.
pub fn is_unknown(dim: Dim) -> bool {
    dim < 0
}

#[derive(Clone, Debug, PartialEq)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this operator.
    IncorrectInputCount,

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    IncompatibleShapes,

    /// An input's rank does not match that expected by the operator, or an
    /// axis is out of range for the input's rank.
    IncorrectRank,

    /// An operator attribute has an invalid value.
    InvalidValue(&'static str),

    /// The operator would produce a tensor with a zero-sized dimension.
    ZeroSizedOutput,

    /// The output shape cannot be determined from static information.
    NotImplemented(&'static str),
}

impl fmt::Display for InferShapesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IncorrectInputCount => write!(f, "incorrect number of inputs"),
            Self::IncompatibleShapes => write!(f, "input shapes are incompatible"),
            Self::IncorrectRank => write!(f, "input has incorrect rank"),
            Self::InvalidValue(what) => write!(f, "invalid value: {}", what),
            Self::ZeroSizedOutput => write!(f, "output would have a zero-sized dimension"),
            Self::NotImplemented(what) => write!(f, "not implemented: {}", what),
        }
    }
}

impl std::error::Error for InferShapesError {}

/// Infer the shapes of an operator's outputs given its inputs.
pub trait InferShapes {
    /// Compute the shape of each output from the shapes of the inputs.
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError>;
}

/// Shape inference for operators whose single output has the same shape as
/// the first input.
///
/// Activations, unary math functions, softmax, reverse and copy layers all
/// use this rule.
pub struct UnaryOp;

impl InferShapes for UnaryOp {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let Some(data) = inputs.first() else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok([data.clone()].into())
    }
}

/// Shape inference for element-wise binary operators with broadcasting.
///
/// See [`broadcast_shapes`] for the rules.
pub struct BinaryOp;

impl InferShapes for BinaryOp {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [a, b] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let shape = broadcast_shapes(a, b)?;
        Ok([shape].into())
    }
}

/// Shape inference for comparison and boolean operators.
///
/// These always produce a single-element boolean vector, independent of the
/// input shapes.
pub struct LogicalOp;

impl InferShapes for LogicalOp {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        if inputs.len() != 2 {
            return Err(InferShapesError::IncorrectInputCount);
        }
        Ok([vec![1]].into())
    }
}

/// Broadcast a pair of dimension sizes.
fn broadcast_dim(a: Dim, b: Dim) -> Option<Dim> {
    match (a, b) {
        (a, b) if is_unknown(a) && is_unknown(b) => Some(UNKNOWN_DIM),
        (a, b) if a == b => Some(a),

        // If either size is 1, it is broadcast against the other size, which
        // may be unknown.
        (1, b) => Some(if is_unknown(b) { UNKNOWN_DIM } else { b }),
        (a, 1) => Some(if is_unknown(a) { UNKNOWN_DIM } else { a }),

        // If one size is unknown and the other is a fixed size other than 1,
        // execution can only succeed if the unknown size is equal to it.
        (a, b) if is_unknown(a) => Some(b),
        (a, b) if is_unknown(b) => Some(a),

        _ => None,
    }
}

/// Broadcast two shapes together.
///
/// The shorter shape is left-padded with 1s. Each pair of aligned sizes then
/// combines as follows:
///
/// - Equal sizes produce that size
/// - If one size is 1, the result is the other size
/// - If one size is unknown and the other is a fixed size other than 1, the
///   result is the fixed size
/// - Two unknown sizes produce an unknown size
/// - Any other combination is an error
pub fn broadcast_shapes(a: &[Dim], b: &[Dim]) -> Result<Shape, InferShapesError> {
    let a_pad = b.len().saturating_sub(a.len());
    let b_pad = a.len().saturating_sub(b.len());

    let a_iter = std::iter::repeat(1).take(a_pad).chain(a.iter().copied());
    let b_iter = std::iter::repeat(1).take(b_pad).chain(b.iter().copied());

    a_iter
        .zip(b_iter)
        .map(|(a, b)| broadcast_dim(a, b).ok_or(InferShapesError::IncompatibleShapes))
        .collect()
}

/// Combine two shapes recorded for the same tensor.
///
/// Returns `None` if the ranks differ. Otherwise returns a shape where sizes
/// that agree are kept and sizes that disagree become [`UNKNOWN_DIM`].
pub fn get_common_shape(x: &[Dim], y: &[Dim]) -> Option<Shape> {
    if x.len() != y.len() {
        return None;
    }
    let common = x
        .iter()
        .zip(y)
        .map(|(&a, &b)| if a == b { a } else { UNKNOWN_DIM })
        .collect();
    Some(common)
}

/// Return true if every dimension of `shape` has a known, non-zero size.
pub fn is_static_shape(shape: &[Dim]) -> bool {
    shape.iter().all(|&d| d > 0)
}

/// Return true if `x` is an instance of the reference shape `y`.
///
/// `y` may use [`UNKNOWN_DIM`] for a size that matches anything. A missing
/// reference shape matches every shape.
pub fn is_a_shape_of(x: &[Dim], y: Option<&[Dim]>) -> bool {
    let Some(y) = y else {
        return true;
    };
    x.len() == y.len() && x.iter().zip(y).all(|(&a, &b)| a == b || b == UNKNOWN_DIM)
}

/// Shape inference for reduction operators.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionOp<'a> {
    /// Axes over which the reduction is applied.
    pub axes: &'a [i32],

    /// True if the reduced dimension is retained as a 1-sized dimension in the
    /// output.
    pub keep_dims: bool,

    /// Reduce over every element, producing a single-element vector.
    pub reduce_all: bool,
}

impl InferShapes for ReductionOp<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        if self.reduce_all {
            return Ok([vec![1]].into());
        }

        let axes = resolve_axes(data.len(), self.axes.iter())?;
        let out_shape = reduce_dims(data, &axes, self.keep_dims);

        Ok([out_shape].into())
    }
}

/// Remove the dimensions listed in `axes` from `shape`, or set them to 1 if
/// `keep_dims` is true.
///
/// Scalar results are represented as a single-element vector.
pub(crate) fn reduce_dims(shape: &[Dim], axes: &[usize], keep_dims: bool) -> Shape {
    let mut out_shape: Shape = Vec::with_capacity(shape.len());
    for (i, &dim) in shape.iter().enumerate() {
        if !axes.contains(&i) {
            out_shape.push(dim);
        } else if keep_dims {
            out_shape.push(1);
        }
    }
    if out_shape.is_empty() {
        out_shape.push(1);
    }
    out_shape
}

/// Resolve an index given as a value in `[-len, len-1]` to a positive index in
/// `[0, len)`, or return None if the index is out of bounds.
fn resolve_index(len: usize, index: i32) -> Option<usize> {
    let len = len.min(i32::MAX as usize) as i32;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub(crate) fn resolve_axis(ndim: usize, axis: i32) -> Result<usize, InferShapesError> {
    resolve_index(ndim, axis).ok_or(InferShapesError::IncorrectRank)
}

/// Resolve a sequence of axes values in `[-ndim, ndim-1]` to sorted,
/// de-duplicated zero-based dimension indexes.
pub(crate) fn resolve_axes<'a, I: ExactSizeIterator<Item = &'a i32>>(
    ndim: usize,
    axes: I,
) -> Result<SmallVec<[usize; 4]>, InferShapesError> {
    let mut resolved_axes = SmallVec::with_capacity(axes.len());
    for axis in axes {
        let resolved = resolve_axis(ndim, *axis)?;
        resolved_axes.push(resolved);
    }
    resolved_axes.sort();
    resolved_axes.dedup();
    Ok(resolved_axes)
}

#[cfg(test)]
mod tests {
    use nnssa_testing::TestCases;

    use super::{
        broadcast_shapes, get_common_shape, is_a_shape_of, is_static_shape, BinaryOp, InferShapes,
        InferShapesError, LogicalOp, ReductionOp, Shape, UnaryOp,
    };

    #[test]
    fn test_unary_op_infer() {
        let input = vec![2, 16, -1, 24];
        let shape = UnaryOp.infer_shapes(&[input.clone()]).unwrap();
        assert_eq!(shape, [input]);

        let err = UnaryOp.infer_shapes(&[]).err().unwrap();
        assert_eq!(err, InferShapesError::IncorrectInputCount);
    }

    #[test]
    fn test_binary_op() {
        #[derive(Debug)]
        struct Case {
            lhs: Shape,
            rhs: Shape,
            expected: Shape,
        }

        let cases = [
            Case {
                lhs: vec![2, 3],
                rhs: vec![2, 3],
                expected: vec![2, 3],
            },
            Case {
                lhs: vec![1, 4],
                rhs: vec![3, 1],
                expected: vec![3, 4],
            },
            Case {
                lhs: vec![5],
                rhs: vec![2, 3, 5],
                expected: vec![2, 3, 5],
            },
            Case {
                lhs: vec![-1, 4],
                rhs: vec![3, 4],
                expected: vec![3, 4],
            },
            Case {
                lhs: vec![-1],
                rhs: vec![-1],
                expected: vec![-1],
            },
            // An unknown size broadcast against 1 stays unknown.
            Case {
                lhs: vec![-1, 1],
                rhs: vec![1, 6],
                expected: vec![-1, 6],
            },
        ];

        cases.test_each(|case| {
            let shape = BinaryOp
                .infer_shapes(&[case.lhs.clone(), case.rhs.clone()])
                .unwrap();
            assert_eq!(shape, [case.expected.clone()]);

            // Broadcasting is symmetric.
            let swapped = broadcast_shapes(&case.rhs, &case.lhs).unwrap();
            assert_eq!(swapped, case.expected);
        });
    }

    #[test]
    fn test_binary_op_invalid() {
        #[derive(Clone, Debug)]
        struct Case {
            inputs: Vec<Shape>,
            expected: InferShapesError,
        }

        let cases = [
            Case {
                inputs: [vec![5]].into(),
                expected: InferShapesError::IncorrectInputCount,
            },
            Case {
                inputs: [vec![2], vec![3]].into(),
                expected: InferShapesError::IncompatibleShapes,
            },
            Case {
                inputs: [vec![4, 2], vec![3, 2]].into(),
                expected: InferShapesError::IncompatibleShapes,
            },
        ];

        cases.test_each_clone(|case| {
            let err = BinaryOp.infer_shapes(&case.inputs).err().unwrap();
            assert_eq!(err, case.expected);
        });
    }

    #[test]
    fn test_logical_op() {
        let shapes = LogicalOp.infer_shapes(&[vec![3, 4], vec![1]]).unwrap();
        assert_eq!(shapes, [vec![1]]);

        let err = LogicalOp.infer_shapes(&[vec![3, 4]]).err().unwrap();
        assert_eq!(err, InferShapesError::IncorrectInputCount);
    }

    #[test]
    fn test_reduction_op() {
        #[derive(Clone, Debug)]
        struct Case<'a> {
            input: Shape,
            op: ReductionOp<'a>,
            expected: Shape,
        }

        let default_op = ReductionOp {
            axes: &[1],
            keep_dims: false,
            reduce_all: false,
        };

        let cases = [
            Case {
                input: vec![-1, 4, 5],
                op: default_op.clone(),
                expected: vec![-1, 5],
            },
            Case {
                input: vec![-1, 4, 5],
                op: ReductionOp {
                    keep_dims: true,
                    ..default_op.clone()
                },
                expected: vec![-1, 1, 5],
            },
            Case {
                input: vec![3, 4, 5],
                op: ReductionOp {
                    axes: &[0, -1],
                    ..default_op.clone()
                },
                expected: vec![4],
            },
            Case {
                input: vec![3, 4],
                op: ReductionOp {
                    axes: &[0],
                    ..default_op.clone()
                },
                expected: vec![4],
            },
            // Reducing every axis leaves a single-element vector.
            Case {
                input: vec![7],
                op: ReductionOp {
                    axes: &[0],
                    ..default_op.clone()
                },
                expected: vec![1],
            },
            Case {
                input: vec![3, 4, 5],
                op: ReductionOp {
                    reduce_all: true,
                    ..default_op.clone()
                },
                expected: vec![1],
            },
        ];

        cases.test_each(|case| {
            let shapes = case.op.infer_shapes(&[case.input.clone()]).unwrap();
            assert_eq!(shapes, [case.expected.clone()]);
        });
    }

    #[test]
    fn test_reduction_op_invalid_axis() {
        let op = ReductionOp {
            axes: &[2],
            keep_dims: false,
            reduce_all: false,
        };
        let err = op.infer_shapes(&[vec![3, 4]]).err().unwrap();
        assert_eq!(err, InferShapesError::IncorrectRank);
    }

    #[test]
    fn test_get_common_shape() {
        #[derive(Debug)]
        struct Case {
            x: Shape,
            y: Shape,
            expected: Option<Shape>,
        }

        let cases = [
            Case {
                x: vec![2, 3],
                y: vec![2, 3],
                expected: Some(vec![2, 3]),
            },
            Case {
                x: vec![2, 3],
                y: vec![2, 5],
                expected: Some(vec![2, -1]),
            },
            Case {
                x: vec![-1, 3],
                y: vec![4, 3],
                expected: Some(vec![-1, 3]),
            },
            Case {
                x: vec![2, 3],
                y: vec![2, 3, 1],
                expected: None,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(get_common_shape(&case.x, &case.y), case.expected);
            assert_eq!(get_common_shape(&case.y, &case.x), case.expected);
            assert_eq!(get_common_shape(&case.x, &case.x).as_ref(), Some(&case.x));
        });
    }

    #[test]
    fn test_is_a_shape_of() {
        #[derive(Debug)]
        struct Case {
            x: Shape,
            y: Option<Shape>,
            expected: bool,
        }

        let cases = [
            Case {
                x: vec![2, 3],
                y: None,
                expected: true,
            },
            Case {
                x: vec![2, 3],
                y: Some(vec![2, 3]),
                expected: true,
            },
            Case {
                x: vec![2, 3],
                y: Some(vec![-1, 3]),
                expected: true,
            },
            Case {
                x: vec![-1, 3],
                y: Some(vec![2, 3]),
                expected: false,
            },
            Case {
                x: vec![2, 3],
                y: Some(vec![2]),
                expected: false,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(is_a_shape_of(&case.x, case.y.as_deref()), case.expected);
        });
    }

    #[test]
    fn test_is_static_shape() {
        assert!(is_static_shape(&[1, 2, 3]));
        assert!(is_static_shape(&[]));
        assert!(!is_static_shape(&[1, -1]));
        assert!(!is_static_shape(&[0, 2]));
    }
}
