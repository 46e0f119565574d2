use crate::infer_shapes::{
    is_unknown, resolve_axes, resolve_axis, Dim, InferShapes, InferShapesError, Shape,
};
use crate::ops::merge_dim;

/// Permute the dimensions of the input.
pub struct Transpose<'a> {
    /// Output dimension `i` is input dimension `perm[i]`.
    pub perm: &'a [usize],
}

impl InferShapes for Transpose<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        if self.perm.len() != data.len() {
            return Err(InferShapesError::IncorrectRank);
        }

        let mut seen = vec![false; data.len()];
        let mut out_shape = Vec::with_capacity(data.len());
        for &axis in self.perm {
            if axis >= data.len() || seen[axis] {
                return Err(InferShapesError::InvalidValue("transpose axes are not a permutation"));
            }
            seen[axis] = true;
            out_shape.push(data[axis]);
        }

        Ok([out_shape].into())
    }
}

/// Remove 1-sized dimensions.
pub struct Squeeze<'a> {
    pub axes: &'a [i32],
}

impl InferShapes for Squeeze<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        if self.axes.is_empty() {
            return Err(InferShapesError::NotImplemented("squeeze without explicit axes"));
        }

        let axes = resolve_axes(data.len(), self.axes.iter())?;
        if axes.iter().any(|&axis| data[axis] != 1) {
            return Err(InferShapesError::InvalidValue("squeezed dimension does not have size 1"));
        }

        let out_shape = data
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &dim)| dim)
            .collect();

        Ok([out_shape].into())
    }
}

/// Insert 1-sized dimensions.
///
/// Axes refer to positions in the output, so negative values count back from
/// the end of the output shape.
pub struct ExpandDims<'a> {
    pub axes: &'a [i32],
}

impl InferShapes for ExpandDims<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let out_ndim = data.len() + self.axes.len();
        let axes = resolve_axes(out_ndim, self.axes.iter())?;
        if axes.len() != self.axes.len() {
            return Err(InferShapesError::InvalidValue("expand_dims axes contain duplicates"));
        }

        let mut out_shape = data.clone();
        for &axis in &axes {
            out_shape.insert(axis, 1);
        }

        Ok([out_shape].into())
    }
}

/// Reshape to a static target shape.
pub struct Reshape<'a> {
    pub shape: &'a [Dim],
}

impl InferShapes for Reshape<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let all_known = |s: &[Dim]| s.iter().all(|&d| !is_unknown(d));
        if all_known(data) && all_known(self.shape) {
            let in_len: Dim = data.iter().product();
            let out_len: Dim = self.shape.iter().product();
            if in_len != out_len {
                return Err(InferShapesError::IncompatibleShapes);
            }
        }

        Ok([self.shape.to_vec()].into())
    }
}

/// Stack inputs of equal shape along a new axis.
pub struct Stack {
    pub axis: i32,
}

impl InferShapes for Stack {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [first, rest @ ..] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let mut shape = first.clone();
        for other in rest {
            if other.len() != shape.len() {
                return Err(InferShapesError::IncorrectRank);
            }
            for (dim, &other_dim) in shape.iter_mut().zip(other) {
                *dim = merge_dim(*dim, other_dim)?;
            }
        }

        let axis = resolve_axis(shape.len() + 1, self.axis)?;
        shape.insert(axis, inputs.len() as Dim);

        Ok([shape].into())
    }
}
