use crate::infer_shapes::{reduce_dims, resolve_axis, InferShapes, InferShapesError, Shape};

/// Index of the largest value along an axis.
pub struct ArgMax {
    pub axis: i32,
    pub keep_dims: bool,
}

impl InferShapes for ArgMax {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let axis = resolve_axis(data.len(), self.axis)?;
        Ok([reduce_dims(data, &[axis], self.keep_dims)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::ArgMax;
    use crate::infer_shapes::InferShapes;

    #[test]
    fn test_arg_max() {
        let op = ArgMax {
            axis: -1,
            keep_dims: false,
        };
        assert_eq!(op.infer_shapes(&[vec![2, 3, 10]]).unwrap(), [vec![2, 3]]);

        let op = ArgMax {
            axis: 1,
            keep_dims: true,
        };
        assert_eq!(op.infer_shapes(&[vec![2, 3, 10]]).unwrap(), [vec![2, 1, 10]]);
    }
}
