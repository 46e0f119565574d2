use crate::infer_shapes::{is_unknown, resolve_axis, InferShapes, InferShapesError, Shape};

/// Split a tensor into equal-sized parts along an axis.
pub struct Split {
    /// Axis to split the tensor along.
    pub axis: i32,

    /// Number of pieces to split the tensor into.
    pub num_splits: usize,
}

impl InferShapes for Split {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::NotImplemented("split with dynamic split sizes"));
        };

        if self.num_splits == 0 {
            return Err(InferShapesError::InvalidValue("split count is zero"));
        }

        let axis = resolve_axis(data.len(), self.axis)?;
        let mut shape = data.clone();
        let dim = shape[axis];
        if !is_unknown(dim) {
            let num_splits = self.num_splits as i64;
            if dim % num_splits != 0 {
                return Err(InferShapesError::IncompatibleShapes);
            }
            if dim / num_splits == 0 {
                return Err(InferShapesError::ZeroSizedOutput);
            }
            shape[axis] = dim / num_splits;
        }

        Ok(vec![shape; self.num_splits])
    }
}

#[cfg(test)]
mod tests {
    use super::Split;
    use crate::infer_shapes::{InferShapes, InferShapesError};

    #[test]
    fn test_split() {
        let op = Split {
            axis: 0,
            num_splits: 3,
        };
        let result = op.infer_shapes(&[vec![6, 4]]).unwrap();
        assert_eq!(result, [vec![2, 4], vec![2, 4], vec![2, 4]]);

        let op = Split {
            axis: -1,
            num_splits: 2,
        };
        let result = op.infer_shapes(&[vec![-1, 8]]).unwrap();
        assert_eq!(result, [vec![-1, 4], vec![-1, 4]]);

        // Unknown sizes stay unknown.
        let op = Split {
            axis: 0,
            num_splits: 2,
        };
        let result = op.infer_shapes(&[vec![-1, 8]]).unwrap();
        assert_eq!(result, [vec![-1, 8], vec![-1, 8]]);
    }

    #[test]
    fn test_split_invalid() {
        let op = Split {
            axis: 0,
            num_splits: 4,
        };
        let err = op.infer_shapes(&[vec![6, 4]]).err().unwrap();
        assert_eq!(err, InferShapesError::IncompatibleShapes);

        let err = op.infer_shapes(&[vec![0, 4]]).err().unwrap();
        assert_eq!(err, InferShapesError::ZeroSizedOutput);

        let err = op.infer_shapes(&[vec![6, 4], vec![2]]).err().unwrap();
        assert!(matches!(err, InferShapesError::NotImplemented(_)));
    }
}
