use crate::infer_shapes::{is_unknown, Dim, InferShapes, InferShapesError, Shape};
use crate::UNKNOWN_DIM;

/// Slice with static begin, end and stride values for every dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceStatic<'a> {
    pub begin: &'a [i64],
    pub end: &'a [i64],
    pub strides: &'a [i64],

    /// If set, the slice for the dimension starts at 0, ignoring `begin`.
    pub begin_masks: &'a [bool],

    /// If set, the slice for the dimension runs to the end, ignoring `end`.
    pub end_masks: &'a [bool],
}

impl SliceStatic<'_> {
    fn slice_len(&self, axis: usize, dim: Dim) -> Result<Dim, InferShapesError> {
        let step = self.strides[axis];
        if step <= 0 {
            return Err(InferShapesError::NotImplemented("slices with non-positive strides"));
        }

        let clamp = |index: i64| {
            let index = if index < 0 { index + dim } else { index };
            index.clamp(0, dim)
        };
        let begin = if self.begin_masks.get(axis).copied().unwrap_or(false) {
            0
        } else {
            clamp(self.begin[axis])
        };
        let end = if self.end_masks.get(axis).copied().unwrap_or(false) {
            dim
        } else {
            clamp(self.end[axis])
        };

        let len = (end - begin + step - 1) / step;
        if len <= 0 {
            return Err(InferShapesError::ZeroSizedOutput);
        }
        Ok(len)
    }
}

impl InferShapes for SliceStatic<'_> {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let ndim = data.len();
        if self.begin.len() != ndim || self.end.len() != ndim || self.strides.len() != ndim {
            return Err(InferShapesError::IncorrectRank);
        }

        let out_shape = data
            .iter()
            .enumerate()
            .map(|(axis, &dim)| {
                if is_unknown(dim) {
                    Ok(UNKNOWN_DIM)
                } else {
                    self.slice_len(axis, dim)
                }
            })
            .collect::<Result<Shape, _>>()?;

        Ok([out_shape].into())
    }
}
