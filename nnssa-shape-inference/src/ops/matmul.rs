use crate::infer_shapes::{is_unknown, Dim, InferShapes, InferShapesError, Shape};
use crate::ops::merge_dim;

/// Batched matrix multiplication.
///
/// With one input, the right-hand operand is a constant weight matrix with
/// `weight_cols` columns. With two inputs, both operands must have rank >= 2
/// and the same batch dimensions. The transpose flags apply to the last two
/// dimensions of each operand.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchedMatMul {
    pub transpose_a: bool,
    pub transpose_b: bool,

    /// Rows and columns of the constant weight, if there is one.
    pub weight_shape: Option<(usize, usize)>,
}

impl InferShapes for BatchedMatMul {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        match inputs {
            [a] => {
                let Some((rows, cols)) = self.weight_shape else {
                    return Err(InferShapesError::InvalidValue(
                        "single-input matmul requires a weight matrix",
                    ));
                };
                let Some(&k) = a.last() else {
                    return Err(InferShapesError::IncorrectRank);
                };
                if !is_unknown(k) && k != rows as Dim {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                let mut out_shape = a.clone();
                if let Some(last) = out_shape.last_mut() {
                    *last = cols as Dim;
                }
                Ok([out_shape].into())
            }
            [a, b] => {
                if a.len() < 2 || b.len() < 2 {
                    return Err(InferShapesError::IncorrectRank);
                }
                let (a_batch, a_mat) = a.split_at(a.len() - 2);
                let (b_batch, b_mat) = b.split_at(b.len() - 2);
                if a_batch.len() != b_batch.len() {
                    return Err(InferShapesError::IncorrectRank);
                }

                let (a_rows, a_cols) = if self.transpose_a {
                    (a_mat[1], a_mat[0])
                } else {
                    (a_mat[0], a_mat[1])
                };
                let (b_rows, b_cols) = if self.transpose_b {
                    (b_mat[1], b_mat[0])
                } else {
                    (b_mat[0], b_mat[1])
                };
                merge_dim(a_cols, b_rows)?;

                let mut out_shape = a_batch
                    .iter()
                    .zip(b_batch)
                    .map(|(&a, &b)| merge_dim(a, b))
                    .collect::<Result<Shape, _>>()?;
                out_shape.extend([a_rows, b_cols]);

                Ok([out_shape].into())
            }
            _ => Err(InferShapesError::IncorrectInputCount),
        }
    }
}

/// Fully connected layer.
///
/// With one input, the weight is static and the trailing dimension of the
/// input must equal `input_channels`. With two inputs, the second input is a
/// dynamic weight matrix whose second-to-last dimension is the contraction
/// dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct InnerProduct {
    pub input_channels: usize,
    pub output_channels: usize,
}

impl InferShapes for InnerProduct {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let (data, in_channels, out_channels) = match inputs {
            [data] => (
                data,
                self.input_channels as Dim,
                self.output_channels as Dim,
            ),
            [data, weight] => {
                if weight.len() < 2 {
                    return Err(InferShapesError::IncorrectRank);
                }
                (data, weight[weight.len() - 2], weight[weight.len() - 1])
            }
            _ => return Err(InferShapesError::IncorrectInputCount),
        };

        let Some((&k, batch)) = data.split_last() else {
            return Err(InferShapesError::IncorrectRank);
        };
        if !is_unknown(k) && !is_unknown(in_channels) && k != in_channels {
            return Err(InferShapesError::IncompatibleShapes);
        }

        let mut out_shape = batch.to_vec();
        out_shape.push(out_channels);
        Ok([out_shape].into())
    }
}
