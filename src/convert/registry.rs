use rustc_hash::FxHashMap;

use super::{control_flow, ops, ConversionContext};
use crate::error::{ConvertError, ConvertErrorImpl};
use crate::ssa::SsaNode;

/// Lowering routine for one SSA operator kind.
///
/// A routine reads the node's attributes and resolved inputs from the
/// [`ConversionContext`] and emits zero or more layers into the network for
/// the function being lowered. Routines for bookkeeping nodes only update
/// tuple bindings.
pub trait LowerOp {
    fn lower(&self, ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError>;
}

impl<F> LowerOp for F
where
    F: Fn(&mut ConversionContext, &SsaNode) -> Result<(), ConvertError>,
{
    fn lower(&self, ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
        self(ctx, node)
    }
}

/// Lowering table mapping SSA operator kinds to lowering routines.
///
/// New registries have no operators registered. To create a registry with
/// all built-in lowerings, use [`LoweringRegistry::with_all_ops`]. Custom
/// lowerings can be added, or built-in ones replaced, with
/// [`LoweringRegistry::register_op`].
#[derive(Default)]
pub struct LoweringRegistry {
    ops: FxHashMap<&'static str, Box<dyn LowerOp>>,
}

impl LoweringRegistry {
    /// Create a new empty registry.
    pub fn new() -> LoweringRegistry {
        LoweringRegistry::default()
    }

    /// Register the lowering routine for an operator kind, replacing any
    /// existing routine.
    pub fn register_op<L: LowerOp + 'static>(&mut self, op_type: &'static str, lower: L) {
        self.ops.insert(op_type, Box::new(lower));
    }

    /// Return true if a lowering is registered for `op_type`.
    pub fn supports(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    /// Lower `node` using the routine registered for its operator kind.
    pub(crate) fn lower(
        &self,
        ctx: &mut ConversionContext,
        node: &SsaNode,
    ) -> Result<(), ConvertError> {
        let lower = self.ops.get(node.op.as_str()).ok_or_else(|| {
            ConvertError::from(ConvertErrorImpl::UnsupportedOperator {
                name: node.name.clone(),
                op_type: node.op.clone(),
            })
        })?;
        lower.lower(ctx, node)
    }

    /// Create a new registry with all built-in lowerings registered.
    pub fn with_all_ops() -> LoweringRegistry {
        let mut reg = LoweringRegistry::new();

        macro_rules! register_op {
            ($op_type:literal, $module:ident::$lower:ident) => {
                reg.register_op($op_type, $module::$lower)
            };
        }

        register_op!("Placeholder", ops::skip);
        register_op!("function_entry", ops::skip);
        register_op!("return", ops::skip);
        register_op!("Const", ops::lower_const);
        register_op!("make_tuple", ops::lower_make_tuple);
        register_op!("get_tuple", ops::lower_get_tuple);
        register_op!("while", control_flow::lower_while);
        register_op!("cond", control_flow::lower_cond);

        register_op!("Transpose", ops::lower_transpose);
        register_op!("Shape", ops::lower_shape);
        register_op!("StridedSlice", ops::lower_strided_slice);
        register_op!("Range", ops::lower_range);
        register_op!("ExpandDims", ops::lower_expand_dims);
        register_op!("Reshape", ops::lower_reshape);
        register_op!("ReverseV2", ops::lower_reverse);
        register_op!("ReverseSequence", ops::lower_reverse_sequence);
        register_op!("ConcatV2", ops::lower_concat);
        register_op!("Pack", ops::lower_pack);
        register_op!("Unpack", ops::lower_unpack);
        register_op!("Split", ops::lower_split);
        register_op!("Gather", ops::lower_gather);

        register_op!("TensorArrayV3", ops::lower_tensor_array);
        register_op!("TensorArrayScatterV3", ops::lower_tensor_array_scatter);
        register_op!("TensorArrayReadV3", ops::lower_tensor_array_read);
        register_op!("TensorArrayWriteV3", ops::lower_tensor_array_write);
        register_op!("TensorArraySizeV3", ops::lower_tensor_array_size);
        register_op!("TensorArrayGatherV3", ops::lower_tensor_array_gather);

        register_op!("Less", ops::lower_logical);
        register_op!("NotEqual", ops::lower_logical);
        register_op!("LogicalAnd", ops::lower_logical);
        register_op!("Add", ops::lower_binary);
        register_op!("BiasAdd", ops::lower_binary);
        register_op!("Sub", ops::lower_binary);
        register_op!("Mul", ops::lower_binary);
        register_op!("Maximum", ops::lower_binary);
        register_op!("Minimum", ops::lower_binary);
        register_op!("SquaredDifference", ops::lower_squared_difference);
        register_op!("Log", ops::lower_unary);
        register_op!("Rsqrt", ops::lower_unary);
        register_op!("Sqrt", ops::lower_unary);
        register_op!("Pow", ops::lower_pow);

        register_op!("Sigmoid", ops::lower_activation);
        register_op!("Relu", ops::lower_activation);
        register_op!("LeakyRelu", ops::lower_activation);
        register_op!("Tanh", ops::lower_activation);
        register_op!("Identity", ops::lower_activation);
        register_op!("Cast", ops::lower_activation);
        register_op!("Softmax", ops::lower_softmax);

        register_op!("MatMul", ops::lower_matmul);
        register_op!("BatchMatMul", ops::lower_matmul);
        register_op!("InnerProduct", ops::lower_inner_product);
        register_op!("Conv2D", ops::lower_conv2d);
        register_op!("Embedding", ops::lower_embedding);

        register_op!("Sum", ops::lower_reduce);
        register_op!("Mean", ops::lower_reduce);
        register_op!("ArgMax", ops::lower_argmax);

        reg
    }
}

#[cfg(test)]
mod tests {
    use super::LoweringRegistry;

    #[test]
    fn test_with_all_ops() {
        let reg = LoweringRegistry::with_all_ops();
        for op_type in ["Placeholder", "while", "cond", "MatMul", "TensorArrayV3"] {
            assert!(reg.supports(op_type), "{} not registered", op_type);
        }
        assert!(!reg.supports("Conv3D"));
        assert!(!LoweringRegistry::new().supports("Const"));
    }
}
