use std::error::Error;
use std::fmt::{Display, Formatter};

use nnssa_shape_inference::{InferShapesError, Shape};

/// Errors that occur when lowering an SSA program or propagating shapes
/// through a network.
#[derive(Debug)]
pub struct ConvertError(ConvertErrorImpl);

impl ConvertError {
    /// Name hierarchy of the nodes or layers that this error relates to.
    ///
    /// For an error in a top-level function this contains one entry, the name
    /// of the offending node, or is empty if the error does not relate to a
    /// particular node.
    ///
    /// When an error occurs while lowering a loop or branch subgraph, the last
    /// entry is the node in the inner-most subgraph and the previous entries
    /// are the control-flow nodes in the enclosing functions.
    pub fn node_path(&self) -> Vec<&str> {
        self.0.node_path()
    }

    /// Return the general category of error.
    pub fn kind(&self) -> ConvertErrorKind {
        self.0.kind()
    }

    pub(crate) fn shape_error(name: &str, error: InferShapesError, inputs: &[Shape]) -> Self {
        ConvertErrorImpl::ShapeError {
            name: name.to_string(),
            error,
            inputs: inputs.to_vec(),
        }
        .into()
    }

    pub(crate) fn subgraph_error(name: &str, error: Self) -> Self {
        ConvertErrorImpl::SubgraphError {
            name: name.to_string(),
            error: Box::new(error),
        }
        .into()
    }
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

impl From<ConvertErrorImpl> for ConvertError {
    fn from(inner: ConvertErrorImpl) -> Self {
        Self(inner)
    }
}

/// Categories of conversion error. See [`ConvertError::kind`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ConvertErrorKind {
    /// No lowering routine or shape rule exists for an operator kind.
    UnsupportedOperator,

    /// Two shapes required for the same edge disagree, or a shape rule found
    /// no valid result for its inputs.
    ShapeMismatch,

    /// A loop or branch node does not have the structure lowering requires,
    /// or a tuple binding was registered twice.
    ControlFlowMismatch,

    /// A node references an edge that has not been produced, or needs a
    /// static value or shape that is only known at runtime.
    UnresolvedInput,

    /// An explicit input or output requested by the caller does not exist in
    /// the source program.
    InvalidRequest,

    /// The dependency graph of a function contains a cycle or a dangling
    /// reference.
    IllFormedGraph,

    /// A node attribute is missing or has the wrong type or value.
    InvalidAttribute,

    /// The node is recognized but this form of it cannot be lowered.
    NotImplemented,
}

/// Internal implementation of [`ConvertError`].
#[derive(Debug)]
pub(crate) enum ConvertErrorImpl {
    /// No lowering routine is registered for an SSA operator kind.
    UnsupportedOperator { name: String, op_type: String },

    /// A shape rule rejected the input shapes of a layer.
    ShapeError {
        /// Name of the layer.
        name: String,
        error: InferShapesError,

        /// Shapes of the layer inputs.
        inputs: Vec<Shape>,
    },

    /// Two shapes recorded for the same edge have different ranks.
    ShapeConflict {
        /// Name of the edge.
        name: String,
        existing: Shape,
        new: Shape,
    },

    /// A shape annotation already present on a layer does not agree with the
    /// propagated shape.
    AnnotationMismatch {
        /// Name of the layer.
        name: String,
        edge: String,
        annotated: Shape,
        inferred: Shape,
    },

    /// The shape of a layer input has not been computed.
    MissingShape {
        /// Name of the layer.
        name: String,
        index: usize,
        edge: String,
    },

    /// A node input could not be resolved to a value or shape.
    UnresolvedInput { name: String, error: String },

    /// A loop or branch node is malformed.
    ControlFlowMismatch { name: String, error: String },

    /// A tuple binding name was registered more than once.
    DuplicateBinding { name: String },

    /// A function's dependency graph is not a DAG.
    IllFormedGraph { name: String, error: String },

    /// A node attribute is missing or invalid.
    InvalidAttribute { name: String, error: String },

    /// The node uses a form of an operator which cannot be lowered.
    NotImplemented { name: String, error: String },

    /// The conversion request references names not in the program.
    InvalidRequest(String),

    /// An error occurred while lowering a loop or branch subgraph.
    SubgraphError {
        /// Name of the control-flow node which owns the subgraph.
        name: String,

        /// Error that occurred inside the subgraph.
        error: Box<ConvertError>,
    },
}

impl ConvertErrorImpl {
    fn kind(&self) -> ConvertErrorKind {
        type Kind = ConvertErrorKind;

        match self {
            Self::UnsupportedOperator { .. } => Kind::UnsupportedOperator,
            Self::ShapeError { error, .. } => match error {
                InferShapesError::NotImplemented(_) => Kind::NotImplemented,
                _ => Kind::ShapeMismatch,
            },
            Self::ShapeConflict { .. } | Self::AnnotationMismatch { .. } => Kind::ShapeMismatch,
            Self::MissingShape { .. } | Self::UnresolvedInput { .. } => Kind::UnresolvedInput,
            Self::ControlFlowMismatch { .. } | Self::DuplicateBinding { .. } => {
                Kind::ControlFlowMismatch
            }
            Self::IllFormedGraph { .. } => Kind::IllFormedGraph,
            Self::InvalidAttribute { .. } => Kind::InvalidAttribute,
            Self::NotImplemented { .. } => Kind::NotImplemented,
            Self::InvalidRequest(_) => Kind::InvalidRequest,
            Self::SubgraphError { error, .. } => error.kind(),
        }
    }

    fn node_path(&self) -> Vec<&str> {
        match self {
            Self::UnsupportedOperator { name, .. }
            | Self::ShapeError { name, .. }
            | Self::ShapeConflict { name, .. }
            | Self::AnnotationMismatch { name, .. }
            | Self::MissingShape { name, .. }
            | Self::UnresolvedInput { name, .. }
            | Self::ControlFlowMismatch { name, .. }
            | Self::DuplicateBinding { name }
            | Self::IllFormedGraph { name, .. }
            | Self::InvalidAttribute { name, .. }
            | Self::NotImplemented { name, .. } => [name.as_str()].into(),
            Self::InvalidRequest(_) => Vec::new(),
            Self::SubgraphError { name, error } => {
                let mut path = vec![name.as_str()];
                path.extend(error.node_path());
                path
            }
        }
    }

    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ShapeError { error, .. } => Some(error),
            Self::SubgraphError { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl Display for ConvertErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedOperator { name, op_type } => {
                write!(f, "conversion for op \"{}\" of type {} is not supported", name, op_type)
            }
            Self::ShapeError {
                name,
                error,
                inputs,
            } => {
                write!(
                    f,
                    "shape inference for layer \"{}\" failed: {}. Input shapes were {:?}",
                    name, error, inputs
                )
            }
            Self::ShapeConflict {
                name,
                existing,
                new,
            } => write!(
                f,
                "unable to resolve shape for blob \"{}\", with potential shapes {:?} and {:?}",
                name, existing, new
            ),
            Self::AnnotationMismatch {
                name,
                edge,
                annotated,
                inferred,
            } => write!(
                f,
                "layer \"{}\" has shape {:?} recorded for \"{}\" but propagation produced {:?}",
                name, annotated, edge, inferred
            ),
            Self::MissingShape { name, index, edge } => write!(
                f,
                "shape of input[{}] \"{}\" needed for layer \"{}\" cannot be determined",
                index, edge, name
            ),
            Self::UnresolvedInput { name, error } => {
                write!(f, "unresolved input for \"{}\": {}", name, error)
            }
            Self::ControlFlowMismatch { name, error } => {
                write!(f, "malformed control flow node \"{}\": {}", name, error)
            }
            Self::DuplicateBinding { name } => {
                write!(f, "tuple binding \"{}\" is already defined", name)
            }
            Self::IllFormedGraph { name, error } => {
                write!(f, "ill-formed graph in function \"{}\": {}", name, error)
            }
            Self::InvalidAttribute { name, error } => {
                write!(f, "invalid attribute for \"{}\": {}", name, error)
            }
            Self::NotImplemented { name, error } => {
                write!(f, "conversion of \"{}\" is not implemented: {}", name, error)
            }
            Self::InvalidRequest(error) => write!(f, "invalid conversion request: {}", error),
            Self::SubgraphError { name, error } => {
                write!(f, "in subgraph of \"{}\": {}", name, error)
            }
        }
    }
}

/// Create a [`ConvertError`] whose implementation variant has a node name and
/// a formatted message.
macro_rules! convert_error {
    ($kind:ident, $node_name:expr, $format_str:literal $(, $arg:expr)* $(,)?) => {{
        let err = format!($format_str $(, $arg)*);
        $crate::error::ConvertError::from($crate::error::ConvertErrorImpl::$kind {
            name: $node_name.to_string(),
            error: err,
        })
    }};
}

pub(crate) use convert_error;

#[cfg(test)]
mod tests {
    use std::error::Error;

    use nnssa_shape_inference::InferShapesError;

    use super::{convert_error, ConvertError, ConvertErrorImpl, ConvertErrorKind};

    #[test]
    fn test_node_path() {
        let inner = convert_error!(InvalidAttribute, "body/add", "missing attribute \"{}\"", "axis");
        assert_eq!(inner.node_path(), ["body/add"]);

        let err = ConvertError::subgraph_error("while_0", inner);
        assert_eq!(err.node_path(), ["while_0", "body/add"]);
        assert_eq!(err.kind(), ConvertErrorKind::InvalidAttribute);
        assert_eq!(
            err.to_string(),
            "in subgraph of \"while_0\": invalid attribute for \"body/add\": missing attribute \"axis\""
        );

        let err: ConvertError = ConvertErrorImpl::InvalidRequest("no function".into()).into();
        assert!(err.node_path().is_empty());
    }

    #[test]
    fn test_shape_error() {
        let err = ConvertError::shape_error(
            "add",
            InferShapesError::IncompatibleShapes,
            &[vec![2], vec![3]],
        );
        assert_eq!(err.kind(), ConvertErrorKind::ShapeMismatch);
        assert_eq!(
            err.to_string(),
            "shape inference for layer \"add\" failed: input shapes are incompatible. Input shapes were [[2], [3]]"
        );
        assert!(err.source().is_some());

        let err = ConvertError::shape_error(
            "conv",
            InferShapesError::NotImplemented("dynamic weights"),
            &[],
        );
        assert_eq!(err.kind(), ConvertErrorKind::NotImplemented);
    }
}
