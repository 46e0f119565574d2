use nnssa_shape_inference::{get_common_shape, Shape};
use rustc_hash::FxHashMap;

use crate::error::{ConvertError, ConvertErrorImpl};

/// Shapes of the tensor edges seen so far in a conversion.
///
/// Once an edge has a shape, recording another shape for it unifies the two:
/// dimensions that agree are kept and dimensions that disagree become
/// unknown. Recording a shape with a different rank is an error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeTable {
    shapes: FxHashMap<String, Shape>,
}

impl ShapeTable {
    pub fn new() -> ShapeTable {
        ShapeTable::default()
    }

    /// Record a shape for `edge`, unifying it with any existing shape.
    ///
    /// Returns the shape stored for the edge afterwards.
    pub fn record(&mut self, edge: &str, shape: Shape) -> Result<&Shape, ConvertError> {
        let unified = match self.shapes.get(edge) {
            None => shape,
            Some(existing) => get_common_shape(existing, &shape).ok_or_else(|| {
                ConvertError::from(ConvertErrorImpl::ShapeConflict {
                    name: edge.to_string(),
                    existing: existing.clone(),
                    new: shape.clone(),
                })
            })?,
        };
        let entry = self.shapes.entry(edge.to_string()).or_default();
        *entry = unified;
        Ok(entry)
    }

    /// Replace the shape of `edge` without unification.
    ///
    /// This is used when lowering determines dimensions that propagation
    /// alone could not.
    pub(crate) fn overwrite(&mut self, edge: &str, shape: Shape) {
        self.shapes.insert(edge.to_string(), shape);
    }

    pub fn get(&self, edge: &str) -> Option<&Shape> {
        self.shapes.get(edge)
    }

    pub fn contains(&self, edge: &str) -> bool {
        self.shapes.contains_key(edge)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ShapeTable;
    use crate::error::ConvertErrorKind;

    #[test]
    fn test_record_unifies_shapes() {
        let mut table = ShapeTable::new();
        assert_eq!(table.record("x", vec![2, 3]).unwrap(), &vec![2, 3]);
        assert_eq!(table.record("x", vec![2, 3]).unwrap(), &vec![2, 3]);
        assert_eq!(table.record("x", vec![4, 3]).unwrap(), &vec![-1, 3]);

        // Unknown dimensions never become known again through unification.
        assert_eq!(table.record("x", vec![4, 3]).unwrap(), &vec![-1, 3]);
        assert_eq!(table.get("x"), Some(&vec![-1, 3]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_record_rank_mismatch() {
        let mut table = ShapeTable::new();
        table.record("x", vec![2, 3]).unwrap();

        let err = table.record("x", vec![6]).err().unwrap();
        assert_eq!(err.kind(), ConvertErrorKind::ShapeMismatch);
        assert_eq!(
            err.to_string(),
            "unable to resolve shape for blob \"x\", with potential shapes [2, 3] and [6]"
        );
        assert_eq!(table.get("x"), Some(&vec![2, 3]));
    }

    #[test]
    fn test_overwrite() {
        let mut table = ShapeTable::new();
        table.record("arr", vec![4, -1, -1]).unwrap();
        table.overwrite("arr", vec![4, 8, 16]);
        assert_eq!(table.get("arr"), Some(&vec![4, 8, 16]));
        assert!(table.contains("arr"));
        assert!(!table.contains("other"));
    }
}
