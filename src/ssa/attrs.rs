use rten_tensor::Tensor;
use rustc_hash::FxHashMap;

use super::AttrValue;
use crate::error::{convert_error, ConvertError};

/// Typed access to the attributes of a node.
#[derive(Copy, Clone)]
pub struct Attrs<'a> {
    node: &'a str,
    attrs: &'a FxHashMap<String, AttrValue>,
}

impl<'a> Attrs<'a> {
    pub(crate) fn new(node: &'a str, attrs: &'a FxHashMap<String, AttrValue>) -> Self {
        Self { node, attrs }
    }

    /// Get an optional attribute.
    pub fn get(&self, name: &'static str) -> Option<Attr<'a>> {
        let value = self.attrs.get(name)?;
        Some(Attr {
            node: self.node,
            name,
            value,
        })
    }

    /// Get a required attribute.
    pub fn require(&self, name: &'static str) -> Result<Attr<'a>, ConvertError> {
        self.get(name).ok_or_else(|| {
            convert_error!(
                InvalidAttribute,
                self.node,
                "required attribute \"{}\" missing",
                name
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }
}

/// Wrapper around an attribute value.
///
/// This provides methods to extract the value as a given type. Extraction
/// fails if the value has a different type.
#[derive(Copy, Clone)]
pub struct Attr<'a> {
    node: &'a str,
    name: &'static str,
    value: &'a AttrValue,
}

impl<'a> Attr<'a> {
    fn type_error(&self, expected: &str) -> ConvertError {
        convert_error!(
            InvalidAttribute,
            self.node,
            "attribute \"{}\" has type {}, expected {}",
            self.name,
            self.value.type_name(),
            expected
        )
    }

    pub fn value(&self) -> &'a AttrValue {
        self.value
    }

    pub fn as_bool(&self) -> Result<bool, ConvertError> {
        match self.value {
            AttrValue::Bool(b) => Ok(*b),
            AttrValue::Int(i) => Ok(*i != 0),
            _ => Err(self.type_error("bool")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, ConvertError> {
        match self.value {
            AttrValue::Int(i) => Ok(*i),
            AttrValue::Ints(ints) if ints.len() == 1 => Ok(ints[0]),
            _ => Err(self.type_error("int")),
        }
    }

    pub fn as_i32(&self) -> Result<i32, ConvertError> {
        let value = self.as_i64()?;
        i32::try_from(value).map_err(|_| {
            convert_error!(
                InvalidAttribute,
                self.node,
                "attribute \"{}\" value {} is out of range",
                self.name,
                value
            )
        })
    }

    /// Get a non-negative integer value.
    pub fn as_usize(&self) -> Result<usize, ConvertError> {
        let value = self.as_i64()?;
        usize::try_from(value).map_err(|_| {
            convert_error!(
                InvalidAttribute,
                self.node,
                "attribute \"{}\" must be non-negative, but is {}",
                self.name,
                value
            )
        })
    }

    pub fn as_f32(&self) -> Result<f32, ConvertError> {
        match self.value {
            AttrValue::Float(f) => Ok(*f as f32),
            AttrValue::Int(i) => Ok(*i as f32),
            AttrValue::Floats(floats) if floats.len() == 1 => Ok(floats[0] as f32),
            _ => Err(self.type_error("float")),
        }
    }

    pub fn as_str(&self) -> Result<&'a str, ConvertError> {
        match self.value {
            AttrValue::Str(s) => Ok(s),
            _ => Err(self.type_error("string")),
        }
    }

    /// Get an integer list value. A single integer is treated as a list of
    /// length one.
    pub fn as_ints(&self) -> Result<Vec<i64>, ConvertError> {
        match self.value {
            AttrValue::Ints(ints) => Ok(ints.clone()),
            AttrValue::Int(i) => Ok(vec![*i]),
            _ => Err(self.type_error("ints")),
        }
    }

    pub fn as_i32_ints(&self) -> Result<Vec<i32>, ConvertError> {
        self.as_ints()?
            .into_iter()
            .map(|value| {
                i32::try_from(value).map_err(|_| {
                    convert_error!(
                        InvalidAttribute,
                        self.node,
                        "attribute \"{}\" value {} is out of range",
                        self.name,
                        value
                    )
                })
            })
            .collect()
    }

    pub fn as_int_lists(&self) -> Result<&'a [Vec<i64>], ConvertError> {
        match self.value {
            AttrValue::IntLists(lists) => Ok(lists),
            _ => Err(self.type_error("int lists")),
        }
    }

    pub fn as_tensor(&self) -> Result<&'a Tensor<f32>, ConvertError> {
        match self.value {
            AttrValue::Tensor(tensor) => Ok(tensor),
            _ => Err(self.type_error("tensor")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ConvertErrorKind;
    use crate::ssa::{AttrValue, SsaNode};

    #[test]
    fn test_attr_access() {
        let node = SsaNode::new("split", "Split", &[])
            .with_attr("split_dim", AttrValue::Int(1))
            .with_attr("split", AttrValue::Ints(vec![2, 2, 2]))
            .with_attr("alpha", AttrValue::Int(2))
            .with_attr("keep_dims", AttrValue::Bool(true))
            .with_attr("padding", AttrValue::Str("VALID".into()));
        let attrs = node.attrs();

        assert_eq!(attrs.require("split_dim").unwrap().as_i32().unwrap(), 1);
        assert_eq!(attrs.require("split").unwrap().as_ints().unwrap(), [2, 2, 2]);
        assert_eq!(attrs.require("alpha").unwrap().as_f32().unwrap(), 2.0);
        assert!(attrs.require("keep_dims").unwrap().as_bool().unwrap());
        assert_eq!(attrs.require("padding").unwrap().as_str().unwrap(), "VALID");
        assert!(attrs.get("axis").is_none());

        let err = attrs.require("axis").err().unwrap();
        assert_eq!(err.kind(), ConvertErrorKind::InvalidAttribute);
        assert_eq!(err.node_path(), ["split"]);

        let err = attrs.require("padding").unwrap().as_i64().err().unwrap();
        assert_eq!(
            err.to_string(),
            "invalid attribute for \"split\": attribute \"padding\" has type string, expected int"
        );
    }
}
