use common::field_conversion::FieldValue;
use serde::{Deserialize, Serialize};

use crate::utils::errors::LayoutError;

/// A nested array of field values, as it appears in a stage input document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Value(FieldValue),
    Nested(Vec<Tensor>),
}

impl Tensor {
    /// Shape of the tensor if it is rectangular.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            Tensor::Value(_) => Some(vec![]),
            Tensor::Nested(items) => {
                let Some(first) = items.first() else {
                    return Some(vec![0]);
                };
                let inner = first.shape()?;
                for item in &items[1..] {
                    if item.shape()? != inner {
                        return None;
                    }
                }
                let mut shape = Vec::with_capacity(inner.len() + 1);
                shape.push(items.len());
                shape.extend(inner);
                Some(shape)
            }
        }
    }
}

pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

fn describe(tensor: &Tensor) -> String {
    match tensor.shape() {
        Some(shape) => format!("found shape {shape:?}"),
        None => "found a ragged array".to_string(),
    }
}

/// Row-major flattening: the last dimension varies fastest.
pub fn flatten(signal: &str, tensor: &Tensor, shape: &[usize]) -> Result<Vec<FieldValue>, LayoutError> {
    let mismatch = || LayoutError::ShapeMismatch {
        signal: signal.to_string(),
        expected: shape.to_vec(),
        found: describe(tensor),
    };

    let mut out = Vec::with_capacity(num_elements(shape));
    fn walk(
        tensor: &Tensor,
        shape: &[usize],
        out: &mut Vec<FieldValue>,
    ) -> Result<(), ()> {
        match (tensor, shape.split_first()) {
            (Tensor::Value(v), None) => {
                out.push(v.clone());
                Ok(())
            }
            (Tensor::Nested(items), Some((&dim, rest))) if items.len() == dim => {
                items.iter().try_for_each(|item| walk(item, rest, out))
            }
            _ => Err(()),
        }
    }
    walk(tensor, shape, &mut out).map_err(|_| mismatch())?;
    Ok(out)
}

/// Inverse of [`flatten`]. Fails unless `flat.len()` equals the product of `shape`.
pub fn unflatten(signal: &str, flat: &[FieldValue], shape: &[usize]) -> Result<Tensor, LayoutError> {
    if flat.len() != num_elements(shape) {
        return Err(LayoutError::ShapeMismatch {
            signal: signal.to_string(),
            expected: shape.to_vec(),
            found: format!("found {} flat values", flat.len()),
        });
    }

    fn build(flat: &[FieldValue], shape: &[usize]) -> Tensor {
        match shape.split_first() {
            None => Tensor::Value(flat[0].clone()),
            Some((&dim, rest)) => {
                let stride = num_elements(rest);
                Tensor::Nested(
                    (0..dim)
                        .map(|i| build(&flat[i * stride..(i + 1) * stride], rest))
                        .collect(),
                )
            }
        }
    }
    Ok(build(flat, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(shape: &[usize]) -> Vec<FieldValue> {
        (0..num_elements(shape) as u64).map(FieldValue::from).collect()
    }

    #[test]
    fn row_major_order() {
        let shape = [2, 2, 3];
        let tensor = unflatten("t", &counting(&shape), &shape).unwrap();
        let Tensor::Nested(outer) = &tensor else { panic!() };
        let Tensor::Nested(mid) = &outer[1] else { panic!() };
        let Tensor::Nested(inner) = &mid[0] else { panic!() };
        // [1][0][k] sits at 1*6 + 0*3 + k
        assert_eq!(inner[2], Tensor::Value(FieldValue::from(8)));
    }

    #[test]
    fn round_trip_for_declared_shapes() {
        for shape in [vec![2, 7], vec![2, 2, 7], vec![6, 2, 7]] {
            let flat = counting(&shape);
            let tensor = unflatten("t", &flat, &shape).unwrap();
            assert_eq!(tensor.shape(), Some(shape.clone()));
            assert_eq!(flatten("t", &tensor, &shape).unwrap(), flat);
            assert_eq!(unflatten("t", &flatten("t", &tensor, &shape).unwrap(), &shape).unwrap(), tensor);
        }
    }

    #[test]
    fn flatten_is_injective() {
        let shape = [2, 2, 7];
        let a = unflatten("t", &counting(&shape), &shape).unwrap();
        let mut flat_b = counting(&shape);
        flat_b.swap(3, 17);
        let b = unflatten("t", &flat_b, &shape).unwrap();
        assert_ne!(a, b);
        assert_ne!(flatten("t", &a, &shape).unwrap(), flatten("t", &b, &shape).unwrap());
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let shape = [2, 7];
        let tensor = unflatten("t", &counting(&[2, 2, 7]), &[2, 2, 7]).unwrap();
        assert!(matches!(
            flatten("pubkey", &tensor, &shape),
            Err(LayoutError::ShapeMismatch { .. })
        ));

        let ragged = Tensor::Nested(vec![
            Tensor::Nested(vec![Tensor::Value(FieldValue::one())]),
            Tensor::Nested(vec![]),
        ]);
        assert_eq!(ragged.shape(), None);
        assert!(flatten("r", &ragged, &[2, 1]).is_err());

        assert!(unflatten("t", &counting(&[13]), &shape).is_err());
        assert!(unflatten("t", &counting(&[15]), &shape).is_err());
    }

    #[test]
    fn decimal_string_documents() {
        let tensor: Tensor = serde_json::from_str(r#"[["1","2"],["3",4]]"#).unwrap();
        assert_eq!(tensor.shape(), Some(vec![2, 2]));
        assert_eq!(serde_json::to_string(&tensor).unwrap(), r#"[["1","2"],["3","4"]]"#);
    }
}
