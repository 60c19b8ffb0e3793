use common::{
    constants::{LIMB_BITS, NUM_LIMBS},
    field_conversion::{base_modulus, first_oversized_limb, from_limbs, to_limbs, FieldValue},
};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::{
    layout::{
        tensor::{flatten, unflatten, Tensor},
        FP12_SHAPE, G1_SHAPE, G2_SHAPE,
    },
    utils::errors::{LayoutError, ValidationFailure},
};

/// Base-field element as [`NUM_LIMBS`] little-endian limbs of [`LIMB_BITS`] bits.
///
/// Nothing here guarantees the limbs are in range or reduce to a value below the
/// modulus; that is exactly what [`FieldElement::validate`] checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldElement {
    limbs: Vec<FieldValue>,
}

impl FieldElement {
    pub fn from_limbs(limbs: Vec<FieldValue>) -> Self {
        debug_assert_eq!(limbs.len(), NUM_LIMBS);
        Self { limbs }
    }

    /// Encodes a base-field value. Values below the modulus always fit.
    pub fn from_biguint(value: &BigUint) -> Self {
        let limbs = to_limbs(&(value % base_modulus())).expect("reduced values fit in the limbs");
        Self { limbs }
    }

    pub fn zero() -> Self {
        Self::from_biguint(&BigUint::zero())
    }

    pub fn one() -> Self {
        Self::from_biguint(&BigUint::from(1u8))
    }

    pub fn limbs(&self) -> &[FieldValue] {
        &self.limbs
    }

    pub fn value(&self) -> BigUint {
        from_limbs(&self.limbs)
    }

    pub fn validate(&self, signal: &str) -> Result<(), ValidationFailure> {
        if let Some(limb) = first_oversized_limb(&self.limbs) {
            return Err(ValidationFailure::LimbOutOfRange {
                signal: signal.to_string(),
                limb,
                bits: LIMB_BITS,
            });
        }
        if &self.value() >= base_modulus() {
            return Err(ValidationFailure::NotReduced {
                signal: signal.to_string(),
            });
        }
        Ok(())
    }

    /// `p - v mod p`, limb-wise re-encoded.
    pub fn negate(&self) -> Self {
        let value = self.value() % base_modulus();
        if value.is_zero() {
            return Self::zero();
        }
        Self::from_biguint(&(base_modulus() - value))
    }
}

/// Element of the quadratic extension, `(c0, c1)`.
pub type Fp2Element = [FieldElement; 2];

/// Conversion between limb-level values and the nested tensors of stage documents.
pub trait LimbEncoded: Sized {
    const SHAPE: &'static [usize];

    /// Builds the value from base-field elements in row-major order.
    fn from_elements(elements: Vec<FieldElement>) -> Self;

    /// Base-field elements in row-major order.
    fn elements(&self) -> Vec<&FieldElement>;

    fn from_tensor(signal: &str, tensor: &Tensor) -> Result<Self, LayoutError> {
        let flat = flatten(signal, tensor, Self::SHAPE)?;
        let elements = flat
            .chunks(NUM_LIMBS)
            .map(|chunk| FieldElement::from_limbs(chunk.to_vec()))
            .collect();
        Ok(Self::from_elements(elements))
    }

    fn to_flat(&self) -> Vec<FieldValue> {
        self.elements()
            .into_iter()
            .flat_map(|element| element.limbs().iter().cloned())
            .collect()
    }

    fn to_tensor(&self) -> Tensor {
        unflatten("", &self.to_flat(), Self::SHAPE).expect("encoding matches its own shape")
    }

    fn validate_limbs(&self, signal: &str) -> Result<(), ValidationFailure> {
        self.elements()
            .into_iter()
            .try_for_each(|element| element.validate(signal))
    }
}

fn take<const N: usize>(elements: Vec<FieldElement>) -> [FieldElement; N] {
    elements
        .try_into()
        .unwrap_or_else(|v: Vec<FieldElement>| panic!("expected {N} elements, got {}", v.len()))
}

fn pairs<const N: usize>(elements: Vec<FieldElement>) -> [Fp2Element; N] {
    let mut iter = elements.into_iter();
    std::array::from_fn(|_| {
        let c0 = iter.next().expect("shape guarantees element count");
        let c1 = iter.next().expect("shape guarantees element count");
        [c0, c1]
    })
}

/// Affine G1 point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct G1Point {
    pub x: FieldElement,
    pub y: FieldElement,
}

impl LimbEncoded for G1Point {
    const SHAPE: &'static [usize] = &G1_SHAPE;

    fn from_elements(elements: Vec<FieldElement>) -> Self {
        let [x, y] = take(elements);
        Self { x, y }
    }

    fn elements(&self) -> Vec<&FieldElement> {
        vec![&self.x, &self.y]
    }
}

/// Affine G2 point over the quadratic extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct G2Point {
    pub x: Fp2Element,
    pub y: Fp2Element,
}

impl G2Point {
    /// Negates the second coordinate component-wise: `(x, y) -> (x, -y)`.
    pub fn negate(&self) -> Self {
        Self {
            x: self.x.clone(),
            y: [self.y[0].negate(), self.y[1].negate()],
        }
    }
}

impl LimbEncoded for G2Point {
    const SHAPE: &'static [usize] = &G2_SHAPE;

    fn from_elements(elements: Vec<FieldElement>) -> Self {
        let [x, y] = pairs(elements);
        Self { x, y }
    }

    fn elements(&self) -> Vec<&FieldElement> {
        self.x.iter().chain(self.y.iter()).collect()
    }
}

/// Hash-to-field output `(u0, u1)`: two extension-field elements, G2-shaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashSeed {
    pub u: [Fp2Element; 2],
}

impl LimbEncoded for HashSeed {
    const SHAPE: &'static [usize] = &G2_SHAPE;

    fn from_elements(elements: Vec<FieldElement>) -> Self {
        Self { u: pairs(elements) }
    }

    fn elements(&self) -> Vec<&FieldElement> {
        self.u.iter().flatten().collect()
    }
}

/// Target-field element as six Fp2 coefficients over `1, w, ..., w^5`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fp12Element {
    pub coeffs: [Fp2Element; 6],
}

impl Fp12Element {
    /// 1 in coefficient 0's first component, 0 everywhere else.
    pub fn one() -> Self {
        let mut coeffs: [Fp2Element; 6] =
            std::array::from_fn(|_| [FieldElement::zero(), FieldElement::zero()]);
        coeffs[0][0] = FieldElement::one();
        Self { coeffs }
    }

    pub fn is_one(&self) -> bool {
        *self == Self::one()
    }
}

impl LimbEncoded for Fp12Element {
    const SHAPE: &'static [usize] = &FP12_SHAPE;

    fn from_elements(elements: Vec<FieldElement>) -> Self {
        Self {
            coeffs: pairs(elements),
        }
    }

    fn elements(&self) -> Vec<&FieldElement> {
        self.coeffs.iter().flatten().collect()
    }
}
