use std::{fmt, str::FromStr, sync::OnceLock};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{
    BLS12_381_BASE_MODULUS_HEX, BN254_SCALAR_MODULUS_DEC, LIMB_BITS, NUM_LIMBS,
};

/// A single witness value: an element of the proof system's scalar field, carried as an
/// unsigned integer and serialized as a decimal string.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldValue(pub BigUint);

impl FieldValue {
    pub fn zero() -> Self {
        FieldValue(BigUint::zero())
    }

    pub fn one() -> Self {
        FieldValue(BigUint::one())
    }

    pub fn is_one(&self) -> bool {
        self.0.is_one()
    }
}

impl From<BigUint> for FieldValue {
    fn from(value: BigUint) -> Self {
        FieldValue(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue(BigUint::from(value))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FieldValue {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigUint::from_str(s.trim()).map(FieldValue)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldValueVisitor;

        impl de::Visitor<'_> for FieldValueVisitor {
            type Value = FieldValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative decimal integer, as a string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FieldValue, E> {
                FieldValue::from_str(v)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FieldValue, E> {
                Ok(FieldValue::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FieldValue, E> {
                u64::try_from(v)
                    .map(FieldValue::from)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// The BLS12-381 base field modulus.
pub fn base_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(BLS12_381_BASE_MODULUS_HEX.as_bytes(), 16)
            .expect("modulus constant is valid hex")
    })
}

/// The BN254 scalar field modulus, i.e. the field every witness value lives in.
pub fn scalar_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::from_str(BN254_SCALAR_MODULUS_DEC).expect("modulus constant is valid decimal")
    })
}

/// Splits `value` into [`NUM_LIMBS`] little-endian limbs of [`LIMB_BITS`] bits.
/// Returns `None` if the value does not fit.
pub fn to_limbs(value: &BigUint) -> Option<Vec<FieldValue>> {
    if value.bits() as usize > LIMB_BITS * NUM_LIMBS {
        return None;
    }
    let mask = (BigUint::one() << LIMB_BITS) - BigUint::one();
    let limbs = (0..NUM_LIMBS)
        .map(|i| FieldValue((value >> (i * LIMB_BITS)) & &mask))
        .collect();
    Some(limbs)
}

/// Recombines little-endian limbs. Limbs wider than [`LIMB_BITS`] are not rejected here;
/// use [`first_oversized_limb`] for that.
pub fn from_limbs(limbs: &[FieldValue]) -> BigUint {
    limbs
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, limb| (acc << LIMB_BITS) + &limb.0)
}

/// Index of the first limb that does not fit in [`LIMB_BITS`] bits.
pub fn first_oversized_limb(limbs: &[FieldValue]) -> Option<usize> {
    limbs
        .iter()
        .position(|limb| limb.0.bits() as usize > LIMB_BITS)
}
