use ark_bls12_381::{g2, Bls12_381, Fq, Fq12, Fq2, Fq6, G1Affine, G2Affine};
use ark_ec::{
    hashing::{curve_maps::wb::WBMap, map_to_curve_hasher::MapToCurve},
    pairing::{MillerLoopOutput, Pairing},
    AffineRepr, CurveGroup,
};
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::{
    stages::{
        capabilities::CurveCapabilities,
        types::{FieldElement, Fp12Element, Fp2Element, G1Point, G2Point, HashSeed},
    },
    utils::errors::ValidationFailure,
};

/// [`CurveCapabilities`] over arkworks' BLS12-381.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bls12_381Capabilities;

pub(crate) fn fq(element: &FieldElement) -> Fq {
    Fq::from_le_bytes_mod_order(&element.value().to_bytes_le())
}

pub(crate) fn fq2(element: &Fp2Element) -> Fq2 {
    Fq2::new(fq(&element[0]), fq(&element[1]))
}

pub(crate) fn field_element(value: Fq) -> FieldElement {
    FieldElement::from_biguint(&BigUint::from_bytes_le(&value.into_bigint().to_bytes_le()))
}

pub(crate) fn fp2_element(value: Fq2) -> Fp2Element {
    [field_element(value.c0), field_element(value.c1)]
}

pub(crate) fn g1_affine(point: &G1Point) -> G1Affine {
    G1Affine::new_unchecked(fq(&point.x), fq(&point.y))
}

pub(crate) fn g2_affine(point: &G2Point) -> G2Affine {
    G2Affine::new_unchecked(fq2(&point.x), fq2(&point.y))
}

pub(crate) fn g1_point(point: &G1Affine) -> G1Point {
    G1Point {
        x: field_element(point.x),
        y: field_element(point.y),
    }
}

pub(crate) fn g2_point(point: &G2Affine) -> G2Point {
    G2Point {
        x: fp2_element(point.x),
        y: fp2_element(point.y),
    }
}

/// `c0 + c1·w` with `c_i ∈ Fp6 = Fp2[v]`, `v = w²`, laid out over `1, w, ..., w^5`.
pub(crate) fn fp12_element(f: &Fq12) -> Fp12Element {
    Fp12Element {
        coeffs: [
            fp2_element(f.c0.c0),
            fp2_element(f.c1.c0),
            fp2_element(f.c0.c1),
            fp2_element(f.c1.c1),
            fp2_element(f.c0.c2),
            fp2_element(f.c1.c2),
        ],
    }
}

pub(crate) fn fq12(f: &Fp12Element) -> Fq12 {
    let [w0, w1, w2, w3, w4, w5] = &f.coeffs;
    Fq12::new(
        Fq6::new(fq2(w0), fq2(w2), fq2(w4)),
        Fq6::new(fq2(w1), fq2(w3), fq2(w5)),
    )
}

fn check_subgroup(
    signal: &str,
    on_curve: bool,
    in_subgroup: impl FnOnce() -> bool,
) -> Result<(), ValidationFailure> {
    if !on_curve {
        return Err(ValidationFailure::NotOnCurve {
            signal: signal.to_string(),
        });
    }
    if !in_subgroup() {
        return Err(ValidationFailure::NotInSubgroup {
            signal: signal.to_string(),
        });
    }
    Ok(())
}

impl CurveCapabilities for Bls12_381Capabilities {
    fn g1_generator(&self) -> G1Point {
        g1_point(&G1Affine::generator())
    }

    fn validate_g1(&self, signal: &str, point: &G1Point) -> Result<(), ValidationFailure> {
        let affine = g1_affine(point);
        check_subgroup(signal, affine.is_on_curve(), || {
            affine.is_in_correct_subgroup_assuming_on_curve()
        })
    }

    fn validate_g2(&self, signal: &str, point: &G2Point) -> Result<(), ValidationFailure> {
        let affine = g2_affine(point);
        check_subgroup(signal, affine.is_on_curve(), || {
            affine.is_in_correct_subgroup_assuming_on_curve()
        })
    }

    fn map_to_g2(&self, seed: &HashSeed) -> Option<G2Point> {
        let mut sum = G2Affine::zero().into_group();
        for u in &seed.u {
            match WBMap::<g2::Config>::map_to_curve(fq2(u)) {
                Ok(point) => sum += point,
                Err(e) => {
                    tracing::warn!("map to curve failed: {e}");
                    return None;
                }
            }
        }
        let hm = sum.into_affine().clear_cofactor();
        if hm.is_zero() {
            None
        } else {
            Some(g2_point(&hm))
        }
    }

    fn accumulate(&self, pairs: &[(G1Point, G2Point)]) -> Fp12Element {
        let (g1s, g2s): (Vec<G1Affine>, Vec<G2Affine>) = pairs
            .iter()
            .map(|(p, q)| (g1_affine(p), g2_affine(q)))
            .unzip();
        let MillerLoopOutput(f) = Bls12_381::multi_miller_loop(g1s, g2s);
        fp12_element(&f)
    }

    fn finalize(&self, f: &Fp12Element) -> Fp12Element {
        match Bls12_381::final_exponentiation(MillerLoopOutput(fq12(f))) {
            Some(output) => fp12_element(&output.0),
            // Only a zero accumulator has no final exponentiation.
            None => fp12_element(&Fq12::from(0u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Fr, G1Projective, G2Projective};
    use ark_ec::PrimeGroup;
    use ark_std::{test_rng, One, UniformRand, Zero};

    #[test]
    fn base_field_round_trip() {
        let mut rng = test_rng();
        for value in [Fq::zero(), Fq::one(), -Fq::one(), Fq::rand(&mut rng)] {
            assert_eq!(fq(&field_element(value)), value);
        }
        assert_eq!(
            field_element(-Fq::one()).value(),
            common::field_conversion::base_modulus() - 1u8
        );
    }

    #[test]
    fn fp12_layout_round_trip() {
        let mut rng = test_rng();
        let f = Fq12::rand(&mut rng);
        assert_eq!(fq12(&fp12_element(&f)), f);
        assert!(fp12_element(&Fq12::one()).is_one());
    }

    #[test]
    fn generators_validate() {
        let caps = Bls12_381Capabilities;
        assert!(caps.validate_g1("pubkey", &caps.g1_generator()).is_ok());
        let g2 = g2_point(&G2Projective::generator().into_affine());
        assert!(caps.validate_g2("signature", &g2).is_ok());
    }

    #[test]
    fn off_curve_and_identity_points_are_rejected() {
        let caps = Bls12_381Capabilities;
        let mut point = caps.g1_generator();
        point.y = point.x.clone();
        assert_eq!(
            caps.validate_g1("pubkey", &point),
            Err(ValidationFailure::NotOnCurve {
                signal: "pubkey".into()
            })
        );
        let zero = G1Point {
            x: FieldElement::zero(),
            y: FieldElement::zero(),
        };
        assert!(caps.validate_g1("pubkey", &zero).is_err());
    }

    #[test]
    fn points_outside_the_subgroup_are_rejected() {
        let caps = Bls12_381Capabilities;
        // Search for a small x with a curve point; G1's cofactor makes it almost surely
        // land outside the prime-order subgroup.
        let point = (1u64..)
            .find_map(|x| G1Affine::get_point_from_x_unchecked(Fq::from(x), false))
            .unwrap();
        assert!(point.is_on_curve());
        assert!(!point.is_in_correct_subgroup_assuming_on_curve());
        assert_eq!(
            caps.validate_g1("pubkey", &g1_point(&point)),
            Err(ValidationFailure::NotInSubgroup {
                signal: "pubkey".into()
            })
        );
    }

    #[test]
    fn map_lands_in_subgroup() {
        let caps = Bls12_381Capabilities;
        let mut rng = test_rng();
        let seed = HashSeed {
            u: [fp2_element(Fq2::rand(&mut rng)), fp2_element(Fq2::rand(&mut rng))],
        };
        let hm = caps.map_to_g2(&seed).unwrap();
        assert!(caps.validate_g2("Hm", &hm).is_ok());
        assert_eq!(caps.map_to_g2(&seed), Some(hm));
    }

    #[test]
    fn pairing_equation() {
        let caps = Bls12_381Capabilities;
        let mut rng = test_rng();
        let sk = Fr::rand(&mut rng);
        let hm = (G2Projective::generator() * Fr::rand(&mut rng)).into_affine();
        let pk = (G1Projective::generator() * sk).into_affine();
        let sig = (hm * sk).into_affine();

        let valid = caps.accumulate(&[
            (caps.g1_generator(), g2_point(&sig).negate()),
            (g1_point(&pk), g2_point(&hm)),
        ]);
        assert!(caps.finalize(&valid).is_one());

        let forged = caps.accumulate(&[
            (caps.g1_generator(), g2_point(&hm).negate()),
            (g1_point(&pk), g2_point(&hm)),
        ]);
        assert!(!caps.finalize(&forged).is_one());

        assert!(!caps.finalize(&fp12_element(&Fq12::zero())).is_one());
    }
}
