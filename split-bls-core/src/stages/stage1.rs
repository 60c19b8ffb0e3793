use common::stage::Stage;

use crate::{
    layout::{HASH, HM, PUBKEY, SIGNATURE},
    stages::{
        capabilities::CurveCapabilities,
        types::{G1Point, G2Point, HashSeed, LimbEncoded},
        unsatisfiable, StageCircuit, StageInput, StageOutput,
    },
    utils::errors::{PipelineError, ValidationFailure},
};

/// Range, reduction and subgroup checks on the request, then `Hm = H(u0, u1)`.
pub struct ValidateAndMap;

impl StageCircuit for ValidateAndMap {
    const STAGE: Stage = Stage::One;

    fn evaluate<C: CurveCapabilities>(
        caps: &C,
        input: &StageInput,
    ) -> Result<StageOutput, PipelineError> {
        let pubkey: G1Point = input.decode(Self::STAGE, &PUBKEY)?;
        let signature: G2Point = input.decode(Self::STAGE, &SIGNATURE)?;
        let seed: HashSeed = input.decode(Self::STAGE, &HASH)?;

        let hm = check_and_map(caps, &pubkey, &signature, &seed)
            .map_err(unsatisfiable(Self::STAGE))?;

        Ok(StageOutput::from([(HM.name, hm.to_tensor())]))
    }
}

fn check_and_map<C: CurveCapabilities>(
    caps: &C,
    pubkey: &G1Point,
    signature: &G2Point,
    seed: &HashSeed,
) -> Result<G2Point, ValidationFailure> {
    pubkey.validate_limbs(PUBKEY.name)?;
    signature.validate_limbs(SIGNATURE.name)?;
    seed.validate_limbs(HASH.name)?;
    caps.validate_g1(PUBKEY.name, pubkey)?;
    caps.validate_g2(SIGNATURE.name, signature)?;
    caps.map_to_g2(seed).ok_or(ValidationFailure::HashToInfinity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::tensor::{flatten, unflatten},
        stages::{
            bls12_381::{g2_point, Bls12_381Capabilities},
            sample::sample_request,
        },
    };
    use ark_bls12_381::{Fq, Fq2, G2Affine};
    use ark_std::test_rng;
    use common::{
        constants::LIMB_BITS,
        field_conversion::{base_modulus, to_limbs, FieldValue},
    };
    use num_bigint::BigUint;

    fn failure(input: &StageInput) -> ValidationFailure {
        match ValidateAndMap::evaluate(&Bls12_381Capabilities, input) {
            Err(PipelineError::Validation { stage, failure }) => {
                assert_eq!(stage, Stage::One);
                failure
            }
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    fn with_limbs(input: &StageInput, name: &str, edit: impl FnOnce(&mut Vec<FieldValue>)) -> StageInput {
        let decl = crate::layout::StageInterface::of(Stage::One).input(name).unwrap();
        let mut flat = flatten(name, input.get(name).unwrap(), decl.shape).unwrap();
        edit(&mut flat);
        let mut edited = input.clone();
        edited.insert(name, unflatten(name, &flat, decl.shape).unwrap());
        edited
    }

    #[test]
    fn valid_request_maps_to_hm() {
        let request = sample_request(&mut test_rng());
        let outputs = ValidateAndMap::evaluate(&Bls12_381Capabilities, &request).unwrap();
        let hm = G2Point::from_tensor("Hm", &outputs["Hm"]).unwrap();
        assert!(Bls12_381Capabilities.validate_g2("Hm", &hm).is_ok());
    }

    #[test]
    fn oversized_limb_is_unsatisfiable() {
        let request = sample_request(&mut test_rng());
        let tampered = with_limbs(&request, "pubkey", |flat| {
            flat[3] = FieldValue(BigUint::from(1u8) << LIMB_BITS);
        });
        assert!(matches!(
            failure(&tampered),
            ValidationFailure::LimbOutOfRange { limb: 3, .. }
        ));
    }

    #[test]
    fn unreduced_coordinate_is_unsatisfiable() {
        let request = sample_request(&mut test_rng());
        let tampered = with_limbs(&request, "hash", |flat| {
            // u0.c1 := p
            flat[7..14].clone_from_slice(&to_limbs(base_modulus()).unwrap());
        });
        assert_eq!(
            failure(&tampered),
            ValidationFailure::NotReduced {
                signal: "hash".into()
            }
        );
    }

    #[test]
    fn off_curve_signature_is_unsatisfiable() {
        let request = sample_request(&mut test_rng());
        let tampered = with_limbs(&request, "signature", |flat| {
            flat[14] = FieldValue(&flat[14].0 ^ BigUint::from(1u8));
        });
        assert_eq!(
            failure(&tampered),
            ValidationFailure::NotOnCurve {
                signal: "signature".into()
            }
        );
    }

    #[test]
    fn opposite_seeds_map_to_infinity() {
        let mut request = sample_request(&mut test_rng());
        let seed = HashSeed::from_tensor("hash", request.get("hash").unwrap()).unwrap();
        let u0 = seed.u[0].clone();
        let minus_u0 = [u0[0].negate(), u0[1].negate()];
        request.insert("hash", HashSeed { u: [u0, minus_u0] }.to_tensor());
        assert_eq!(failure(&request), ValidationFailure::HashToInfinity);
    }

    #[test]
    fn signature_outside_the_subgroup_is_unsatisfiable() {
        let point = (1u64..)
            .find_map(|x| {
                G2Affine::get_point_from_x_unchecked(Fq2::new(Fq::from(x), Fq::from(0u64)), false)
            })
            .unwrap();
        assert!(point.is_on_curve());
        assert!(!point.is_in_correct_subgroup_assuming_on_curve());

        let mut request = sample_request(&mut test_rng());
        request.insert("signature", g2_point(&point).to_tensor());
        assert_eq!(
            failure(&request),
            ValidationFailure::NotInSubgroup {
                signal: "signature".into()
            }
        );
    }
}
