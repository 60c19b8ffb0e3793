//! Seeded Stage1 requests for rehearsals and tests.

use ark_bls12_381::{Fq2, Fr, G1Affine};
use ark_ec::{AffineRepr, CurveGroup};
use ark_std::UniformRand;
use rand_core::RngCore;

use crate::{
    layout::{HASH, PUBKEY, SIGNATURE},
    stages::{
        bls12_381::{fp2_element, g1_point, g2_affine, g2_point, Bls12_381Capabilities},
        capabilities::CurveCapabilities,
        types::{HashSeed, LimbEncoded},
        StageInput,
    },
};

fn build(rng: &mut impl RngCore, forge: bool) -> StageInput {
    let caps = Bls12_381Capabilities;
    let (seed, hm) = loop {
        let seed = HashSeed {
            u: [fp2_element(Fq2::rand(rng)), fp2_element(Fq2::rand(rng))],
        };
        if let Some(hm) = caps.map_to_g2(&seed) {
            break (seed, hm);
        }
    };

    let sk = Fr::rand(rng);
    let signing_key = if forge { Fr::rand(rng) } else { sk };
    let pubkey = (G1Affine::generator() * sk).into_affine();
    let signature = (g2_affine(&hm) * signing_key).into_affine();

    let mut request = StageInput::new();
    request.insert(PUBKEY.name, g1_point(&pubkey).to_tensor());
    request.insert(SIGNATURE.name, g2_point(&signature).to_tensor());
    request.insert(HASH.name, seed.to_tensor());
    request
}

/// A request whose signature verifies under its pubkey.
pub fn sample_request(rng: &mut impl RngCore) -> StageInput {
    build(rng, false)
}

/// Well-formed points, but the signature was made with a different key. Passes Stage1
/// and Stage2, fails the final check.
pub fn sample_forged_request(rng: &mut impl RngCore) -> StageInput {
    build(rng, true)
}
