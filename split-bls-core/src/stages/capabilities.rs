use crate::{
    stages::types::{Fp12Element, G1Point, G2Point, HashSeed},
    utils::errors::ValidationFailure,
};

/// The curve primitives a stage contract relies on: validate, map, accumulate, finalize.
///
/// The stage contracts only see limb-level values and pass/fail outcomes, so any
/// independently specified BLS12-381 library can sit behind this trait.
pub trait CurveCapabilities {
    fn g1_generator(&self) -> G1Point;

    /// On-curve and prime-order subgroup membership of a G1 point.
    fn validate_g1(&self, signal: &str, point: &G1Point) -> Result<(), ValidationFailure>;

    /// On-curve and prime-order subgroup membership of a G2 point.
    fn validate_g2(&self, signal: &str, point: &G2Point) -> Result<(), ValidationFailure>;

    /// `clear_cofactor(map(u0) + map(u1))`, or `None` if that is the point at infinity.
    fn map_to_g2(&self, seed: &HashSeed) -> Option<G2Point>;

    /// Product of Miller loops over `pairs`, before final exponentiation.
    fn accumulate(&self, pairs: &[(G1Point, G2Point)]) -> Fp12Element;

    /// Final exponentiation into the target group.
    fn finalize(&self, f: &Fp12Element) -> Fp12Element;
}
