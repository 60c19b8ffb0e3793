use common::stage::Stage;

use crate::{
    layout::{HM, MILLER_OUT, PUBKEY, SIGNATURE},
    stages::{
        capabilities::CurveCapabilities,
        types::{G1Point, G2Point, LimbEncoded},
        StageCircuit, StageInput, StageOutput,
    },
    utils::errors::PipelineError,
};

/// Two-pair Miller loop over `(G1, -S)` and `(pubkey, Hm)`.
///
/// `Hm` is Stage1's output and is not re-validated.
pub struct PairingAccumulation;

impl StageCircuit for PairingAccumulation {
    const STAGE: Stage = Stage::Two;

    fn evaluate<C: CurveCapabilities>(
        caps: &C,
        input: &StageInput,
    ) -> Result<StageOutput, PipelineError> {
        let pubkey: G1Point = input.decode(Self::STAGE, &PUBKEY)?;
        let signature: G2Point = input.decode(Self::STAGE, &SIGNATURE)?;
        let hm: G2Point = input.decode(Self::STAGE, &HM)?;

        let miller_out = caps.accumulate(&[
            (caps.g1_generator(), signature.negate()),
            (pubkey, hm),
        ]);
        Ok(StageOutput::from([(MILLER_OUT.name, miller_out.to_tensor())]))
    }
}
