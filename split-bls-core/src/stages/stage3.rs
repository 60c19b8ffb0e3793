use common::stage::Stage;

use crate::{
    layout::MILLER_OUT,
    stages::{
        capabilities::CurveCapabilities, types::Fp12Element, StageCircuit, StageInput,
        StageOutput,
    },
    utils::errors::{PipelineError, ValidationFailure},
};

/// Final exponentiation of `miller_out`, asserted to be the identity. No outputs.
pub struct FinalCheck;

impl StageCircuit for FinalCheck {
    const STAGE: Stage = Stage::Three;

    fn evaluate<C: CurveCapabilities>(
        caps: &C,
        input: &StageInput,
    ) -> Result<StageOutput, PipelineError> {
        let miller_out: Fp12Element = input.decode(Self::STAGE, &MILLER_OUT)?;
        if !caps.finalize(&miller_out).is_one() {
            return Err(PipelineError::Validation {
                stage: Self::STAGE,
                failure: ValidationFailure::PairingMismatch,
            });
        }
        Ok(StageOutput::new())
    }
}
