//! Threading boundary signals from one stage to the next, and checking they arrived intact.

pub mod extractor;
pub mod verifier;

use common::stage::Stage;

use crate::{
    layout::SignalLayout,
    stages::{capabilities::CurveCapabilities, synthesize_witness, StageInput},
    utils::errors::PipelineError,
    witness::WitnessRecord,
};

/// Runs the three native contracts back to back, chaining witnesses through the
/// extractor exactly as the compiled stages are chained.
pub fn native_chain<C: CurveCapabilities>(
    caps: &C,
    request: &StageInput,
) -> Result<[WitnessRecord; 3], PipelineError> {
    let stage1 = synthesize_witness(caps, Stage::One, request)?;
    let input2 = extractor::next_input(
        Stage::Two,
        &stage1,
        SignalLayout::of(Stage::One).total(),
        request,
    )?;
    let stage2 = synthesize_witness(caps, Stage::Two, &input2)?;
    let input3 = extractor::next_input(
        Stage::Three,
        &stage2,
        SignalLayout::of(Stage::Two).total(),
        request,
    )?;
    let stage3 = synthesize_witness(caps, Stage::Three, &input3)?;
    Ok([stage1, stage2, stage3])
}
