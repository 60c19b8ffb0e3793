use std::collections::BTreeMap;

use common::{field_conversion::FieldValue, stage::Stage};

use crate::{
    layout::{
        tensor::{unflatten, Tensor},
        BoundaryKind, BoundarySignal, SignalLayout, StageInterface,
    },
    stages::StageInput,
    utils::errors::ChainError,
    witness::WitnessRecord,
};

/// Copies `signal` out of a completed producer witness.
///
/// `measured_public_len` is the producer's public-signal count as compiled (from its
/// r1cs header). It must equal the declared total before anything is sliced.
pub fn extract_boundary(
    source: &WitnessRecord,
    measured_public_len: usize,
    signal: &str,
) -> Result<Vec<FieldValue>, ChainError> {
    let stage = source.stage();
    let layout = SignalLayout::of(stage);
    layout.check_public_len(measured_public_len)?;
    let span = layout.witness_offset(signal)?;

    let failure = |reason: String| ChainError::Extraction {
        signal: signal.to_string(),
        stage,
        reason,
    };
    if !source.has_constant_one() {
        return Err(failure("witness does not start with the constant 1".into()));
    }
    if source.len() < 1 + layout.total() {
        return Err(failure(format!(
            "witness has {} values, its public record alone needs {}",
            source.len(),
            1 + layout.total()
        )));
    }
    Ok(source.values()[span.range()].to_vec())
}

pub fn reshape(signal: &str, flat: &[FieldValue], shape: &[usize]) -> Result<Tensor, ChainError> {
    Ok(unflatten(signal, flat, shape)?)
}

/// Assembles `target`'s input document.
///
/// Extracted boundary signals must come from `extracted`; every other declared input
/// (passthroughs, and all of Stage1's inputs) is copied from `request`.
pub fn build_input(
    target: Stage,
    extracted: &BTreeMap<&'static str, Tensor>,
    request: &StageInput,
) -> Result<StageInput, ChainError> {
    let mut input = StageInput::new();
    for decl in StageInterface::of(target).inputs {
        let is_extracted = BoundarySignal::consumed_by(target).any(|boundary| {
            boundary.signal.name == decl.name && boundary.kind == BoundaryKind::Extracted
        });
        let source = if is_extracted {
            extracted.get(decl.name)
        } else {
            request.get(decl.name)
        };
        let tensor = source.ok_or_else(|| ChainError::MissingInput {
            stage: target,
            name: decl.name.to_string(),
        })?;
        input.insert(decl.name, tensor.clone());
    }
    input.check_against(target)?;
    Ok(input)
}

/// Derives `target`'s input from its producer's witness and the original request.
pub fn next_input(
    target: Stage,
    producer: &WitnessRecord,
    measured_public_len: usize,
    request: &StageInput,
) -> Result<StageInput, ChainError> {
    debug_assert_eq!(producer.stage().next(), Some(target));
    let mut extracted = BTreeMap::new();
    for boundary in BoundarySignal::consumed_by(target) {
        if boundary.kind != BoundaryKind::Extracted {
            continue;
        }
        let name = boundary.signal.name;
        let flat = extract_boundary(producer, measured_public_len, name)?;
        tracing::debug!("extracted {} values of `{name}` from {}", flat.len(), producer.stage());
        extracted.insert(name, reshape(name, &flat, boundary.signal.shape)?);
    }
    build_input(target, &extracted, request)
}
