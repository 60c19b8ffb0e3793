//! Native contracts of the three stages.
//!
//! Each contract is the relation its compiled circuit enforces, evaluated outside the
//! proof system: it either produces the stage's output signals or names the check that
//! makes the stage unsatisfiable.

pub mod bls12_381;
pub mod capabilities;
pub mod sample;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod types;

use std::{collections::BTreeMap, fs, path::Path};

use common::{field_conversion::FieldValue, serializable::Serializable, stage::Stage};
use serde::{Deserialize, Serialize};

use crate::{
    layout::{tensor::Tensor, SignalDecl, SignalLayout, StageInterface},
    stages::{capabilities::CurveCapabilities, types::LimbEncoded},
    utils::errors::{ChainError, LayoutError, PipelineError, ValidationFailure},
    witness::WitnessRecord,
};

/// Named signals of a stage, as a nested-array JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageInput {
    signals: BTreeMap<String, Tensor>,
}

pub type StageOutput = BTreeMap<&'static str, Tensor>;

impl StageInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.signals.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.signals.get(name)
    }

    pub fn signals(&self) -> &BTreeMap<String, Tensor> {
        &self.signals
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the document unless the file already holds the same bytes.
    pub fn write(&self, path: &Path) -> Result<bool, PipelineError> {
        self.serialize_to_file(path)
            .map_err(|e| PipelineError::io(path, e))
    }

    /// Every declared input of `stage` is present with its declared shape, and nothing else.
    pub fn check_against(&self, stage: Stage) -> Result<(), ChainError> {
        let interface = StageInterface::of(stage);
        for decl in interface.inputs {
            self.decode_flat(stage, decl)?;
        }
        if let Some(extra) = self
            .signals
            .keys()
            .find(|name| interface.input(name).is_none())
        {
            return Err(LayoutError::UnknownSignal {
                stage,
                name: extra.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Row-major values of `decl`.
    pub fn decode_flat(&self, stage: Stage, decl: &SignalDecl) -> Result<Vec<FieldValue>, ChainError> {
        let tensor = self.get(decl.name).ok_or_else(|| ChainError::MissingInput {
            stage,
            name: decl.name.to_string(),
        })?;
        Ok(crate::layout::tensor::flatten(decl.name, tensor, decl.shape)?)
    }

    pub fn decode<T: LimbEncoded>(&self, stage: Stage, decl: &SignalDecl) -> Result<T, ChainError> {
        let tensor = self.get(decl.name).ok_or_else(|| ChainError::MissingInput {
            stage,
            name: decl.name.to_string(),
        })?;
        Ok(T::from_tensor(decl.name, tensor)?)
    }
}

/// The relation one compiled stage enforces.
pub trait StageCircuit {
    const STAGE: Stage;

    fn evaluate<C: CurveCapabilities>(
        caps: &C,
        input: &StageInput,
    ) -> Result<StageOutput, PipelineError>;
}

pub(crate) fn unsatisfiable(stage: Stage) -> impl Fn(ValidationFailure) -> PipelineError {
    move |failure| PipelineError::Validation { stage, failure }
}

pub fn evaluate<C: CurveCapabilities>(
    caps: &C,
    stage: Stage,
    input: &StageInput,
) -> Result<StageOutput, PipelineError> {
    input.check_against(stage)?;
    match stage {
        Stage::One => stage1::ValidateAndMap::evaluate(caps, input),
        Stage::Two => stage2::PairingAccumulation::evaluate(caps, input),
        Stage::Three => stage3::FinalCheck::evaluate(caps, input),
    }
}

/// Evaluates `stage` and lays out its witness as `[1, public...]`.
///
/// The compiled circuits carry private signals after the public ones; the native
/// witness has none, which keeps every public offset identical.
pub fn synthesize_witness<C: CurveCapabilities>(
    caps: &C,
    stage: Stage,
    input: &StageInput,
) -> Result<WitnessRecord, PipelineError> {
    let outputs = evaluate(caps, stage, input)?;
    let layout = SignalLayout::of(stage);
    let mut values = Vec::with_capacity(1 + layout.total());
    values.push(FieldValue::one());
    for (decl, _) in layout.entries() {
        let tensor = match outputs.get(decl.name) {
            Some(tensor) => tensor,
            None => input.get(decl.name).ok_or_else(|| ChainError::MissingInput {
                stage,
                name: decl.name.to_string(),
            })?,
        };
        values.extend(crate::layout::tensor::flatten(decl.name, tensor, decl.shape)?);
    }
    Ok(WitnessRecord::new(stage, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::{HM, PUBKEY},
        stages::{bls12_381::Bls12_381Capabilities, sample::sample_request},
    };
    use ark_std::test_rng;

    #[test]
    fn input_documents_are_checked_against_the_interface() {
        let request = sample_request(&mut test_rng());
        assert!(request.check_against(Stage::One).is_ok());

        let mut missing = request.clone();
        missing.signals.remove("hash");
        assert!(matches!(
            missing.check_against(Stage::One),
            Err(ChainError::MissingInput { .. })
        ));

        let mut extra = request.clone();
        extra.insert("miller_out", request.get("hash").unwrap().clone());
        assert!(matches!(
            extra.check_against(Stage::One),
            Err(ChainError::Layout(LayoutError::UnknownSignal { .. }))
        ));

        let mut misshapen = request.clone();
        misshapen.insert("pubkey", request.get("signature").unwrap().clone());
        assert!(matches!(
            misshapen.check_against(Stage::One),
            Err(ChainError::Layout(LayoutError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn synthesized_witness_follows_layout() {
        let caps = Bls12_381Capabilities;
        let request = sample_request(&mut test_rng());
        let witness = synthesize_witness(&caps, Stage::One, &request).unwrap();
        let layout = SignalLayout::of(Stage::One);

        assert!(witness.has_constant_one());
        assert_eq!(witness.len(), 1 + layout.total());
        let pubkey = layout.witness_offset(PUBKEY.name).unwrap();
        assert_eq!(
            &witness.values()[pubkey.range()],
            request.decode_flat(Stage::One, &PUBKEY).unwrap().as_slice()
        );
        let outputs = evaluate(&caps, Stage::One, &request).unwrap();
        let hm = layout.witness_offset(HM.name).unwrap();
        assert_eq!(
            witness.values()[hm.range()].to_vec(),
            crate::layout::tensor::flatten("Hm", &outputs["Hm"], HM.shape).unwrap()
        );
    }

    #[test]
    fn documents_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        let request = sample_request(&mut test_rng());
        assert!(request.write(&path).unwrap());
        assert!(!request.write(&path).unwrap());
        assert_eq!(StageInput::from_file(&path).unwrap(), request);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StageInput::from_file(&path),
            Err(PipelineError::Json { .. })
        ));
    }
}
