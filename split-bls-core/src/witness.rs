use std::path::Path;

use common::{field_conversion::FieldValue, serializable::Serializable, stage::Stage};

use crate::utils::errors::PipelineError;

/// Full assignment of one stage: `[1, public..., private...]`. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessRecord {
    stage: Stage,
    values: Vec<FieldValue>,
}

impl WitnessRecord {
    pub fn new(stage: Stage, values: Vec<FieldValue>) -> Self {
        Self { stage, values }
    }

    /// Reads the JSON array produced by `snarkjs wtns export json`.
    pub fn from_file(stage: Stage, path: &Path) -> Result<Self, PipelineError> {
        let values = Vec::<FieldValue>::deserialize_from_file(path)
            .map_err(|e| PipelineError::io(path, e))?;
        Ok(Self::new(stage, values))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether index 0 carries the constant 1.
    pub fn has_constant_one(&self) -> bool {
        self.values.first().is_some_and(FieldValue::is_one)
    }

    /// The public record: indices `[1, 1 + public_len)`. `None` if the witness is shorter.
    pub fn public_record(&self, public_len: usize) -> Option<PublicRecord> {
        self.values
            .get(1..1 + public_len)
            .map(|public| PublicRecord::new(self.stage, public.to_vec()))
    }
}

/// Public signals of one stage in declared order, without the leading constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRecord {
    stage: Stage,
    values: Vec<FieldValue>,
}

impl PublicRecord {
    pub fn new(stage: Stage, values: Vec<FieldValue>) -> Self {
        Self { stage, values }
    }

    /// Reads the `public.json` written by the prover.
    pub fn from_file(stage: Stage, path: &Path) -> Result<Self, PipelineError> {
        let values = Vec::<FieldValue>::deserialize_from_file(path)
            .map_err(|e| PipelineError::io(path, e))?;
        Ok(Self::new(stage, values))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [FieldValue] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(n: u64) -> Vec<FieldValue> {
        (0..n).map(|i| FieldValue::from(i + 1)).collect()
    }

    #[test]
    fn public_view_drops_constant() {
        let witness = WitnessRecord::new(Stage::Three, values(10));
        assert!(witness.has_constant_one());
        let public = witness.public_record(4).unwrap();
        assert_eq!(public.values(), &values(10)[1..5]);
        assert_eq!(public.values()[0], witness.values()[1]);
        assert!(witness.public_record(9).is_some());
        assert!(witness.public_record(10).is_none());
    }

    #[test]
    fn reads_snarkjs_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("witness.json");
        std::fs::write(&path, r#"["1","21888242871839275222246405745257275088548364400416034343698204186575808495616","0"]"#).unwrap();
        let witness = WitnessRecord::from_file(Stage::One, &path).unwrap();
        assert_eq!(witness.len(), 3);
        assert!(witness.has_constant_one());

        let missing = WitnessRecord::from_file(Stage::One, &dir.path().join("nope.json"));
        assert!(matches!(missing, Err(PipelineError::Io { .. })));
    }
}
