use std::path::PathBuf;

use common::{field_conversion::FieldValue, stage::Stage};
use thiserror::Error;

use crate::host::Phase;

/// A stage's constraints cannot be satisfied by the given input. This is the only
/// legitimate negative verdict: the signature (or its pubkey/hash) is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("{signal}: limb {limb} does not fit in {bits} bits")]
    LimbOutOfRange {
        signal: String,
        limb: usize,
        bits: usize,
    },
    #[error("{signal}: coordinate is not reduced modulo the base field")]
    NotReduced { signal: String },
    #[error("{signal}: point is not on the curve")]
    NotOnCurve { signal: String },
    #[error("{signal}: point is not in the prime-order subgroup")]
    NotInSubgroup { signal: String },
    #[error("hash maps to the point at infinity")]
    HashToInfinity,
    #[error("pairing check failed: final exponentiation is not the identity")]
    PairingMismatch,
    #[error("witness generator reported unsatisfied constraints: {0}")]
    Unsatisfiable(String),
}

/// Declared signal layout disagrees with what was measured or supplied. Always a
/// build/config defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{stage}: layout mismatch, declared {declared} public signals but measured {measured}")]
    LengthMismatch {
        stage: Stage,
        declared: usize,
        measured: usize,
    },
    #[error("{stage}: no public signal named `{name}`")]
    UnknownSignal { stage: Stage, name: String },
    #[error("`{signal}`: expected shape {expected:?}, {found}")]
    ShapeMismatch {
        signal: String,
        expected: Vec<usize>,
        found: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("extraction of `{signal}` from {stage} witness failed: {reason}")]
    Extraction {
        signal: String,
        stage: Stage,
        reason: String,
    },
    #[error("{stage}: no source for declared input `{name}`")]
    MissingInput { stage: Stage, name: String },
    #[error(
        "chain mismatch on `{signal}` ({producer} -> {consumer}) at index {index}: \
         {producer} public[{producer_offset}] = {producer_value}, \
         {consumer} public[{consumer_offset}] = {consumer_value}"
    )]
    Mismatch {
        signal: String,
        producer: Stage,
        consumer: Stage,
        index: usize,
        producer_offset: usize,
        consumer_offset: usize,
        producer_value: FieldValue,
        consumer_value: FieldValue,
    },
}

/// An external collaborator (circom, node, snarkjs) misbehaved.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}\n{stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` did not produce {}", .path.display())]
    MissingArtifact { command: String, path: PathBuf },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("signature invalid: {stage} is unsatisfiable: {failure}")]
    Validation {
        stage: Stage,
        #[source]
        failure: ValidationFailure,
    },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{stage}: {source}")]
    Tool {
        stage: Stage,
        #[source]
        source: ToolError,
    },
    #[error("{stage}: proof was rejected by the verifier")]
    ProofRejected { stage: Stage },
    #[error("{stage}: missing prerequisite artifact {}", .path.display())]
    MissingArtifact { stage: Stage, path: PathBuf },
    #[error("malformed r1cs {}: {reason}", .path.display())]
    R1cs { path: PathBuf, reason: String },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_validation_failure(&self) -> bool {
        matches!(self, PipelineError::Validation { .. })
    }
}

/// A [`PipelineError`] tagged with the orchestrator phase it escaped from.
#[derive(Error, Debug)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: PipelineError,
}

impl PhaseError {
    pub fn new(phase: Phase, source: impl Into<PipelineError>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }

    /// Process exit code: 1 for an invalid signature, otherwise one code per phase.
    pub fn exit_code(&self) -> u8 {
        if self.source.is_validation_failure() {
            1
        } else {
            self.phase.exit_code()
        }
    }
}
