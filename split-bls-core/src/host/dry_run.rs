use std::{cell::RefCell, collections::BTreeMap, path::Path};

use common::{
    field_conversion::{scalar_modulus, FieldValue},
    path::{RunPaths, StagePaths},
    serializable::{write_if_changed, Serializable},
    stage::Stage,
};
use serde::{Deserialize, Serialize};

use crate::{
    host::toolchain::{Toolchain, ASSERT_FAILED},
    layout::{SignalLayout, StageInterface},
    r1cs::R1csHeader,
    stages::{bls12_381::Bls12_381Capabilities, synthesize_witness, StageInput},
    utils::errors::{PipelineError, ToolError},
};

/// Stand-in proof: it carries the public signals it was made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DryRunProof {
    protocol: String,
    stage: Stage,
    public: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DryRunVerificationKey {
    protocol: String,
    stage: Stage,
    #[serde(rename = "nPublic")]
    n_public: usize,
}

/// Rehearses the pipeline without circom or snarkjs.
///
/// Artifacts have the real names and, where the orchestrator reads them (r1cs header,
/// witness and public JSON), the real formats. Witnesses come from the native stage
/// contracts, so an invalid signature fails witness generation the way the compiled
/// circuit would. Every call is counted.
#[derive(Debug, Default)]
pub struct DryRunToolchain {
    calls: RefCell<BTreeMap<&'static str, usize>>,
    public_count_override: BTreeMap<Stage, usize>,
}

fn failed(command: String, stderr: impl Into<String>) -> ToolError {
    ToolError::Failed {
        command,
        status: "exit status: 1".to_string(),
        stderr: stderr.into(),
    }
}

fn require(command: &str, path: &Path) -> Result<(), ToolError> {
    if path.exists() {
        Ok(())
    } else {
        Err(failed(
            command.to_string(),
            format!("ENOENT: no such file or directory, open '{}'", path.display()),
        ))
    }
}

fn write_json<T: Serialize + serde::de::DeserializeOwned>(value: &T, path: &Path) -> Result<(), ToolError> {
    value.serialize_to_file(path)?;
    Ok(())
}

impl DryRunToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `stage` as if its circuit exposed `count` public signals.
    pub fn with_public_count(mut self, stage: Stage, count: usize) -> Self {
        self.public_count_override.insert(stage, count);
        self
    }

    /// Number of calls to `operation` (the [`Toolchain`] method name).
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.borrow().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().values().sum()
    }

    fn record(&self, operation: &'static str, stage: Stage) -> String {
        *self.calls.borrow_mut().entry(operation).or_default() += 1;
        let command = format!("dry-run {operation} {stage}");
        tracing::info!("$ {command}");
        command
    }

    fn read_witness(run: &RunPaths, path: &Path, command: &str) -> Result<Vec<FieldValue>, ToolError> {
        require(command, path)?;
        Vec::<FieldValue>::deserialize_from_file(path)
            .map_err(|e| failed(command.to_string(), format!("{} ({})", e, run.stage)))
    }
}

impl Toolchain for DryRunToolchain {
    fn check_prereqs(&self) -> Result<Vec<String>, ToolError> {
        *self.calls.borrow_mut().entry("check_prereqs").or_default() += 1;
        Ok(vec![format!("dry-run toolchain {}", env!("CARGO_PKG_VERSION"))])
    }

    fn compile(&self, paths: &StagePaths) -> Result<(), ToolError> {
        let command = self.record("compile", paths.stage);
        require(&command, &paths.source)?;
        let interface = StageInterface::of(paths.stage);
        let outputs: usize = interface.outputs.iter().map(|decl| decl.len()).sum();
        let declared = SignalLayout::of(paths.stage).total();
        let public = self
            .public_count_override
            .get(&paths.stage)
            .copied()
            .unwrap_or(declared);
        let n_pub_out = outputs.min(public);
        let header = R1csHeader {
            prime: scalar_modulus().clone(),
            n_wires: (1 + public) as u32,
            n_pub_out: n_pub_out as u32,
            n_pub_in: (public - n_pub_out) as u32,
            n_prv_in: 0,
            n_labels: (1 + public) as u64,
            n_constraints: 0,
        };

        let mut r1cs = Vec::new();
        header.write(&mut r1cs)?;
        write_if_changed(&paths.r1cs(), &r1cs)?;
        write_if_changed(&paths.sym(), b"")?;
        write_if_changed(&paths.wasm(), format!("dry-run {}\n", paths.stage).as_bytes())?;
        write_if_changed(&paths.witness_generator(), b"// dry-run\n")?;
        Ok(())
    }

    fn generate_witness(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError> {
        let command = self.record("generate_witness", run.stage);
        require(&command, &paths.wasm())?;
        let input = StageInput::from_file(&run.input())
            .map_err(|e| failed(command.clone(), e.to_string()))?;
        let witness = synthesize_witness(&Bls12_381Capabilities, run.stage, &input).map_err(|e| {
            match e {
                PipelineError::Validation { failure, .. } => {
                    failed(command.clone(), format!("Error: {ASSERT_FAILED}. {failure}"))
                }
                other => failed(command.clone(), other.to_string()),
            }
        })?;
        write_json(&witness.values().to_vec(), &run.witness_bin())
    }

    fn export_witness_json(&self, run: &RunPaths) -> Result<(), ToolError> {
        let command = self.record("export_witness_json", run.stage);
        let values = Self::read_witness(run, &run.witness_bin(), &command)?;
        write_json(&values, &run.witness_json())
    }

    fn setup(&self, paths: &StagePaths, ptau: &Path) -> Result<(), ToolError> {
        let command = self.record("setup", paths.stage);
        require(&command, &paths.r1cs())?;
        require(&command, ptau)?;
        write_if_changed(
            &paths.initial_zkey(),
            format!("dry-run zkey {} 0000\n", paths.stage).as_bytes(),
        )?;
        Ok(())
    }

    fn contribute(&self, paths: &StagePaths, _entropy: &str) -> Result<(), ToolError> {
        let command = self.record("contribute", paths.stage);
        require(&command, &paths.initial_zkey())?;
        write_if_changed(
            &paths.final_zkey(),
            format!("dry-run zkey {} final\n", paths.stage).as_bytes(),
        )?;
        Ok(())
    }

    fn export_verification_key(&self, paths: &StagePaths) -> Result<(), ToolError> {
        let command = self.record("export_verification_key", paths.stage);
        require(&command, &paths.final_zkey())?;
        let header = R1csHeader::read(&paths.r1cs()).map_err(|e| failed(command, e.to_string()))?;
        write_json(
            &DryRunVerificationKey {
                protocol: "groth16".into(),
                stage: paths.stage,
                n_public: header.public_len(),
            },
            &paths.verification_key(),
        )
    }

    fn prove(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError> {
        let command = self.record("prove", run.stage);
        require(&command, &paths.final_zkey())?;
        let vkey = DryRunVerificationKey::deserialize_from_file(&paths.verification_key())?;
        let witness = Self::read_witness(run, &run.witness_bin(), &command)?;
        let public = witness
            .get(1..1 + vkey.n_public)
            .ok_or_else(|| failed(command.clone(), "witness shorter than its public signals"))?
            .to_vec();
        write_json(
            &DryRunProof {
                protocol: "groth16".into(),
                stage: run.stage,
                public: public.clone(),
            },
            &run.proof(),
        )?;
        write_json(&public, &run.public())
    }

    fn verify(&self, paths: &StagePaths, run: &RunPaths) -> Result<bool, ToolError> {
        let command = self.record("verify", run.stage);
        for path in [paths.verification_key(), run.proof(), run.public()] {
            require(&command, &path)?;
        }
        let vkey = DryRunVerificationKey::deserialize_from_file(&paths.verification_key())?;
        let proof = DryRunProof::deserialize_from_file(&run.proof())?;
        let public = Vec::<FieldValue>::deserialize_from_file(&run.public())?;
        Ok(vkey.stage == run.stage
            && proof.stage == run.stage
            && public.len() == vkey.n_public
            && proof.public == public)
    }

    fn export_verifier(&self, paths: &StagePaths, dest: &Path) -> Result<(), ToolError> {
        let command = self.record("export_verifier", paths.stage);
        require(&command, &paths.final_zkey())?;
        let source = format!(
            "// SPDX-License-Identifier: GPL-3.0\n// dry-run verifier for {} ({} public signals)\n",
            paths.stage,
            SignalLayout::of(paths.stage).total()
        );
        write_if_changed(dest, source.as_bytes())?;
        Ok(())
    }
}
