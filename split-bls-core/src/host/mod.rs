//! Sequencing of the external steps across the three stages.
//!
//! Every step is skipped when its outputs already exist, so an interrupted multi-hour run
//! resumes where it stopped. Outputs of a failed external step are removed before the
//! error propagates, and files the orchestrator writes itself are replaced atomically and
//! only when their content changes.

pub mod config;
pub mod dry_run;
pub mod toolchain;

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use common::{
    path::{chain_report_path, StagePaths},
    serializable::{write_if_changed, Serializable},
    stage::Stage,
};
use tracing::info;

use crate::{
    chain::{
        extractor::next_input,
        native_chain,
        verifier::{verify_chain, ChainReport},
    },
    layout::SignalLayout,
    r1cs::R1csHeader,
    stages::{bls12_381::Bls12_381Capabilities, StageInput},
    utils::errors::{PhaseError, PipelineError, ToolError},
    witness::{PublicRecord, WitnessRecord},
};

use self::{
    config::PipelineConfig,
    toolchain::{classify_witness_failure, Toolchain},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CheckPrereqs,
    Compile,
    Witness,
    Setup,
    Prove,
    Verify,
    VerifyChain,
    ExportVerifiers,
    Preflight,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::CheckPrereqs => "check-prereqs",
            Phase::Compile => "compile",
            Phase::Witness => "witness",
            Phase::Setup => "setup",
            Phase::Prove => "prove",
            Phase::Verify => "verify",
            Phase::VerifyChain => "verify-chain",
            Phase::ExportVerifiers => "export-verifiers",
            Phase::Preflight => "preflight",
        }
    }

    /// Process exit code when this phase fails for any reason other than an invalid
    /// signature (1). Usage and configuration errors exit with 2.
    pub fn exit_code(self) -> u8 {
        match self {
            Phase::CheckPrereqs => 3,
            Phase::Compile => 4,
            Phase::Witness => 5,
            Phase::Setup => 6,
            Phase::Prove => 7,
            Phase::Verify => 8,
            Phase::VerifyChain => 9,
            Phase::ExportVerifiers => 10,
            Phase::Preflight => 11,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => info!("removed partial output {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("could not remove {}: {e}", path.display()),
        }
    }
}

fn all_exist(paths: &[PathBuf]) -> bool {
    paths.iter().all(|path| path.exists())
}

fn require(stage: Stage, path: &Path) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

/// Runs a toolchain step and removes `outputs` if it fails.
fn external<R>(
    outputs: &[PathBuf],
    step: impl FnOnce() -> Result<R, PipelineError>,
) -> Result<R, PipelineError> {
    step().inspect_err(|_| remove_outputs(outputs))
}

/// Drives one run through compile, witness, setup, prove, verify and chain verification.
pub struct Orchestrator<T: Toolchain> {
    config: PipelineConfig,
    toolchain: T,
}

impl<T: Toolchain> Orchestrator<T> {
    pub fn new(config: PipelineConfig, toolchain: T) -> Self {
        Self { config, toolchain }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// The Stage1 request: `explicit` if given, else the one recorded by an earlier run.
    /// Failures are reported against `phase`, the step that needs the request.
    pub fn load_request(
        &self,
        explicit: Option<&Path>,
        phase: Phase,
    ) -> Result<StageInput, PhaseError> {
        let recorded = self.config.run_paths(Stage::One).input();
        let path = explicit.unwrap_or(recorded.as_path());
        let request = StageInput::from_file(path).map_err(|e| PhaseError::new(phase, e))?;
        request
            .check_against(Stage::One)
            .map_err(|e| PhaseError::new(phase, e))?;
        Ok(request)
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::check_prereqs")]
    pub fn check_prereqs(&self) -> Result<(), PhaseError> {
        let phase = Phase::CheckPrereqs;
        let versions = self.toolchain.check_prereqs().map_err(|e| {
            PhaseError::new(phase, PipelineError::Config(format!("toolchain unavailable: {e}")))
        })?;
        for version in versions {
            info!("found {version}");
        }
        for stage in self.config.stages() {
            require(stage, &self.config.stage_paths(stage).source)
                .map_err(|e| PhaseError::new(phase, e))?;
        }
        if !self.config.ptau.exists() {
            return Err(PhaseError::new(
                phase,
                PipelineError::Config(format!(
                    "powers of tau file {} not found (set it with --ptau or SPLIT_BLS_PTAU)",
                    self.config.ptau.display()
                )),
            ));
        }
        Ok(())
    }

    /// Measured public-signal count of a compiled stage, checked against its declaration.
    fn measured_public_len(&self, stage: Stage) -> Result<usize, PipelineError> {
        let r1cs = self.config.stage_paths(stage).r1cs();
        require(stage, &r1cs)?;
        let measured = R1csHeader::read(&r1cs)?.public_len();
        SignalLayout::of(stage).check_public_len(measured)?;
        Ok(measured)
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::compile")]
    pub fn compile(&self) -> Result<(), PhaseError> {
        for stage in self.config.stages() {
            self.compile_stage(stage)
                .map_err(|e| PhaseError::new(Phase::Compile, e))?;
        }
        Ok(())
    }

    fn compile_stage(&self, stage: Stage) -> Result<(), PipelineError> {
        let paths = self.config.stage_paths(stage);
        if all_exist(&[paths.r1cs(), paths.wasm()]) {
            info!("{stage}: compiled circuit exists, skipping");
        } else {
            require(stage, &paths.source)?;
            info!("{stage}: compiling {}", paths.source.display());
            external(&[paths.r1cs(), paths.sym(), paths.js_dir()], || {
                self.toolchain
                    .compile(&paths)
                    .map_err(|source| PipelineError::Tool { stage, source })
            })?;
        }
        let measured = self.measured_public_len(stage)?;
        info!("{stage}: {measured} public signals");
        Ok(())
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::witness")]
    pub fn witness(&self, request: &StageInput) -> Result<(), PhaseError> {
        for stage in self.config.stages() {
            self.witness_stage(stage, request)
                .map_err(|e| PhaseError::new(Phase::Witness, e))?;
        }
        Ok(())
    }

    fn stage_input(&self, stage: Stage, request: &StageInput) -> Result<StageInput, PipelineError> {
        let Some(producer) = stage.previous() else {
            request.check_against(stage)?;
            return Ok(request.clone());
        };
        let producer_witness = self.config.run_paths(producer).witness_json();
        require(producer, &producer_witness)?;
        let witness = WitnessRecord::from_file(producer, &producer_witness)?;
        let measured = self.measured_public_len(producer)?;
        Ok(next_input(stage, &witness, measured, request)?)
    }

    fn witness_stage(&self, stage: Stage, request: &StageInput) -> Result<(), PipelineError> {
        let paths = self.config.stage_paths(stage);
        let run = self.config.run_paths(stage);
        let input = self.stage_input(stage, request)?;
        if input.write(&run.input())? {
            // A new input invalidates everything derived from the old one.
            remove_outputs(&[
                run.witness_bin(),
                run.witness_json(),
                run.proof(),
                run.public(),
                run.verified_marker(),
            ]);
        }

        if run.witness_json().exists() {
            info!("{stage}: witness exists, skipping");
            return Ok(());
        }
        require(stage, &paths.wasm())?;
        info!("{stage}: generating witness");
        external(&[run.witness_bin()], || {
            self.toolchain
                .generate_witness(&paths, &run)
                .map_err(|e| classify_witness_failure(stage, e))
        })?;
        external(&[run.witness_json()], || {
            self.toolchain
                .export_witness_json(&run)
                .map_err(|source| PipelineError::Tool { stage, source })
        })?;

        let witness = WitnessRecord::from_file(stage, &run.witness_json())?;
        info!("{stage}: witness has {} values", witness.len());
        Ok(())
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::setup")]
    pub fn setup(&self, entropy: &str) -> Result<(), PhaseError> {
        for stage in self.config.stages() {
            self.setup_stage(stage, entropy)
                .map_err(|e| PhaseError::new(Phase::Setup, e))?;
        }
        Ok(())
    }

    fn setup_stage(&self, stage: Stage, entropy: &str) -> Result<(), PipelineError> {
        let paths = self.config.stage_paths(stage);
        if all_exist(&[paths.final_zkey(), paths.verification_key()]) {
            info!("{stage}: keys exist, skipping setup");
            return Ok(());
        }
        require(stage, &paths.r1cs())?;
        let tool = |source: ToolError| PipelineError::Tool { stage, source };

        if !paths.initial_zkey().exists() {
            if !self.config.ptau.exists() {
                return Err(PipelineError::Config(format!(
                    "powers of tau file {} not found",
                    self.config.ptau.display()
                )));
            }
            info!("{stage}: groth16 setup");
            external(&[paths.initial_zkey()], || {
                self.toolchain.setup(&paths, &self.config.ptau).map_err(tool)
            })?;
        }
        if !paths.final_zkey().exists() {
            info!("{stage}: contributing to the ceremony");
            external(&[paths.final_zkey()], || {
                self.toolchain.contribute(&paths, entropy).map_err(tool)
            })?;
        }
        info!("{stage}: exporting verification key");
        external(&[paths.verification_key()], || {
            self.toolchain.export_verification_key(&paths).map_err(tool)
        })
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::prove")]
    pub fn prove(&self) -> Result<(), PhaseError> {
        for stage in self.config.stages() {
            self.prove_stage(stage)
                .map_err(|e| PhaseError::new(Phase::Prove, e))?;
        }
        Ok(())
    }

    fn prove_stage(&self, stage: Stage) -> Result<(), PipelineError> {
        let paths = self.config.stage_paths(stage);
        let run = self.config.run_paths(stage);
        if all_exist(&[run.proof(), run.public()]) {
            info!("{stage}: proof exists, skipping");
            return Ok(());
        }
        require(stage, &paths.final_zkey())?;
        require(stage, &run.witness_bin())?;
        info!("{stage}: proving");
        external(&[run.proof(), run.public(), run.verified_marker()], || {
            self.toolchain
                .prove(&paths, &run)
                .map_err(|source| PipelineError::Tool { stage, source })
        })?;
        let public = PublicRecord::from_file(stage, &run.public())?;
        SignalLayout::of(stage).check_public_len(public.len())?;
        Ok(())
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::verify")]
    pub fn verify(&self) -> Result<(), PhaseError> {
        for stage in self.config.stages() {
            self.verify_stage(stage)
                .map_err(|e| PhaseError::new(Phase::Verify, e))?;
        }
        Ok(())
    }

    fn verify_stage(&self, stage: Stage) -> Result<(), PipelineError> {
        let paths = self.config.stage_paths(stage);
        let run = self.config.run_paths(stage);
        if run.verified_marker().exists() {
            info!("{stage}: already verified, skipping");
            return Ok(());
        }
        for path in [paths.verification_key(), run.proof(), run.public()] {
            require(stage, &path)?;
        }
        info!("{stage}: verifying proof");
        let accepted = self
            .toolchain
            .verify(&paths, &run)
            .map_err(|source| PipelineError::Tool { stage, source })?;
        if !accepted {
            return Err(PipelineError::ProofRejected { stage });
        }
        write_if_changed(&run.verified_marker(), format!("{stage}\n").as_bytes())
            .map_err(|e| PipelineError::io(run.verified_marker(), e))?;
        Ok(())
    }

    /// Compares every boundary signal across the proved public records of all three
    /// stages and writes `chain_report.json`, or removes a stale one on mismatch.
    /// Ignores the stage restriction.
    #[tracing::instrument(skip_all, name = "Orchestrator::verify_chain")]
    pub fn verify_chain(&self) -> Result<ChainReport, PhaseError> {
        external(&[chain_report_path(&self.config.run_dir)], || {
            self.verify_chain_inner()
        })
        .map_err(|e| PhaseError::new(Phase::VerifyChain, e))
    }

    fn verify_chain_inner(&self) -> Result<ChainReport, PipelineError> {
        let mut records = Vec::with_capacity(3);
        for stage in Stage::ALL {
            let public = self.config.run_paths(stage).public();
            require(stage, &public)?;
            records.push(PublicRecord::from_file(stage, &public)?);
        }
        let report = verify_chain([&records[0], &records[1], &records[2]])?;
        for entry in &report.boundaries {
            info!(
                "{} -> {}: `{}` ({} values) matches",
                entry.producer, entry.consumer, entry.signal, entry.len
            );
        }
        let path = chain_report_path(&self.config.run_dir);
        report
            .serialize_to_file(&path)
            .map_err(|e| PipelineError::io(&path, e))?;
        Ok(report)
    }

    #[tracing::instrument(skip_all, name = "Orchestrator::export_verifiers")]
    pub fn export_verifiers(&self) -> Result<Vec<PathBuf>, PhaseError> {
        let mut exported = Vec::new();
        for stage in self.config.stages() {
            let dest = self
                .export_stage(stage)
                .map_err(|e| PhaseError::new(Phase::ExportVerifiers, e))?;
            exported.push(dest);
        }
        Ok(exported)
    }

    fn export_stage(&self, stage: Stage) -> Result<PathBuf, PipelineError> {
        let paths: StagePaths = self.config.stage_paths(stage);
        let dest = paths.exported_verifier(&self.config.export_dir);
        if dest.exists() {
            info!("{stage}: verifier exists at {}, skipping", dest.display());
            return Ok(dest);
        }
        require(stage, &paths.final_zkey())?;
        info!("{stage}: exporting verifier to {}", dest.display());
        external(&[dest.clone()], || {
            self.toolchain
                .export_verifier(&paths, &dest)
                .map_err(|source| PipelineError::Tool { stage, source })
        })?;
        Ok(dest)
    }

    /// Evaluates the three native contracts on `request`. Nothing is written.
    #[tracing::instrument(skip_all, name = "Orchestrator::preflight")]
    pub fn preflight(&self, request: &StageInput) -> Result<(), PhaseError> {
        native_chain(&Bls12_381Capabilities, request)
            .map_err(|e| PhaseError::new(Phase::Preflight, e))?;
        info!("preflight: signature verifies natively");
        Ok(())
    }

    /// Every step in order, then the chain check.
    pub fn full(
        &self,
        request: &StageInput,
        entropy: &str,
        export_verifiers: bool,
    ) -> Result<ChainReport, PhaseError> {
        if self.config.preflight {
            self.preflight(request)?;
        }
        self.check_prereqs()?;
        self.compile()?;
        self.witness(request)?;
        self.setup(entropy)?;
        self.prove()?;
        self.verify()?;
        let report = self.verify_chain()?;
        if export_verifiers {
            self.export_verifiers()?;
        }
        Ok(report)
    }
}
