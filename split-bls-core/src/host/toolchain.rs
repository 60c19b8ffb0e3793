use std::{
    collections::VecDeque,
    ffi::OsString,
    fs,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use common::{
    path::{RunPaths, StagePaths},
    stage::Stage,
};
use itertools::Itertools;
use tracing::{info, warn};

use crate::{
    host::config::PipelineConfig,
    utils::errors::{PipelineError, ToolError, ValidationFailure},
};

/// Lines of diagnostic output kept for an error report. Everything is in the run log.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Marker the circom witness runtime prints when a constraint assertion fails.
pub const ASSERT_FAILED: &str = "Assert Failed";

pub const TOOL_LOG_TARGET: &str = "split_bls::tool";

/// The external collaborators: circuit compiler, witness generator, and proof system.
///
/// Every method writes its artifacts to the paths it is given and nothing else.
pub trait Toolchain {
    /// Versions of the tools found, one line each.
    fn check_prereqs(&self) -> Result<Vec<String>, ToolError>;

    /// `.r1cs`, `.sym` and the witness-generator wasm.
    fn compile(&self, paths: &StagePaths) -> Result<(), ToolError>;

    /// Binary witness from `run.input()`.
    fn generate_witness(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError>;

    /// JSON export of the binary witness.
    fn export_witness_json(&self, run: &RunPaths) -> Result<(), ToolError>;

    /// Initial proving key from the constraint system and powers of tau.
    fn setup(&self, paths: &StagePaths, ptau: &Path) -> Result<(), ToolError>;

    fn contribute(&self, paths: &StagePaths, entropy: &str) -> Result<(), ToolError>;

    fn export_verification_key(&self, paths: &StagePaths) -> Result<(), ToolError>;

    /// `proof.json` and `public.json`.
    fn prove(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError>;

    /// `Ok(false)` when the verifier rejects the proof.
    fn verify(&self, paths: &StagePaths, run: &RunPaths) -> Result<bool, ToolError>;

    fn export_verifier(&self, paths: &StagePaths, dest: &Path) -> Result<(), ToolError>;
}

/// A failed witness generation is a verdict, not a crash, when the runtime reports a
/// failed assertion.
pub fn classify_witness_failure(stage: Stage, error: ToolError) -> PipelineError {
    if let ToolError::Failed { stderr, .. } = &error {
        if let Some(line) = stderr.lines().find(|line| line.contains(ASSERT_FAILED)) {
            return PipelineError::Validation {
                stage,
                failure: ValidationFailure::Unsatisfiable(line.trim().to_string()),
            };
        }
    }
    PipelineError::Tool {
        stage,
        source: error,
    }
}

struct ProcessOutput {
    success: bool,
    status: String,
    stdout_tail: VecDeque<String>,
    stderr_tail: VecDeque<String>,
}

impl ProcessOutput {
    fn diagnostics(&self) -> String {
        self.stderr_tail
            .iter()
            .chain(self.stdout_tail.iter())
            .join("\n")
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == DIAGNOSTIC_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

fn stream_lines<R: Read>(reader: R, is_stderr: bool) -> VecDeque<String> {
    let mut tail = VecDeque::new();
    for line in BufReader::new(reader).lines().map_while(Result::ok) {
        if is_stderr {
            warn!(target: TOOL_LOG_TARGET, "{line}");
        } else {
            info!(target: TOOL_LOG_TARGET, "{line}");
        }
        push_tail(&mut tail, line);
    }
    tail
}

/// A command line plus the form it is logged in.
struct Invocation {
    command: Command,
    display: String,
}

impl Invocation {
    fn new(program: impl AsRef<Path>) -> Self {
        let program = program.as_ref();
        Self {
            command: Command::new(program),
            display: program.display().to_string(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        let arg = arg.into();
        self.display.push(' ');
        self.display.push_str(&arg.to_string_lossy());
        self.command.arg(arg);
        self
    }

    /// An argument that must not appear in the logs.
    fn secret_arg(mut self, arg: impl Into<OsString>, shown: &str) -> Self {
        self.display.push(' ');
        self.display.push_str(shown);
        self.command.arg(arg.into());
        self
    }

    fn env(mut self, key: &str, value: impl Into<OsString>) -> Self {
        self.command.env(key, value.into());
        self
    }

    /// Runs to completion, streaming both output pipes into the log.
    fn run(mut self) -> Result<ProcessOutput, ToolError> {
        info!("$ {}", self.display);
        let mut child = self
            .command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: self.display.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout_tail, stderr_tail) = std::thread::scope(|s| {
            let stderr_reader =
                s.spawn(move || stderr.map(|e| stream_lines(e, true)).unwrap_or_default());
            let stdout_tail = stdout.map(|o| stream_lines(o, false)).unwrap_or_default();
            (stdout_tail, stderr_reader.join().unwrap_or_default())
        });
        let status = child.wait()?;

        Ok(ProcessOutput {
            success: status.success(),
            status: status.to_string(),
            stdout_tail,
            stderr_tail,
        })
    }

    fn run_expecting(self, artifacts: &[PathBuf]) -> Result<(), ToolError> {
        let display = self.display.clone();
        let output = self.run()?;
        if !output.success {
            return Err(ToolError::Failed {
                command: display,
                status: output.status.clone(),
                stderr: output.diagnostics(),
            });
        }
        if let Some(missing) = artifacts.iter().find(|path| !path.exists()) {
            return Err(ToolError::MissingArtifact {
                command: display,
                path: missing.clone(),
            });
        }
        Ok(())
    }
}

/// circom, node and snarkjs, run as child processes.
#[derive(Debug, Clone)]
pub struct SnarkjsToolchain {
    circom: PathBuf,
    node: PathBuf,
    snarkjs: PathBuf,
    include_dirs: Vec<PathBuf>,
    node_options: String,
}

impl SnarkjsToolchain {
    pub fn new(config: &PipelineConfig) -> Self {
        let heap_mib = config.memory.node_heap_mib();
        info!("node heap ceiling: {heap_mib} MiB");
        Self {
            circom: config.tools.circom.clone(),
            node: config.tools.node.clone(),
            snarkjs: config.tools.snarkjs.clone(),
            include_dirs: config.include_dirs.clone(),
            node_options: format!("--max-old-space-size={heap_mib}"),
        }
    }

    fn node(&self) -> Invocation {
        Invocation::new(&self.node).env("NODE_OPTIONS", &self.node_options)
    }

    /// `snarkjs` may be given as its `cli.js`, in which case it runs under node.
    fn snarkjs(&self) -> Invocation {
        if self.snarkjs.extension().is_some_and(|ext| ext == "js" || ext == "cjs") {
            self.node().arg(&self.snarkjs)
        } else {
            Invocation::new(&self.snarkjs).env("NODE_OPTIONS", &self.node_options)
        }
    }
}

fn version_line(output: &ProcessOutput) -> String {
    output
        .stdout_tail
        .iter()
        .chain(output.stderr_tail.iter())
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_default()
}

impl Toolchain for SnarkjsToolchain {
    fn check_prereqs(&self) -> Result<Vec<String>, ToolError> {
        let mut versions = Vec::new();
        for invocation in [
            Invocation::new(&self.circom).arg("--version"),
            self.node().arg("--version"),
        ] {
            let display = invocation.display.clone();
            let output = invocation.run()?;
            if !output.success {
                return Err(ToolError::Failed {
                    command: display,
                    status: output.status.clone(),
                    stderr: output.diagnostics(),
                });
            }
            versions.push(version_line(&output));
        }
        // snarkjs has no version flag; its banner is printed on every invocation and the
        // usage exit status is non-zero.
        let output = self.snarkjs().run()?;
        versions.push(version_line(&output));
        Ok(versions)
    }

    fn compile(&self, paths: &StagePaths) -> Result<(), ToolError> {
        fs::create_dir_all(&paths.dir)?;
        let mut invocation = Invocation::new(&self.circom)
            .arg(&paths.source)
            .arg("--r1cs")
            .arg("--wasm")
            .arg("--sym")
            .arg("-o")
            .arg(&paths.dir);
        for dir in &self.include_dirs {
            invocation = invocation.arg("-l").arg(dir);
        }
        invocation.run_expecting(&[paths.r1cs(), paths.wasm()])
    }

    fn generate_witness(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError> {
        self.node()
            .arg(paths.witness_generator())
            .arg(paths.wasm())
            .arg(run.input())
            .arg(run.witness_bin())
            .run_expecting(&[run.witness_bin()])
    }

    fn export_witness_json(&self, run: &RunPaths) -> Result<(), ToolError> {
        self.snarkjs()
            .arg("wtns")
            .arg("export")
            .arg("json")
            .arg(run.witness_bin())
            .arg(run.witness_json())
            .run_expecting(&[run.witness_json()])
    }

    fn setup(&self, paths: &StagePaths, ptau: &Path) -> Result<(), ToolError> {
        self.snarkjs()
            .arg("groth16")
            .arg("setup")
            .arg(paths.r1cs())
            .arg(ptau)
            .arg(paths.initial_zkey())
            .run_expecting(&[paths.initial_zkey()])
    }

    fn contribute(&self, paths: &StagePaths, entropy: &str) -> Result<(), ToolError> {
        self.snarkjs()
            .arg("zkey")
            .arg("contribute")
            .arg(paths.initial_zkey())
            .arg(paths.final_zkey())
            .arg("--name=split-bls")
            .secret_arg(format!("-e={entropy}"), "-e=<entropy>")
            .run_expecting(&[paths.final_zkey()])
    }

    fn export_verification_key(&self, paths: &StagePaths) -> Result<(), ToolError> {
        self.snarkjs()
            .arg("zkey")
            .arg("export")
            .arg("verificationkey")
            .arg(paths.final_zkey())
            .arg(paths.verification_key())
            .run_expecting(&[paths.verification_key()])
    }

    fn prove(&self, paths: &StagePaths, run: &RunPaths) -> Result<(), ToolError> {
        self.snarkjs()
            .arg("groth16")
            .arg("prove")
            .arg(paths.final_zkey())
            .arg(run.witness_bin())
            .arg(run.proof())
            .arg(run.public())
            .run_expecting(&[run.proof(), run.public()])
    }

    fn verify(&self, paths: &StagePaths, run: &RunPaths) -> Result<bool, ToolError> {
        let invocation = self
            .snarkjs()
            .arg("groth16")
            .arg("verify")
            .arg(paths.verification_key())
            .arg(run.public())
            .arg(run.proof());
        let display = invocation.display.clone();
        let output = invocation.run()?;
        if output.success {
            return Ok(true);
        }
        let diagnostics = output.diagnostics();
        if diagnostics.contains("Invalid proof") {
            return Ok(false);
        }
        Err(ToolError::Failed {
            command: display,
            status: output.status,
            stderr: diagnostics,
        })
    }

    fn export_verifier(&self, paths: &StagePaths, dest: &Path) -> Result<(), ToolError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        self.snarkjs()
            .arg("zkey")
            .arg("export")
            .arg("solidityverifier")
            .arg(paths.final_zkey())
            .arg(dest)
            .run_expecting(&[dest.to_path_buf()])
    }
}
