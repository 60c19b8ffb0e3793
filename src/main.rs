use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use clap::{Args, Parser, Subcommand};
use common::{path::run_log_path, serializable::Serializable, stage::Stage};
use eyre::{eyre, Result, WrapErr};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sysinfo::System;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

use split_bls_core::{
    host::{
        config::PipelineConfig,
        dry_run::DryRunToolchain,
        toolchain::{SnarkjsToolchain, Toolchain},
        Orchestrator, Phase,
    },
    stages::sample::{sample_forged_request, sample_request},
    utils::errors::PhaseError,
};

/// Usage and configuration errors.
const USAGE_EXIT_CODE: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding stage1.circom, stage2.circom and stage3.circom
    #[arg(long, global = true)]
    circuits_dir: Option<PathBuf>,

    /// Directory for compiled circuits and keys
    #[arg(long, global = true)]
    build_dir: Option<PathBuf>,

    /// Directory for the per-signature artifacts and the run log
    #[arg(long, global = true)]
    run_dir: Option<PathBuf>,

    /// Directory for exported Solidity verifiers
    #[arg(long, global = true)]
    export_dir: Option<PathBuf>,

    /// Powers-of-tau file used by the per-stage setup
    #[arg(long, global = true)]
    ptau: Option<PathBuf>,

    /// Restrict the operation to a single stage
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(1..=3))]
    stage: Option<u8>,

    /// Use the native dry-run toolchain instead of circom and snarkjs
    #[arg(long, global = true)]
    dry_run: bool,

    /// Skip the native preflight check in `full`
    #[arg(long, global = true)]
    no_preflight: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that circom, node, snarkjs, the circuit sources and the ptau file are present
    CheckPrereqs,
    /// Compile each stage circuit and check its public-signal count
    Compile,
    /// Generate witnesses, chaining each stage's outputs into the next stage's input
    Witness(InputArgs),
    /// Run the Groth16 setup and export verification keys
    Setup,
    /// Prove each stage
    Prove,
    /// Verify each stage proof
    Verify,
    /// Compare boundary signals across the three public records
    VerifyChain,
    /// Export a Solidity verifier per stage
    ExportVerifiers,
    /// Evaluate the signature natively without any external tool
    Preflight(InputArgs),
    /// Write a request signed by a key derived from a seed
    SampleInput(SampleArgs),
    /// Every step in order, then the chain check
    Full {
        #[command(flatten)]
        input: InputArgs,

        /// Also export the Solidity verifiers
        #[arg(long)]
        export_verifiers: bool,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Stage1 request (pubkey, signature, hash). Defaults to the one recorded in the run dir.
    #[arg(long, short)]
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SampleArgs {
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Output file
    #[arg(long, short, default_value = "input.json")]
    out: PathBuf,

    /// Sign with a key other than the one the pubkey belongs to
    #[arg(long)]
    forged: bool,
}

impl GlobalArgs {
    /// Defaults, then the TOML file, then the environment, then these flags.
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();
        if let Some(path) = &self.config {
            config.load_file(path)?;
        }
        config.apply_env();
        if let Some(dir) = &self.circuits_dir {
            config.circuits_dir = dir.clone();
        }
        if let Some(dir) = &self.build_dir {
            config.build_dir = dir.clone();
        }
        if let Some(dir) = &self.run_dir {
            config.run_dir = dir.clone();
        }
        if let Some(dir) = &self.export_dir {
            config.export_dir = dir.clone();
        }
        if let Some(ptau) = &self.ptau {
            config.ptau = ptau.clone();
        }
        if let Some(index) = self.stage {
            config.only = Some(Stage::from_repr(index).ok_or_else(|| eyre!("no stage {index}"))?);
        }
        if self.no_preflight {
            config.preflight = false;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::SampleInput(args) = &cli.command {
        return match write_sample(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::from(USAGE_EXIT_CODE)
            }
        };
    }

    let config = match cli.global.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };
    if let Err(e) = init_tracing(&config) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(USAGE_EXIT_CODE);
    }
    display_sysinfo();

    let result = if cli.global.dry_run {
        run(&cli.command, Orchestrator::new(config, DryRunToolchain::new()))
    } else {
        let toolchain = SnarkjsToolchain::new(&config);
        run(&cli.command, Orchestrator::new(config, toolchain))
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.source.is_validation_failure() {
                error!("signature invalid: {}", e.source);
            } else {
                error!("{e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn run<T: Toolchain>(command: &Command, orchestrator: Orchestrator<T>) -> Result<(), PhaseError> {
    match command {
        Command::CheckPrereqs => orchestrator.check_prereqs(),
        Command::Compile => orchestrator.compile(),
        Command::Witness(args) => {
            let request = orchestrator.load_request(args.input.as_deref(), Phase::Witness)?;
            orchestrator.witness(&request)
        }
        Command::Setup => orchestrator.setup(&entropy()),
        Command::Prove => orchestrator.prove(),
        Command::Verify => orchestrator.verify(),
        Command::VerifyChain => {
            let report = orchestrator.verify_chain()?;
            info!("chain verified: {} boundary signals match", report.boundaries.len());
            Ok(())
        }
        Command::ExportVerifiers => {
            for path in orchestrator.export_verifiers()? {
                info!("verifier at {}", path.display());
            }
            Ok(())
        }
        Command::Preflight(args) => {
            let request = orchestrator.load_request(args.input.as_deref(), Phase::Preflight)?;
            orchestrator.preflight(&request)
        }
        Command::Full {
            input,
            export_verifiers,
        } => {
            let phase = if orchestrator.config().preflight {
                Phase::Preflight
            } else {
                Phase::Witness
            };
            let request = orchestrator.load_request(input.input.as_deref(), phase)?;
            let report = orchestrator.full(&request, &entropy(), *export_verifiers)?;
            info!(
                "signature verified across all stages ({} boundary signals chained)",
                report.boundaries.len()
            );
            Ok(())
        }
        Command::SampleInput(_) => unreachable!("handled before the orchestrator is built"),
    }
}

fn write_sample(args: &SampleArgs) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let request = if args.forged {
        sample_forged_request(&mut rng)
    } else {
        sample_request(&mut rng)
    };
    request
        .serialize_to_file(&args.out)
        .wrap_err_with(|| format!("writing {}", args.out.display()))?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

/// Contribution entropy for the phase-2 ceremony.
fn entropy() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Interactive stderr layer plus an append-only `run.log` in the run directory.
fn init_tracing(config: &PipelineConfig) -> Result<()> {
    fs::create_dir_all(&config.run_dir)
        .wrap_err_with(|| format!("creating {}", config.run_dir.display()))?;
    let log_path = run_log_path(&config.run_dir);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .wrap_err_with(|| format!("opening {}", log_path.display()))?;

    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let layers = vec![
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .with_filter(stderr_filter)
            .boxed(),
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(log_file))
            .with_filter(file_filter)
            .boxed(),
    ];
    tracing_subscriber::registry().with(layers).init();
    info!("split-bls {} appending to {}", env!("CARGO_PKG_VERSION"), log_path.display());
    Ok(())
}

fn display_sysinfo() {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();
    info!(
        "host {} ({} {}), {} CPUs, {:.2} GB RAM",
        System::host_name().unwrap_or("UNKNOWN".to_string()),
        System::name().unwrap_or("UNKNOWN".to_string()),
        System::os_version().unwrap_or("UNKNOWN".to_string()),
        sys.cpus().len(),
        sys.total_memory() as f64 / 1_000_000_000.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "split-bls",
            "--run-dir",
            "/tmp/run-a",
            "--stage",
            "2",
            "--no-preflight",
            "full",
            "--input",
            "req.json",
        ]);
        let config = cli.global.pipeline_config().unwrap();
        assert_eq!(config.run_dir, PathBuf::from("/tmp/run-a"));
        assert_eq!(config.only, Some(Stage::Two));
        assert!(!config.preflight);
        assert!(matches!(cli.command, Command::Full { export_verifiers: false, .. }));
    }

    #[test]
    fn stage_out_of_range_is_a_usage_error() {
        let err = Cli::try_parse_from(["split-bls", "--stage", "4", "compile"]).unwrap_err();
        assert_eq!(err.exit_code(), i32::from(USAGE_EXIT_CODE));
    }

    #[test]
    fn entropy_is_fresh_hex() {
        let a = entropy();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, entropy());
    }
}
