use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use common::{
    constants::PTAU_ENV_VAR,
    field_conversion::FieldValue,
    path::chain_report_path,
    serializable::Serializable,
    stage::Stage,
};
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use serial_test::serial;
use split_bls_core::{
    chain::verifier::ChainReport,
    host::{config::PipelineConfig, dry_run::DryRunToolchain, Orchestrator, Phase},
    layout::{BOUNDARY_SIGNALS, HM},
    stages::{
        sample::{sample_forged_request, sample_request},
        StageInput,
    },
    utils::errors::{ChainError, LayoutError, PipelineError, ValidationFailure},
};
use tempfile::TempDir;

const EXPENSIVE_STEPS: [&str; 9] = [
    "compile",
    "generate_witness",
    "export_witness_json",
    "setup",
    "contribute",
    "export_verification_key",
    "prove",
    "verify",
    "export_verifier",
];

fn workspace() -> (TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().unwrap();
    let circuits = dir.path().join("circuits");
    fs::create_dir_all(&circuits).unwrap();
    for stage in Stage::ALL {
        fs::write(
            circuits.join(format!("{stage}.circom")),
            "pragma circom 2.1.0;\n",
        )
        .unwrap();
    }
    let ptau = dir.path().join("pot.ptau");
    fs::write(&ptau, "ptau").unwrap();
    let config = PipelineConfig {
        circuits_dir: circuits,
        build_dir: dir.path().join("build"),
        run_dir: dir.path().join("run"),
        export_dir: dir.path().join("verifiers"),
        ptau,
        ..Default::default()
    };
    (dir, config)
}

fn request(seed: u8) -> StageInput {
    sample_request(&mut ChaCha8Rng::from_seed([seed; 32]))
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.insert(path.clone(), fs::read(&path).unwrap());
            }
        }
    }
    files
}

#[test]
fn valid_signature_passes_every_stage() {
    let (_dir, config) = workspace();
    let orchestrator = Orchestrator::new(config.clone(), DryRunToolchain::new());
    let report = orchestrator.full(&request(1), "entropy", true).unwrap();

    assert_eq!(report.boundaries.len(), BOUNDARY_SIGNALS.len());
    let saved = ChainReport::deserialize_from_file(&chain_report_path(&config.run_dir)).unwrap();
    assert_eq!(saved, report);
    for stage in Stage::ALL {
        assert!(config.run_paths(stage).verified_marker().exists());
        assert!(config
            .stage_paths(stage)
            .exported_verifier(&config.export_dir)
            .exists());
    }
    // Each stage is compiled, proved and verified exactly once.
    for step in EXPENSIVE_STEPS {
        assert_eq!(orchestrator.toolchain().calls(step), 3, "{step}");
    }
    // The request is recorded for later single-step invocations.
    assert_eq!(
        orchestrator.load_request(None, Phase::Witness).unwrap(),
        request(1)
    );
}

#[test]
fn second_run_recomputes_nothing() {
    let (dir, config) = workspace();
    Orchestrator::new(config.clone(), DryRunToolchain::new())
        .full(&request(2), "first contribution", true)
        .unwrap();
    let before = snapshot(dir.path());

    let rerun = Orchestrator::new(config, DryRunToolchain::new());
    rerun.full(&request(2), "second contribution", true).unwrap();

    for step in EXPENSIVE_STEPS {
        assert_eq!(rerun.toolchain().calls(step), 0, "{step}");
    }
    assert_eq!(
        rerun.toolchain().total_calls(),
        rerun.toolchain().calls("check_prereqs")
    );
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn new_request_invalidates_only_run_artifacts() {
    let (_dir, config) = workspace();
    Orchestrator::new(config.clone(), DryRunToolchain::new())
        .full(&request(3), "entropy", false)
        .unwrap();
    let zkey = fs::read(config.stage_paths(Stage::Two).final_zkey()).unwrap();

    let next = Orchestrator::new(config.clone(), DryRunToolchain::new());
    next.full(&request(4), "entropy", false).unwrap();
    assert_eq!(next.toolchain().calls("compile"), 0);
    assert_eq!(next.toolchain().calls("setup"), 0);
    assert_eq!(next.toolchain().calls("generate_witness"), 3);
    assert_eq!(next.toolchain().calls("prove"), 3);
    assert_eq!(next.toolchain().calls("verify"), 3);
    assert_eq!(
        fs::read(config.stage_paths(Stage::Two).final_zkey()).unwrap(),
        zkey
    );
}

#[test]
fn forged_signature_is_rejected_by_preflight() {
    let (_dir, config) = workspace();
    let forged = sample_forged_request(&mut ChaCha8Rng::from_seed([5; 32]));
    let orchestrator = Orchestrator::new(config.clone(), DryRunToolchain::new());

    let err = orchestrator.full(&forged, "entropy", false).unwrap_err();
    assert_eq!(err.phase, Phase::Preflight);
    assert_eq!(err.exit_code(), 1);
    assert!(matches!(
        err.source,
        PipelineError::Validation {
            stage: Stage::Three,
            failure: ValidationFailure::PairingMismatch
        }
    ));
    assert_eq!(orchestrator.toolchain().total_calls(), 0);
    assert!(!config.build_dir.exists());
}

#[test]
fn forged_signature_fails_stage3_witness() {
    let (_dir, mut config) = workspace();
    config.preflight = false;
    let forged = sample_forged_request(&mut ChaCha8Rng::from_seed([5; 32]));
    let orchestrator = Orchestrator::new(config.clone(), DryRunToolchain::new());

    let err = orchestrator.full(&forged, "entropy", false).unwrap_err();
    assert_eq!(err.phase, Phase::Witness);
    assert_eq!(err.exit_code(), 1);
    assert!(
        matches!(
            err.source,
            PipelineError::Validation {
                stage: Stage::Three,
                failure: ValidationFailure::Unsatisfiable(_)
            }
        ),
        "{err}"
    );
    assert!(config.run_paths(Stage::One).witness_json().exists());
    assert!(config.run_paths(Stage::Two).witness_json().exists());
    let stage3 = config.run_paths(Stage::Three);
    assert!(stage3.input().exists());
    assert!(!stage3.witness_bin().exists());
    assert!(!stage3.witness_json().exists());
}

#[test]
fn tampered_public_record_breaks_the_chain() {
    let (_dir, config) = workspace();
    let orchestrator = Orchestrator::new(config.clone(), DryRunToolchain::new());
    orchestrator.full(&request(6), "entropy", false).unwrap();

    let public = config.run_paths(Stage::Two).public();
    let mut values = Vec::<FieldValue>::deserialize_from_file(&public).unwrap();
    values[126 + 3] = FieldValue(&values[126 + 3].0 + 1u8);
    values.serialize_to_file(&public).unwrap();

    let err = orchestrator.verify_chain().unwrap_err();
    assert_eq!(err.phase, Phase::VerifyChain);
    assert_eq!(err.exit_code(), 9);
    match err.source {
        PipelineError::Chain(ChainError::Mismatch {
            signal,
            index,
            producer,
            consumer,
            consumer_offset,
            ..
        }) => {
            assert_eq!(signal, HM.name);
            assert_eq!((producer, consumer), (Stage::One, Stage::Two));
            assert_eq!(index, 3);
            assert_eq!(consumer_offset, 129);
        }
        other => panic!("expected a chain mismatch, got {other}"),
    }
    assert!(!chain_report_path(&config.run_dir).exists());
}

#[test]
fn skewed_public_count_is_a_layout_mismatch() {
    let (_dir, config) = workspace();
    let toolchain = DryRunToolchain::new().with_public_count(Stage::One, 97);
    let orchestrator = Orchestrator::new(config.clone(), toolchain);

    let err = orchestrator.full(&request(7), "entropy", false).unwrap_err();
    assert_eq!(err.phase, Phase::Compile);
    assert_eq!(err.exit_code(), 4);
    assert!(matches!(
        err.source,
        PipelineError::Layout(LayoutError::LengthMismatch {
            stage: Stage::One,
            declared: 98,
            measured: 97,
        })
    ));
    assert_eq!(orchestrator.toolchain().calls("generate_witness"), 0);
    assert!(!config.run_paths(Stage::One).dir.exists());
}

#[test]
fn single_stage_needs_its_producer_witness() {
    let (_dir, mut config) = workspace();
    config.only = Some(Stage::Two);
    let orchestrator = Orchestrator::new(config.clone(), DryRunToolchain::new());

    orchestrator.compile().unwrap();
    assert_eq!(orchestrator.toolchain().calls("compile"), 1);
    assert!(!config.stage_paths(Stage::One).r1cs().exists());

    let err = orchestrator.witness(&request(8)).unwrap_err();
    assert_eq!(err.phase, Phase::Witness);
    assert_eq!(err.exit_code(), 5);
    match err.source {
        PipelineError::MissingArtifact { stage, path } => {
            assert_eq!(stage, Stage::One);
            assert_eq!(path, config.run_paths(Stage::One).witness_json());
        }
        other => panic!("expected a missing artifact, got {other}"),
    }
}

#[test]
fn stages_can_be_driven_one_at_a_time() {
    let (_dir, config) = workspace();
    let request = request(9);
    for stage in Stage::ALL {
        let mut single = config.clone();
        single.only = Some(stage);
        let orchestrator = Orchestrator::new(single, DryRunToolchain::new());
        orchestrator.compile().unwrap();
        orchestrator.witness(&request).unwrap();
        orchestrator.setup("entropy").unwrap();
        orchestrator.prove().unwrap();
        orchestrator.verify().unwrap();
        assert_eq!(orchestrator.toolchain().calls("prove"), 1);
    }
    let whole = Orchestrator::new(config, DryRunToolchain::new());
    assert_eq!(
        whole.verify_chain().unwrap().boundaries.len(),
        BOUNDARY_SIGNALS.len()
    );
}

#[test]
#[serial]
fn ptau_location_comes_from_the_environment() {
    let (dir, mut config) = workspace();
    let real = config.ptau.clone();

    std::env::set_var(PTAU_ENV_VAR, dir.path().join("missing.ptau"));
    config.apply_env();
    std::env::remove_var(PTAU_ENV_VAR);
    let err = Orchestrator::new(config.clone(), DryRunToolchain::new())
        .check_prereqs()
        .unwrap_err();
    assert_eq!(err.phase, Phase::CheckPrereqs);
    assert_eq!(err.exit_code(), 3);
    assert!(matches!(err.source, PipelineError::Config(_)));

    std::env::set_var(PTAU_ENV_VAR, &real);
    config.apply_env();
    std::env::remove_var(PTAU_ENV_VAR);
    Orchestrator::new(config, DryRunToolchain::new())
        .check_prereqs()
        .unwrap();
}

#[test]
fn malformed_request_fails_in_the_requesting_phase() {
    let (dir, config) = workspace();
    let orchestrator = Orchestrator::new(config, DryRunToolchain::new());
    let path = dir.path().join("request.json");
    fs::write(&path, "{\"pubkey\": [").unwrap();

    let err = orchestrator
        .load_request(Some(&path), Phase::Preflight)
        .unwrap_err();
    assert_eq!(err.phase, Phase::Preflight);
    assert_eq!(err.exit_code(), 11);
    assert!(matches!(err.source, PipelineError::Json { .. }), "{err}");

    let missing = dir.path().join("missing.json");
    let err = orchestrator
        .load_request(Some(&missing), Phase::Witness)
        .unwrap_err();
    assert_eq!(err.exit_code(), 5);
}
