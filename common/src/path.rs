use std::path::{Path, PathBuf};

use crate::stage::Stage;

// Build artifacts:  <build dir>/<stage>/<stage>.r1cs, <stage>_js/<stage>.wasm, <stage>_*.zkey
// Run artifacts:    <run dir>/<stage>/{input,witness,proof,public}.json
const INPUT_FILE: &str = "input.json";
const WITNESS_BIN_FILE: &str = "witness.wtns";
const WITNESS_JSON_FILE: &str = "witness.json";
const PROOF_FILE: &str = "proof.json";
const PUBLIC_FILE: &str = "public.json";
const VERIFIED_MARKER: &str = "verified";
const CHAIN_REPORT_FILE: &str = "chain_report.json";
const RUN_LOG_FILE: &str = "run.log";

/// Input-independent artifacts of one stage: compiled circuit and keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    pub stage: Stage,
    pub source: PathBuf,
    pub dir: PathBuf,
}

impl StagePaths {
    pub fn new(stage: Stage, circuits_dir: &Path, build_dir: &Path) -> Self {
        Self {
            stage,
            source: circuits_dir.join(format!("{stage}.circom")),
            dir: build_dir.join(stage.to_string()),
        }
    }

    pub fn r1cs(&self) -> PathBuf {
        self.dir.join(format!("{}.r1cs", self.stage))
    }

    pub fn sym(&self) -> PathBuf {
        self.dir.join(format!("{}.sym", self.stage))
    }

    pub fn js_dir(&self) -> PathBuf {
        self.dir.join(format!("{}_js", self.stage))
    }

    pub fn wasm(&self) -> PathBuf {
        self.js_dir().join(format!("{}.wasm", self.stage))
    }

    pub fn witness_generator(&self) -> PathBuf {
        self.js_dir().join("generate_witness.js")
    }

    pub fn initial_zkey(&self) -> PathBuf {
        self.dir.join(format!("{}_0000.zkey", self.stage))
    }

    pub fn final_zkey(&self) -> PathBuf {
        self.dir.join(format!("{}_final.zkey", self.stage))
    }

    pub fn verification_key(&self) -> PathBuf {
        self.dir.join(format!("{}_vkey.json", self.stage))
    }

    pub fn exported_verifier(&self, export_dir: &Path) -> PathBuf {
        export_dir.join(format!("Stage{}Verifier.sol", self.stage.index()))
    }
}

/// Per-signature artifacts of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub stage: Stage,
    pub dir: PathBuf,
}

impl RunPaths {
    pub fn new(stage: Stage, run_dir: &Path) -> Self {
        Self {
            stage,
            dir: run_dir.join(stage.to_string()),
        }
    }

    pub fn input(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    pub fn witness_bin(&self) -> PathBuf {
        self.dir.join(WITNESS_BIN_FILE)
    }

    pub fn witness_json(&self) -> PathBuf {
        self.dir.join(WITNESS_JSON_FILE)
    }

    pub fn proof(&self) -> PathBuf {
        self.dir.join(PROOF_FILE)
    }

    pub fn public(&self) -> PathBuf {
        self.dir.join(PUBLIC_FILE)
    }

    pub fn verified_marker(&self) -> PathBuf {
        self.dir.join(VERIFIED_MARKER)
    }
}

pub fn chain_report_path(run_dir: &Path) -> PathBuf {
    run_dir.join(CHAIN_REPORT_FILE)
}

pub fn run_log_path(run_dir: &Path) -> PathBuf {
    run_dir.join(RUN_LOG_FILE)
}
