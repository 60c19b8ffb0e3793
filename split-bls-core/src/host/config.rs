use std::path::{Path, PathBuf};

use common::{
    constants::{
        DEFAULT_BUILD_DIR, DEFAULT_CIRCUITS_DIR, DEFAULT_EXPORT_DIR, DEFAULT_MEMORY_RESERVE_BYTES,
        DEFAULT_MEMORY_SAFETY_FRACTION, DEFAULT_PTAU_PATH, DEFAULT_RUN_DIR, MIN_NODE_HEAP_BYTES,
        PTAU_ENV_VAR,
    },
    path::{RunPaths, StagePaths},
    stage::Stage,
};
use sysinfo::System;
use toml_edit::{DocumentMut, Item};

use crate::utils::errors::PipelineError;

/// Heap ceiling for the node-based collaborators, derived from system memory at run time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    pub safety_fraction: f64,
    pub reserve_bytes: u64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            safety_fraction: DEFAULT_MEMORY_SAFETY_FRACTION,
            reserve_bytes: DEFAULT_MEMORY_RESERVE_BYTES,
        }
    }
}

impl MemoryBudget {
    /// `total * safety_fraction - reserve`, never below [`MIN_NODE_HEAP_BYTES`].
    pub fn ceiling_bytes(&self, total_bytes: u64) -> u64 {
        let usable = (total_bytes as f64 * self.safety_fraction) as u64;
        usable
            .saturating_sub(self.reserve_bytes)
            .max(MIN_NODE_HEAP_BYTES)
    }

    pub fn node_heap_mib(&self) -> u64 {
        let mut system = System::new();
        system.refresh_memory();
        self.ceiling_bytes(system.total_memory()) >> 20
    }
}

/// External executables. Plain names are resolved through `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub circom: PathBuf,
    pub node: PathBuf,
    pub snarkjs: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            circom: "circom".into(),
            node: "node".into(),
            snarkjs: "snarkjs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub circuits_dir: PathBuf,
    /// Library directories passed to circom with `-l`.
    pub include_dirs: Vec<PathBuf>,
    pub build_dir: PathBuf,
    pub run_dir: PathBuf,
    pub export_dir: PathBuf,
    /// Powers-of-tau file for the per-stage setup.
    pub ptau: PathBuf,
    pub memory: MemoryBudget,
    pub tools: ToolPaths,
    /// Evaluate the native contracts before the first expensive step of `full`.
    pub preflight: bool,
    /// Restricts multi-stage operations to a single stage.
    pub only: Option<Stage>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            circuits_dir: DEFAULT_CIRCUITS_DIR.into(),
            include_dirs: vec!["node_modules".into()],
            build_dir: DEFAULT_BUILD_DIR.into(),
            run_dir: DEFAULT_RUN_DIR.into(),
            export_dir: DEFAULT_EXPORT_DIR.into(),
            ptau: DEFAULT_PTAU_PATH.into(),
            memory: MemoryBudget::default(),
            tools: ToolPaths::default(),
            preflight: true,
            only: None,
        }
    }
}

impl PipelineConfig {
    pub fn stages(&self) -> Vec<Stage> {
        Stage::selection(self.only)
    }

    pub fn stage_paths(&self, stage: Stage) -> StagePaths {
        StagePaths::new(stage, &self.circuits_dir, &self.build_dir)
    }

    pub fn run_paths(&self, stage: Stage) -> RunPaths {
        RunPaths::new(stage, &self.run_dir)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        self.apply_toml(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    /// Overrides every field the TOML document sets. Unknown keys are rejected.
    pub fn apply_toml(&mut self, text: &str) -> Result<(), String> {
        let doc = text.parse::<DocumentMut>().map_err(|e| e.to_string())?;
        for (key, item) in doc.iter() {
            match key {
                "circuits_dir" => self.circuits_dir = path_value(key, item)?,
                "build_dir" => self.build_dir = path_value(key, item)?,
                "run_dir" => self.run_dir = path_value(key, item)?,
                "export_dir" => self.export_dir = path_value(key, item)?,
                "ptau" => self.ptau = path_value(key, item)?,
                "include_dirs" => {
                    let array = item
                        .as_array()
                        .ok_or_else(|| format!("`{key}` must be an array of paths"))?;
                    self.include_dirs = array
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .map(PathBuf::from)
                                .ok_or_else(|| format!("`{key}` must be an array of paths"))
                        })
                        .collect::<Result<_, _>>()?;
                }
                "preflight" => {
                    self.preflight = item
                        .as_bool()
                        .ok_or_else(|| format!("`{key}` must be a boolean"))?
                }
                "stage" => {
                    let index = item
                        .as_integer()
                        .and_then(|i| u8::try_from(i).ok())
                        .and_then(Stage::from_repr)
                        .ok_or_else(|| format!("`{key}` must be 1, 2 or 3"))?;
                    self.only = Some(index);
                }
                "memory" => {
                    let table = item
                        .as_table()
                        .ok_or_else(|| format!("`{key}` must be a table"))?;
                    for (key, item) in table.iter() {
                        match key {
                            "safety_fraction" => {
                                let fraction = item
                                    .as_float()
                                    .filter(|f| *f > 0.0 && *f <= 1.0)
                                    .ok_or_else(|| {
                                        "`memory.safety_fraction` must be in (0, 1]".to_string()
                                    })?;
                                self.memory.safety_fraction = fraction;
                            }
                            "reserve_mib" => {
                                let mib = item
                                    .as_integer()
                                    .and_then(|i| u64::try_from(i).ok())
                                    .ok_or_else(|| {
                                        "`memory.reserve_mib` must be a non-negative integer"
                                            .to_string()
                                    })?;
                                self.memory.reserve_bytes = mib << 20;
                            }
                            other => return Err(format!("unknown key `memory.{other}`")),
                        }
                    }
                }
                "tools" => {
                    let table = item
                        .as_table()
                        .ok_or_else(|| format!("`{key}` must be a table"))?;
                    for (key, item) in table.iter() {
                        let path = path_value(key, item)?;
                        match key {
                            "circom" => self.tools.circom = path,
                            "node" => self.tools.node = path,
                            "snarkjs" => self.tools.snarkjs = path,
                            other => return Err(format!("unknown key `tools.{other}`")),
                        }
                    }
                }
                other => return Err(format!("unknown key `{other}`")),
            }
        }
        Ok(())
    }

    /// `SPLIT_BLS_PTAU` overrides the powers-of-tau location.
    pub fn apply_env(&mut self) {
        if let Some(ptau) = std::env::var_os(PTAU_ENV_VAR).filter(|v| !v.is_empty()) {
            self.ptau = PathBuf::from(ptau);
        }
    }
}

fn path_value(key: &str, item: &Item) -> Result<PathBuf, String> {
    item.as_str()
        .map(PathBuf::from)
        .ok_or_else(|| format!("`{key}` must be a string"))
}
