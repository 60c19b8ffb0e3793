/// Bits per limb of a non-native base-field element.
pub const LIMB_BITS: usize = 55;
/// Limbs per non-native base-field element. `LIMB_BITS * NUM_LIMBS` must exceed the
/// bit-length of [`BLS12_381_BASE_MODULUS_HEX`].
pub const NUM_LIMBS: usize = 7;

/// BLS12-381 base field modulus `p`.
pub const BLS12_381_BASE_MODULUS_HEX: &str = "1a0111ea397fe69a4b1ba7b6434bacd764774b84f38512bf6730d2a0f6b0f6241eabfffeb153ffffb9feffffffffaaab";
pub const BLS12_381_BASE_MODULUS_BITS: usize = 381;

/// BN254 scalar field modulus `r`, the native field of circom/snarkjs Groth16 witnesses.
pub const BN254_SCALAR_MODULUS_DEC: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Environment override for the powers-of-tau file used by the per-stage setup.
pub const PTAU_ENV_VAR: &str = "SPLIT_BLS_PTAU";

pub const DEFAULT_CIRCUITS_DIR: &str = "circuits";
pub const DEFAULT_BUILD_DIR: &str = "build";
pub const DEFAULT_RUN_DIR: &str = "runs/default";
pub const DEFAULT_EXPORT_DIR: &str = "verifiers";
pub const DEFAULT_PTAU_PATH: &str = "ptau/powersOfTau28_hez_final_24.ptau";

pub const DEFAULT_MEMORY_SAFETY_FRACTION: f64 = 0.8;
pub const DEFAULT_MEMORY_RESERVE_BYTES: u64 = 2 << 30;
pub const MIN_NODE_HEAP_BYTES: u64 = 1 << 30;
