pub mod constants;
pub mod field_conversion;
pub mod path;
pub mod serializable;
pub mod stage;
