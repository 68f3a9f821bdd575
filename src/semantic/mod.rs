mod analyzer;
mod symbol_table;
pub mod types;

pub use analyzer::{analyze_program, SemanticResult};
pub use types::{FunctionSig, RecordDef, Signatures, Type};
