mod emit;
pub mod instruction;
pub mod interp;

pub use emit::lower_program;
pub use instruction::{
    BinaryOp, CastOp, Constant, Instruction, IrFunction, IrProgram, IrType, Label, Place,
    ScalarType, UnaryOp, Value,
};
