//! Bytecode: the opcode set, symbolic (pre-link) instructions, per-module
//! object code, and the fully-linked executable form.

pub mod executable;
pub mod op;
pub mod symbolic;

pub use executable::{ExecConstant, Executable, Instruction, Operand};
pub use op::Opcode;
pub use symbolic::{
    ClassSignature, Constant, FunctionSignature, Label, ObjectCode, SymbolicInstruction,
    SymbolReference,
};
