//! The linked, executable form of a program.
//!
//! After linking, every instruction operand is concrete: an immediate
//! literal, an index into the merged descriptor/class/constant tables, or a
//! signed PC-relative jump offset. The executable serializes to a compact
//! binary form and back without loss.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::op::Opcode,
    error::CompileError,
    runtime::{ClassObject, FunctionDescriptor},
};

/// A concrete operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    /// Pool or table index, local slot, or vtable slot.
    U32(u32),
    /// Signed PC-relative jump offset.
    I32(i32),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Operand {
    #[inline]
    #[must_use]
    pub fn u32(self) -> u32 {
        match self {
            Self::U32(v) => v,
            _ => panic!("instruction operand is not an index"),
        }
    }

    #[inline]
    #[must_use]
    pub fn i32(self) -> i32 {
        match self {
            Self::I32(v) => v,
            _ => panic!("instruction operand is not a jump offset"),
        }
    }
}

/// One executable instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operand: Operand,
}

/// A materialized constant: string bytes, or the singleton object of a
/// class (by index into the class table). Singletons are allocated when an
/// execution context initializes its constant pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecConstant {
    String(String),
    ClassSingleton(u32),
}

/// A fully linked program.
#[derive(Debug, Serialize, Deserialize)]
pub struct Executable {
    pub constant_pool: Vec<ExecConstant>,
    pub instructions: Vec<Instruction>,
    /// Offset of `<main>` in the instruction stream.
    pub main_offset: u32,
    pub func_descs: Vec<FunctionDescriptor>,
    pub class_objs: Vec<ClassObject>,
    /// Index of the builtin string class, used when the runtime
    /// materializes string values.
    pub string_class: u32,
}

impl Executable {
    /// Serializes to the compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CompileError> {
        postcard::to_allocvec(self)
            .map_err(|e| CompileError::linker(format!("cannot serialize executable: {e}")))
    }

    /// Reads an executable back from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompileError> {
        postcard::from_bytes(bytes)
            .map_err(|e| CompileError::linker(format!("cannot deserialize executable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FuncCode, NativeKind};

    #[test]
    fn test_executable_roundtrips_through_postcard() {
        let exec = Executable {
            constant_pool: vec![
                ExecConstant::String("hi".to_owned()),
                ExecConstant::ClassSingleton(0),
            ],
            instructions: vec![
                Instruction {
                    op: Opcode::PushCellInt,
                    operand: Operand::Int(7),
                },
                Instruction {
                    op: Opcode::Ret,
                    operand: Operand::None,
                },
            ],
            main_offset: 0,
            func_descs: vec![FunctionDescriptor::new(FuncCode::Offset(0), 0, 0)],
            class_objs: vec![ClassObject {
                name: "m$$<module>".to_owned(),
                n_cells: 1,
                ref_cell_bitmap: 0,
                ctor: None,
                vtable: Vec::new(),
                native: NativeKind::Plain,
            }],
            string_class: 0,
        };
        let bytes = exec.to_bytes().unwrap();
        let back = Executable::from_bytes(&bytes).unwrap();
        assert_eq!(back.instructions, exec.instructions);
        assert_eq!(back.constant_pool, exec.constant_pool);
        assert_eq!(back.main_offset, exec.main_offset);
    }
}
