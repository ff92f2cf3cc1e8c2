//! The opcode inventory.
//!
//! Every opcode that touches a cell is specialized by the cell's statically
//! known flavor (`_INT`, `_FLOAT`, `_BOOL`, `_REF`), so the runtime never
//! inspects a tag at dispatch time. Opcodes whose name ends in `_REF` carry
//! the reference-counting obligations documented on the VM.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One-byte opcodes. The enum must stay within 256 values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Opcode {
    PushCellInt,
    PushCellFloat,
    PushCellBool,
    PushCellNil,
    PushConst,

    LoadLocalVar,
    LoadLocalVarRef,
    StoreLocalVar,
    StoreLocalVarRef,

    AllocObj,
    Call,
    CallNative,
    CallVirtual,
    Ret,

    Jump,
    BranchZInt,
    BranchZFloat,
    BranchZBool,
    BranchZRef,
    BranchNzInt,
    BranchNzFloat,
    BranchNzBool,
    BranchNzRef,

    PopCell,
    PopCellRef,
    Dup,
    DupRef,

    IntToFloat,
    FloatToInt,

    UnopPlusInt,
    UnopPlusFloat,
    UnopMinusInt,
    UnopMinusFloat,
    UnopCmpNotInt,
    UnopCmpNotFloat,
    UnopCmpNotBool,
    UnopCmpNotRef,
    UnopBitNotInt,

    TestInt,
    TestFloat,
    TestRef,

    GetAttrObj,
    GetAttrObjRef,
    SetAttrObj,
    SetAttrObjRef,
    GetArrayAccess,
    GetArrayAccessRef,
    SetArrayAccess,
    SetArrayAccessRef,

    BinopAddInt,
    BinopAddFloat,
    BinopSubInt,
    BinopSubFloat,
    BinopMultInt,
    BinopMultFloat,
    BinopDivInt,
    BinopDivFloat,
    BinopModInt,

    BinopCmpAndInt,
    BinopCmpAndFloat,
    BinopCmpAndBool,
    BinopCmpAndRef,
    BinopCmpOrInt,
    BinopCmpOrFloat,
    BinopCmpOrBool,
    BinopCmpOrRef,
    BinopCmpLtInt,
    BinopCmpLtFloat,
    BinopCmpLtBool,
    BinopCmpLeInt,
    BinopCmpLeFloat,
    BinopCmpLeBool,
    BinopCmpGtInt,
    BinopCmpGtFloat,
    BinopCmpGtBool,
    BinopCmpGeInt,
    BinopCmpGeFloat,
    BinopCmpGeBool,
    BinopCmpEqInt,
    BinopCmpEqFloat,
    BinopCmpEqBool,
    BinopCmpEqRef,
    BinopCmpNeqInt,
    BinopCmpNeqFloat,
    BinopCmpNeqBool,
    BinopCmpNeqRef,

    BinopBitAndInt,
    BinopBitAndBool,
    BinopBitOrInt,
    BinopBitOrBool,
    BinopBitXorInt,
    BinopBitXorBool,
    BinopBitLshiftInt,
    BinopBitRshiftInt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_fits_in_one_byte() {
        // the last discriminant bounds the whole enum
        assert!((Opcode::BinopBitRshiftInt as usize) < 256);
    }

    #[test]
    fn test_opcode_display_roundtrip() {
        use std::str::FromStr;
        let op = Opcode::BinopAddInt;
        assert_eq!(Opcode::from_str(&op.to_string()).unwrap(), op);
    }
}
