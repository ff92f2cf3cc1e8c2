//! The linker.
//!
//! Merges per-module object codes into one executable: materializes
//! function descriptors and class objects (builtins eagerly first),
//! resolves every symbolic reference through per-object mapping tables,
//! concatenates the instruction streams, and locates `<main>`.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    analysis::{
        context::{PRELUDE_MODULE, Program},
        symbol::{ClassId, FuncId},
    },
    bytecode::{
        Constant, ExecConstant, Executable, Instruction, ObjectCode, Opcode, Operand,
        SymbolReference, SymbolicInstruction,
    },
    error::{CompileError, CompileResult},
    runtime::{CellKind, ClassObject, FuncCode, FunctionDescriptor, NativeFn, NativeKind},
};

/// Links object codes against the eagerly-built builtin tables.
/// `objects[main_idx]` provides `<main>`.
pub fn link(
    program: &mut Program,
    objects: &[ObjectCode],
    main_idx: usize,
) -> CompileResult<Executable> {
    assert!(!objects.is_empty(), "nothing to link");
    assert!(main_idx < objects.len());
    let mut linker = Linker {
        program,
        func_descs: Vec::new(),
        class_objs: Vec::new(),
        func_map: AHashMap::new(),
        class_map: AHashMap::new(),
    };
    linker.install_builtins()?;
    linker.link_objects(objects, main_idx)
}

struct Linker<'p> {
    program: &'p mut Program,
    func_descs: Vec<FunctionDescriptor>,
    class_objs: Vec<ClassObject>,
    /// Fully-qualified name -> descriptor index.
    func_map: AHashMap<String, u32>,
    /// Fully-qualified name -> class object index.
    class_map: AHashMap<String, u32>,
}

/// The native behavior family a builtin class belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinFamily {
    Object,
    Str,
    BoxInt,
    BoxFloat,
    BoxBool,
    Ref,
    List,
    Map,
}

impl<'p> Linker<'p> {
    fn push_func(&mut self, desc: FunctionDescriptor, full_name: String) -> u32 {
        let idx = u32::try_from(self.func_descs.len()).expect("descriptor table fits u32");
        self.func_descs.push(desc);
        self.func_map.insert(full_name, idx);
        idx
    }

    fn push_class(&mut self, class: ClassObject, full_name: String) -> u32 {
        let idx = u32::try_from(self.class_objs.len()).expect("class table fits u32");
        self.class_objs.push(class);
        self.class_map.insert(full_name, idx);
        idx
    }

    /// Builds the process-wide builtin descriptor and class tables: the
    /// base classes plus every specialized builtin instantiation the
    /// program demanded.
    fn install_builtins(&mut self) -> CompileResult<()> {
        // the free print function
        self.push_func(
            FunctionDescriptor::new(FuncCode::Native(NativeFn::Print), 1, 0b1),
            format!("{PRELUDE_MODULE}.print"),
        );

        let root = self.program.root_scope;
        let classes: Vec<ClassId> = self.program.scopes.get(root).class_symbols().collect();
        for class in classes {
            let Some(family) = self.builtin_family(class) else {
                continue;
            };
            self.install_builtin_class(class, family)?;
        }
        Ok(())
    }

    fn builtin_family(&mut self, class: ClassId) -> Option<BuiltinFamily> {
        let p = &self.program.prelude;
        let c = self.program.syms.class(class);
        if let Some(spec) = c.specialization {
            let base = self.program.types.base(spec);
            return if base == p.list_t {
                Some(BuiltinFamily::List)
            } else if base == p.map_t {
                Some(BuiltinFamily::Map)
            } else if base == p.ref_t {
                Some(BuiltinFamily::Ref)
            } else {
                None
            };
        }
        let ty = c.ty;
        if ty == p.object_t {
            Some(BuiltinFamily::Object)
        } else if ty == p.string_t {
            Some(BuiltinFamily::Str)
        } else if ty == p.boxed_int_t {
            Some(BuiltinFamily::BoxInt)
        } else if ty == p.boxed_float_t {
            Some(BuiltinFamily::BoxFloat)
        } else if ty == p.boxed_bool_t {
            Some(BuiltinFamily::BoxBool)
        } else {
            None
        }
    }

    fn install_builtin_class(&mut self, class: ClassId, family: BuiltinFamily) -> CompileResult<()> {
        let full_name = self.program.class_full_name(class);
        if self.class_map.contains_key(&full_name) {
            return Ok(());
        }
        let layout = self.program.linearized_order(class);

        let mut vtable = Vec::with_capacity(layout.methods.len());
        for &method in &layout.methods {
            vtable.push(self.builtin_method_desc(method)?);
        }
        let ctor = match self.program.ctor_of(class) {
            Some(ctor) => Some(self.builtin_method_desc(ctor)?),
            None => None,
        };

        let n_cells = layout.attributes.len();
        let mut ref_bitmap = 0u64;
        for (i, &attr) in layout.attributes.iter().enumerate() {
            let ty = self.program.syms.var(attr).ty.expect("attribute typed");
            if self.program.is_ref_counted(ty) {
                ref_bitmap |= 1 << i;
            }
        }
        // box payloads occupy one primitive cell
        let (n_cells, ref_bitmap) = match family {
            BuiltinFamily::BoxInt | BuiltinFamily::BoxFloat | BuiltinFamily::BoxBool => (1, 0),
            _ => (n_cells, ref_bitmap),
        };

        let native = match family {
            BuiltinFamily::Str => NativeKind::Str,
            BuiltinFamily::List => {
                let spec = self.program.syms.class(class).specialization.expect("specialized");
                let elem = self.program.types.params(spec)[0];
                NativeKind::List(self.cell_kind(elem))
            }
            BuiltinFamily::Map => {
                let spec = self.program.syms.class(class).specialization.expect("specialized");
                let key = self.program.types.params(spec)[0];
                let value = self.program.types.params(spec)[1];
                NativeKind::Map(self.cell_kind(key), self.cell_kind(value))
            }
            _ => NativeKind::Plain,
        };

        let name = self.program.syms.class(class).name.clone();
        self.push_class(
            ClassObject {
                name,
                n_cells: u32::try_from(n_cells).expect("cell count fits u32"),
                ref_cell_bitmap: ref_bitmap,
                ctor,
                vtable,
                native,
            },
            full_name,
        );
        Ok(())
    }

    /// The descriptor of a builtin method, interned by full name.
    fn builtin_method_desc(&mut self, method: FuncId) -> CompileResult<u32> {
        let full_name = self.program.func_full_name(method);
        if let Some(&idx) = self.func_map.get(&full_name) {
            return Ok(idx);
        }
        let owner = self
            .program
            .syms
            .func(method)
            .owner_class
            .expect("builtin methods have owners");
        let family = self.builtin_family(owner).ok_or_else(|| {
            CompileError::linker(format!("No native implementation for {full_name}"))
        })?;
        let name = self.program.syms.func(method).name.clone();
        let native = native_for(family, &name).ok_or_else(|| {
            CompileError::linker(format!("No native implementation for {full_name}"))
        })?;

        let params = self.program.syms.func(method).params.clone();
        let mut bitmap = 0u64;
        for (i, &p) in params.iter().enumerate() {
            if self.program.is_ref_counted(p) {
                bitmap |= 1 << i;
            }
        }
        bitmap <<= 1;
        bitmap |= 1; // the receiver
        let desc = FunctionDescriptor::new(FuncCode::Native(native), params.len() + 1, bitmap);
        Ok(self.push_func(desc, full_name))
    }

    fn cell_kind(&self, it: crate::analysis::types::ITypeId) -> CellKind {
        let p = &self.program.prelude;
        let base = self.program.types.base(it);
        if base == p.int_t {
            CellKind::Int
        } else if base == p.float_t {
            CellKind::Float
        } else if base == p.bool_t {
            CellKind::Bool
        } else {
            CellKind::Ref
        }
    }

    fn link_objects(mut self, objects: &[ObjectCode], main_idx: usize) -> CompileResult<Executable> {
        // 1. every local function gets a descriptor at its global offset
        let mut local_func_descs: Vec<Vec<u32>> = Vec::with_capacity(objects.len());
        let mut acc = 0u32;
        for obj in objects {
            let mut descs = Vec::with_capacity(obj.func_pool.len());
            for sig in &obj.func_pool {
                let desc = FunctionDescriptor::new(
                    FuncCode::Offset(sig.code_offset + acc),
                    sig.num_args(),
                    sig.arg_ref_bitmap(),
                );
                let idx = self.push_func(desc, sig.full_name(&obj.module_name));
                descs.push(idx);
            }
            local_func_descs.push(descs);
            acc += u32::try_from(obj.instructions.len()).expect("stream fits u32");
        }

        // 2-3. resolve function reference tables
        let mut func_tables: Vec<Vec<u32>> = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let mut table = Vec::with_capacity(obj.func_reference_table.len());
            for fref in &obj.func_reference_table {
                let idx = match fref {
                    SymbolReference::Local(local) => local_func_descs[i][*local as usize],
                    SymbolReference::External(name) => {
                        *self.func_map.get(name).ok_or_else(|| {
                            CompileError::linker(format!("No external function symbol: {name}"))
                        })?
                    }
                };
                table.push(idx);
            }
            func_tables.push(table);
        }

        // 4. materialize local class objects, then resolve class tables
        let mut local_class_objs: Vec<Vec<u32>> = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let mut ids = Vec::with_capacity(obj.class_pool.len());
            for sig in &obj.class_pool {
                let vtable: Vec<u32> = sig
                    .methods
                    .iter()
                    .map(|&m| func_tables[i][m as usize])
                    .collect();
                let ctor = sig.ctor.map(|c| func_tables[i][c as usize]);
                let idx = self.push_class(
                    ClassObject {
                        name: sig.name.clone(),
                        n_cells: u32::try_from(sig.attributes.len())
                            .expect("cell count fits u32"),
                        ref_cell_bitmap: sig.ref_cell_bitmap(),
                        ctor,
                        vtable,
                        native: NativeKind::Plain,
                    },
                    sig.full_name(&obj.module_name),
                );
                ids.push(idx);
            }
            local_class_objs.push(ids);
        }
        let mut class_tables: Vec<Vec<u32>> = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let mut table = Vec::with_capacity(obj.class_reference_table.len());
            for cref in &obj.class_reference_table {
                let idx = match cref {
                    SymbolReference::Local(local) => local_class_objs[i][*local as usize],
                    SymbolReference::External(name) => {
                        *self.class_map.get(name).ok_or_else(|| {
                            CompileError::linker(format!("No external class symbol: {name}"))
                        })?
                    }
                };
                table.push(idx);
            }
            class_tables.push(table);
        }

        // 5. merge constant pools, remembering each object's mapping
        let mut exec_consts: IndexMap<ExecConstant, u32> = IndexMap::new();
        let mut const_tables: Vec<Vec<u32>> = Vec::with_capacity(objects.len());
        for (i, obj) in objects.iter().enumerate() {
            let mut table = Vec::with_capacity(obj.constant_pool.len());
            for konst in &obj.constant_pool {
                let exec = match konst {
                    Constant::String(s) => ExecConstant::String(s.clone()),
                    Constant::ClassRef(cref) => {
                        ExecConstant::ClassSingleton(class_tables[i][*cref as usize])
                    }
                };
                let next = u32::try_from(exec_consts.len()).expect("pool fits u32");
                let idx = *exec_consts.entry(exec).or_insert(next);
                table.push(idx);
            }
            const_tables.push(table);
        }

        // 6. concatenate and resolve the instruction streams
        let mut instructions =
            Vec::with_capacity(objects.iter().map(|o| o.instructions.len()).sum());
        for (i, obj) in objects.iter().enumerate() {
            for (pos, sym) in obj.instructions.iter().enumerate() {
                instructions.push(resolve_instruction(
                    sym,
                    pos,
                    obj,
                    &const_tables[i],
                    &class_tables[i],
                    &func_tables[i],
                )?);
            }
        }

        // 7. locate <main> in the designated main object
        let main_local = objects[main_idx]
            .offset_of(crate::analysis::symbol::MAIN_NAME)
            .ok_or_else(|| CompileError::linker("No <main> entry in main module"))?;
        let main_base: u32 = objects[..main_idx]
            .iter()
            .map(|o| u32::try_from(o.instructions.len()).expect("stream fits u32"))
            .sum();

        let string_class = *self
            .class_map
            .get(&format!("{PRELUDE_MODULE}.string"))
            .ok_or_else(|| CompileError::linker("No builtin string class"))?;

        Ok(Executable {
            constant_pool: exec_consts.into_keys().collect(),
            instructions,
            main_offset: main_base + main_local,
            func_descs: self.func_descs,
            class_objs: self.class_objs,
            string_class,
        })
    }
}

fn resolve_instruction(
    sym: &SymbolicInstruction,
    pos: usize,
    obj: &ObjectCode,
    const_table: &[u32],
    class_table: &[u32],
    func_table: &[u32],
) -> CompileResult<Instruction> {
    let inst = match *sym {
        SymbolicInstruction::Plain(op) => Instruction {
            op,
            operand: Operand::None,
        },
        SymbolicInstruction::Int(op, v) => Instruction {
            op,
            operand: Operand::Int(v),
        },
        SymbolicInstruction::Float(op, v) => Instruction {
            op,
            operand: Operand::Float(v),
        },
        SymbolicInstruction::Bool(op, v) => Instruction {
            op,
            operand: Operand::Bool(v),
        },
        SymbolicInstruction::Branch(op, label) => {
            let target = obj.labels[label as usize].bound_index();
            let offset = i64::from(target) - (pos as i64 + 1);
            Instruction {
                op,
                operand: Operand::I32(
                    i32::try_from(offset)
                        .map_err(|_| CompileError::linker("jump offset exceeds i32 range"))?,
                ),
            }
        }
        SymbolicInstruction::U32(op, n) => {
            let operand = match op {
                Opcode::PushConst => Operand::U32(const_table[n as usize]),
                Opcode::AllocObj => Operand::U32(class_table[n as usize]),
                Opcode::Call | Opcode::CallNative => Operand::U32(func_table[n as usize]),
                // local slots, vtable slots, and dup counts pass through
                _ => Operand::U32(n),
            };
            Instruction { op, operand }
        }
    };
    Ok(inst)
}

/// Maps a builtin family and method name to the implementing native.
fn native_for(family: BuiltinFamily, method: &str) -> Option<NativeFn> {
    use BuiltinFamily as F;
    use NativeFn as N;
    Some(match (family, method) {
        (F::Object, "<ctor>") => N::ObjectCtor,
        (F::Object, "stringify") => N::ObjectStringify,
        (F::Object, "hash") => N::ObjectHash,
        (F::Object, "eq") => N::ObjectEq,

        (F::Str, "<ctor>") => N::StringCtor,
        (F::Str, "stringify") => N::StringStringify,
        (F::Str, "hash") => N::StringHash,
        (F::Str, "eq") => N::StringEq,
        (F::Str, "concat") => N::StringConcat,
        (F::Str, "size") => N::StringSize,

        (F::BoxInt, "<ctor>") => N::BoxIntCtor,
        (F::BoxInt, "stringify") => N::BoxIntStringify,
        (F::BoxFloat, "<ctor>") => N::BoxFloatCtor,
        (F::BoxFloat, "stringify") => N::BoxFloatStringify,
        (F::BoxBool, "<ctor>") => N::BoxBoolCtor,
        (F::BoxBool, "stringify") => N::BoxBoolStringify,
        (F::BoxInt | F::BoxFloat | F::BoxBool, "hash") => N::BoxHash,
        (F::BoxInt | F::BoxFloat | F::BoxBool, "eq") => N::BoxEq,

        (F::Ref, "<ctor>") => N::RefCtor,
        (F::Ref, "stringify") => N::ObjectStringify,
        (F::Ref, "hash") => N::ObjectHash,
        (F::Ref, "eq") => N::ObjectEq,

        (F::List, "<ctor>") => N::ListCtor,
        (F::List, "stringify") => N::ListStringify,
        (F::List, "hash") => N::ObjectHash,
        (F::List, "eq") => N::ObjectEq,
        (F::List, "get") => N::ListGet,
        (F::List, "set") => N::ListSet,
        (F::List, "append") => N::ListAppend,
        (F::List, "size") => N::ListSize,

        (F::Map, "<ctor>") => N::MapCtor,
        (F::Map, "stringify") => N::MapStringify,
        (F::Map, "hash") => N::ObjectHash,
        (F::Map, "eq") => N::ObjectEq,
        (F::Map, "get") => N::MapGet,
        (F::Map, "set") => N::MapSet,
        (F::Map, "size") => N::MapSize,

        _ => return None,
    })
}
