//! The virtual machine.
//!
//! One [`ExecutionContext`] runs a linked [`Executable`] on a single
//! thread: an operand stack of cells, a flat local-variable stack with a
//! parallel reference-info vector, and frame/return-address stacks. The
//! opcode set is total over primitive/reference discrimination, so the
//! dispatch loop never inspects a value tag.
//!
//! A runtime error is fatal to the current `execute` call; the partially
//! popped stacks are deliberately not restored and the context must not be
//! reused.

use smallvec::SmallVec;

use crate::{
    bytecode::{ExecConstant, Executable, Instruction, Operand, Opcode},
    error::{RunResult, RuntimeError},
    io::OutputSink,
    runtime::{
        Cell, CellKind, FuncCode, Heap, HeapId, NativeKind, NativePayload,
        VTABLE_SLOT_STRINGIFY,
    },
};

/// A thread of execution over a linked program.
pub struct ExecutionContext<'a> {
    exec: &'a Executable,
    pub heap: Heap,
    pub sink: &'a mut dyn OutputSink,

    pc: usize,
    program_stack: Vec<Cell>,
    locals: Vec<Cell>,
    locals_ref_info: Vec<bool>,
    frame_offset: Vec<usize>,
    return_pc: Vec<Option<usize>>,
    /// Materialized constants; populated on entry to `execute` and
    /// released on every exit path.
    constant_pool: Vec<Cell>,
    is_executing: bool,
}

enum StepExit {
    Continue,
    /// The outermost frame returned.
    Halt,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(exec: &'a Executable, sink: &'a mut dyn OutputSink) -> Self {
        Self {
            exec,
            heap: Heap::new(),
            sink,
            pc: 0,
            program_stack: Vec::with_capacity(256),
            locals: Vec::with_capacity(2048),
            locals_ref_info: Vec::with_capacity(2048),
            frame_offset: Vec::new(),
            return_pc: Vec::new(),
            constant_pool: Vec::new(),
            is_executing: false,
        }
    }

    /// Runs the program from `<main>` to completion.
    pub fn execute(&mut self) -> RunResult<()> {
        assert!(!self.is_executing, "execution context re-entered");
        self.is_executing = true;
        self.init_constants();

        self.new_frame(None);
        self.pc = self.exec.main_offset as usize;
        let result = self.run_loop();

        // the constant pool is torn down on every exit path
        self.release_constants();
        self.is_executing = false;
        if result.is_ok() {
            debug_assert!(self.locals.is_empty());
            debug_assert!(self.locals_ref_info.is_empty());
            debug_assert!(self.frame_offset.is_empty());
            debug_assert!(self.return_pc.is_empty());
        }
        result
    }

    fn run_loop(&mut self) -> RunResult<()> {
        loop {
            match self.step()? {
                StepExit::Continue => {}
                StepExit::Halt => return Ok(()),
            }
        }
    }

    fn init_constants(&mut self) {
        debug_assert!(self.constant_pool.is_empty());
        for konst in &self.exec.constant_pool {
            let cell = match konst {
                ExecConstant::String(s) => {
                    let id = self.heap.alloc(
                        self.exec.string_class,
                        0,
                        0,
                        NativePayload::Str(s.clone()),
                    );
                    Cell::from_obj(id)
                }
                ExecConstant::ClassSingleton(class_idx) => {
                    let id = self.alloc_obj(*class_idx);
                    Cell::from_obj(id)
                }
            };
            self.constant_pool.push(cell);
        }
    }

    fn release_constants(&mut self) {
        for cell in std::mem::take(&mut self.constant_pool) {
            self.heap.dec_ref(cell);
        }
    }

    /// Allocates a zeroed instance of a class, refcount 1. The venom-level
    /// constructor is not invoked.
    pub fn alloc_obj(&mut self, class_idx: u32) -> HeapId {
        let class = &self.exec.class_objs[class_idx as usize];
        let payload = match class.native {
            NativeKind::Plain => NativePayload::None,
            NativeKind::Str => NativePayload::Str(String::new()),
            NativeKind::List(elem) => NativePayload::List {
                elems: Vec::new(),
                elem_is_ref: elem == CellKind::Ref,
            },
            NativeKind::Map(k, v) => NativePayload::Map(crate::runtime::heap::MapData {
                key_kind: k,
                value_kind: v,
                entries: indexmap::IndexMap::default(),
            }),
        };
        self.heap.alloc(
            class_idx,
            class.n_cells as usize,
            class.ref_cell_bitmap,
            payload,
        )
    }

    /// Allocates a string value, refcount 1.
    pub fn alloc_string(&mut self, s: String) -> Cell {
        let id = self
            .heap
            .alloc(self.exec.string_class, 0, 0, NativePayload::Str(s));
        Cell::from_obj(id)
    }

    #[must_use]
    pub fn class_of(&self, id: HeapId) -> &crate::runtime::ClassObject {
        &self.exec.class_objs[self.heap.get(id).class as usize]
    }

    fn new_frame(&mut self, ret: Option<usize>) {
        debug_assert_eq!(self.locals.len(), self.locals_ref_info.len());
        debug_assert_eq!(self.frame_offset.len(), self.return_pc.len());
        self.frame_offset.push(self.locals.len());
        self.return_pc.push(ret);
    }

    fn pop_frame(&mut self) -> Option<usize> {
        let base = self.frame_offset.pop().expect("frame underflow");
        debug_assert_eq!(self.locals.len(), self.locals_ref_info.len());
        for i in base..self.locals.len() {
            if self.locals_ref_info[i] {
                self.heap.dec_ref(self.locals[i]);
            }
        }
        self.locals.truncate(base);
        self.locals_ref_info.truncate(base);
        self.return_pc.pop().expect("return stack underflow")
    }

    #[inline]
    fn local_slot(&mut self, n: u32) -> usize {
        let base = *self.frame_offset.last().expect("no active frame");
        let abs = base + n as usize;
        if abs >= self.locals.len() {
            self.locals.resize(abs + 1, Cell::NIL);
            self.locals_ref_info.resize(abs + 1, false);
        }
        abs
    }

    fn push(&mut self, cell: Cell) {
        self.program_stack.push(cell);
    }

    fn pop(&mut self) -> Cell {
        self.program_stack.pop().expect("operand stack underflow")
    }

    /// Runs a callee at `target` on a new frame until that frame unwinds,
    /// then restores the caller's PC. Native code uses this to call back
    /// into the interpreter; nested resumptions unwind in strict LIFO
    /// order.
    pub fn resume_execution(&mut self, target: usize) -> RunResult<()> {
        debug_assert_eq!(self.locals.len(), self.locals_ref_info.len());
        let depth = self.frame_offset.len();
        let saved_pc = self.pc;
        self.new_frame(Some(saved_pc));
        self.pc = target;
        while self.frame_offset.len() > depth {
            match self.step()? {
                StepExit::Continue => {}
                StepExit::Halt => break,
            }
        }
        self.pc = saved_pc;
        Ok(())
    }

    /// Virtual dispatch through the receiver's vtable; the receiver is
    /// pushed under the (already pushed) arguments. Returns the call's
    /// result cell.
    pub fn virtual_dispatch(&mut self, receiver: Cell, slot: usize) -> RunResult<Cell> {
        let id = receiver.as_obj().ok_or_else(RuntimeError::null_pointer)?;
        let desc_idx = *self
            .class_of(id)
            .vtable
            .get(slot)
            .ok_or_else(|| RuntimeError::new("virtual dispatch out of vtable range"))?;
        self.heap.inc_ref(receiver);
        self.push(receiver);
        self.invoke_descriptor(desc_idx)?;
        Ok(self.pop())
    }

    /// Produces the display string of a reference cell via its `stringify`
    /// method.
    pub fn stringify_ref(&mut self, cell: Cell) -> RunResult<String> {
        let result = self.virtual_dispatch(cell, VTABLE_SLOT_STRINGIFY)?;
        let id = result.as_obj().ok_or_else(RuntimeError::null_pointer)?;
        let s = self.heap.str_of(id).to_owned();
        self.heap.dec_ref(result);
        Ok(s)
    }

    fn invoke_descriptor(&mut self, desc_idx: u32) -> RunResult<()> {
        let desc = &self.exec.func_descs[desc_idx as usize];
        match desc.code {
            FuncCode::Native(_) => self.call_native(desc_idx),
            FuncCode::Offset(off) => self.resume_execution(off as usize),
        }
    }

    /// The native-call trampoline: pops the arguments, invokes the builtin,
    /// pushes the result, and releases reference arguments per the
    /// descriptor bitmap.
    fn call_native(&mut self, desc_idx: u32) -> RunResult<()> {
        let desc = &self.exec.func_descs[desc_idx as usize];
        let FuncCode::Native(native) = desc.code else {
            panic!("native trampoline invoked on interpreted function");
        };
        let num_args = desc.num_args as usize;
        let bitmap = desc.arg_ref_bitmap;
        let mut args: SmallVec<[Cell; 8]> = SmallVec::with_capacity(num_args);
        for _ in 0..num_args {
            args.push(self.pop());
        }
        let result = native.invoke(self, &args);
        for (i, &arg) in args.iter().enumerate() {
            if bitmap & (1 << i) != 0 {
                self.heap.dec_ref(arg);
            }
        }
        self.push(result?);
        Ok(())
    }

    fn step(&mut self) -> RunResult<StepExit> {
        let Instruction { op, operand } = self.exec.instructions[self.pc];
        match op {
            Opcode::PushCellInt => {
                let Operand::Int(v) = operand else {
                    panic!("bad operand for PushCellInt")
                };
                self.push(Cell::from_int(v));
            }
            Opcode::PushCellFloat => {
                let Operand::Float(v) = operand else {
                    panic!("bad operand for PushCellFloat")
                };
                self.push(Cell::from_float(v));
            }
            Opcode::PushCellBool => {
                let Operand::Bool(v) = operand else {
                    panic!("bad operand for PushCellBool")
                };
                self.push(Cell::from_bool(v));
            }
            Opcode::PushCellNil => self.push(Cell::NIL),
            Opcode::PushConst => {
                let cell = self.constant_pool[operand.u32() as usize];
                self.heap.inc_ref(cell);
                self.push(cell);
            }

            Opcode::LoadLocalVar => {
                let slot = self.local_slot(operand.u32());
                let cell = self.locals[slot];
                self.push(cell);
            }
            Opcode::LoadLocalVarRef => {
                let slot = self.local_slot(operand.u32());
                let cell = self.locals[slot];
                self.heap.inc_ref(cell);
                self.push(cell);
            }
            Opcode::StoreLocalVar => {
                let cell = self.pop();
                let slot = self.local_slot(operand.u32());
                self.locals[slot] = cell;
                self.locals_ref_info[slot] = false;
            }
            Opcode::StoreLocalVarRef => {
                let cell = self.pop();
                let slot = self.local_slot(operand.u32());
                if self.locals_ref_info[slot] {
                    let old = self.locals[slot];
                    self.heap.dec_ref(old);
                }
                self.locals[slot] = cell;
                self.locals_ref_info[slot] = true;
            }

            Opcode::AllocObj => {
                let id = self.alloc_obj(operand.u32());
                self.push(Cell::from_obj(id));
            }
            Opcode::Call => {
                let desc = &self.exec.func_descs[operand.u32() as usize];
                let FuncCode::Offset(off) = desc.code else {
                    panic!("Call on native descriptor")
                };
                self.new_frame(Some(self.pc + 1));
                self.pc = off as usize;
                return Ok(StepExit::Continue);
            }
            Opcode::CallNative => {
                self.call_native(operand.u32())?;
            }
            Opcode::CallVirtual => {
                let receiver = *self.program_stack.last().expect("operand stack underflow");
                let id = receiver.as_obj().ok_or_else(RuntimeError::null_pointer)?;
                let slot = operand.u32() as usize;
                let desc_idx = *self
                    .class_of(id)
                    .vtable
                    .get(slot)
                    .ok_or_else(|| RuntimeError::new("virtual dispatch out of vtable range"))?;
                let desc = &self.exec.func_descs[desc_idx as usize];
                match desc.code {
                    FuncCode::Native(_) => {
                        self.call_native(desc_idx)?;
                    }
                    FuncCode::Offset(off) => {
                        self.new_frame(Some(self.pc + 1));
                        self.pc = off as usize;
                        return Ok(StepExit::Continue);
                    }
                }
            }
            Opcode::Ret => match self.pop_frame() {
                Some(ret) => {
                    self.pc = ret;
                    return Ok(StepExit::Continue);
                }
                None => return Ok(StepExit::Halt),
            },

            Opcode::Jump => {
                self.jump(operand.i32());
                return Ok(StepExit::Continue);
            }
            Opcode::BranchZInt | Opcode::BranchZBool => {
                let c = self.pop();
                return Ok(self.branch(c.is_zero(CellKind::Int), operand.i32()));
            }
            Opcode::BranchZFloat => {
                let c = self.pop();
                return Ok(self.branch(c.is_zero(CellKind::Float), operand.i32()));
            }
            Opcode::BranchZRef => {
                let c = self.pop();
                self.heap.dec_ref(c);
                return Ok(self.branch(c.as_obj().is_none(), operand.i32()));
            }
            Opcode::BranchNzInt | Opcode::BranchNzBool => {
                let c = self.pop();
                return Ok(self.branch(!c.is_zero(CellKind::Int), operand.i32()));
            }
            Opcode::BranchNzFloat => {
                let c = self.pop();
                return Ok(self.branch(!c.is_zero(CellKind::Float), operand.i32()));
            }
            Opcode::BranchNzRef => {
                let c = self.pop();
                self.heap.dec_ref(c);
                return Ok(self.branch(c.as_obj().is_some(), operand.i32()));
            }

            Opcode::PopCell => {
                self.pop();
            }
            Opcode::PopCellRef => {
                let c = self.pop();
                self.heap.dec_ref(c);
            }
            Opcode::Dup => {
                let c = *self.program_stack.last().expect("operand stack underflow");
                for _ in 0..operand.u32() {
                    self.push(c);
                }
            }
            Opcode::DupRef => {
                let c = *self.program_stack.last().expect("operand stack underflow");
                for _ in 0..operand.u32() {
                    self.heap.inc_ref(c);
                    self.push(c);
                }
            }

            Opcode::IntToFloat => {
                let c = self.pop();
                self.push(Cell::from_float(c.as_int() as f64));
            }
            Opcode::FloatToInt => {
                let c = self.pop();
                self.push(Cell::from_int(c.as_float() as i64));
            }

            Opcode::UnopPlusInt | Opcode::UnopPlusFloat => {}
            Opcode::UnopMinusInt => {
                let c = self.pop();
                self.push(Cell::from_int(c.as_int().wrapping_neg()));
            }
            Opcode::UnopMinusFloat => {
                let c = self.pop();
                self.push(Cell::from_float(-c.as_float()));
            }
            Opcode::UnopCmpNotInt | Opcode::UnopCmpNotBool => {
                let c = self.pop();
                self.push(Cell::from_bool(c.is_zero(CellKind::Int)));
            }
            Opcode::UnopCmpNotFloat => {
                let c = self.pop();
                self.push(Cell::from_bool(c.is_zero(CellKind::Float)));
            }
            Opcode::UnopCmpNotRef => {
                let c = self.pop();
                self.heap.dec_ref(c);
                self.push(Cell::from_bool(c.as_obj().is_none()));
            }
            Opcode::UnopBitNotInt => {
                let c = self.pop();
                self.push(Cell::from_int(!c.as_int()));
            }

            Opcode::TestInt => {
                let c = self.pop();
                self.push(Cell::from_bool(!c.is_zero(CellKind::Int)));
            }
            Opcode::TestFloat => {
                let c = self.pop();
                self.push(Cell::from_bool(!c.is_zero(CellKind::Float)));
            }
            Opcode::TestRef => {
                let c = self.pop();
                self.heap.dec_ref(c);
                self.push(Cell::from_bool(c.as_obj().is_some()));
            }

            Opcode::GetAttrObj | Opcode::GetAttrObjRef => {
                let obj = self.pop();
                let id = obj.as_obj().ok_or_else(RuntimeError::null_pointer)?;
                let value = self.heap.get(id).cells[operand.u32() as usize];
                if op == Opcode::GetAttrObjRef {
                    self.heap.inc_ref(value);
                }
                self.heap.dec_ref(obj);
                self.push(value);
            }
            Opcode::SetAttrObj | Opcode::SetAttrObjRef => {
                let value = self.pop();
                let obj = self.pop();
                let id = obj.as_obj().ok_or_else(RuntimeError::null_pointer)?;
                let slot = operand.u32() as usize;
                if op == Opcode::SetAttrObjRef {
                    let old = self.heap.get(id).cells[slot];
                    self.heap.dec_ref(old);
                }
                self.heap.get_mut(id).cells[slot] = value;
                self.heap.dec_ref(obj);
            }

            Opcode::GetArrayAccess | Opcode::GetArrayAccessRef => {
                let index = self.pop();
                let obj = self.pop();
                let value = self.array_get(obj, index, op == Opcode::GetArrayAccessRef)?;
                self.heap.dec_ref(obj);
                self.push(value);
            }
            Opcode::SetArrayAccess | Opcode::SetArrayAccessRef => {
                let value = self.pop();
                let index = self.pop();
                let obj = self.pop();
                self.array_set(obj, index, value, op == Opcode::SetArrayAccessRef)?;
                self.heap.dec_ref(obj);
            }

            Opcode::BinopAddInt => self.binop_int(|a, b| Ok(a.wrapping_add(b)))?,
            Opcode::BinopSubInt => self.binop_int(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::BinopMultInt => self.binop_int(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::BinopDivInt => self.binop_int(|a, b| {
                a.checked_div(b)
                    .ok_or_else(|| RuntimeError::new("integer division by zero"))
            })?,
            Opcode::BinopModInt => self.binop_int(|a, b| {
                a.checked_rem(b)
                    .ok_or_else(|| RuntimeError::new("integer division by zero"))
            })?,
            Opcode::BinopAddFloat => self.binop_float(|a, b| a + b),
            Opcode::BinopSubFloat => self.binop_float(|a, b| a - b),
            Opcode::BinopMultFloat => self.binop_float(|a, b| a * b),
            Opcode::BinopDivFloat => self.binop_float(|a, b| a / b),

            Opcode::BinopCmpAndInt | Opcode::BinopCmpAndBool => {
                let (a, b) = self.pop2();
                self.push(Cell::from_bool(!a.is_zero(CellKind::Int) && !b.is_zero(CellKind::Int)));
            }
            Opcode::BinopCmpAndFloat => {
                let (a, b) = self.pop2();
                self.push(Cell::from_bool(
                    !a.is_zero(CellKind::Float) && !b.is_zero(CellKind::Float),
                ));
            }
            Opcode::BinopCmpAndRef => {
                let (a, b) = self.pop2();
                self.heap.dec_ref(a);
                self.heap.dec_ref(b);
                self.push(Cell::from_bool(a.as_obj().is_some() && b.as_obj().is_some()));
            }
            Opcode::BinopCmpOrInt | Opcode::BinopCmpOrBool => {
                let (a, b) = self.pop2();
                self.push(Cell::from_bool(!a.is_zero(CellKind::Int) || !b.is_zero(CellKind::Int)));
            }
            Opcode::BinopCmpOrFloat => {
                let (a, b) = self.pop2();
                self.push(Cell::from_bool(
                    !a.is_zero(CellKind::Float) || !b.is_zero(CellKind::Float),
                ));
            }
            Opcode::BinopCmpOrRef => {
                let (a, b) = self.pop2();
                self.heap.dec_ref(a);
                self.heap.dec_ref(b);
                self.push(Cell::from_bool(a.as_obj().is_some() || b.as_obj().is_some()));
            }

            Opcode::BinopCmpLtInt => self.cmp_int(|a, b| a < b),
            Opcode::BinopCmpLeInt => self.cmp_int(|a, b| a <= b),
            Opcode::BinopCmpGtInt => self.cmp_int(|a, b| a > b),
            Opcode::BinopCmpGeInt => self.cmp_int(|a, b| a >= b),
            Opcode::BinopCmpEqInt => self.cmp_int(|a, b| a == b),
            Opcode::BinopCmpNeqInt => self.cmp_int(|a, b| a != b),
            Opcode::BinopCmpLtFloat => self.cmp_float(|a, b| a < b),
            Opcode::BinopCmpLeFloat => self.cmp_float(|a, b| a <= b),
            Opcode::BinopCmpGtFloat => self.cmp_float(|a, b| a > b),
            Opcode::BinopCmpGeFloat => self.cmp_float(|a, b| a >= b),
            Opcode::BinopCmpEqFloat => self.cmp_float(|a, b| a == b),
            Opcode::BinopCmpNeqFloat => self.cmp_float(|a, b| a != b),
            Opcode::BinopCmpLtBool => self.cmp_int(|a, b| a < b),
            Opcode::BinopCmpLeBool => self.cmp_int(|a, b| a <= b),
            Opcode::BinopCmpGtBool => self.cmp_int(|a, b| a > b),
            Opcode::BinopCmpGeBool => self.cmp_int(|a, b| a >= b),
            Opcode::BinopCmpEqBool => self.cmp_int(|a, b| a == b),
            Opcode::BinopCmpNeqBool => self.cmp_int(|a, b| a != b),
            Opcode::BinopCmpEqRef => {
                let (a, b) = self.pop2();
                self.heap.dec_ref(a);
                self.heap.dec_ref(b);
                self.push(Cell::from_bool(a.as_obj() == b.as_obj()));
            }
            Opcode::BinopCmpNeqRef => {
                let (a, b) = self.pop2();
                self.heap.dec_ref(a);
                self.heap.dec_ref(b);
                self.push(Cell::from_bool(a.as_obj() != b.as_obj()));
            }

            Opcode::BinopBitAndInt | Opcode::BinopBitAndBool => {
                self.binop_int(|a, b| Ok(a & b))?;
            }
            Opcode::BinopBitOrInt | Opcode::BinopBitOrBool => {
                self.binop_int(|a, b| Ok(a | b))?;
            }
            Opcode::BinopBitXorInt | Opcode::BinopBitXorBool => {
                self.binop_int(|a, b| Ok(a ^ b))?;
            }
            Opcode::BinopBitLshiftInt => {
                self.binop_int(|a, b| Ok(a.wrapping_shl(b as u32)))?;
            }
            Opcode::BinopBitRshiftInt => {
                self.binop_int(|a, b| Ok(a.wrapping_shr(b as u32)))?;
            }
        }
        self.pc += 1;
        Ok(StepExit::Continue)
    }

    #[inline]
    fn jump(&mut self, offset: i32) {
        let next = self.pc as i64 + 1 + i64::from(offset);
        self.pc = usize::try_from(next).expect("jump target out of range");
    }

    #[inline]
    fn branch(&mut self, taken: bool, offset: i32) -> StepExit {
        if taken {
            self.jump(offset);
        } else {
            self.pc += 1;
        }
        StepExit::Continue
    }

    #[inline]
    fn pop2(&mut self) -> (Cell, Cell) {
        let b = self.pop();
        let a = self.pop();
        (a, b)
    }

    fn binop_int(&mut self, f: impl FnOnce(i64, i64) -> RunResult<i64>) -> RunResult<()> {
        let (a, b) = self.pop2();
        let v = f(a.as_int(), b.as_int())?;
        self.push(Cell::from_int(v));
        Ok(())
    }

    fn binop_float(&mut self, f: impl FnOnce(f64, f64) -> f64) {
        let (a, b) = self.pop2();
        self.push(Cell::from_float(f(a.as_float(), b.as_float())));
    }

    fn cmp_int(&mut self, f: impl FnOnce(i64, i64) -> bool) {
        let (a, b) = self.pop2();
        self.push(Cell::from_bool(f(a.as_int(), b.as_int())));
    }

    fn cmp_float(&mut self, f: impl FnOnce(f64, f64) -> bool) {
        let (a, b) = self.pop2();
        self.push(Cell::from_bool(f(a.as_float(), b.as_float())));
    }

    fn array_get(&mut self, obj: Cell, index: Cell, is_ref: bool) -> RunResult<Cell> {
        let id = obj.as_obj().ok_or_else(RuntimeError::null_pointer)?;
        // strings yield one-character strings at byte offsets; list and
        // map flavors read the payload directly
        enum Got {
            Cell(Cell),
            Char(String),
        }
        let got = {
            let slot = self.heap.get(id);
            match &slot.payload {
                NativePayload::List { elems, .. } => {
                    let i = index.as_int();
                    let cell = usize::try_from(i)
                        .ok()
                        .and_then(|i| elems.get(i).copied())
                        .ok_or_else(|| RuntimeError::new("list index out of range"))?;
                    Got::Cell(cell)
                }
                NativePayload::Map(data) => {
                    let key = self.heap.map_key(data.key_kind, index);
                    let (_, value) = data
                        .entries
                        .get(&key)
                        .ok_or_else(|| RuntimeError::new("key not found in map"))?;
                    Got::Cell(*value)
                }
                NativePayload::Str(s) => {
                    let i = index.as_int();
                    let b = usize::try_from(i)
                        .ok()
                        .and_then(|i| s.as_bytes().get(i).copied())
                        .ok_or_else(|| RuntimeError::new("string index out of range"))?;
                    Got::Char(String::from_utf8_lossy(&[b]).into_owned())
                }
                NativePayload::None => {
                    return Err(RuntimeError::new("value is not indexable"));
                }
            }
        };
        // ref-typed map keys are consumed by the access
        let ref_keyed_map = matches!(
            &self.heap.get(id).payload,
            NativePayload::Map(data) if data.key_kind == CellKind::Ref
        );
        if ref_keyed_map {
            self.heap.dec_ref(index);
        }
        match got {
            Got::Cell(cell) => {
                if is_ref {
                    self.heap.inc_ref(cell);
                }
                Ok(cell)
            }
            Got::Char(s) => Ok(self.alloc_string(s)),
        }
    }

    fn array_set(&mut self, obj: Cell, index: Cell, value: Cell, is_ref: bool) -> RunResult<()> {
        let id = obj.as_obj().ok_or_else(RuntimeError::null_pointer)?;
        // compute the map key before borrowing the payload mutably
        let map_key = match &self.heap.get(id).payload {
            NativePayload::Map(data) => Some(self.heap.map_key(data.key_kind, index)),
            _ => None,
        };
        // cells displaced by the store; released after the payload borrow
        let mut released: SmallVec<[Cell; 2]> = SmallVec::new();
        {
            let slot = self.heap.get_mut(id);
            match &mut slot.payload {
                NativePayload::List { elems, .. } => {
                    let i = usize::try_from(index.as_int())
                        .map_err(|_| RuntimeError::new("list index out of range"))?;
                    let old = elems
                        .get_mut(i)
                        .ok_or_else(|| RuntimeError::new("list index out of range"))?;
                    if is_ref {
                        released.push(*old);
                    }
                    *old = value;
                }
                NativePayload::Map(data) => {
                    let key = map_key.expect("map key computed above");
                    // the entry owns both the key cell and the value cell
                    if let Some((old_key, old_value)) = data.entries.insert(key, (index, value)) {
                        if data.key_kind == CellKind::Ref {
                            released.push(old_key);
                        }
                        if is_ref {
                            released.push(old_value);
                        }
                    }
                }
                _ => return Err(RuntimeError::new("value is not indexable")),
            }
        }
        for old in released {
            self.heap.dec_ref(old);
        }
        Ok(())
    }
}
