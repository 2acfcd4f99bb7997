//! Register virtual machine.
//!
//! Two 8-byte registers (`left`, `right`) and a bounded byte stack. The
//! meaning of register bytes is decided per instruction by its type operand.
//! Execution either returns normally, when `RETURN` pops the sentinel frame
//! pushed by [`Vm::execute`], or stops with a [`Fault`].

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::bytecode::{DecodeError, Instruction, Register};
use crate::types::{SizeClass, TypeTag};
use crate::value::{REGISTER_WIDTH, Scalar, ScalarError};

pub const DEFAULT_STACK_CAPACITY: usize = 256;

/// Saved program counter of the sentinel frame; popping it ends execution.
const SENTINEL_PC: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Operand stack size in bytes.
    pub stack_capacity: usize,
    /// Maximum number of instructions one `execute` call may run.
    pub step_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            step_limit: None,
        }
    }
}

/// Fatal execution error. The VM must be reloaded before it runs again.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("memory access out of bounds")]
    BoundsViolation,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid instruction 0x{0:02x}")]
    InvalidInstruction(u8),
    #[error("invalid instruction parameter 0x{0:02x}")]
    InvalidParameter(u8),
    #[error("invalid execution state")]
    InvalidState,
    #[error("step limit exceeded")]
    StepLimitExceeded,
}

impl Fault {
    pub fn code(self) -> u8 {
        match self {
            Fault::BoundsViolation => 1,
            Fault::InvalidArgument => 2,
            Fault::InvalidInstruction(_) => 10,
            Fault::InvalidParameter(_) => 12,
            Fault::InvalidState => 20,
            Fault::StepLimitExceeded => 21,
        }
    }
}

impl From<DecodeError> for Fault {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Truncated(_) => Fault::BoundsViolation,
            DecodeError::UnknownOpcode(byte) => Fault::InvalidInstruction(byte),
            DecodeError::InvalidOperand(byte) => Fault::InvalidParameter(byte),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Nothing loaded.
    Empty,
    Ready,
    Halted,
    Faulted(Fault),
}

pub struct Vm {
    config: VmConfig,
    code: Vec<u8>,
    stack: Vec<u8>,
    left: [u8; REGISTER_WIDTH],
    right: [u8; REGISTER_WIDTH],
    pc: usize,
    fp: usize,
    state: VmState,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm {
            stack: Vec::new(),
            config,
            code: Vec::new(),
            left: [0; REGISTER_WIDTH],
            right: [0; REGISTER_WIDTH],
            pc: 0,
            fp: 0,
            state: VmState::Empty,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Install a program, replacing any previous one and clearing a fault.
    pub fn load(&mut self, bytes: &[u8]) {
        self.code.clear();
        self.code.extend_from_slice(bytes);
        self.reset();
        self.state = VmState::Ready;
        debug!(bytes = bytes.len(), "loaded program");
    }

    /// `0` after a normal return, the fault code after a fault, `None`
    /// while nothing has finished.
    pub fn exit_code(&self) -> Option<u8> {
        match self.state {
            VmState::Halted => Some(0),
            VmState::Faulted(fault) => Some(fault.code()),
            VmState::Empty | VmState::Ready => None,
        }
    }

    /// The `left` register read as `tag`, available after a normal return.
    pub fn result(&self, tag: TypeTag) -> Option<Scalar> {
        if self.state != VmState::Halted {
            return None;
        }
        Scalar::from_register(tag, &self.left)
    }

    /// Run from offset 0 until the outermost `RETURN` or a fault.
    pub fn execute(&mut self) -> Result<(), Fault> {
        match self.state {
            VmState::Ready => {}
            VmState::Halted => self.reset(),
            VmState::Empty | VmState::Faulted(_) => return Err(self.fault(Fault::InvalidState)),
        }

        match self.run() {
            Ok(()) => {
                self.state = VmState::Halted;
                Ok(())
            }
            Err(fault) => Err(self.fault(fault)),
        }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.left = [0; REGISTER_WIDTH];
        self.right = [0; REGISTER_WIDTH];
        self.pc = 0;
        self.fp = 0;
    }

    fn fault(&mut self, fault: Fault) -> Fault {
        warn!(code = fault.code(), pc = self.pc, "{fault}");
        self.state = VmState::Faulted(fault);
        fault
    }

    fn run(&mut self) -> Result<(), Fault> {
        self.push_frame(SENTINEL_PC)?;
        let mut steps: u64 = 0;
        loop {
            if self.config.step_limit.is_some_and(|limit| steps >= limit) {
                return Err(Fault::StepLimitExceeded);
            }
            steps += 1;

            if self.pc >= self.code.len() {
                return Err(Fault::InvalidState);
            }
            let (instruction, next) = Instruction::decode(&self.code, self.pc)?;
            trace!(pc = self.pc, %instruction, "step");
            self.pc = next;

            if self.step(instruction)? == Flow::Halt {
                return Ok(());
            }
        }
    }

    fn step(&mut self, instruction: Instruction) -> Result<Flow, Fault> {
        match instruction {
            Instruction::Call { target } => {
                let ret = i32::try_from(self.pc).map_err(|_| Fault::InvalidState)?;
                self.push_frame(ret)?;
                self.jump(target)?;
            }
            Instruction::Return => {
                let ret = self.pop_i32()?;
                let fp = self.pop_i32()?;
                if ret < 0 {
                    return Ok(Flow::Halt);
                }
                self.fp = usize::try_from(fp)
                    .ok()
                    .filter(|&fp| fp <= self.stack.len())
                    .ok_or(Fault::InvalidState)?;
                self.jump(ret)?;
            }
            Instruction::LoadSp { size, offset } => {
                let at = self.relative(0, offset)?;
                self.left = self.read_stack(at, size)?;
            }
            Instruction::LoadFp { size, offset } => {
                let at = self.relative(self.fp, offset)?;
                self.left = self.read_stack(at, size)?;
            }
            Instruction::LoadIr { size } => {
                let at = self.indirect_address();
                self.left = self.read_stack(at, size)?;
            }
            Instruction::LoadC { size, offset } => {
                let start = usize::try_from(offset).map_err(|_| Fault::BoundsViolation)?;
                let bytes = self
                    .code
                    .get(start..start + size.byte_width())
                    .ok_or(Fault::BoundsViolation)?;
                self.left = [0; REGISTER_WIDTH];
                self.left[..bytes.len()].copy_from_slice(bytes);
            }
            Instruction::Swap => std::mem::swap(&mut self.left, &mut self.right),
            Instruction::StoreSp { size, offset } => {
                let at = self.relative(0, offset)?;
                self.write_stack(at, size)?;
            }
            Instruction::StoreFp { size, offset } => {
                let at = self.relative(self.fp, offset)?;
                self.write_stack(at, size)?;
            }
            Instruction::StoreIr { size } => {
                let at = self.indirect_address();
                self.write_stack(at, size)?;
            }
            Instruction::Jmp { target } => self.jump(target)?,
            Instruction::Jmpz { target } => {
                if self.left[0] & 1 == 0 {
                    self.jump(target)?;
                }
            }
            Instruction::Jmpnz { target } => {
                if self.left[0] & 1 != 0 {
                    self.jump(target)?;
                }
            }
            Instruction::CmpE(ty) => self.compare(ty, Scalar::equals)?,
            Instruction::CmpL(ty) => self.compare(ty, Scalar::less_than)?,
            Instruction::CmpG(ty) => self.compare(ty, Scalar::greater_than)?,
            Instruction::Push(operand) => {
                let width = operand.size.byte_width();
                if self.stack.len() + width > self.config.stack_capacity {
                    return Err(Fault::BoundsViolation);
                }
                let register = *self.register(operand.register);
                self.stack.extend_from_slice(&register[..width]);
            }
            Instruction::Pop(operand) => {
                let bytes = self.pop_bytes(operand.size.byte_width())?;
                let register = self.register_mut(operand.register);
                *register = [0; REGISTER_WIDTH];
                register[..bytes.len()].copy_from_slice(&bytes);
            }
            Instruction::Add(ty) => self.arithmetic(ty, Scalar::add)?,
            Instruction::Sub(ty) => self.arithmetic(ty, Scalar::sub)?,
            Instruction::Mul(ty) => self.arithmetic(ty, Scalar::mul)?,
            Instruction::Div(ty) => self.arithmetic(ty, Scalar::div)?,
            Instruction::And(ty) => self.arithmetic(ty, Scalar::bit_and)?,
            Instruction::Or(ty) => self.arithmetic(ty, Scalar::bit_or)?,
            Instruction::Xor(ty) => self.arithmetic(ty, Scalar::bit_xor)?,
            Instruction::Neg(ty) => self.unary(ty, |v| Ok(v.neg()))?,
            Instruction::Not(ty) => self.unary(ty, |v| Ok(v.bit_not()))?,
            Instruction::Floor(ty) => self.unary(ty, Scalar::floor)?,
            Instruction::Ceil(ty) => self.unary(ty, Scalar::ceil)?,
            Instruction::Conv { from, to } => {
                let value = self.left_as(from)?;
                let converted = value
                    .convert(to)
                    .ok_or(Fault::InvalidParameter(to.bits()))?;
                self.left = converted.to_register();
            }
        }
        Ok(Flow::Continue)
    }

    fn jump(&mut self, target: i32) -> Result<(), Fault> {
        // Targets past the end are caught by the next fetch.
        self.pc = usize::try_from(target).map_err(|_| Fault::InvalidState)?;
        Ok(())
    }

    fn push_frame(&mut self, ret: i32) -> Result<(), Fault> {
        let fp = i32::try_from(self.fp).map_err(|_| Fault::InvalidState)?;
        self.push_bytes(&fp.to_le_bytes())?;
        self.push_bytes(&ret.to_le_bytes())?;
        self.fp = self.stack.len();
        Ok(())
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        if self.stack.len() + bytes.len() > self.config.stack_capacity {
            return Err(Fault::BoundsViolation);
        }
        self.stack.extend_from_slice(bytes);
        Ok(())
    }

    fn pop_bytes(&mut self, width: usize) -> Result<Vec<u8>, Fault> {
        let start = self
            .stack
            .len()
            .checked_sub(width)
            .ok_or(Fault::BoundsViolation)?;
        Ok(self.stack.split_off(start))
    }

    fn pop_i32(&mut self) -> Result<i32, Fault> {
        let bytes = self.pop_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn relative(&self, base: usize, offset: i32) -> Result<usize, Fault> {
        let at = base as i64 + i64::from(offset);
        usize::try_from(at).map_err(|_| Fault::BoundsViolation)
    }

    /// Stack address held in the low four bytes of `right`.
    fn indirect_address(&self) -> usize {
        let r = self.right;
        u32::from_le_bytes([r[0], r[1], r[2], r[3]]) as usize
    }

    /// Read `size` bytes of live stack into a zero-filled register image.
    fn read_stack(&self, at: usize, size: SizeClass) -> Result<[u8; REGISTER_WIDTH], Fault> {
        let bytes = self
            .stack
            .get(at..at + size.byte_width())
            .ok_or(Fault::BoundsViolation)?;
        let mut register = [0; REGISTER_WIDTH];
        register[..bytes.len()].copy_from_slice(bytes);
        Ok(register)
    }

    fn write_stack(&mut self, at: usize, size: SizeClass) -> Result<(), Fault> {
        let width = size.byte_width();
        let slot = self
            .stack
            .get_mut(at..at + width)
            .ok_or(Fault::BoundsViolation)?;
        slot.copy_from_slice(&self.left[..width]);
        Ok(())
    }

    fn register(&self, register: Register) -> &[u8; REGISTER_WIDTH] {
        match register {
            Register::Left => &self.left,
            Register::Right => &self.right,
        }
    }

    fn register_mut(&mut self, register: Register) -> &mut [u8; REGISTER_WIDTH] {
        match register {
            Register::Left => &mut self.left,
            Register::Right => &mut self.right,
        }
    }

    fn left_as(&self, ty: TypeTag) -> Result<Scalar, Fault> {
        Scalar::from_register(ty, &self.left).ok_or(Fault::InvalidParameter(ty.bits()))
    }

    fn right_as(&self, ty: TypeTag) -> Result<Scalar, Fault> {
        Scalar::from_register(ty, &self.right).ok_or(Fault::InvalidParameter(ty.bits()))
    }

    /// `left = left <op> right`, both read as `ty`.
    fn arithmetic(
        &mut self,
        ty: TypeTag,
        op: fn(Scalar, Scalar) -> Result<Scalar, ScalarError>,
    ) -> Result<(), Fault> {
        let result = op(self.left_as(ty)?, self.right_as(ty)?).map_err(|err| scalar_fault(err, ty))?;
        self.left = result.to_register();
        Ok(())
    }

    fn unary(
        &mut self,
        ty: TypeTag,
        op: impl FnOnce(Scalar) -> Result<Scalar, ScalarError>,
    ) -> Result<(), Fault> {
        let result = op(self.left_as(ty)?).map_err(|err| scalar_fault(err, ty))?;
        self.left = result.to_register();
        Ok(())
    }

    /// Writes a full-register 0 or 1 into `left`.
    fn compare(
        &mut self,
        ty: TypeTag,
        op: fn(Scalar, Scalar) -> Result<bool, ScalarError>,
    ) -> Result<(), Fault> {
        let holds = op(self.left_as(ty)?, self.right_as(ty)?).map_err(|err| scalar_fault(err, ty))?;
        self.left = [0; REGISTER_WIDTH];
        self.left[0] = u8::from(holds);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

fn scalar_fault(err: ScalarError, ty: TypeTag) -> Fault {
    match err {
        ScalarError::DivisionByZero => Fault::InvalidArgument,
        ScalarError::KindMismatch => Fault::InvalidParameter(ty.bits()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeBuffer, RegisterOperand};
    use crate::types::ScalarClass;

    fn assemble(build: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
        let mut code = CodeBuffer::new();
        build(&mut code);
        code.finish().expect("assembles").bytes
    }

    fn run(bytes: &[u8]) -> (Vm, Result<(), Fault>) {
        let mut vm = Vm::new();
        vm.load(bytes);
        let result = vm.execute();
        (vm, result)
    }

    fn push_left(size: SizeClass) -> Instruction {
        Instruction::Push(RegisterOperand::new(Register::Left, size))
    }

    #[test]
    fn returns_normally_through_the_sentinel_frame() {
        let bytes = assemble(|c| {
            c.emit_constant(Scalar::I32(-7));
            c.emit(Instruction::Return);
        });
        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()));
        assert_eq!(vm.exit_code(), Some(0));
        assert_eq!(vm.result(TypeTag::I32), Some(Scalar::I32(-7)));
    }

    #[test]
    fn load_constant_zero_fills_the_register() {
        let bytes = assemble(|c| {
            c.emit_constant(Scalar::U64(u64::MAX));
            c.emit(Instruction::Swap);
            c.emit_constant(Scalar::U8(3));
            c.emit(Instruction::Return);
        });
        let (vm, _) = run(&bytes);
        assert_eq!(vm.result(TypeTag::U64), Some(Scalar::U64(3)));
    }

    #[test]
    fn push_beyond_capacity_is_a_bounds_violation() {
        // PUSH left u64; JMP 0
        let mut code = Vec::new();
        push_left(SizeClass::B64).encode(&mut code);
        Instruction::Jmp { target: 0 }.encode(&mut code);

        let mut vm = Vm::with_config(VmConfig { stack_capacity: 32, step_limit: None });
        vm.load(&code);
        assert_eq!(vm.execute(), Err(Fault::BoundsViolation));
        assert_eq!(vm.exit_code(), Some(1));
        assert_eq!(vm.result(TypeTag::U8), None);

        // A faulted VM stays faulted until it is reloaded.
        assert_eq!(vm.execute(), Err(Fault::InvalidState));
        vm.load(&assemble(|c| {
            c.emit_constant(Scalar::U8(1));
            c.emit(Instruction::Return);
        }));
        assert_eq!(vm.execute(), Ok(()));
    }

    #[test]
    fn step_limit_stops_infinite_loops() {
        let mut code = Vec::new();
        Instruction::Jmp { target: 0 }.encode(&mut code);
        let mut vm = Vm::with_config(VmConfig {
            step_limit: Some(100),
            ..VmConfig::default()
        });
        vm.load(&code);
        assert_eq!(vm.execute(), Err(Fault::StepLimitExceeded));
        assert_eq!(vm.exit_code(), Some(21));
    }

    #[test]
    fn empty_vm_refuses_to_run() {
        let mut vm = Vm::new();
        assert_eq!(vm.exit_code(), None);
        assert_eq!(vm.execute(), Err(Fault::InvalidState));
    }

    #[test]
    fn running_off_the_end_is_an_invalid_state() {
        let bytes = assemble(|c| {
            c.emit(Instruction::Swap);
        });
        assert_eq!(run(&bytes).1, Err(Fault::InvalidState));
    }

    #[test]
    fn unknown_opcode_and_bad_operands_fault() {
        assert_eq!(run(&[0xEE]).1, Err(Fault::InvalidInstruction(0xEE)));
        // ADD with a NONE type operand.
        assert_eq!(run(&[0x12, 0x00]).1, Err(Fault::InvalidParameter(0x00)));
        // LOADC with a truncated offset.
        assert_eq!(run(&[0x05, 0x00, 0x01]).1, Err(Fault::BoundsViolation));
    }

    #[test]
    fn load_constant_outside_the_buffer_faults() {
        let mut code = Vec::new();
        Instruction::LoadC { size: SizeClass::B32, offset: 1000 }.encode(&mut code);
        assert_eq!(run(&code).1, Err(Fault::BoundsViolation));
    }

    #[test]
    fn floor_rejects_integer_tags() {
        let bytes = assemble(|c| {
            c.emit_constant(Scalar::F64(2.75));
            c.emit(Instruction::Floor(TypeTag::F64));
            c.emit(Instruction::Return);
        });
        let (vm, _) = run(&bytes);
        assert_eq!(vm.result(TypeTag::F64), Some(Scalar::F64(2.0)));

        let bytes = assemble(|c| {
            c.emit_constant(Scalar::I8(2));
            c.emit(Instruction::Ceil(TypeTag::I8));
            c.emit(Instruction::Return);
        });
        assert_eq!(run(&bytes).1, Err(Fault::InvalidParameter(TypeTag::I8.bits())));
    }

    #[test]
    fn call_and_return_link_frames() {
        // 0: CALL f ; 5: RETURN ; f: LOADC 9u8 ; RETURN
        let mut code = CodeBuffer::new();
        let call = code.emit(Instruction::Call { target: 0 });
        code.emit(Instruction::Return);
        let function = code.len();
        code.emit_constant(Scalar::U8(9));
        code.emit(Instruction::Return);
        code.patch_target(call, function).expect("patches");
        let bytes = code.finish().expect("assembles").bytes;

        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()));
        assert_eq!(vm.result(TypeTag::U8), Some(Scalar::U8(9)));
    }

    #[test]
    fn frame_relative_and_indirect_access() {
        let bytes = assemble(|c| {
            // Two u16 slots: [5, 0] above the sentinel frame (8 bytes).
            c.emit_constant(Scalar::U16(5));
            c.emit(push_left(SizeClass::B16));
            c.emit(push_left(SizeClass::B16));
            // slot 1 = 40 through STOREFP.
            c.emit_constant(Scalar::U16(40));
            c.emit(Instruction::StoreFp { size: SizeClass::B16, offset: 2 });
            // right = address of slot 0 (fp = 8).
            c.emit_constant(Scalar::U32(8));
            c.emit(Instruction::Swap);
            c.emit(Instruction::LoadIr { size: SizeClass::B16 });
            // right = slot 0, left = slot 1 by its stack address, add.
            c.emit(Instruction::Swap);
            c.emit(Instruction::LoadSp { size: SizeClass::B16, offset: 10 });
            c.emit(Instruction::Add(TypeTag::U16));
            c.emit(Instruction::Pop(RegisterOperand::new(Register::Right, SizeClass::B16)));
            c.emit(Instruction::Pop(RegisterOperand::new(Register::Right, SizeClass::B16)));
            c.emit(Instruction::Return);
        });
        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()));
        assert_eq!(vm.result(TypeTag::U16), Some(Scalar::U16(45)));
    }

    #[test]
    fn stack_pointer_offsets_count_from_the_stack_base() {
        // The sentinel frame fills bytes 0..8, so the first slot is at 8.
        let bytes = assemble(|c| {
            c.emit_constant(Scalar::U16(5));
            c.emit(push_left(SizeClass::B16));
            c.emit_constant(Scalar::U16(0));
            c.emit(Instruction::LoadSp { size: SizeClass::B16, offset: 8 });
            c.emit(Instruction::Pop(RegisterOperand::new(Register::Right, SizeClass::B16)));
            c.emit(Instruction::Return);
        });
        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()));
        assert_eq!(vm.result(TypeTag::U16), Some(Scalar::U16(5)));

        let bytes = assemble(|c| {
            c.emit_constant(Scalar::U16(0));
            c.emit(push_left(SizeClass::B16));
            c.emit_constant(Scalar::U16(77));
            c.emit(Instruction::StoreSp { size: SizeClass::B16, offset: 8 });
            c.emit(Instruction::Pop(RegisterOperand::new(Register::Left, SizeClass::B16)));
            c.emit(Instruction::Return);
        });
        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()));
        assert_eq!(vm.result(TypeTag::U16), Some(Scalar::U16(77)));

        // Only eight bytes above the base are live here.
        let bytes = assemble(|c| {
            c.emit(Instruction::LoadSp { size: SizeClass::B16, offset: 8 });
            c.emit(Instruction::Return);
        });
        assert_eq!(run(&bytes).1, Err(Fault::BoundsViolation));
    }

    #[test]
    fn oversized_stack_capacity_is_not_preallocated() {
        let mut vm = Vm::with_config(VmConfig {
            stack_capacity: usize::MAX,
            step_limit: None,
        });
        vm.load(&assemble(|c| {
            c.emit_constant(Scalar::I16(-300));
            c.emit(push_left(SizeClass::B16));
            c.emit(Instruction::Pop(RegisterOperand::new(Register::Left, SizeClass::B16)));
            c.emit(Instruction::Return);
        }));
        assert_eq!(vm.execute(), Ok(()));
        assert_eq!(vm.result(TypeTag::I16), Some(Scalar::I16(-300)));
    }

    fn scalar(ty: TypeTag, value: i64) -> Scalar {
        Scalar::I64(value).convert(ty).expect("scalar tag")
    }

    /// A value that needs the full width of `ty` to survive.
    fn wide(ty: TypeTag) -> i64 {
        match ty.class() {
            ScalarClass::Float => 1 << 20,
            _ => 1 << (ty.byte_width() * 8 - 2),
        }
    }

    /// Run `instruction` with `left = lhs` and `right = rhs`.
    fn run_binary(instruction: Instruction, lhs: Scalar, rhs: Scalar) -> Vm {
        let bytes = assemble(|c| {
            c.emit_constant(rhs);
            c.emit(Instruction::Swap);
            c.emit_constant(lhs);
            c.emit(instruction);
            c.emit(Instruction::Return);
        });
        let (vm, result) = run(&bytes);
        assert_eq!(result, Ok(()), "{instruction}");
        vm
    }

    #[test]
    fn every_scalar_tag_dispatches_arithmetic_and_comparisons() {
        for ty in TypeTag::SCALARS {
            let w = wide(ty);
            let arithmetic = [
                (Instruction::Add(ty), w, 3, w + 3),
                (Instruction::Sub(ty), w, 3, w - 3),
                (Instruction::Mul(ty), 6, 3, 18),
                (Instruction::Div(ty), w, 2, w / 2),
            ];
            for (instruction, lhs, rhs, expected) in arithmetic {
                let vm = run_binary(instruction, scalar(ty, lhs), scalar(ty, rhs));
                assert_eq!(vm.result(ty), Some(scalar(ty, expected)), "{instruction}");
            }

            let comparisons = [
                (Instruction::CmpE(ty), w, 3, 0),
                (Instruction::CmpE(ty), w, w, 1),
                (Instruction::CmpL(ty), w, 3, 0),
                (Instruction::CmpL(ty), 3, w, 1),
                (Instruction::CmpG(ty), w, 3, 1),
            ];
            for (instruction, lhs, rhs, expected) in comparisons {
                let vm = run_binary(instruction, scalar(ty, lhs), scalar(ty, rhs));
                let result = vm.result(TypeTag::BOOL);
                assert_eq!(result, Some(Scalar::U8(expected)), "{instruction}");
            }
        }
    }

    #[test]
    fn every_scalar_tag_dispatches_unary_operators() {
        for ty in TypeTag::SCALARS {
            let value = scalar(ty, wide(ty));

            let bytes = assemble(|c| {
                c.emit_constant(value);
                c.emit(Instruction::Neg(ty));
                c.emit(Instruction::Return);
            });
            let (vm, result) = run(&bytes);
            assert_eq!(result, Ok(()), "NEG {ty}");
            // Unsigned negation wraps like the `as` cast of the negative value.
            assert_eq!(vm.result(ty), Some(scalar(ty, -wide(ty))), "NEG {ty}");

            let bytes = assemble(|c| {
                c.emit_constant(value);
                c.emit(Instruction::Not(ty));
                c.emit(Instruction::Return);
            });
            let (vm, result) = run(&bytes);
            assert_eq!(result, Ok(()), "NOT {ty}");
            let expected = match ty.class() {
                ScalarClass::Float => value.bit_not(),
                _ => scalar(ty, !wide(ty)),
            };
            assert_eq!(vm.result(ty), Some(expected), "NOT {ty}");
        }
    }

    #[test]
    fn conditional_jumps_test_the_low_bit() {
        // left = 1; JMPNZ skip; LOADC 7; skip: RETURN
        let mut code = CodeBuffer::new();
        code.emit_constant(Scalar::U8(1));
        let branch = code.emit(Instruction::Jmpnz { target: 0 });
        code.emit_constant(Scalar::U8(7));
        let end = code.emit(Instruction::Return);
        code.patch_target(branch, end).expect("patches");
        let bytes = code.finish().expect("assembles").bytes;
        let (vm, _) = run(&bytes);
        assert_eq!(vm.result(TypeTag::U8), Some(Scalar::U8(1)));
    }

    #[test]
    fn halted_vm_can_run_again() {
        let bytes = assemble(|c| {
            c.emit_constant(Scalar::U8(4));
            c.emit(Instruction::Return);
        });
        let (mut vm, _) = run(&bytes);
        assert_eq!(vm.execute(), Ok(()));
        assert_eq!(vm.result(TypeTag::U8), Some(Scalar::U8(4)));
    }

    #[test]
    fn fault_codes_are_stable() {
        assert_eq!(Fault::BoundsViolation.code(), 1);
        assert_eq!(Fault::InvalidArgument.code(), 2);
        assert_eq!(Fault::InvalidInstruction(0).code(), 10);
        assert_eq!(Fault::InvalidParameter(0).code(), 12);
        assert_eq!(Fault::InvalidState.code(), 20);
        assert_eq!(Fault::StepLimitExceeded.code(), 21);
    }
}
