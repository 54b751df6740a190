/*!
cpu::mod - Public façade for the ARM7TDMI core.

Structure:

```text
state.rs  - Architectural state (register file, CPSR/SPSR, mode banking).
arm.rs    - ARM (32-bit) decoder/executor, including the barrel shifter.
thumb.rs  - Thumb (16-bit) decoder/executor.
cp15.rs   - System-control coprocessor shim.
```

Only the stable public surface (the `Cpu` methods) is re-exported here.

Execution model:
- `step(&mut bus)` runs exactly one instruction and returns the bus cycles
  it consumed. If an interrupt line is asserted and unmasked when `step` is
  entered, the CPU vectors into the exception instead of fetching.
- During execution `regs[15]` holds the pipeline value (instruction address
  + 8 in ARM state, + 4 in Thumb state), which is what operand reads of the
  PC must observe. If the instruction did not branch, the PC is rewound to
  the next sequential instruction afterwards.
- IRQ/FIQ lines are level inputs sampled between instructions; the machine
  refreshes them from the interrupt controller before each step.

Usage:
```ignore
let mut cpu = Cpu::new();
cpu.reset();
let cycles = cpu.step(&mut bus);
```
*/

pub mod arm;
pub mod cp15;
pub mod state;
pub mod thumb;

use crate::bus::Bus;
use cp15::Cp15;
use state::{CpuState, FLAG_F, FLAG_I, FLAG_T};

/// The seven ARM exception kinds, in vector order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    Swi,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    pub fn vector(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::Undefined => 0x04,
            Exception::Swi => 0x08,
            Exception::PrefetchAbort => 0x0C,
            Exception::DataAbort => 0x10,
            Exception::Irq => 0x18,
            Exception::Fiq => 0x1C,
        }
    }

    pub fn mode(self) -> u32 {
        match self {
            Exception::Reset | Exception::Swi => state::MODE_SVC,
            Exception::Undefined => state::MODE_UND,
            Exception::PrefetchAbort | Exception::DataAbort => state::MODE_ABT,
            Exception::Irq => state::MODE_IRQ,
            Exception::Fiq => state::MODE_FIQ,
        }
    }
}

pub struct Cpu {
    pub state: CpuState,
    pub cp15: Cp15,

    // Latched interrupt inputs, sampled between instructions.
    irq_line: bool,
    fiq_line: bool,

    // Set by any PC write during execute; suppresses the sequential-PC
    // rewind at the end of the step.
    branched: bool,

    // Lifetime instruction/cycle counters (diagnostics only).
    pub cycles: u64,
    pub instructions: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            state: CpuState::new(),
            cp15: Cp15::new(),
            irq_line: false,
            fiq_line: false,
            branched: false,
            cycles: 0,
            instructions: 0,
        }
    }

    /// Reset per the ARM exception table: supervisor mode, IRQ+FIQ masked,
    /// ARM state, PC at the reset vector.
    pub fn reset(&mut self) {
        self.state.reset();
        self.cp15.reset();
        self.irq_line = false;
        self.fiq_line = false;
        self.state.regs[15] = Exception::Reset.vector();
    }

    // ---------------------------------------------------------------------
    // Interrupt lines
    // ---------------------------------------------------------------------

    pub fn set_irq_line(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    pub fn set_fiq_line(&mut self, asserted: bool) {
        self.fiq_line = asserted;
    }

    /// Clear the CPSR I bit (firmware normally does this via MSR; tests and
    /// the host shell use this directly).
    pub fn enable_irq(&mut self) {
        self.state.set_flag(FLAG_I, false);
    }

    pub fn enable_fiq(&mut self) {
        self.state.set_flag(FLAG_F, false);
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// Execute one instruction (or vector into a pending exception) and
    /// return the bus cycles consumed.
    pub fn step(&mut self, bus: &mut Bus) -> u32 {
        // Exceptions preempt the fetch. FIQ outranks IRQ.
        if self.fiq_line && !self.state.is_flag_set(FLAG_F) {
            let ret = self.state.reg(15).wrapping_add(4);
            self.enter_exception(Exception::Fiq, ret);
            self.cycles += 3;
            return 3;
        }
        if self.irq_line && !self.state.is_flag_set(FLAG_I) {
            let ret = self.state.reg(15).wrapping_add(4);
            self.enter_exception(Exception::Irq, ret);
            self.cycles += 3;
            return 3;
        }

        let consumed = if self.state.thumb() {
            let pc = self.state.reg(15) & !1;
            let instr = bus.read16(pc);
            self.state.regs[15] = pc.wrapping_add(4);
            self.branched = false;
            let c = thumb::execute(self, bus, instr);
            if !self.branched {
                self.state.regs[15] = pc.wrapping_add(2);
            }
            c
        } else {
            let pc = self.state.reg(15) & !3;
            let instr = bus.read32(pc);
            self.state.regs[15] = pc.wrapping_add(8);
            self.branched = false;
            let c = arm::execute(self, bus, instr);
            if !self.branched {
                self.state.regs[15] = pc.wrapping_add(4);
            }
            c
        };

        self.cycles += consumed as u64;
        self.instructions += 1;
        consumed
    }

    // ---------------------------------------------------------------------
    // Control flow helpers used by the executors
    // ---------------------------------------------------------------------

    /// Branch within the current instruction set.
    pub(crate) fn jump(&mut self, addr: u32) {
        let mask = if self.state.thumb() { !1u32 } else { !3u32 };
        self.state.regs[15] = addr & mask;
        self.branched = true;
    }

    /// BX-style branch: bit 0 of the target selects Thumb state.
    pub(crate) fn jump_exchange(&mut self, addr: u32) {
        if addr & 1 != 0 {
            self.state.set_flag(FLAG_T, true);
            self.state.regs[15] = addr & !1;
        } else {
            self.state.set_flag(FLAG_T, false);
            self.state.regs[15] = addr & !3;
        }
        self.branched = true;
    }

    /// Register write that treats r15 as a branch target.
    pub(crate) fn write_rd(&mut self, rd: usize, value: u32) {
        if rd == 15 {
            self.jump(value);
        } else {
            self.state.set_reg(rd, value);
        }
    }

    /// Condition field evaluation (bits 31..28 of every ARM instruction,
    /// and Thumb conditional branches). Condition 0xF never executes on
    /// the ARM7TDMI.
    pub(crate) fn condition_passed(&self, cond: u32) -> bool {
        let c = self.state.cpsr;
        let n = c & state::FLAG_N != 0;
        let z = c & state::FLAG_Z != 0;
        let cf = c & state::FLAG_C != 0;
        let v = c & state::FLAG_V != 0;
        match cond & 0xF {
            0x0 => z,
            0x1 => !z,
            0x2 => cf,
            0x3 => !cf,
            0x4 => n,
            0x5 => !n,
            0x6 => v,
            0x7 => !v,
            0x8 => cf && !z,
            0x9 => !cf || z,
            0xA => n == v,
            0xB => n != v,
            0xC => !z && (n == v),
            0xD => z || (n != v),
            0xE => true,
            _ => false,
        }
    }

    // ---------------------------------------------------------------------
    // Exception entry
    // ---------------------------------------------------------------------

    /// Take an exception: SPSR_<mode> = CPSR, r14_<mode> = `return_addr`,
    /// CPSR mode/mask bits per the ARM table, PC = vector.
    pub fn enter_exception(&mut self, exc: Exception, return_addr: u32) {
        let old_cpsr = self.state.cpsr;
        self.state.switch_mode(exc.mode());
        self.state.set_spsr(old_cpsr);
        self.state.set_reg(14, return_addr);

        let mut cpsr = self.state.cpsr & !FLAG_T;
        cpsr |= FLAG_I;
        if matches!(exc, Exception::Fiq | Exception::Reset) {
            cpsr |= FLAG_F;
        }
        self.state.set_cpsr(cpsr);

        self.state.regs[15] = exc.vector();
        self.branched = true;
        log::trace!(
            "exception {:?} -> vector {:#04x}, lr={:#010x}",
            exc,
            exc.vector(),
            return_addr
        );
    }
}
