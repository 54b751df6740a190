/*!
state.rs - Canonical ARM7TDMI architectural state (register file + CPSR/SPSR
banking) and inline-friendly helpers.

Overview
========
`CpuState` is the single authoritative owner for all architecturally visible
registers. It intentionally excludes:
  - Bus / memory logic
  - Instruction decode / dispatch logic
  - Timing / cycle accounting
Those live in higher layers (the ARM/Thumb executors and the Cpu façade).

Register banking
================
The ARM7TDMI keeps one live set of r0-r15 plus CPSR. Five exception modes
(FIQ, IRQ, Supervisor, Abort, Undefined) bank r13/r14 and carry their own
SPSR; FIQ additionally banks r8-r12. Only the active mode's banks are live
in `regs`; `switch_mode` saves and restores the shadowed copies atomically,
so the inactive banks are preserved exactly across any number of mode
round-trips.

CPSR bit layout (for reference)
===============================
Bit: 31 30 29 28 27 ... 7 6 5 4..0
      N  Z  C  V  Q      I F T mode
Where:
  N/Z/C/V = condition flags
  Q       = sticky saturation flag (unused by ARMv4 code, kept for MSR)
  I       = IRQ disable
  F       = FIQ disable
  T       = Thumb state
  mode    = 0x10 user, 0x11 FIQ, 0x12 IRQ, 0x13 supervisor,
            0x17 abort, 0x1B undefined, 0x1F system
*/

/// Condition/status flag bit masks (canonical definitions).
pub const FLAG_N: u32 = 1 << 31;
pub const FLAG_Z: u32 = 1 << 30;
pub const FLAG_C: u32 = 1 << 29;
pub const FLAG_V: u32 = 1 << 28;
pub const FLAG_Q: u32 = 1 << 27;
pub const FLAG_I: u32 = 1 << 7;
pub const FLAG_F: u32 = 1 << 6;
pub const FLAG_T: u32 = 1 << 5;

/// Mode field values (CPSR bits 4..0).
pub const MODE_USER: u32 = 0x10;
pub const MODE_FIQ: u32 = 0x11;
pub const MODE_IRQ: u32 = 0x12;
pub const MODE_SVC: u32 = 0x13;
pub const MODE_ABT: u32 = 0x17;
pub const MODE_UND: u32 = 0x1B;
pub const MODE_SYS: u32 = 0x1F;
pub const MODE_MASK: u32 = 0x1F;

/// Register bank index for a CPSR mode. User and System share bank 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bank {
    User = 0,
    Fiq = 1,
    Irq = 2,
    Svc = 3,
    Abt = 4,
    Und = 5,
}

impl Bank {
    pub fn from_mode(mode: u32) -> Bank {
        match mode & MODE_MASK {
            MODE_FIQ => Bank::Fiq,
            MODE_IRQ => Bank::Irq,
            MODE_SVC => Bank::Svc,
            MODE_ABT => Bank::Abt,
            MODE_UND => Bank::Und,
            _ => Bank::User,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Architectural register/flag container for the ARM7TDMI.
///
/// `regs` always holds the active mode's view of r0-r15; the shadow arrays
/// hold whatever the inactive modes last saw.
#[derive(Debug, Clone)]
pub struct CpuState {
    pub regs: [u32; 16],
    pub cpsr: u32,

    // Shadow storage, indexed by Bank. Slot 0 (User) of `spsr` is never
    // architecturally visible; it exists so indexing stays uniform.
    banked_r13: [u32; 6],
    banked_r14: [u32; 6],
    spsr: [u32; 6],

    // FIQ banks r8-r12 as well; the user-bank copies live here while FIQ
    // is the active mode and vice versa.
    usr_r8_r12: [u32; 5],
    fiq_r8_r12: [u32; 5],
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    /// Power-up state: supervisor mode, IRQ and FIQ masked, ARM state, PC=0.
    pub fn new() -> Self {
        Self {
            regs: [0; 16],
            cpsr: MODE_SVC | FLAG_I | FLAG_F,
            banked_r13: [0; 6],
            banked_r14: [0; 6],
            spsr: [0; 6],
            usr_r8_r12: [0; 5],
            fiq_r8_r12: [0; 5],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // ---------------------------------------------------------------------
    // Mode / flag queries
    // ---------------------------------------------------------------------

    #[inline]
    pub fn mode(&self) -> u32 {
        self.cpsr & MODE_MASK
    }

    #[inline]
    pub fn bank(&self) -> Bank {
        Bank::from_mode(self.cpsr)
    }

    #[inline]
    pub fn is_flag_set(&self, mask: u32) -> bool {
        (self.cpsr & mask) != 0
    }

    #[inline]
    pub fn thumb(&self) -> bool {
        self.is_flag_set(FLAG_T)
    }

    #[inline]
    pub fn set_flag(&mut self, mask: u32, value: bool) {
        if value {
            self.cpsr |= mask;
        } else {
            self.cpsr &= !mask;
        }
    }

    /// Composite helper to update N+Z from a 32-bit result.
    #[inline]
    pub fn update_nz(&mut self, result: u32) {
        self.set_flag(FLAG_N, (result & 0x8000_0000) != 0);
        self.set_flag(FLAG_Z, result == 0);
    }

    // ---------------------------------------------------------------------
    // Register access (active bank)
    // ---------------------------------------------------------------------

    #[inline]
    pub fn reg(&self, n: usize) -> u32 {
        self.regs[n]
    }

    #[inline]
    pub fn set_reg(&mut self, n: usize, v: u32) {
        self.regs[n] = v;
    }

    /// User-bank register read regardless of the active mode. Used by the
    /// `^` forms of LDM/STM.
    pub fn reg_user(&self, n: usize) -> u32 {
        match (self.bank(), n) {
            (Bank::User, _) => self.regs[n],
            (Bank::Fiq, 8..=12) => self.usr_r8_r12[n - 8],
            (_, 13) => self.banked_r13[Bank::User.index()],
            (_, 14) => self.banked_r14[Bank::User.index()],
            _ => self.regs[n],
        }
    }

    /// User-bank register write regardless of the active mode.
    pub fn set_reg_user(&mut self, n: usize, v: u32) {
        match (self.bank(), n) {
            (Bank::User, _) => self.regs[n] = v,
            (Bank::Fiq, 8..=12) => self.usr_r8_r12[n - 8] = v,
            (_, 13) => self.banked_r13[Bank::User.index()] = v,
            (_, 14) => self.banked_r14[Bank::User.index()] = v,
            _ => self.regs[n] = v,
        }
    }

    // ---------------------------------------------------------------------
    // SPSR access (active mode)
    // ---------------------------------------------------------------------

    /// SPSR of the current mode. User/System have none; reading yields the
    /// CPSR, which is what firmware observes on real silicon for the
    /// unpredictable case.
    pub fn spsr(&self) -> u32 {
        match self.bank() {
            Bank::User => self.cpsr,
            b => self.spsr[b.index()],
        }
    }

    pub fn set_spsr(&mut self, v: u32) {
        let b = self.bank();
        if b != Bank::User {
            self.spsr[b.index()] = v;
        }
    }

    /// SPSR of an arbitrary bank; exception entry writes SPSR_<new mode>
    /// after the bank swap.
    pub fn set_spsr_bank(&mut self, bank: Bank, v: u32) {
        if bank != Bank::User {
            self.spsr[bank.index()] = v;
        }
    }

    pub fn spsr_bank(&self, bank: Bank) -> u32 {
        self.spsr[bank.index()]
    }

    // ---------------------------------------------------------------------
    // CPSR writes and mode switching
    // ---------------------------------------------------------------------

    /// Full CPSR write. Performs the register-bank swap if the mode field
    /// changes; flag-only updates are cheap.
    pub fn set_cpsr(&mut self, v: u32) {
        let old_bank = self.bank();
        let new_bank = Bank::from_mode(v);
        if old_bank != new_bank {
            self.swap_banks(old_bank, new_bank);
        }
        self.cpsr = v;
    }

    /// Switch the mode field only, keeping the remaining CPSR bits.
    pub fn switch_mode(&mut self, mode: u32) {
        self.set_cpsr((self.cpsr & !MODE_MASK) | (mode & MODE_MASK));
    }

    /// Save the active r13/r14 (and r8-r12 around FIQ) into the outgoing
    /// bank and load the incoming bank's copies.
    fn swap_banks(&mut self, from: Bank, to: Bank) {
        self.banked_r13[from.index()] = self.regs[13];
        self.banked_r14[from.index()] = self.regs[14];

        if from == Bank::Fiq {
            for i in 0..5 {
                self.fiq_r8_r12[i] = self.regs[8 + i];
                self.regs[8 + i] = self.usr_r8_r12[i];
            }
        }
        if to == Bank::Fiq {
            for i in 0..5 {
                self.usr_r8_r12[i] = self.regs[8 + i];
                self.regs[8 + i] = self.fiq_r8_r12[i];
            }
        }

        self.regs[13] = self.banked_r13[to.index()];
        self.regs[14] = self.banked_r14[to.index()];
    }

    /// Privileged modes may rewrite CPSR control bits; user mode may not.
    #[inline]
    pub fn privileged(&self) -> bool {
        self.mode() != MODE_USER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_up_defaults() {
        let s = CpuState::new();
        assert_eq!(s.mode(), MODE_SVC);
        assert!(s.is_flag_set(FLAG_I));
        assert!(s.is_flag_set(FLAG_F));
        assert!(!s.thumb());
        assert_eq!(s.reg(15), 0);
    }

    #[test]
    fn mode_switch_banks_r13_r14() {
        let mut s = CpuState::new();
        s.set_reg(13, 0x1000);
        s.set_reg(14, 0x2000);

        s.switch_mode(MODE_IRQ);
        s.set_reg(13, 0x3000);
        s.set_reg(14, 0x4000);

        s.switch_mode(MODE_SVC);
        assert_eq!(s.reg(13), 0x1000);
        assert_eq!(s.reg(14), 0x2000);

        s.switch_mode(MODE_IRQ);
        assert_eq!(s.reg(13), 0x3000);
        assert_eq!(s.reg(14), 0x4000);
    }

    #[test]
    fn fiq_banks_r8_r12() {
        let mut s = CpuState::new();
        for n in 8..=12 {
            s.set_reg(n, n as u32);
        }
        s.switch_mode(MODE_FIQ);
        for n in 8..=12 {
            s.set_reg(n, 0xF00 + n as u32);
        }
        // r0-r7 are shared; r8-r12 are not.
        s.switch_mode(MODE_SVC);
        for n in 8..=12 {
            assert_eq!(s.reg(n), n as u32);
        }
        s.switch_mode(MODE_FIQ);
        for n in 8..=12 {
            assert_eq!(s.reg(n), 0xF00 + n as u32);
        }
    }

    #[test]
    fn user_bank_access_from_fiq() {
        let mut s = CpuState::new();
        s.switch_mode(MODE_SYS);
        s.set_reg(8, 0x88);
        s.set_reg(13, 0xDD);
        s.switch_mode(MODE_FIQ);
        assert_eq!(s.reg_user(8), 0x88);
        assert_eq!(s.reg_user(13), 0xDD);
        s.set_reg_user(8, 0x99);
        s.switch_mode(MODE_SYS);
        assert_eq!(s.reg(8), 0x99);
    }

    #[test]
    fn spsr_is_per_mode() {
        let mut s = CpuState::new();
        s.switch_mode(MODE_IRQ);
        s.set_spsr(0x1234_0010);
        s.switch_mode(MODE_UND);
        s.set_spsr(0x5678_0010);
        s.switch_mode(MODE_IRQ);
        assert_eq!(s.spsr(), 0x1234_0010);
        s.switch_mode(MODE_UND);
        assert_eq!(s.spsr(), 0x5678_0010);
    }

    #[test]
    fn nz_update() {
        let mut s = CpuState::new();
        s.update_nz(0);
        assert!(s.is_flag_set(FLAG_Z));
        assert!(!s.is_flag_set(FLAG_N));
        s.update_nz(0x8000_0000);
        assert!(!s.is_flag_set(FLAG_Z));
        assert!(s.is_flag_set(FLAG_N));
    }
}
