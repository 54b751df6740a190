/*!
Dual down-counting timers plus the free-running microsecond counter.

TIMER_CFG bits: 31 = enable, 30 = repeat, 19..0 = reload. Writing CFG
with the enable bit set loads TIMER_VAL from the reload field. `tick(n)`
subtracts n bus cycles from each enabled timer; every zero crossing
latches the elapsed flag and asserts the timer's interrupt source, and
the counter either reloads (repeat) or disables (one-shot). A tick can
cross zero several times, so for a repeating reload R and T total cycles
exactly floor(T/R) interrupts are raised.

Reading TIMER_VAL returns the current count and, as on the real part,
acknowledges the pending interrupt (the handler's read is the ack).

USEC_TIMER at +0x10 advances once per `cycles_per_usec` bus cycles;
Rockbox busy-waits on it, so it has to move even when both timers are
idle.

Register map (offsets from 0x60005000):
  0x00 TIMER1_CFG   0x04 TIMER1_VAL
  0x08 TIMER2_CFG   0x0C TIMER2_VAL
  0x10 USEC_TIMER (read-only)
*/

use crate::intc::{IntController, TIMER1_IRQ, TIMER2_IRQ};

const CFG_ENABLE: u32 = 1 << 31;
const CFG_REPEAT: u32 = 1 << 30;
const CFG_RELOAD_MASK: u32 = 0x000F_FFFF;

#[derive(Debug, Clone, Default)]
struct Timer {
    cfg: u32,
    value: u32,
    elapsed: bool,
}

impl Timer {
    fn enabled(&self) -> bool {
        self.cfg & CFG_ENABLE != 0
    }

    fn repeat(&self) -> bool {
        self.cfg & CFG_REPEAT != 0
    }

    /// Reload period; a zero field counts the full 20-bit range.
    fn period(&self) -> u32 {
        match self.cfg & CFG_RELOAD_MASK {
            0 => 1 << 20,
            r => r,
        }
    }

    fn write_cfg(&mut self, value: u32) {
        self.cfg = value;
        if self.enabled() {
            self.value = self.period();
        }
    }

    /// Advance by `cycles`, returning how many times the counter hit zero.
    fn tick(&mut self, cycles: u32) -> u32 {
        if !self.enabled() {
            return 0;
        }
        if self.value == 0 {
            // Firmware can write VAL=0 while enabled; treat as a reload.
            self.value = self.period();
        }
        let mut remaining = cycles;
        let mut fired = 0;
        while remaining >= self.value && self.value > 0 {
            remaining -= self.value;
            fired += 1;
            self.elapsed = true;
            if self.repeat() {
                self.value = self.period();
            } else {
                self.cfg &= !CFG_ENABLE;
                self.value = 0;
                return fired;
            }
        }
        self.value -= remaining;
        fired
    }
}

pub struct Timers {
    t1: Timer,
    t2: Timer,
    usec: u32,
    usec_frac: u32,
    cycles_per_usec: u32,
}

impl Timers {
    pub fn new(cycles_per_usec: u32) -> Self {
        Self {
            t1: Timer::default(),
            t2: Timer::default(),
            usec: 0,
            usec_frac: 0,
            cycles_per_usec: cycles_per_usec.max(1),
        }
    }

    pub fn reset(&mut self) {
        let cpu = self.cycles_per_usec;
        *self = Self::new(cpu);
    }

    /// Advance both timers and the microsecond counter by `cycles` bus
    /// cycles, raising interrupt sources on zero crossings.
    pub fn tick(&mut self, cycles: u32, intc: &mut IntController) {
        if self.t1.tick(cycles) > 0 {
            intc.assert_source(TIMER1_IRQ);
        }
        if self.t2.tick(cycles) > 0 {
            intc.assert_source(TIMER2_IRQ);
        }
        let total = self.usec_frac + cycles;
        self.usec = self.usec.wrapping_add(total / self.cycles_per_usec);
        self.usec_frac = total % self.cycles_per_usec;
    }

    /// Register read. Reading a VAL register acknowledges that timer's
    /// interrupt, which is why the interrupt controller is threaded in.
    pub fn read_reg(&mut self, offset: u32, intc: &mut IntController) -> u32 {
        match offset & 0x1F {
            0x00 => self.t1.cfg,
            0x04 => {
                self.t1.elapsed = false;
                intc.clear_source(TIMER1_IRQ);
                self.t1.value
            }
            0x08 => self.t2.cfg,
            0x0C => {
                self.t2.elapsed = false;
                intc.clear_source(TIMER2_IRQ);
                self.t2.value
            }
            0x10 => self.usec,
            _ => 0,
        }
    }

    pub fn write_reg(&mut self, offset: u32, value: u32) {
        match offset & 0x1F {
            0x00 => self.t1.write_cfg(value),
            0x04 => self.t1.value = value & CFG_RELOAD_MASK,
            0x08 => self.t2.write_cfg(value),
            0x0C => self.t2.value = value & CFG_RELOAD_MASK,
            _ => {}
        }
    }

    pub fn timer1_elapsed(&self) -> bool {
        self.t1.elapsed
    }

    pub fn timer2_elapsed(&self) -> bool {
        self.t2.elapsed
    }

    pub fn usec(&self) -> u32 {
        self.usec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intc::Core;

    fn setup() -> (Timers, IntController) {
        let mut ic = IntController::new();
        ic.write_reg(0x24, (1 << TIMER1_IRQ) | (1 << TIMER2_IRQ));
        (Timers::new(80), ic)
    }

    #[test]
    fn enable_loads_reload() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x00, CFG_ENABLE | 100);
        assert_eq!(t.read_reg(0x04, &mut ic), 100);
    }

    #[test]
    fn one_shot_fires_once_and_disables() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x00, CFG_ENABLE | 50);
        t.tick(49, &mut ic);
        assert!(!ic.has_pending_irq(Core::Cpu));
        t.tick(1, &mut ic);
        assert!(ic.has_pending_irq(Core::Cpu));
        assert!(t.timer1_elapsed());
        // Disabled now; further ticks change nothing.
        t.tick(500, &mut ic);
        assert_eq!(t.read_reg(0x00, &mut ic) & CFG_ENABLE, 0);
    }

    #[test]
    fn repeat_fires_floor_t_over_r() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x08, CFG_ENABLE | CFG_REPEAT | 100);
        let mut fired = 0;
        for _ in 0..10 {
            // 97-cycle ticks, 10 of them = 970 cycles -> 9 interrupts.
            t.tick(97, &mut ic);
            if ic.has_pending_irq(Core::Cpu) {
                fired += 1;
                // Acknowledge by reading TIMER2_VAL.
                t.read_reg(0x0C, &mut ic);
            }
        }
        assert_eq!(fired, 9);
    }

    #[test]
    fn big_tick_crosses_zero_multiple_times() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x00, CFG_ENABLE | CFG_REPEAT | 10);
        // A single 35-cycle tick crosses three times, value ends at 5.
        t.tick(35, &mut ic);
        assert!(ic.has_pending_irq(Core::Cpu));
        assert_eq!(t.read_reg(0x04, &mut ic), 5);
    }

    #[test]
    fn val_read_acks_interrupt() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x00, CFG_ENABLE | CFG_REPEAT | 10);
        t.tick(10, &mut ic);
        assert!(ic.has_pending_irq(Core::Cpu));
        t.read_reg(0x04, &mut ic);
        assert!(!ic.has_pending_irq(Core::Cpu));
        assert!(!t.timer1_elapsed());
    }

    #[test]
    fn usec_timer_free_runs() {
        let (mut t, mut ic) = setup();
        t.tick(79, &mut ic);
        assert_eq!(t.usec(), 0);
        t.tick(1, &mut ic);
        assert_eq!(t.usec(), 1);
        t.tick(800, &mut ic);
        assert_eq!(t.usec(), 11);
    }

    #[test]
    fn zero_reload_counts_full_range() {
        let (mut t, mut ic) = setup();
        t.write_reg(0x00, CFG_ENABLE | CFG_REPEAT);
        t.tick((1 << 20) - 1, &mut ic);
        assert!(!ic.has_pending_irq(Core::Cpu));
        t.tick(1, &mut ic);
        assert!(ic.has_pending_irq(Core::Cpu));
    }
}
