/*!
Machine: the owning aggregate (CPU + bus + peripherals) and the core
step loop.

One step, in order:
  1. Refresh level interrupt lines (GPIO banks) and the CPU's IRQ/FIQ
     inputs from the interrupt controller's aggregated status.
  2. Run one CPU instruction (which may instead vector into a pending
     exception); collect its bus-cycle cost.
  3. Tick the timer subsystem with that cost; timers may raise their
     interrupt sources, observable by the next step's instruction.
  4. Apply any memory patches whose cycle threshold has passed.
  5. Accumulate totals and the stuck-PC diagnostic.

The loop is single-threaded and cooperative; `run` drives `step` until a
cycle budget is exhausted or the host requests a stop. Nothing in here
panics on guest behavior.
*/

use std::path::Path;

use crate::ata::BlockDevice;
use crate::bus::ram::SdramSize;
use crate::bus::{Bus, SDRAM_BASE};
use crate::cpu::Cpu;
use crate::firmware::{FirmwareError, FirmwareImage, Model};
use crate::intc::{Core, GPIO0_IRQ};

/// Emulator-only patch: `word` is written to `addr` once the cycle
/// counter passes `apply_after_cycle`. Used for firmware that depends on
/// values in subsystems not modeled here; never baked into defaults.
#[derive(Debug, Clone, Copy)]
pub struct MemPatch {
    pub addr: u32,
    pub word: u32,
    pub apply_after_cycle: u64,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub sdram_size: SdramSize,
    pub initial_pc: u32,
    /// Pre-enable the MMAP low alias so address 0 reads SDRAM out of
    /// reset (Boot-ROM-alias stand-in).
    pub mmap_low_alias: bool,
    /// Enable the COP observability shims (COP_CTL phases, mailbox
    /// auto-ack).
    pub cop_shim: bool,
    /// Value of the 0x70000030 boot status word.
    pub dev_status: u32,
    /// Seed for the hw-accel task-state RAM (Apple firmware path).
    pub hw_accel_kickstart: Option<[u8; 64]>,
    /// USEC_TIMER divisor.
    pub cycles_per_usec: u32,
    pub patches: Vec<MemPatch>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            sdram_size: SdramSize::Mb32,
            initial_pc: SDRAM_BASE,
            mmap_low_alias: true,
            cop_shim: true,
            dev_status: 0x8000_0000,
            hw_accel_kickstart: None,
            cycles_per_usec: 80,
            patches: Vec::new(),
        }
    }
}

/// Steps with an unchanged PC before the stuck diagnostic trips.
const STUCK_PC_THRESHOLD: u32 = 64;

pub struct Machine {
    pub cpu: Cpu,
    pub bus: Bus,

    total_cycles: u64,
    patches: Vec<(MemPatch, bool)>,
    stop: bool,

    last_pc: u32,
    stuck_steps: u32,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let mut cpu = Cpu::new();
        cpu.reset();
        cpu.state.regs[15] = config.initial_pc;
        let patches = config.patches.iter().map(|&p| (p, false)).collect();
        let bus = Bus::new(&config);
        Self {
            cpu,
            bus,
            total_cycles: 0,
            patches,
            stop: false,
            last_pc: config.initial_pc,
            stuck_steps: 0,
        }
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Host-injected stop condition for `run`.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    /// Stuck-PC diagnostic: number of consecutive steps the PC has not
    /// moved, saturating at the reporting threshold. Purely observational.
    pub fn stuck_pc(&self) -> bool {
        self.stuck_steps >= STUCK_PC_THRESHOLD
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Place firmware bytes at `addr`, stripping an `.ipod` container
    /// header if one is present. Returns the detected model, if any.
    pub fn load_firmware(&mut self, bytes: &[u8], addr: u32) -> Result<Option<Model>, FirmwareError> {
        let image = FirmwareImage::parse(bytes)?;
        if !self.bus.load_image(addr, &image.payload) {
            return Err(FirmwareError::DoesNotFit {
                addr,
                payload: image.payload.len(),
            });
        }
        Ok(image.model)
    }

    pub fn load_firmware_file(&mut self, path: &Path, addr: u32) -> Result<Option<Model>, FirmwareError> {
        let image = FirmwareImage::from_file(path)?;
        if !self.bus.load_image(addr, &image.payload) {
            return Err(FirmwareError::DoesNotFit {
                addr,
                payload: image.payload.len(),
            });
        }
        Ok(image.model)
    }

    pub fn attach_disk(&mut self, disk: Box<dyn BlockDevice>) {
        self.bus.ata.attach_disk(disk);
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// One emulator step; returns the bus cycles consumed.
    pub fn step(&mut self) -> u32 {
        // (1) Level sources and CPU interrupt inputs.
        for bank in 0..3 {
            self.bus
                .intc
                .set_level(GPIO0_IRQ + bank as u32, self.bus.gpio.bank_pending(bank));
        }
        self.cpu
            .set_irq_line(self.bus.intc.has_pending_irq(Core::Cpu));
        self.cpu
            .set_fiq_line(self.bus.intc.has_pending_fiq(Core::Cpu));

        // (2) One instruction (or exception entry).
        let cycles = self.cpu.step(&mut self.bus);

        // (3) Timers observe the elapsed cycles.
        self.bus.timers.tick(cycles, &mut self.bus.intc);

        // (4) Deferred memory patches.
        let now = self.total_cycles + cycles as u64;
        for (patch, applied) in self.patches.iter_mut() {
            if !*applied && now >= patch.apply_after_cycle {
                *applied = true;
                log::debug!("applying patch {:#010x} = {:#010x}", patch.addr, patch.word);
                self.bus.write32(patch.addr, patch.word);
            }
        }

        // (5) Accounting and diagnostics.
        self.total_cycles = now;
        let pc = self.cpu.state.reg(15);
        if pc == self.last_pc {
            self.stuck_steps = (self.stuck_steps + 1).min(STUCK_PC_THRESHOLD);
        } else {
            self.stuck_steps = 0;
            self.last_pc = pc;
        }
        cycles
    }

    /// Drive the step loop until `cycle_budget` cycles have elapsed or a
    /// stop was requested. Returns the cycles actually spent.
    pub fn run(&mut self, cycle_budget: u64) -> u64 {
        let mut spent = 0u64;
        while spent < cycle_budget && !self.stop {
            spent += self.step() as u64;
        }
        self.stop = false;
        spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_honors_cycle_budget() {
        let mut m = Machine::new(MachineConfig::default());
        // B . at the initial PC.
        m.bus.write32(SDRAM_BASE, 0xEAFF_FFFE);
        let spent = m.run(1000);
        assert!(spent >= 1000);
        assert_eq!(m.total_cycles(), spent);
    }

    #[test]
    fn stop_request_breaks_run() {
        let mut m = Machine::new(MachineConfig::default());
        m.bus.write32(SDRAM_BASE, 0xEAFF_FFFE);
        m.request_stop();
        assert_eq!(m.run(100), 0);
        // The latch clears once honored; the next run proceeds.
        assert!(m.run(100) >= 100);
    }

    #[test]
    fn stuck_pc_heuristic_trips_on_spin() {
        let mut m = Machine::new(MachineConfig::default());
        m.bus.write32(SDRAM_BASE, 0xEAFF_FFFE); // B .
        m.run(1000);
        assert!(m.stuck_pc());
    }

    #[test]
    fn straight_line_code_is_not_stuck() {
        let mut m = Machine::new(MachineConfig::default());
        for i in 0..256 {
            m.bus.write32(SDRAM_BASE + i * 4, 0xE1A0_0000); // MOV r0, r0
        }
        for _ in 0..200 {
            m.step();
        }
        assert!(!m.stuck_pc());
    }

    #[test]
    fn patch_applies_after_threshold() {
        let mut config = MachineConfig::default();
        config.patches.push(MemPatch {
            addr: SDRAM_BASE + 0x100,
            word: 0x600D_F00D,
            apply_after_cycle: 50,
        });
        let mut m = Machine::new(config);
        m.bus.write32(SDRAM_BASE, 0xEAFF_FFFE);
        assert_eq!(m.bus.read32(SDRAM_BASE + 0x100), 0);
        m.run(10);
        assert_eq!(m.bus.read32(SDRAM_BASE + 0x100), 0);
        m.run(100);
        assert_eq!(m.bus.read32(SDRAM_BASE + 0x100), 0x600D_F00D);
    }

    #[test]
    fn firmware_container_loads_stripped() {
        let mut m = Machine::new(MachineConfig::default());
        let payload = [0xFEu8, 0xFF, 0xFF, 0xEA];
        let header = crate::firmware::make_header(&payload, b"ipvd").unwrap();
        let mut image = header.to_vec();
        image.extend_from_slice(&payload);
        let model = m.load_firmware(&image, SDRAM_BASE).unwrap();
        assert_eq!(model.unwrap().tag, *b"ipvd");
        assert_eq!(m.bus.read32(SDRAM_BASE), 0xEAFF_FFFE);
    }

    #[test]
    fn oversized_firmware_is_rejected() {
        let mut m = Machine::new(MachineConfig::default());
        let err = m
            .load_firmware(&[0u8; 128], 0x4001_7FC0)
            .unwrap_err();
        assert!(matches!(err, FirmwareError::DoesNotFit { .. }));
    }
}
