#![doc = r#"
Rockpod library crate.

A cycle-oriented emulator core for the PortalPlayer PP5021C as used in
the iPod 5G ("Video"). It executes unmodified ARM firmware (stock Apple
or Rockbox) by modeling the primary ARM7TDMI, the memory bus, and the
peripherals firmware polls, programs, or services during boot and
steady-state execution.

Modules:
- cpu: ARM7TDMI interpreter (ARM + Thumb), banked registers, exception
  modes, CP15 shim
- bus: memory routing (SDRAM/IRAM/MMIO) with the MMAP remap stage
- intc: 64-source interrupt controller with per-core masks
- timers: dual down-counters plus the free-running microsecond counter
- sysctl: PROC control, cache-control stub, device-init/version block
- gpio: twelve ports with host input injection
- i2c: transaction engine with modeled PMU/codec slaves
- ata: task-file IDE with a pluggable block device
- lcd: command/data bridge into a 320x240 RGB565 framebuffer
- wheel: click-wheel opto keypad packet source
- mailbox: PROC_ID discriminator and inter-core message bits
- firmware: `.ipod` container recognition and stripping
- machine: the owning aggregate and the core step loop

The second on-chip core (COP) is never executed; its observables
(PROC_ID, COP_CTL, mailbox bits) are deliberate behavioral stubs that
let firmware pass its synchronization points.

In tests, shared instruction-word builders are available under
`crate::test_utils`.
"#]

// Core emulator modules
pub mod ata;
pub mod bus;
pub mod cpu;
pub mod firmware;
pub mod gpio;
pub mod i2c;
pub mod intc;
pub mod lcd;
pub mod machine;
pub mod mailbox;
pub mod sysctl;
pub mod timers;
pub mod wheel;

// Re-export commonly used types at the crate root for convenience.
pub use bus::Bus;
pub use cpu::Cpu;
pub use machine::{Machine, MachineConfig, MemPatch};

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
