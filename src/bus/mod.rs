/*!
Bus: single entry point for all CPU memory traffic.

Address map (after MMAP translation):
- 0x10000000-0x1FFFFFFF: SDRAM (wraps at configured size)
- 0x40000000-0x40017FFF: IRAM (96 KiB)
- 0x60000000: PROC_ID            0x60001000: mailbox
- 0x60003000: hw-accel task RAM  0x60004000: interrupt controller
- 0x60005000: timers             0x60006100: MMAP (secondary window)
- 0x60007000: CPU_CTL/COP_CTL    0x6000C000: cache controller
- 0x6000D000: GPIO               0x70000000: device-init/version
- 0x70008000: LCD bridge         0x7000C000: I2C
- 0x7000C100: opto keypad        0xC3000000: ATA/IDE
- 0xF000F000: MMAP register file

Anything else is an unmapped sink: reads return 0, writes are dropped,
both are counted and trace-logged so a wandering guest is observable
without halting it.

Width handling: RAM is byte-addressed; MMIO registers are 32-bit latches
and sub-word accesses carry the value in the low bits. The two true
16-bit FIFO ports (ATA data, LCD data) are special-cased so a word
access moves two halfwords and a halfword access exactly one.

The hw-accel region is 64 bytes of plain RAM; some firmware uses it as
scratch, the Apple RTOS as task state. A configuration override can
pre-seed it for the latter.
*/

pub mod mmap;
pub mod ram;


use crate::ata::Ata;
use crate::gpio::Gpio;
use crate::i2c::I2c;
use crate::intc::IntController;
use crate::lcd::Lcd;
use crate::machine::MachineConfig;
use crate::mailbox::Mailbox;
use crate::sysctl::SysCtl;
use crate::timers::Timers;
use crate::wheel::Wheel;
use mmap::Mmap;
use ram::{Iram, Sdram};

pub const SDRAM_BASE: u32 = 0x1000_0000;
pub const IRAM_BASE: u32 = 0x4000_0000;

const ATA_DATA_PORT: u32 = 0xC300_01E0;
const LCD_DATA_PORT: u32 = 0x7000_8010;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Width {
    Byte,
    Half,
    Word,
}

pub struct Bus {
    pub sdram: Sdram,
    pub iram: Iram,
    pub mmap: Mmap,

    pub intc: IntController,
    pub timers: Timers,
    pub sysctl: SysCtl,
    pub gpio: Gpio,
    pub i2c: I2c,
    pub ata: Ata,
    pub lcd: Lcd,
    pub wheel: Wheel,
    pub mailbox: Mailbox,

    hw_accel: [u8; 64],

    unmapped_reads: u64,
    unmapped_writes: u64,
}

impl Bus {
    pub fn new(config: &MachineConfig) -> Self {
        let mut hw_accel = [0u8; 64];
        if let Some(seed) = config.hw_accel_kickstart {
            hw_accel = seed;
        }
        Self {
            sdram: Sdram::new(config.sdram_size),
            iram: Iram::new(),
            mmap: Mmap::new(config.mmap_low_alias),
            intc: IntController::new(),
            timers: Timers::new(config.cycles_per_usec),
            sysctl: SysCtl::new(config.cop_shim, config.dev_status),
            gpio: Gpio::new(),
            i2c: I2c::new(),
            ata: Ata::new(),
            lcd: Lcd::new(),
            wheel: Wheel::new(),
            mailbox: Mailbox::new(config.cop_shim),
            hw_accel,
            unmapped_reads: 0,
            unmapped_writes: 0,
        }
    }

    pub fn unmapped_reads(&self) -> u64 {
        self.unmapped_reads
    }

    pub fn unmapped_writes(&self) -> u64 {
        self.unmapped_writes
    }

    // ---------------------------------------------------------------------
    // CPU-visible interface
    // ---------------------------------------------------------------------

    pub fn read8(&mut self, addr: u32) -> u8 {
        let a = self.mmap.translate(addr);
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.read8(a - SDRAM_BASE),
            0x4000_0000..=0x4001_7FFF => self.iram.read8(a - IRAM_BASE),
            _ => {
                let word = self.mmio_read(a & !3, Width::Byte);
                (word >> ((a & 3) * 8)) as u8
            }
        }
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        let a = self.mmap.translate(addr) & !1;
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.read16(a - SDRAM_BASE),
            0x4000_0000..=0x4001_7FFF => self.iram.read16(a - IRAM_BASE),
            _ => {
                let word = self.mmio_read(a & !3, Width::Half);
                (word >> ((a & 2) * 8)) as u16
            }
        }
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        let a = self.mmap.translate(addr) & !3;
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.read32(a - SDRAM_BASE),
            0x4000_0000..=0x4001_7FFF => self.iram.read32(a - IRAM_BASE),
            _ => self.mmio_read(a, Width::Word),
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        let a = self.mmap.translate(addr);
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.write8(a - SDRAM_BASE, value),
            0x4000_0000..=0x4001_7FFF => self.iram.write8(a - IRAM_BASE, value),
            _ => self.mmio_write(a & !3, value as u32, Width::Byte),
        }
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        let a = self.mmap.translate(addr) & !1;
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.write16(a - SDRAM_BASE, value),
            0x4000_0000..=0x4001_7FFF => self.iram.write16(a - IRAM_BASE, value),
            _ => self.mmio_write(a & !3, value as u32, Width::Half),
        }
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        let a = self.mmap.translate(addr) & !3;
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.write32(a - SDRAM_BASE, value),
            0x4000_0000..=0x4001_7FFF => self.iram.write32(a - IRAM_BASE, value),
            _ => self.mmio_write(a, value, Width::Word),
        }
    }

    /// Bulk image placement for the firmware loader; returns false if the
    /// target region cannot hold the image.
    pub fn load_image(&mut self, addr: u32, bytes: &[u8]) -> bool {
        let a = self.mmap.translate(addr);
        match a {
            0x1000_0000..=0x1FFF_FFFF => self.sdram.load(a - SDRAM_BASE, bytes),
            0x4000_0000..=0x4001_7FFF => self.iram.load(a - IRAM_BASE, bytes),
            _ => false,
        }
    }

    // ---------------------------------------------------------------------
    // MMIO dispatch
    // ---------------------------------------------------------------------

    fn mmio_read(&mut self, a: u32, width: Width) -> u32 {
        match a {
            0x6000_0000..=0x6000_0FFF => self.mailbox.proc_id(),
            0x6000_1000..=0x6000_103F => self.mailbox.read_reg(a - 0x6000_1000),
            0x6000_3000..=0x6000_303F => {
                let o = (a - 0x6000_3000) as usize;
                u32::from_le_bytes([
                    self.hw_accel[o],
                    self.hw_accel[o + 1],
                    self.hw_accel[o + 2],
                    self.hw_accel[o + 3],
                ])
            }
            0x6000_4000..=0x6000_41FF => self.intc.read_reg(a - 0x6000_4000),
            0x6000_5000..=0x6000_50FF => self.timers.read_reg(a - 0x6000_5000, &mut self.intc),
            0x6000_6100..=0x6000_613F => self.mmap.read_reg(a - mmap::MMAP_ALT_BASE),
            0x6000_7000..=0x6000_7007 => self.sysctl.read_proc(a - 0x6000_7000),
            0x6000_C000..=0x6000_C0FF => self.sysctl.read_cache(a - 0x6000_C000),
            0x6000_D000..=0x6000_D1FF => self.gpio.read_reg(a - 0x6000_D000),
            0x7000_0000..=0x7000_00FF => self.sysctl.read_dev(a - 0x7000_0000),
            0x7000_8000..=0x7000_80FF => self.lcd.read_reg(a - 0x7000_8000),
            0x7000_C000..=0x7000_C0FF => self.i2c.read_reg(a - 0x7000_C000),
            0x7000_C100..=0x7000_C1FF => self.wheel.read_reg(a - 0x7000_C100),
            0xC300_0000..=0xC3FF_FFFF => {
                if a == ATA_DATA_PORT && width == Width::Word {
                    // A word read moves two halfwords through the FIFO.
                    let lo = self.ata.read_reg(a - 0xC300_0000);
                    let hi = self.ata.read_reg(a - 0xC300_0000);
                    lo | (hi << 16)
                } else {
                    self.ata.read_reg(a - 0xC300_0000)
                }
            }
            0xF000_F000..=0xF000_F03F => self.mmap.read_reg(a - mmap::MMAP_BASE),
            _ => {
                self.unmapped_reads += 1;
                log::trace!("unmapped read at {:#010x}", a);
                0
            }
        }
    }

    fn mmio_write(&mut self, a: u32, value: u32, width: Width) {
        match a {
            0x6000_1000..=0x6000_103F => self.mailbox.write_reg(a - 0x6000_1000, value),
            0x6000_3000..=0x6000_303F => {
                let o = (a - 0x6000_3000) as usize;
                self.hw_accel[o..o + 4].copy_from_slice(&value.to_le_bytes());
            }
            0x6000_4000..=0x6000_41FF => self.intc.write_reg(a - 0x6000_4000, value),
            0x6000_5000..=0x6000_50FF => self.timers.write_reg(a - 0x6000_5000, value),
            0x6000_6100..=0x6000_613F => self.mmap.write_reg(a - mmap::MMAP_ALT_BASE, value),
            0x6000_7000..=0x6000_7007 => self.sysctl.write_proc(a - 0x6000_7000, value),
            0x6000_C000..=0x6000_C0FF => self.sysctl.write_cache(a - 0x6000_C000, value),
            0x6000_D000..=0x6000_D1FF => self.gpio.write_reg(a - 0x6000_D000, value),
            0x7000_0000..=0x7000_00FF => self.sysctl.write_dev(a - 0x7000_0000, value),
            0x7000_8000..=0x7000_80FF => {
                if a == LCD_DATA_PORT {
                    match width {
                        Width::Word => self.lcd.write_data32(value),
                        _ => self.lcd.write_data16(value as u16),
                    }
                } else {
                    self.lcd.write_reg(a - 0x7000_8000, value);
                }
            }
            0x7000_C000..=0x7000_C0FF => {
                self.i2c.write_reg(a - 0x7000_C000, value, &mut self.intc)
            }
            0x7000_C100..=0x7000_C1FF => self.wheel.write_reg(a - 0x7000_C100, value),
            0xC300_0000..=0xC3FF_FFFF => {
                if a == ATA_DATA_PORT && width == Width::Word {
                    self.ata.write_reg(a - 0xC300_0000, value & 0xFFFF, &mut self.intc);
                    self.ata.write_reg(a - 0xC300_0000, value >> 16, &mut self.intc);
                } else {
                    self.ata.write_reg(a - 0xC300_0000, value, &mut self.intc);
                }
            }
            0xF000_F000..=0xF000_F03F => self.mmap.write_reg(a - mmap::MMAP_BASE, value),
            _ => {
                self.unmapped_writes += 1;
                log::trace!("unmapped write at {:#010x} = {:#010x}", a, value);
            }
        }
    }
}
