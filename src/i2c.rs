/*!
I²C master with modeled slave devices.

The PP502x I²C engine is a small command-driven master: firmware writes
the target address, stages up to four data bytes, then kicks a transfer
from the control register and polls the status register until the busy
bit clears. Transactions here complete synchronously, so busy never
reads set; the state field still walks Idle -> Addr -> DataTx/DataRx ->
Stop -> Idle per transaction for observability.

Register map (offsets from 0x7000C000):
  0x00 CTRL    write: bit 7 = send, bits 2..1 = byte count - 1,
               bit 0 = include register/sub-address byte
  0x04 ADDR    bits 7..1 = 7-bit slave address, bit 0 = read
  0x0C..0x18 DATA0..DATA3
  0x1C STATUS  bit 6 = busy (always reads clear)

Write transactions send DATA0 as the slave register index and the
remaining bytes as payload. Read transactions use DATA0 as the register
index and deposit the slave's bytes back into DATA0..n.

Slaves register by 7-bit address. The PMU (PCF50605 at 0x08) and the
audio codec (WM8758 at 0x1A) answer with constant defaults sufficient
for firmware init; codec register writes are accepted and mirrored.
*/

use crate::intc::{I2C_IRQ, IntController};

const STATUS_BUSY: u32 = 1 << 6;

/// A modeled bus slave. `reg` is the device sub-address (first written
/// byte of a transaction).
pub trait I2cSlave {
    fn write(&mut self, reg: u8, data: &[u8]);
    fn read(&mut self, reg: u8, out: &mut [u8]);
}

/// Transaction phases, in bus order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cState {
    Idle,
    Addr,
    DataTx,
    DataRx,
    Stop,
}

pub struct I2c {
    ctrl: u32,
    addr: u32,
    data: [u8; 4],
    state: I2cState,
    slaves: Vec<(u8, Box<dyn I2cSlave>)>,
}

impl I2c {
    pub fn new() -> Self {
        let mut i2c = Self {
            ctrl: 0,
            addr: 0,
            data: [0; 4],
            state: I2cState::Idle,
            slaves: Vec::new(),
        };
        i2c.register_slave(Pcf50605::ADDR, Box::new(Pcf50605::default()));
        i2c.register_slave(Wm8758::ADDR, Box::new(Wm8758::default()));
        i2c
    }

    pub fn register_slave(&mut self, addr: u8, slave: Box<dyn I2cSlave>) {
        self.slaves.retain(|(a, _)| *a != addr);
        self.slaves.push((addr, slave));
    }

    pub fn state(&self) -> I2cState {
        self.state
    }

    pub fn read_reg(&self, offset: u32) -> u32 {
        match offset & 0x1F {
            0x00 => self.ctrl,
            0x04 => self.addr,
            0x0C => self.data[0] as u32,
            0x10 => self.data[1] as u32,
            0x14 => self.data[2] as u32,
            0x18 => self.data[3] as u32,
            0x1C => 0, // never busy: transactions are synchronous
            _ => 0,
        }
    }

    pub fn write_reg(&mut self, offset: u32, value: u32, intc: &mut IntController) {
        match offset & 0x1F {
            0x00 => {
                self.ctrl = value & !STATUS_BUSY;
                if value & 0x80 != 0 {
                    self.run_transaction(value, intc);
                }
            }
            0x04 => self.addr = value & 0xFF,
            0x0C => self.data[0] = value as u8,
            0x10 => self.data[1] = value as u8,
            0x14 => self.data[2] = value as u8,
            0x18 => self.data[3] = value as u8,
            _ => {}
        }
    }

    fn run_transaction(&mut self, ctrl: u32, intc: &mut IntController) {
        let count = (((ctrl >> 1) & 3) + 1) as usize;
        let addr7 = ((self.addr >> 1) & 0x7F) as u8;
        let read = self.addr & 1 != 0;

        self.state = I2cState::Addr;
        let slave = self.slaves.iter_mut().find(|(a, _)| *a == addr7);

        match slave {
            Some((_, slave)) => {
                let reg = self.data[0];
                if read {
                    self.state = I2cState::DataRx;
                    let mut buf = [0u8; 4];
                    slave.read(reg, &mut buf[..count]);
                    self.data[..count].copy_from_slice(&buf[..count]);
                } else {
                    self.state = I2cState::DataTx;
                    slave.write(reg, &self.data[1..count.max(1)]);
                }
            }
            None => {
                log::debug!("i2c: no slave at address {:#04x}", addr7);
            }
        }

        self.state = I2cState::Stop;
        intc.assert_source(I2C_IRQ);
        self.state = I2cState::Idle;
    }
}

impl Default for I2c {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------
// Slave models
// -------------------------------------------------------------------------

/// PCF50605 power-management unit. Answers register reads with fixed
/// defaults that look like a healthy battery on charger; writes are
/// stored so read-modify-write sequences behave.
pub struct Pcf50605 {
    regs: [u8; 0x40],
}

impl Pcf50605 {
    pub const ADDR: u8 = 0x08;
}

impl Default for Pcf50605 {
    fn default() -> Self {
        let mut regs = [0u8; 0x40];
        regs[0x00] = 0x00; // ID
        regs[0x01] = 0x40; // OOCS: main battery OK
        regs[0x33] = 0x71; // MBCS1: charger present
        Self { regs }
    }
}

impl I2cSlave for Pcf50605 {
    fn write(&mut self, reg: u8, data: &[u8]) {
        let mut r = reg as usize;
        for &b in data {
            if r < self.regs.len() {
                self.regs[r] = b;
            }
            r += 1;
        }
    }

    fn read(&mut self, reg: u8, out: &mut [u8]) {
        let mut r = reg as usize;
        for b in out.iter_mut() {
            *b = if r < self.regs.len() { self.regs[r] } else { 0 };
            r += 1;
        }
    }
}

/// WM8758 audio codec. Registers are 9-bit write-only on real hardware;
/// the model stores them for inspection and reads back zero, which is
/// also what the real part does.
pub struct Wm8758 {
    regs: [u16; 0x40],
}

impl Wm8758 {
    pub const ADDR: u8 = 0x1A;

    pub fn reg(&self, index: usize) -> u16 {
        self.regs[index]
    }
}

impl Default for Wm8758 {
    fn default() -> Self {
        Self { regs: [0; 0x40] }
    }
}

impl I2cSlave for Wm8758 {
    fn write(&mut self, reg: u8, data: &[u8]) {
        // Wire format: register index in the top 7 bits of the first
        // byte, data bit 8 in its LSB, low 8 data bits in the second.
        let index = (reg >> 1) as usize;
        if index < self.regs.len() {
            let hi = (reg as u16 & 1) << 8;
            let lo = data.first().copied().unwrap_or(0) as u16;
            self.regs[index] = hi | lo;
        }
    }

    fn read(&mut self, _reg: u8, out: &mut [u8]) {
        out.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(i2c: &mut I2c, ic: &mut IntController, addr7: u8, read: bool, count: u8) {
        i2c.write_reg(0x04, ((addr7 as u32) << 1) | read as u32, ic);
        i2c.write_reg(0x00, 0x80 | (((count as u32) - 1) << 1), ic);
    }

    #[test]
    fn pmu_read_returns_defaults() {
        let mut i2c = I2c::new();
        let mut ic = IntController::new();
        i2c.write_reg(0x0C, 0x01, &mut ic); // OOCS index
        start(&mut i2c, &mut ic, Pcf50605::ADDR, true, 1);
        assert_eq!(i2c.read_reg(0x0C), 0x40);
        assert_eq!(i2c.state(), I2cState::Idle);
    }

    #[test]
    fn pmu_write_then_read_back() {
        let mut i2c = I2c::new();
        let mut ic = IntController::new();
        // Write 0x2A to PMU register 0x10.
        i2c.write_reg(0x0C, 0x10, &mut ic);
        i2c.write_reg(0x10, 0x2A, &mut ic);
        start(&mut i2c, &mut ic, Pcf50605::ADDR, false, 2);
        // Read it back.
        i2c.write_reg(0x0C, 0x10, &mut ic);
        start(&mut i2c, &mut ic, Pcf50605::ADDR, true, 1);
        assert_eq!(i2c.read_reg(0x0C), 0x2A);
    }

    #[test]
    fn codec_reads_zero() {
        let mut i2c = I2c::new();
        let mut ic = IntController::new();
        i2c.write_reg(0x0C, 0x02, &mut ic);
        start(&mut i2c, &mut ic, Wm8758::ADDR, true, 2);
        assert_eq!(i2c.read_reg(0x0C), 0);
        assert_eq!(i2c.read_reg(0x10), 0);
    }

    #[test]
    fn missing_slave_is_harmless() {
        let mut i2c = I2c::new();
        let mut ic = IntController::new();
        start(&mut i2c, &mut ic, 0x55, true, 1);
        assert_eq!(i2c.state(), I2cState::Idle);
    }

    #[test]
    fn transaction_raises_interrupt_source() {
        let mut i2c = I2c::new();
        let mut ic = IntController::new();
        ic.write_reg(0x24, 1 << crate::intc::I2C_IRQ);
        start(&mut i2c, &mut ic, Pcf50605::ADDR, true, 1);
        assert!(ic.has_pending_irq(crate::intc::Core::Cpu));
    }

    #[test]
    fn status_never_busy() {
        let i2c = I2c::new();
        assert_eq!(i2c.read_reg(0x1C) & STATUS_BUSY, 0);
    }
}
