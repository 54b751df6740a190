/*!
Mailbox and processor-ID discriminator.

PROC_ID (0x60000000) returns the per-core identifier shared boot code
branches on. Only the CPU executes here, so reads always see 0x55.

The mailbox status word (0x60001000) carries inter-core message bits
with set (+4) / clear (+8) register semantics. Bits 0x4 and 0x8 are the
CPU-wake and COP-wake signals. With the COP shim enabled, the COP-wake
bit auto-clears after a fixed number of status reads, standing in for
the coprocessor acknowledging the message; firmware spinning on the bit
observes the handshake it expects.
*/

pub const PROC_ID_CPU: u32 = 0x55;
pub const PROC_ID_COP: u32 = 0xAA;

pub const MBX_CPU_WAKE: u32 = 0x4;
pub const MBX_COP_WAKE: u32 = 0x8;

// Status reads before the shim pretends the COP acknowledged.
const COP_ACK_READS: u32 = 4;

pub struct Mailbox {
    status: u32,
    cop_shim: bool,
    ack_countdown: u32,
}

impl Mailbox {
    pub fn new(cop_shim: bool) -> Self {
        Self {
            status: 0,
            cop_shim,
            ack_countdown: 0,
        }
    }

    pub fn proc_id(&self) -> u32 {
        PROC_ID_CPU
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn read_reg(&mut self, offset: u32) -> u32 {
        match offset & 0x3F {
            0x00 => {
                let value = self.status;
                if self.cop_shim && value & MBX_COP_WAKE != 0 {
                    if self.ack_countdown == 0 {
                        self.ack_countdown = COP_ACK_READS;
                    } else {
                        self.ack_countdown -= 1;
                        if self.ack_countdown == 0 {
                            self.status &= !MBX_COP_WAKE;
                        }
                    }
                }
                value
            }
            _ => 0,
        }
    }

    pub fn write_reg(&mut self, offset: u32, value: u32) {
        match offset & 0x3F {
            0x04 => {
                self.status |= value;
                if value & MBX_COP_WAKE != 0 {
                    self.ack_countdown = 0;
                }
            }
            0x08 => self.status &= !value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_id_is_cpu() {
        let mb = Mailbox::new(true);
        assert_eq!(mb.proc_id(), PROC_ID_CPU);
    }

    #[test]
    fn set_and_clear_bits() {
        let mut mb = Mailbox::new(false);
        mb.write_reg(0x04, 0x5);
        assert_eq!(mb.read_reg(0x00), 0x5);
        mb.write_reg(0x08, 0x1);
        assert_eq!(mb.read_reg(0x00), 0x4);
    }

    #[test]
    fn cop_wake_auto_acks_under_shim() {
        let mut mb = Mailbox::new(true);
        mb.write_reg(0x04, MBX_COP_WAKE);
        // The bit reads set for a few polls, then the shim clears it.
        let mut reads = 0;
        while mb.read_reg(0x00) & MBX_COP_WAKE != 0 {
            reads += 1;
            assert!(reads < 32, "COP wake never acknowledged");
        }
        assert_eq!(mb.status() & MBX_COP_WAKE, 0);
    }

    #[test]
    fn cop_wake_persists_without_shim() {
        let mut mb = Mailbox::new(false);
        mb.write_reg(0x04, MBX_COP_WAKE);
        for _ in 0..100 {
            assert_ne!(mb.read_reg(0x00) & MBX_COP_WAKE, 0);
        }
    }
}
