/*!
CP15 system-control coprocessor shim.

Scope:
- Satisfies the MRC/MCR traffic that PP502x boot firmware issues without
  modeling a cache or MMU.
- CRn 0 reads the ID register (an ARM720T-style constant).
- CRn 1 (control), CRn 2 (translation table base) and CRn 3 (domain access)
  are plain mirrors: writes stored, reads returned, otherwise inert.
- CRn 7/8 cache and TLB maintenance ops are accepted and discarded, except
  the "test and clean" reads (c7,c10,3 and c7,c14,3) which report a clean
  cache by returning a value with bit 30 set. Firmware issues these as
  `MRC p15, 0, pc, c7, c10, 3` so the Z flag terminates its clean loop.

Everything else reads as zero and ignores writes.
*/

/// ARM720T-style main ID register value.
pub const CP15_ID: u32 = 0x4100_7000;

#[derive(Debug, Clone, Default)]
pub struct Cp15 {
    control: u32,
    ttb: u32,
    domain: u32,
}

impl Cp15 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// MRC: read a coprocessor register. `crn`/`crm` are the primary and
    /// secondary register numbers, `op2` the opcode-2 field.
    pub fn read(&self, crn: u32, crm: u32, op2: u32) -> u32 {
        match crn {
            0 => CP15_ID,
            1 => self.control,
            2 => self.ttb,
            3 => self.domain,
            7 => {
                // Test-and-clean variants report "cache clean" via bit 30,
                // which lands in Z when the destination is the PC.
                if (crm == 10 || crm == 14) && op2 == 3 {
                    0x4000_0000
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// MCR: write a coprocessor register. Unmodeled targets are dropped.
    pub fn write(&mut self, crn: u32, _crm: u32, _op2: u32, value: u32) {
        match crn {
            1 => self.control = value,
            2 => self.ttb = value,
            3 => self.domain = value,
            _ => {
                // Cache/TLB maintenance (CRn 7/8) and the rest: no cache is
                // modeled, nothing to do.
            }
        }
    }

    pub fn control(&self) -> u32 {
        self.control
    }
}
