/*!
ATA/IDE peripheral: task-file registers, a 512-byte PIO sector buffer,
and command execution against a pluggable block device.

Address layout (PP502x primary IDE, offsets from 0xC3000000, registers
4-byte spaced):
  +0x1E0 DATA (16-bit FIFO)   +0x1E4 ERROR / FEATURES
  +0x1E8 SECTOR_COUNT         +0x1EC LBA0
  +0x1F0 LBA1                 +0x1F4 LBA2
  +0x1F8 DEVICE               +0x1FC STATUS / COMMAND
  +0x3F8 ALT_STATUS / DEVICE_CONTROL

Commands: IDENTIFY (0xEC), READ SECTORS (0x20) and READ SECTORS EXT
(0x24), WRITE SECTORS (0x30) and WRITE SECTORS EXT (0x34), SET FEATURES
(0xEF, ignored), and FLUSH/STANDBY/SLEEP accepted as immediate no-ops.
LBA48 commands take the high-order address bytes from the previous-value
latch each task register keeps (the "hob" convention).

Commands complete after a one-poll BSY pulse: the first STATUS read
after a data command reports BSY, the next reports DRQ, which is enough
for firmware poll loops to observe the documented BSY -> DRQ -> ready
progression. Data then flows 16 bits at a time through the DATA port,
which refills (reads) or flushes (writes) the sector buffer against the
block device every 256 halfwords.

Failures (LBA out of range, device I/O errors) set ERR in STATUS and an
ATA error code in the ERROR register; nothing panics.
*/

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

pub const SECTOR_SIZE: usize = 512;

// Status bits.
pub const ATA_BSY: u8 = 0x80;
pub const ATA_DRDY: u8 = 0x40;
pub const ATA_DRQ: u8 = 0x08;
pub const ATA_ERR: u8 = 0x01;

// Error register codes.
const ERR_ABRT: u8 = 0x04;
const ERR_IDNF: u8 = 0x10;

#[derive(Debug, Error)]
pub enum AtaError {
    #[error("sector {0} out of range")]
    OutOfRange(u64),
    #[error("disk i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-provided sector store.
pub trait BlockDevice {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), AtaError>;
    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), AtaError>;
    fn sector_count(&self) -> u64;
}

/// In-memory disk, mainly for tests and scratch machines.
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0; sectors as usize * SECTOR_SIZE],
        }
    }

    pub fn from_bytes(mut data: Vec<u8>) -> Self {
        let rem = data.len() % SECTOR_SIZE;
        if rem != 0 {
            data.resize(data.len() + SECTOR_SIZE - rem, 0);
        }
        Self { data }
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        let start = lba as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(AtaError::OutOfRange(lba));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        let start = lba as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(AtaError::OutOfRange(lba));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }
}

/// File-backed disk image; writes persist.
pub struct FileDisk {
    file: File,
    sectors: u64,
}

impl FileDisk {
    pub fn open(path: &Path) -> Result<Self, AtaError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sectors: len / SECTOR_SIZE as u64,
        })
    }
}

impl BlockDevice for FileDisk {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        if lba >= self.sectors {
            return Err(AtaError::OutOfRange(lba));
        }
        self.file.seek(SeekFrom::Start(lba * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        if lba >= self.sectors {
            return Err(AtaError::OutOfRange(lba));
        }
        self.file.seek(SeekFrom::Start(lba * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }
}

/// One task-file register with the previous-value latch LBA48 needs.
#[derive(Debug, Clone, Copy, Default)]
struct TaskReg {
    cur: u8,
    prev: u8,
}

impl TaskReg {
    fn write(&mut self, v: u8) {
        self.prev = self.cur;
        self.cur = v;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Transfer {
    None,
    Read,
    Write,
}

pub struct Ata {
    disk: Option<Box<dyn BlockDevice>>,

    error: u8,
    features: u8,
    sector_count: TaskReg,
    lba0: TaskReg,
    lba1: TaskReg,
    lba2: TaskReg,
    device: u8,
    status: u8,

    buffer: [u8; SECTOR_SIZE],
    buf_index: usize,
    transfer: Transfer,
    // Sectors still to move after the one in the buffer.
    sectors_left: u32,
    next_lba: u64,

    // Number of STATUS polls that still report BSY.
    busy_polls: u8,
}

impl Ata {
    pub fn new() -> Self {
        Self {
            disk: None,
            error: 0,
            features: 0,
            sector_count: TaskReg::default(),
            lba0: TaskReg::default(),
            lba1: TaskReg::default(),
            lba2: TaskReg::default(),
            device: 0,
            status: ATA_DRDY,
            buffer: [0; SECTOR_SIZE],
            buf_index: 0,
            transfer: Transfer::None,
            sectors_left: 0,
            next_lba: 0,
            busy_polls: 0,
        }
    }

    pub fn attach_disk(&mut self, disk: Box<dyn BlockDevice>) {
        self.disk = Some(disk);
    }

    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    // -----------------------------
    // Register interface
    // -----------------------------

    pub fn read_reg(&mut self, offset: u32) -> u32 {
        match offset {
            0x1E0 => self.read_data() as u32,
            0x1E4 => self.error as u32,
            0x1E8 => self.sector_count.cur as u32,
            0x1EC => self.lba0.cur as u32,
            0x1F0 => self.lba1.cur as u32,
            0x1F4 => self.lba2.cur as u32,
            0x1F8 => self.device as u32,
            0x1FC | 0x3F8 => self.read_status() as u32,
            _ => 0,
        }
    }

    pub fn write_reg(&mut self, offset: u32, value: u32, intc: &mut crate::intc::IntController) {
        let v = value as u8;
        match offset {
            0x1E0 => self.write_data(value as u16),
            0x1E4 => self.features = v,
            0x1E8 => self.sector_count.write(v),
            0x1EC => self.lba0.write(v),
            0x1F0 => self.lba1.write(v),
            0x1F4 => self.lba2.write(v),
            0x1F8 => self.device = v,
            0x1FC => self.command(v, intc),
            0x3F8 => {} // DEVICE_CONTROL: nIEN/SRST unmodeled
            _ => {}
        }
    }

    fn read_status(&mut self) -> u8 {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return ATA_BSY;
        }
        self.status
    }

    // -----------------------------
    // Commands
    // -----------------------------

    fn command(&mut self, cmd: u8, intc: &mut crate::intc::IntController) {
        self.error = 0;
        self.status = ATA_DRDY;
        match cmd {
            0xEC => self.identify(),
            0x20 => self.start_read(false),
            0x24 => self.start_read(true),
            0x30 => self.start_write(false),
            0x34 => self.start_write(true),
            0xEF | 0xE7 | 0xEA | 0xE0 | 0xE6 => {
                // SET FEATURES / FLUSH CACHE (+EXT) / STANDBY IMMEDIATE /
                // SLEEP: immediate success.
            }
            _ => {
                log::debug!("ata: unimplemented command {:#04x}", cmd);
                self.error = ERR_ABRT;
                self.status |= ATA_ERR;
            }
        }
        intc.assert_source(crate::intc::IDE_IRQ);
    }

    fn lba28(&self) -> u64 {
        ((self.device as u64 & 0x0F) << 24)
            | ((self.lba2.cur as u64) << 16)
            | ((self.lba1.cur as u64) << 8)
            | self.lba0.cur as u64
    }

    fn lba48(&self) -> u64 {
        ((self.lba2.prev as u64) << 40)
            | ((self.lba1.prev as u64) << 32)
            | ((self.lba0.prev as u64) << 24)
            | ((self.lba2.cur as u64) << 16)
            | ((self.lba1.cur as u64) << 8)
            | self.lba0.cur as u64
    }

    fn transfer_count(&self, ext: bool) -> u32 {
        if ext {
            let n = ((self.sector_count.prev as u32) << 8) | self.sector_count.cur as u32;
            if n == 0 { 65536 } else { n }
        } else {
            match self.sector_count.cur {
                0 => 256,
                n => n as u32,
            }
        }
    }

    fn fail(&mut self, code: u8) {
        self.error = code;
        self.status = ATA_DRDY | ATA_ERR;
        self.transfer = Transfer::None;
        self.sectors_left = 0;
    }

    fn start_read(&mut self, ext: bool) {
        let lba = if ext { self.lba48() } else { self.lba28() };
        let count = self.transfer_count(ext);
        let in_range = self
            .disk
            .as_ref()
            .map(|d| lba + count as u64 <= d.sector_count())
            .unwrap_or(false);
        if !in_range {
            self.fail(ERR_IDNF);
            return;
        }
        self.next_lba = lba;
        self.sectors_left = count;
        self.transfer = Transfer::Read;
        self.buf_index = 0;
        if self.fill_buffer() {
            self.status = ATA_DRDY | ATA_DRQ;
            self.busy_polls = 1;
        }
    }

    fn start_write(&mut self, ext: bool) {
        let lba = if ext { self.lba48() } else { self.lba28() };
        let count = self.transfer_count(ext);
        let in_range = self
            .disk
            .as_ref()
            .map(|d| lba + count as u64 <= d.sector_count())
            .unwrap_or(false);
        if !in_range {
            self.fail(ERR_IDNF);
            return;
        }
        self.next_lba = lba;
        self.sectors_left = count;
        self.transfer = Transfer::Write;
        self.buf_index = 0;
        self.status = ATA_DRDY | ATA_DRQ;
        self.busy_polls = 1;
    }

    /// Pull the next pending sector into the buffer. Clears DRQ state on
    /// failure. Returns success.
    fn fill_buffer(&mut self) -> bool {
        let Some(disk) = self.disk.as_mut() else {
            self.fail(ERR_ABRT);
            return false;
        };
        match disk.read_sector(self.next_lba, &mut self.buffer) {
            Ok(()) => {
                self.next_lba += 1;
                self.sectors_left -= 1;
                self.buf_index = 0;
                true
            }
            Err(e) => {
                log::warn!("ata: read lba {} failed: {}", self.next_lba, e);
                self.fail(ERR_IDNF);
                false
            }
        }
    }

    fn read_data(&mut self) -> u16 {
        if self.transfer != Transfer::Read || self.status & ATA_DRQ == 0 {
            return 0;
        }
        let v = u16::from_le_bytes([self.buffer[self.buf_index], self.buffer[self.buf_index + 1]]);
        self.buf_index += 2;
        if self.buf_index >= SECTOR_SIZE {
            if self.sectors_left > 0 {
                self.fill_buffer();
            } else {
                self.transfer = Transfer::None;
                self.status = ATA_DRDY;
            }
        }
        v
    }

    fn write_data(&mut self, value: u16) {
        if self.transfer != Transfer::Write || self.status & ATA_DRQ == 0 {
            return;
        }
        self.buffer[self.buf_index..self.buf_index + 2].copy_from_slice(&value.to_le_bytes());
        self.buf_index += 2;
        if self.buf_index >= SECTOR_SIZE {
            let lba = self.next_lba;
            let Some(disk) = self.disk.as_mut() else {
                self.fail(ERR_ABRT);
                return;
            };
            match disk.write_sector(lba, &self.buffer) {
                Ok(()) => {
                    self.next_lba += 1;
                    self.sectors_left -= 1;
                    self.buf_index = 0;
                    if self.sectors_left == 0 {
                        self.transfer = Transfer::None;
                        self.status = ATA_DRDY;
                    }
                }
                Err(e) => {
                    log::warn!("ata: write lba {} failed: {}", lba, e);
                    self.fail(ERR_IDNF);
                }
            }
        }
    }

    // -----------------------------
    // IDENTIFY
    // -----------------------------

    fn identify(&mut self) {
        let sectors = self.disk.as_ref().map(|d| d.sector_count()).unwrap_or(0);
        if sectors == 0 {
            self.fail(ERR_ABRT);
            return;
        }
        let words = identify_words(sectors);
        for (i, w) in words.iter().enumerate() {
            self.buffer[i * 2..i * 2 + 2].copy_from_slice(&w.to_le_bytes());
        }
        self.buf_index = 0;
        self.sectors_left = 0;
        self.transfer = Transfer::Read;
        self.status = ATA_DRDY | ATA_DRQ;
        self.busy_polls = 1;
    }
}

impl Default for Ata {
    fn default() -> Self {
        Self::new()
    }
}

/// ATA strings are space-padded and byte-swapped within each word.
fn put_ata_string(words: &mut [u16], text: &str) {
    let bytes: Vec<u8> = text
        .bytes()
        .chain(std::iter::repeat(b' '))
        .take(words.len() * 2)
        .collect();
    for (i, w) in words.iter_mut().enumerate() {
        *w = ((bytes[i * 2] as u16) << 8) | bytes[i * 2 + 1] as u16;
    }
}

fn identify_words(sectors: u64) -> [u16; 256] {
    let mut w = [0u16; 256];
    w[0] = 0x0040; // fixed device
    w[1] = 16383; // legacy cylinders
    w[3] = 16; // legacy heads
    w[6] = 63; // legacy sectors/track
    put_ata_string(&mut w[10..20], "RP0001");
    put_ata_string(&mut w[23..27], "1.0");
    put_ata_string(&mut w[27..47], "rockpod emulated disk");
    w[47] = 0x8010; // multiple: 16
    w[49] = 0x0200; // LBA supported
    w[53] = 0x0006; // words 64-70 + 88 valid
    let lba28 = sectors.min(0x0FFF_FFFF) as u32;
    w[60] = lba28 as u16;
    w[61] = (lba28 >> 16) as u16;
    w[64] = 0x0003; // PIO3/4
    w[75] = 0x001F; // queue depth 32
    w[80] = 0x0078; // ATA-3..6
    w[83] = 0x4400; // LBA48 supported
    w[86] = 0x0400; // LBA48 enabled
    w[100] = sectors as u16;
    w[101] = (sectors >> 16) as u16;
    w[102] = (sectors >> 32) as u16;
    w[103] = (sectors >> 48) as u16;
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intc::IntController;

    fn setup(sectors: u64) -> (Ata, IntController) {
        let mut ata = Ata::new();
        ata.attach_disk(Box::new(MemDisk::new(sectors)));
        (ata, IntController::new())
    }

    fn drain_status(ata: &mut Ata) -> u8 {
        // Skip the modeled BSY pulse.
        let mut s = ata.read_reg(0x1FC) as u8;
        while s & ATA_BSY != 0 {
            s = ata.read_reg(0x1FC) as u8;
        }
        s
    }

    #[test]
    fn identify_reports_capacity() {
        // 64 MiB disk = 131072 sectors.
        let (mut ata, mut ic) = setup(131072);
        ata.write_reg(0x1FC, 0xEC, &mut ic);
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, ATA_DRQ);

        let mut words = [0u16; 256];
        for w in words.iter_mut() {
            *w = ata.read_reg(0x1E0) as u16;
        }
        let lba28 = words[60] as u32 | ((words[61] as u32) << 16);
        assert_eq!(lba28, 131072);
        let lba48 = words[100] as u64 | ((words[101] as u64) << 16);
        assert_eq!(lba48, 131072);
        assert_ne!(words[49] & 0x0200, 0);
        // Transfer finished: DRQ dropped.
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, 0);
    }

    #[test]
    fn read_sector_via_pio() {
        let (mut ata, mut ic) = setup(64);
        // Pre-seed sector 3 through the block device.
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xAB;
        sector[1] = 0xCD;
        sector[510] = 0x55;
        sector[511] = 0xAA;
        ata.disk.as_mut().unwrap().write_sector(3, &sector).unwrap();

        ata.write_reg(0x1E8, 1, &mut ic); // one sector
        ata.write_reg(0x1EC, 3, &mut ic);
        ata.write_reg(0x1F0, 0, &mut ic);
        ata.write_reg(0x1F4, 0, &mut ic);
        ata.write_reg(0x1F8, 0xE0, &mut ic); // LBA mode
        ata.write_reg(0x1FC, 0x20, &mut ic);
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, ATA_DRQ);

        assert_eq!(ata.read_reg(0x1E0), 0xCDAB);
        for _ in 0..254 {
            ata.read_reg(0x1E0);
        }
        assert_eq!(ata.read_reg(0x1E0), 0xAA55);
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, 0);
    }

    #[test]
    fn write_then_read_back() {
        let (mut ata, mut ic) = setup(64);
        ata.write_reg(0x1E8, 1, &mut ic);
        ata.write_reg(0x1EC, 5, &mut ic);
        ata.write_reg(0x1F0, 0, &mut ic);
        ata.write_reg(0x1F4, 0, &mut ic);
        ata.write_reg(0x1F8, 0xE0, &mut ic);
        ata.write_reg(0x1FC, 0x30, &mut ic);
        drain_status(&mut ata);
        for i in 0..256u32 {
            ata.write_reg(0x1E0, i & 0xFFFF, &mut ic);
        }
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, 0);

        ata.write_reg(0x1E8, 1, &mut ic);
        ata.write_reg(0x1EC, 5, &mut ic);
        ata.write_reg(0x1FC, 0x20, &mut ic);
        drain_status(&mut ata);
        assert_eq!(ata.read_reg(0x1E0), 0);
        assert_eq!(ata.read_reg(0x1E0), 1);
    }

    #[test]
    fn multi_sector_read_refills() {
        let (mut ata, mut ic) = setup(64);
        let mut s0 = [0u8; SECTOR_SIZE];
        let mut s1 = [0u8; SECTOR_SIZE];
        s0[0] = 1;
        s1[0] = 2;
        ata.disk.as_mut().unwrap().write_sector(0, &s0).unwrap();
        ata.disk.as_mut().unwrap().write_sector(1, &s1).unwrap();

        ata.write_reg(0x1E8, 2, &mut ic);
        ata.write_reg(0x1EC, 0, &mut ic);
        ata.write_reg(0x1F8, 0xE0, &mut ic);
        ata.write_reg(0x1FC, 0x20, &mut ic);
        drain_status(&mut ata);
        assert_eq!(ata.read_reg(0x1E0), 1);
        for _ in 0..255 {
            ata.read_reg(0x1E0);
        }
        // Second sector streamed in transparently.
        assert_eq!(ata.read_reg(0x1E0), 2);
    }

    #[test]
    fn lba48_uses_latched_high_bytes() {
        let (mut ata, mut ic) = setup(0x30000);
        // LBA 0x012345: write high bytes first, then low.
        ata.write_reg(0x1E8, 0, &mut ic); // count high
        ata.write_reg(0x1E8, 1, &mut ic); // count low
        ata.write_reg(0x1EC, 0x45, &mut ic);
        ata.write_reg(0x1F0, 0x23, &mut ic);
        ata.write_reg(0x1F4, 0x01, &mut ic);
        // prev bytes are zero -> LBA = 0x012345
        ata.write_reg(0x1FC, 0x24, &mut ic);
        assert_eq!(drain_status(&mut ata) & ATA_DRQ, ATA_DRQ);
        assert_eq!(ata.error as u32, 0);
    }

    #[test]
    fn out_of_range_sets_idnf() {
        let (mut ata, mut ic) = setup(16);
        ata.write_reg(0x1E8, 1, &mut ic);
        ata.write_reg(0x1EC, 0xFF, &mut ic); // lba 255 > 15
        ata.write_reg(0x1F8, 0xE0, &mut ic);
        ata.write_reg(0x1FC, 0x20, &mut ic);
        let s = drain_status(&mut ata);
        assert_ne!(s & ATA_ERR, 0);
        assert_eq!(ata.read_reg(0x1E4) as u8, ERR_IDNF);
    }

    #[test]
    fn unknown_command_aborts() {
        let (mut ata, mut ic) = setup(16);
        ata.write_reg(0x1FC, 0x99, &mut ic);
        assert_ne!(drain_status(&mut ata) & ATA_ERR, 0);
        assert_eq!(ata.read_reg(0x1E4) as u8, ERR_ABRT);
    }

    #[test]
    fn command_raises_ide_source() {
        let (mut ata, mut ic) = setup(16);
        ic.write_reg(0x24, 1 << crate::intc::IDE_IRQ);
        ata.write_reg(0x1FC, 0xEC, &mut ic);
        assert!(ic.has_pending_irq(crate::intc::Core::Cpu));
    }
}
