use std::env;
use std::path::PathBuf;

use anyhow::Context;
use rockpod::ata::FileDisk;
use rockpod::bus::SDRAM_BASE;
use rockpod::machine::{Machine, MachineConfig};

fn usage() -> ! {
    eprintln!("usage: rockpod <firmware[.ipod|.bin]> [--disk IMAGE] [--load-addr HEX] [--cycles N]");
    std::process::exit(2);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut firmware: Option<PathBuf> = None;
    let mut disk: Option<PathBuf> = None;
    let mut load_addr = SDRAM_BASE;
    let mut cycles: u64 = 200_000_000;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--disk" => disk = Some(PathBuf::from(args.next().unwrap_or_else(|| usage()))),
            "--load-addr" => {
                let v = args.next().unwrap_or_else(|| usage());
                load_addr = u32::from_str_radix(v.trim_start_matches("0x"), 16)
                    .context("bad --load-addr")?;
            }
            "--cycles" => {
                cycles = args
                    .next()
                    .unwrap_or_else(|| usage())
                    .parse()
                    .context("bad --cycles")?;
            }
            "--help" | "-h" => usage(),
            _ if firmware.is_none() => firmware = Some(PathBuf::from(arg)),
            _ => usage(),
        }
    }
    let Some(firmware) = firmware else { usage() };

    let mut machine = Machine::new(MachineConfig {
        initial_pc: load_addr,
        ..MachineConfig::default()
    });

    let model = machine
        .load_firmware_file(&firmware, load_addr)
        .with_context(|| format!("loading {}", firmware.display()))?;
    match model {
        Some(m) => log::info!("loaded ipod image for model {}", m),
        None => log::info!("loaded raw image at {:#010x}", load_addr),
    }

    if let Some(disk) = disk {
        let disk = FileDisk::open(&disk).context("opening disk image")?;
        machine.attach_disk(Box::new(disk));
    } else {
        log::warn!("no disk image attached; ATA commands will error");
    }

    // Run in slices so progress is visible under RUST_LOG=info.
    const SLICE: u64 = 10_000_000;
    let mut spent = 0u64;
    while spent < cycles {
        spent += machine.run(SLICE.min(cycles - spent));
        log::info!(
            "{} cycles, pc={:#010x}, {} LCD pixels",
            spent,
            machine.cpu.state.reg(15),
            machine.bus.lcd.pixels_written()
        );
    }

    println!(
        "ran {} cycles ({} instructions), pc={:#010x}, {} LCD pixels written, {} unmapped reads",
        spent,
        machine.cpu.instructions,
        machine.cpu.state.reg(15),
        machine.bus.lcd.pixels_written(),
        machine.bus.unmapped_reads(),
    );
    if machine.stuck_pc() {
        println!("note: PC has stopped advancing (firmware idle loop or wedge)");
    }

    #[cfg(feature = "screenshot")]
    {
        let shot = PathBuf::from("rockpod-frame.png");
        machine
            .bus
            .lcd
            .write_png(&shot)
            .context("writing screenshot")?;
        println!("framebuffer written to {}", shot.display());
    }

    Ok(())
}
