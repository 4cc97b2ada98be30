use std::path::Path;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use common::cli::GlobalOpts;
use common::{Instance, Status};
use psx::r3000a::debugger::Debugger;
use psx::r3000a::{asm, coprocessor0::BOOT_VECTOR};
use psx::Psx;

#[derive(Debug, Parser)]
#[command(name = "psx-rec", version, about = "PlayStation R3000A dynamic recompiler")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Boot the BIOS and run it for a number of frames
    Run {
        #[arg(long, default_value_t = 60)]
        frames: u64,

        /// Stop when execution reaches this address (hex)
        #[arg(long = "break", value_parser = parse_hex)]
        breakpoints: Vec<u32>,
    },
    /// Disassemble guest memory
    Disasm {
        #[arg(long, value_parser = parse_hex, default_value = "bfc00000")]
        address: u32,

        #[arg(long, default_value_t = 32)]
        count: usize,
    },
    /// Assemble one instruction and print its encoding
    Asm {
        text: String,
    },
}

fn parse_hex(text: &str) -> Result<u32, String> {
    let digits = text.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|e| format!("{}: {}", text, e))
}

fn init_logging(opts: &GlobalOpts) -> anyhow::Result<()> {
    let mut filter = opts.log.clone();
    if opts.trace {
        filter.push_str(",r3000a=trace");
    }
    let filter = EnvFilter::try_new(&filter)
        .with_context(|| format!("bad log filter {:?}", filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn boot(bios: Option<&Path>) -> anyhow::Result<Psx> {
    let mut psx = Psx::default();
    if let Some(path) = bios {
        psx.load_bios(path)?;
    }
    Ok(psx)
}

fn run(opts: &GlobalOpts, frames: u64, breakpoints: &[u32]) -> anyhow::Result<()> {
    let Some(bios) = opts.bios.as_deref() else {
        bail!("run needs a BIOS image (--bios)");
    };
    let mut psx = boot(Some(bios))?;
    for &address in breakpoints {
        psx.core_mut().set_breakpoint(address);
    }
    tracing::info!("{} booting {}", psx.name(), bios.display());

    while psx.frames() < frames {
        match psx.run()? {
            Status::Vsync => tracing::debug!("frame {} ended at {:08x}", psx.frames(), psx.pc()),
            Status::Breakpoint(pc) => {
                println!("breakpoint at {:08x} after {} frames", pc, psx.frames());
                return Ok(());
            }
        }
    }

    let stats = psx.core().cache().stats();
    println!("ran {} frames, pc {:08x}, {} compilations, {} evictions",
        psx.frames(), psx.pc(), stats.compilations, stats.evictions);
    Ok(())
}

fn disasm(opts: &GlobalOpts, address: u32, count: usize) -> anyhow::Result<()> {
    if opts.bios.is_none() && address == BOOT_VECTOR {
        tracing::warn!("no BIOS loaded, the boot vector is empty");
    }
    let psx = boot(opts.bios.as_deref())?;
    let debugger = Debugger::new(address);
    for line in debugger.disassemble(psx.core(), address, count) {
        println!("{}", line);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global)?;

    match cli.command {
        Command::Run { frames, breakpoints } => run(&cli.global, frames, &breakpoints),
        Command::Disasm { address, count } => disasm(&cli.global, address, count),
        Command::Asm { text } => {
            let word = asm::assemble(&text).with_context(|| format!("assembling {:?}", text))?;
            println!("{:08x}", word);
            Ok(())
        }
    }
}
