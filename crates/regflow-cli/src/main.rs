// SPDX-License-Identifier: AGPL-3.0-only

//! `regflow`: register access and stream file tools.
//!
//! ```text
//! USAGE:
//!   regflow peek <device> <offset>            Read registers through an mmap window
//!   regflow poke <device> <offset> <value>    Write (and optionally verify) one register
//!   regflow selftest                          Block and stream round trip on the emulator
//!   regflow dump <file>                       List records of a stream data file
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use regflow::{
    connect, Block, Frame, FramePtr, Master, MemEmulator, MmapResponder, StreamReader, StreamSink,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regflow", about = "Register block and stream file tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read registers from a memory-mapped device window.
    Peek {
        /// Device file (e.g. /dev/uio0 or /sys/bus/pci/devices/.../resource0).
        device: PathBuf,
        /// Byte offset into the window (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u64)]
        offset: u64,
        /// Bytes to read.
        #[arg(long, default_value_t = 4)]
        size: usize,
        /// Window size to map; defaults to the file size.
        #[arg(long, value_parser = parse_usize)]
        window: Option<usize>,
    },
    /// Write one 32-bit register in a memory-mapped device window.
    Poke {
        /// Device file.
        device: PathBuf,
        /// Byte offset into the window.
        #[arg(value_parser = parse_u64)]
        offset: u64,
        /// Value to write.
        #[arg(value_parser = parse_u64)]
        value: u64,
        /// Read back and compare after writing.
        #[arg(long)]
        verify: bool,
        /// Window size to map; defaults to the file size.
        #[arg(long, value_parser = parse_usize)]
        window: Option<usize>,
    },
    /// Exercise a block and a stream fan-out against the in-process emulator.
    Selftest,
    /// Print the records of a stream data file (follows roll-over files).
    Dump {
        /// Data file.
        file: PathBuf,
        /// Stop printing after this many records.
        #[arg(long)]
        limit: Option<u64>,
    },
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_usize(s: &str) -> Result<usize, String> {
    let value = parse_u64(s)?;
    usize::try_from(value).map_err(|_| format!("{s} does not fit the address space"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Peek {
            device,
            offset,
            size,
            window,
        } => cmd_peek(&device, offset, size, window)?,
        Cmd::Poke {
            device,
            offset,
            value,
            verify,
            window,
        } => cmd_poke(&device, offset, value, verify, window)?,
        Cmd::Selftest => cmd_selftest()?,
        Cmd::Dump { file, limit } => cmd_dump(file, limit)?,
    }

    Ok(())
}

fn cmd_peek(device: &Path, offset: u64, size: usize, window: Option<usize>) -> Result<()> {
    let responder = Arc::new(
        MmapResponder::open(device, window, 0)
            .with_context(|| format!("cannot map {}", device.display()))?,
    );
    let block = Block::new(offset, size)?;
    block.set_slave(responder);
    block.blocking_read()?;

    let bytes = block.snapshot()?;
    for (i, word) in bytes.chunks(4).enumerate() {
        let mut raw = [0u8; 4];
        raw[..word.len()].copy_from_slice(word);
        println!("{:#010x}: {:#010x}", offset + (i * 4) as u64, u32::from_le_bytes(raw));
    }
    Ok(())
}

fn cmd_poke(
    device: &Path,
    offset: u64,
    value: u64,
    verify: bool,
    window: Option<usize>,
) -> Result<()> {
    if value > u64::from(u32::MAX) {
        bail!("value {value:#x} does not fit a 32-bit register");
    }
    let responder = Arc::new(
        MmapResponder::open(device, window, 0)
            .with_context(|| format!("cannot map {}", device.display()))?,
    );
    let block = Block::new(offset, 4)?;
    block.set_slave(responder);
    block.set_uint(0, 32, value)?;
    block.blocking_write()?;
    println!("{offset:#010x} <- {value:#010x}");

    if verify {
        block.add_verify(0, 32)?;
        block.blocking_verify()?;
        println!("{offset:#010x} verified");
    }
    Ok(())
}

/// Sink that records its name on every delivery
struct Tap {
    name: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl StreamSink for Tap {
    fn accept_frame(&self, _frame: FramePtr) {
        self.order.lock().push(self.name);
    }
}

fn cmd_selftest() -> Result<()> {
    let emulator = Arc::new(MemEmulator::new());

    let block = Block::new(0x1000, 8)?;
    block.set_slave(emulator.clone());
    block.set_uint(0, 8, 0xAB)?;
    block.set_uint(12, 20, 0x5_4321)?;
    block.blocking_write()?;
    block.add_verify(0, 32)?;
    block.blocking_verify()?;
    println!("block write/verify   ok  {:02x?}", emulator.peek(0x1000, 8));

    let readback = Block::new(0x1000, 8)?;
    readback.set_slave(emulator.clone());
    readback.background_read()?;
    if !readback.get_updated()? {
        bail!("read completed without setting the updated flag");
    }
    let low = readback.get_uint(0, 8)?;
    let field = readback.get_uint(12, 20)?;
    if low != 0xAB || field != 0x5_4321 {
        bail!("read back {low:#x} / {field:#x}, expected 0xab / 0x54321");
    }
    println!("block read           ok  {low:#04x} {field:#07x}");

    let master = Master::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["A", "B", "C"] {
        master.add_slave(Arc::new(Tap {
            name,
            order: order.clone(),
        }));
    }
    let mut frame: Frame = master.req_frame(16, false)?;
    frame.set_payload(16)?;
    master.send_frame(Arc::new(frame));
    let order = order.lock().clone();
    if order != ["C", "B", "A"] {
        bail!("fan-out order {order:?}, expected [C, B, A]");
    }
    println!("stream fan-out       ok  {order:?}");
    println!("emulator transactions: {}", emulator.transaction_count());
    Ok(())
}

/// Sink that prints one line per record
struct Printer {
    limit: Option<u64>,
    seen: AtomicU64,
}

impl StreamSink for Printer {
    fn accept_frame(&self, frame: FramePtr) {
        let index = self.seen.fetch_add(1, Ordering::Relaxed);
        if self.limit.map_or(true, |limit| index < limit) {
            println!(
                "{index:>8}  {:>10} bytes  channel {:>3}  error {:#04x}  flags {:#06x}",
                frame.payload(),
                frame.channel(),
                frame.error(),
                frame.flags()
            );
        }
    }
}

fn cmd_dump(file: PathBuf, limit: Option<u64>) -> Result<()> {
    let reader = StreamReader::new();
    let printer = Arc::new(Printer {
        limit,
        seen: AtomicU64::new(0),
    });
    connect(&reader, printer);

    let frames = reader
        .read_file(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    println!("{frames} record(s)");
    Ok(())
}
