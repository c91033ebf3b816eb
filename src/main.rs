#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use launch_loader::dummy::DummyChannel;
use launch_loader::ihex::{self, SparseImage};
use launch_loader::protocol::PACKET_SIZE;
use launch_loader::{FlashDescriptor, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    #[structopt(subcommand)]
    operation: Operation,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Decode a flash info response
    Info {
        /// Raw response bytes, hex encoded
        response: HexBytes,
    },

    /// Print the packets an image is split into
    Plan {
        /// Flash info response of the target, hex encoded
        #[structopt(long)]
        info: HexBytes,

        /// Intel HEX image
        file: PathBuf,
    },

    /// Program an image into a simulated target
    DryRun {
        /// Flash info response of the target, hex encoded
        #[structopt(long)]
        info: HexBytes,

        /// Intel HEX image
        file: PathBuf,
    },
}

#[derive(Clone, Debug)]
pub struct HexBytes(Vec<u8>);

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s.trim_start_matches("0x")).map(HexBytes)
    }
}

fn load(path: &Path) -> anyhow::Result<SparseImage> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let image = ihex::parse(&text).with_context(|| format!("parsing {}", path.display()))?;

    let size: usize = image.values().map(|b| b.len()).sum();
    info!(
        "Loaded {} in {} blocks",
        bytefmt::format(size as u64),
        image.len()
    );

    Ok(image)
}

fn info(response: &[u8]) -> anyhow::Result<()> {
    let d = FlashDescriptor::decode(response)?;

    println!("{:#?}", d);
    println!("Starting address: 0x{:08x}", d.starting_address());
    println!("Packets per row: {}", d.packets_per_row());

    if let Err(e) = d.validate() {
        warn!("Descriptor is not usable: {}", e);
    }

    Ok(())
}

fn plan(response: &[u8], file: &Path) -> anyhow::Result<()> {
    let d = FlashDescriptor::decode(response)?;
    let image = load(file)?;

    let chunker = launch_loader::Chunker::new(d, image)?;
    info!("Programmable region starts at 0x{:08x}", chunker.starting_address());

    for p in chunker {
        let p = p?;
        println!("row {:6} line {:3} {}", p.row, p.line, hex::encode(p.as_bytes()));
    }

    Ok(())
}

fn dry_run(response: &[u8], file: &Path, options: Options) -> anyhow::Result<()> {
    let image = load(file)?;
    let lock = !options.no_lock;

    let mut p = Programmer::linux(DummyChannel::new(response), options);

    info!("Connecting to target");
    p.init()?;

    info!("Execution mode: {:02x?}", p.execution_mode()?);
    info!("Bootloader version: {:02x?}", p.version()?);

    let d = p.flash_info()?;
    info!("Flash descriptor: {:?}", d);

    let packets = p
        .plan(image.iter().map(|(a, b)| (*a, b)))?
        .collect::<Result<Vec<_>, _>>()?;

    let bar = ProgressBar::new(packets.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>10} [{bar:40}] {pos}/{len}")
            .progress_chars("=> "),
    );

    for packet in &packets {
        bar.set_message(&format!("row {}", packet.row));
        p.write_packet(packet)?;
        bar.inc(1);
    }

    bar.finish_with_message("done");

    if lock {
        p.lock_app_mode()?;
    }

    info!(
        "Wrote {} packets ({})",
        packets.len(),
        bytefmt::format((packets.len() * PACKET_SIZE) as u64)
    );

    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    match o.operation {
        Operation::Info { response } => info(&response.0),
        Operation::Plan { info, file } => plan(&info.0, &file),
        Operation::DryRun { info, file } => dry_run(&info.0, &file, o.options),
    }
}
