//! zflate CLI - zlib stream compressor
//!
//! Compresses a file (or standard input) into a zlib stream using the
//! streaming encoder, with selectable block mode and window size.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use zflate::{deflate_zlib_with_stats, Mode};

/// A minimal-dependency zlib stream compressor.
#[derive(Parser, Debug)]
#[command(name = "zflate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file ("-" reads standard input)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file (defaults to INPUT.zz, or stdout when reading stdin)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Block encoding mode
    #[arg(short, long, value_enum, default_value = "dynamic")]
    mode: ModeArg,

    /// LZ77 window bits (8-15; 15 = 32 KiB window)
    #[arg(
        short = 'w',
        long,
        default_value = "15",
        value_parser = clap::value_parser!(u8).range(8..=15)
    )]
    window_bits: u8,

    /// Show compression statistics
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Raw stored blocks (no compression)
    Stored,
    /// Fixed Huffman tables
    Fixed,
    /// Per-block dynamic Huffman tables
    Dynamic,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Stored => Mode::Stored,
            ModeArg::Fixed => Mode::Fixed,
            ModeArg::Dynamic => Mode::Dynamic,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("zflate: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let from_stdin = args.input.as_os_str() == "-";
    let data = if from_stdin {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        fs::read(&args.input)?
    };

    let start = Instant::now();
    let (compressed, stats) =
        deflate_zlib_with_stats(&data, args.window_bits, args.mode.into())?;
    let elapsed = start.elapsed();

    match (&args.output, from_stdin) {
        (Some(path), _) => {
            let mut file = File::create(path)?;
            file.write_all(&compressed)?;
        }
        (None, true) => io::stdout().write_all(&compressed)?,
        (None, false) => {
            let mut path = args.input.clone();
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".zz");
            path.set_file_name(name);
            let mut file = File::create(&path)?;
            file.write_all(&compressed)?;
        }
    }

    if args.verbose {
        let ratio = if compressed.is_empty() {
            0.0
        } else {
            data.len() as f64 / compressed.len() as f64
        };
        eprintln!(
            "{} -> {} bytes ({:.2}x) in {:.1?}",
            data.len(),
            compressed.len(),
            ratio,
            elapsed
        );
        eprintln!(
            "blocks: {} stored, {} fixed, {} dynamic",
            stats.stored_blocks, stats.fixed_blocks, stats.dynamic_blocks
        );
    }

    Ok(())
}
