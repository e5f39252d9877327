mod decode;
mod generate;
mod info;

use std::fs::File;
use std::io::{stderr, stdin, BufReader, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tlmsync::framing::{FramerOpts, LengthEncoding, OverrunPolicy, DEFAULT_CAPACITY};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct FramerArgs {
    /// The length field uses 4 printable digits rather than 2 binary bytes.
    #[arg(long, action)]
    printable: bool,

    /// Framer buffer capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_CAPACITY, value_name = "bytes")]
    capacity: usize,

    /// Fail rather than overwrite buffered bytes if the framer falls behind.
    #[arg(long, action)]
    reject_overrun: bool,
}

impl FramerArgs {
    fn opts(&self) -> FramerOpts {
        FramerOpts::new()
            .with_capacity(self.capacity)
            .with_encoding(encoding(self.printable))
            .with_overrun(if self.reject_overrun {
                OverrunPolicy::Reject
            } else {
                OverrunPolicy::Overwrite
            })
    }
}

fn encoding(printable: bool) -> LengthEncoding {
    if printable {
        LengthEncoding::Printable
    } else {
        LengthEncoding::Binary
    }
}

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode packets from a telemetry stream.
    ///
    /// Bytes are read from a file, stdin, or a TCP connection and each packet found is
    /// written to stdout, one per line.
    Decode {
        #[command(flatten)]
        framer: FramerArgs,

        /// Read from a TCP connection instead of a file.
        #[arg(short, long, value_name = "host:port", conflicts_with = "input")]
        connect: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,

        /// Also output loss of synchronization events.
        #[arg(long, action)]
        resyncs: bool,

        /// Input stream file. Use - or omit to read stdin.
        input: Option<PathBuf>,
    },
    /// Show a summary of a telemetry stream file.
    Info {
        #[command(flatten)]
        framer: FramerArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,

        /// Input stream file
        input: PathBuf,
    },
    /// Write a synthetic telemetry stream.
    ///
    /// Useful for exercising links and decoders. Noise bytes and sequence gaps can be
    /// added between packets. Noise after a packet breaks synchronization, so a skipped
    /// sequence number is only reported as an anomaly when no noise precedes the packet.
    Generate {
        /// Number of packets to write.
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,

        /// Maximum payload length of each packet.
        #[arg(long, default_value_t = 256, value_name = "bytes")]
        max_payload: usize,

        /// Maximum number of noise bytes written between packets.
        #[arg(long, default_value_t = 0, value_name = "bytes")]
        max_noise: usize,

        /// Probability in [0, 1] of skipping a sequence number before each packet. Gaps
        /// are not visible to decoders after noise; see --max-noise.
        #[arg(long, default_value_t = 0.0)]
        drop: f64,

        /// Encode the length field using printable digits.
        #[arg(long, action)]
        printable: bool,

        /// Delete output file if it already exists
        #[arg(long, action)]
        clobber: bool,

        /// Output file path.
        #[arg(short, long, default_value = "telemetry.dat", value_name = "path")]
        output: PathBuf,
    },
}

fn open_input(input: Option<&Path>, connect: Option<&str>) -> Result<Box<dyn Read + Send>> {
    if let Some(addr) = connect {
        debug!("connecting to {addr}");
        let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {addr}"))?;
        return Ok(Box::new(stream));
    }
    match input {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path).with_context(|| format!("opening input {path:?}"))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(stdin())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TLMSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode {
            framer,
            connect,
            format,
            resyncs,
            input,
        } => {
            let src = open_input(input.as_deref(), connect.as_deref())?;
            decode::decode(src, framer.opts(), format, *resyncs)
        }
        Commands::Info {
            framer,
            format,
            input,
        } => info::info(input, framer.opts(), format),
        Commands::Generate {
            count,
            max_payload,
            max_noise,
            drop,
            printable,
            clobber,
            output,
        } => {
            if !clobber && output.exists() {
                bail!("{output:?} exists; use --clobber");
            }
            if !(0.0..=1.0).contains(drop) {
                bail!("--drop must be between 0 and 1");
            }
            let dest = File::create(output)
                .with_context(|| format!("failed to create output {output:?}"))?;
            let opts = generate::Opts {
                count: *count,
                max_payload: *max_payload,
                max_noise: *max_noise,
                drop: *drop,
                encoding: encoding(*printable),
            };
            generate::generate(dest, &opts)
        }
    }
}
