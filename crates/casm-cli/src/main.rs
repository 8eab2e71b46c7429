//! The `casm` command-line driver.
//!
//! Thin shell over `casm-intcomp`: parse arguments into a [`Config`], read
//! the input file, run the compressor or decompressor, write the output,
//! and map fatal errors to process exit codes.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use casm_error::Result;
use casm_intcomp::{decompress_bytes, CompressionFlags, IntCompressor};
use casm_types::IntFormat;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: casm [options] <input> <output>

modes:
  --compress              compress a module into a CASM stream (default)
  --decompress            decompress a CASM stream back into a module

options:
  --count-cutoff=N        minimum occurrence count to abbreviate (default 2)
  --weight-cutoff=N       minimum weight to abbreviate (default 2)
  --length-limit=N        longest tracked subsequence (default 5)
  --max-abbreviations=N   cap on abbreviation assignments (default 4096)
  --minimize-block-size   emit true-varuint block size prefixes
  --use-cism-model        express the decoder as cism overrides
  --use-huffman           prefix-code the abbreviation indices
  --abbrev-format=FMT     uint8|uint32|uint64|varint32|varint64|varuint32|varuint64
  --report=PATH           write the usage report as JSON
  --trace                 verbose diagnostics on stderr
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Compress,
    Decompress,
}

#[derive(Debug)]
struct Config {
    input: PathBuf,
    output: PathBuf,
    mode: Mode,
    flags: CompressionFlags,
    report: Option<PathBuf>,
    trace: bool,
}

impl Config {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut mode = Mode::Compress;
        let mut flags = CompressionFlags::default();
        let mut report = None;
        let mut trace = false;
        let mut positional: Vec<PathBuf> = Vec::new();

        for arg in args {
            if let Some(value) = arg.strip_prefix("--count-cutoff=") {
                flags.count_cutoff = parse_number(arg, value)?;
            } else if let Some(value) = arg.strip_prefix("--weight-cutoff=") {
                flags.weight_cutoff = parse_number(arg, value)?;
            } else if let Some(value) = arg.strip_prefix("--length-limit=") {
                flags.length_limit = parse_number(arg, value)? as usize;
                if flags.length_limit == 0 {
                    return Err("--length-limit must be at least 1".to_owned());
                }
            } else if let Some(value) = arg.strip_prefix("--max-abbreviations=") {
                flags.max_abbreviations = parse_number(arg, value)? as usize;
            } else if let Some(value) = arg.strip_prefix("--abbrev-format=") {
                flags.abbrev_format = parse_format(value)?;
            } else if let Some(value) = arg.strip_prefix("--report=") {
                report = Some(PathBuf::from(value));
            } else {
                match arg.as_str() {
                    "--compress" => mode = Mode::Compress,
                    "--decompress" => mode = Mode::Decompress,
                    "--minimize-block-size" => flags.minimize_block_size = true,
                    "--use-cism-model" => flags.use_cism_model = true,
                    "--use-huffman" => flags.use_huffman = true,
                    "--trace" => trace = true,
                    "--help" | "-h" => return Err(String::new()),
                    other if other.starts_with("--") => {
                        return Err(format!("unknown option: {other}"));
                    }
                    other => positional.push(PathBuf::from(other)),
                }
            }
        }

        let mut positional = positional.into_iter();
        let (Some(input), Some(output)) = (positional.next(), positional.next()) else {
            return Err("expected <input> and <output> paths".to_owned());
        };
        if positional.next().is_some() {
            return Err("too many positional arguments".to_owned());
        }
        Ok(Self {
            input,
            output,
            mode,
            flags,
            report,
            trace,
        })
    }
}

fn parse_number(arg: &str, value: &str) -> std::result::Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("bad numeric value in {arg}"))
}

fn parse_format(value: &str) -> std::result::Result<IntFormat, String> {
    IntFormat::ALL
        .into_iter()
        .find(|format| format.name() == value)
        .ok_or_else(|| format!("unknown abbreviation format: {value}"))
}

fn run(config: &Config) -> Result<()> {
    let input = fs::read(&config.input)?;
    match config.mode {
        Mode::Compress => {
            let compressor = IntCompressor::new(config.flags);
            let (bytes, report) = compressor.compress_bytes_with_report(&input)?;
            fs::write(&config.output, bytes)?;
            if let Some(path) = &config.report {
                let json = serde_json::to_string_pretty(&report)
                    .map_err(|err| casm_error::CasmError::internal(err.to_string()))?;
                fs::write(path, json)?;
            }
        }
        Mode::Decompress => {
            let bytes = decompress_bytes(&input, config.flags.minimize_block_size)?;
            fs::write(&config.output, bytes)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match Config::parse(&args) {
        Ok(config) => config,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("casm: {message}");
            }
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    let filter = if config.trace {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("casm: {err}");
            ExitCode::from(err.exit_code().clamp(1, 255) as u8)
        }
    }
}
