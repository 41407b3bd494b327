use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ristretto::runtime::Machine;

/// Run an IJVM binary image.
#[derive(Parser, Debug)]
#[command(name = "ristretto", version, about)]
struct Args {
    /// Path to the binary program image.
    program: PathBuf,

    /// Feed IN from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let input: Box<dyn Read> = match args.input {
        Some(path) => match File::open(&path) {
            Ok(file) => Box::new(file),
            Err(err) => {
                eprintln!("ristretto: cannot open {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(io::stdin()),
    };

    let mut machine =
        match Machine::from_file(&args.program, input, Box::new(io::stdout())) {
            Ok(machine) => machine,
            Err(err) => {
                eprintln!("ristretto: {}: {err}", args.program.display());
                return ExitCode::FAILURE;
            }
        };

    match machine.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(fault) => {
            eprintln!("ristretto: fatal: {fault}");
            ExitCode::FAILURE
        }
    }
}
