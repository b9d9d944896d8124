//! `stackasm`: assembles textual source files into a binary image, or (with
//! `-d`) disassembles images back to surface syntax (§6).

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use stackjit_engine::image::{self, ImageContents};
use stackjit_engine::source;

#[derive(Parser)]
#[command(name = "stackasm")]
#[command(about = "Assembler/disassembler for stackjit source and image files")]
struct Cli {
    /// Source files to assemble, or (with -d) binary images to disassemble.
    files: Vec<PathBuf>,

    /// Output path for the assembled image.
    #[arg(short = 'o', long = "output", default_value = "library.simg")]
    output: PathBuf,

    /// Disassemble mode: treat `files` as binary images and print their
    /// surface syntax to stdout instead of assembling.
    #[arg(short = 'd')]
    disassemble: bool,
}

fn main() {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("stackasm: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.files.is_empty() {
        bail!("no input files given");
    }

    if cli.disassemble {
        for path in &cli.files {
            let bytes = std::fs::read(path).with_context(|| format!("reading '{}'", path.display()))?;
            let contents = image::decode(&bytes).with_context(|| format!("decoding '{}'", path.display()))?;
            print!("{}", source::disassemble(&contents));
        }
        return Ok(());
    }

    let mut merged = ImageContents::default();
    for path in &cli.files {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
        let parsed = source::parse(&text).with_context(|| format!("parsing '{}'", path.display()))?;
        merged.classes.extend(parsed.classes);
        merged.externs.extend(parsed.externs);
        merged.functions.extend(parsed.functions);
    }

    let bytes = image::encode(&merged);
    std::fs::write(&cli.output, bytes).with_context(|| format!("writing '{}'", cli.output.display()))?;
    Ok(())
}
