//! The VM runner: loads a program image, lazily compiles `main()`, and
//! exits with the integer it returns (§6).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use stackjit_engine::{image, VmConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackjit")]
#[command(about = "Runs a compiled stackjit program image")]
struct Cli {
    /// Binary image to run.
    image: PathBuf,

    /// Disable interactive prompts (diagnostic flag, accepted for parity
    /// with the original tool's CLI; this runner never prompts).
    #[arg(long = "nd")]
    no_diagnostics: bool,

    /// Raise tracing verbosity (-v: debug, -vv: trace).
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the young generation's arena size, in bytes.
    #[arg(long = "young-bytes")]
    young_bytes: Option<usize>,

    /// Override the old generation's arena size, in bytes.
    #[arg(long = "old-bytes")]
    old_bytes: Option<usize>,
}

const MISSING_MAIN_EXIT_CODE: i32 = 1;

fn main() {
    let cli = Cli::parse();
    install_tracing(cli.verbose);
    let _ = cli.no_diagnostics;

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("stackjit: {e:#}");
            std::process::exit(MISSING_MAIN_EXIT_CODE);
        }
    }
}

fn install_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<i32> {
    let mut config = VmConfig::default();
    if let Some(bytes) = cli.young_bytes {
        config.young_bytes = bytes;
    }
    if let Some(bytes) = cli.old_bytes {
        config.old_bytes = bytes;
    }

    let mut vm = stackjit_engine::VMState::new(config);
    let bytes = std::fs::read(&cli.image).with_context(|| format!("reading '{}'", cli.image.display()))?;
    image::load(&bytes, &mut vm).with_context(|| format!("loading '{}'", cli.image.display()))?;

    if vm.lookup("main()").is_none() {
        anyhow::bail!("image has no 'main()' entry point");
    }

    let entry = vm.compile_by_signature("main()").context("compiling 'main()'")?;
    let main: extern "C" fn() -> i32 = unsafe { std::mem::transmute(entry as *const ()) };
    Ok(main())
}
