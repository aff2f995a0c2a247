//! fli-list: enumerate attached FLI devices and describe cameras.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use fli_camera::{list_devices, DebugLevel, DomainMask, FliApi, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fli-list")]
#[command(about = "List FLI cameras, filter wheels and focusers")]
#[command(version)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vendor library to load instead of the configured one
    #[arg(short, long)]
    library: Option<PathBuf>,

    /// Native diagnostic level (none, fail, warn, info, io, all)
    #[arg(short, long)]
    debug_level: Option<DebugLevel>,

    /// Domain to search, e.g. `usb camera`
    #[arg(default_values_t = ["usb".to_owned(), "camera".to_owned()])]
    domain: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> fli_camera::traits::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    }
    .with_env_overrides();
    if let Some(library) = args.library {
        settings.library.path = Some(library);
    }
    if let Some(level) = args.debug_level {
        settings.library.debug_level = level;
    }

    let domain = DomainMask::parse(&args.domain)?;
    let lib = settings.library.load()?;
    match lib.lib_version() {
        Ok(version) => tracing::info!(%version, %domain, "searching for devices"),
        Err(err) => tracing::warn!(error = %err, %domain, "could not query library version"),
    }

    let stdout = io::stdout();
    list_devices(&lib, domain, &mut stdout.lock())
}
