use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wheelhouse_master::config::MasterConfig;

/// The wheelhouse build-farm master coordinator.
#[derive(Debug, Parser)]
#[command(name = "wheelhouse-master", version, about)]
struct Args {
    /// Configuration file to load instead of the default search path.
    #[arg(short = 'c', long = "configuration", value_name = "FILE")]
    configuration: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Usage errors exit 2 via clap before we get here.
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match MasterConfig::load(args.configuration.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("wheelhouse-master: {err:#}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("wheelhouse-master: cannot start runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(wheelhouse_master::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wheelhouse-master: {err:#}");
            ExitCode::from(1)
        }
    }
}
