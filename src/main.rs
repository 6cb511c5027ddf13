//! Strata CLI: dependency-ordered cluster provisioning.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Provision a Mesos cluster as dependency-ordered stacks, and build its machine images"
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: strata::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    strata::cli::init_tracing(cli.verbose);
    if let Err(e) = strata::cli::dispatch(cli.command) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
