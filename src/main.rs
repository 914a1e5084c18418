use clap::Parser;
use std::path::PathBuf;

mod commands;
mod output;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "whiskey")]
#[command(version = VERSION)]
#[command(about = "Zero-downtime versioned deployment over SSH")]
struct Cli {
    /// Run as the remote executor inside a staged directory
    #[arg(long)]
    remote: bool,

    /// Deployment configuration file (YAML)
    config: PathBuf,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    eprintln!("Whiskey Deploy");

    // In orchestrator mode, relayed remote envelopes precede this one.
    let (json_result, exit_code) = commands::run_json(&cli.config, cli.remote);

    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("[whiskey] {}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(output::exit_code_to_u8(exit_code))
}
