use clap::Parser;
use procflow::cli::{self, Args};
use procflow::logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match logging::init(&args.command) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Logging disabled: {:#}", err);
            None
        }
    };

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
