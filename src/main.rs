//! replctl CLI entry point
//!
//! This is a minimal entrypoint that:
//! 1. Parses CLI arguments and dispatches commands (via cli::run)
//! 2. Prints failures as a JSON error response on stdout
//! 3. Exits with non-zero on failure
//!
//! All logic is delegated to the CLI module.

use replctl::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        if cli::write_error(&e).is_err() {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }
}
