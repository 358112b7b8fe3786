mod cli;
mod client;
mod format;

use clap::Parser;

use cli::CliArgs;
use client::ControlClient;

/// Exit codes per spec.md section 6: 1 on argv misuse, 2 on transport
/// exception, 0 otherwise.
const EXIT_ARGV_MISUSE: i32 = 1;
const EXIT_TRANSPORT_ERROR: i32 = 2;
const EXIT_OK: i32 = 0;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(EXIT_ARGV_MISUSE);
        }
    };

    std::process::exit(run(args).await);
}

async fn run(args: CliArgs) -> i32 {
    let command = cli::to_wire_command(&args.command);
    let client = ControlClient::new(&args.control_socket);

    match client.send(&command).await {
        Ok(lines) => {
            if format::print_ok(&lines).is_err() {
                return EXIT_TRANSPORT_ERROR;
            }
            EXIT_OK
        }
        Err(err) => {
            let _ = format::print_error(&format!("{err:#}"));
            EXIT_TRANSPORT_ERROR
        }
    }
}
