//! Daemon CLI arguments. Grounded on the teacher's `clap::Parser` style
//! (`cli/src/cli.rs`), layered on top of the profiled-env-var `Config`
//! loader (`amqpprox-core::config`).

use clap::Parser;

/// amqpprox reverse proxy daemon.
#[derive(Parser, Debug)]
#[command(name = "amqpprox", about = "AMQP 0-9-1 reverse proxy")]
pub struct DaemonArgs {
    /// Named configuration profile (selects `{PROFILE}_*` env overrides).
    #[arg(long)]
    pub profile: Option<String>,

    /// Override the listen port from the resolved config.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Override the control socket path from the resolved config.
    #[arg(long)]
    pub control_socket: Option<String>,

    /// Path to a `.env` file to load before reading the environment.
    #[arg(long)]
    pub env_file: Option<String>,
}

/// Resolve a `Config`, applying CLI overrides on top of the env/profile
/// layer. Mirrors the teacher's `load_config()` (`dotenv` then
/// `Config::from_env()`), plus the per-field CLI overrides this daemon
/// adds.
pub fn load_config(args: &DaemonArgs) -> amqpprox_core::Config {
    amqpprox_core::config::load_dotenv();

    let mut config = match &args.profile {
        Some(profile) => amqpprox_core::Config::for_profile(profile),
        None => amqpprox_core::Config::from_env(),
    };

    if let Some(port) = args.listen_port {
        config.listen.port = port;
    }
    if let Some(path) = &args.control_socket {
        config.control.socket_path = std::path::PathBuf::from(path);
    }

    config
}
