//! `amqpprox_ctl` argument parsing, grounded on the teacher's
//! `clap::Parser` style (`cli/src/cli.rs`) and spec.md section 4.5's verb
//! grammar. Argument parsing itself is named out of scope by spec.md
//! section 1 ("the CLI argument parser of the command-line utility"); the
//! subcommands below exist to build the wire-level command line the
//! control socket actually understands.

use clap::{Parser, Subcommand};

/// Control-plane client for the amqpprox reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "amqpprox_ctl", about = "Control client for the amqpprox reverse proxy")]
pub struct CliArgs {
    /// Path to the control socket.
    #[arg(long, default_value = "/tmp/amqpprox.sock")]
    pub control_socket: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage backend definitions.
    Backend {
        #[command(subcommand)]
        action: BackendAction,
    },
    /// Manage farms (named collections of backends).
    Farm {
        #[command(subcommand)]
        action: FarmAction,
    },
    /// Manage vhost-to-resource routing.
    Map {
        #[command(subcommand)]
        action: MapAction,
    },
    /// Pin or clear a DNS resolution.
    Maphostname {
        host: String,
        service: String,
        addr: String,
    },
    /// Control a vhost's live sessions.
    Vhost {
        #[command(subcommand)]
        action: VhostAction,
    },
    /// Control a single live session by numeric id.
    Session {
        id: u64,
        #[command(subcommand)]
        action: SessionAction,
    },
    /// List live connections.
    Conn,
    /// Listener lifecycle (informative; this proxy binds one fixed listener at startup).
    Listen {
        #[command(subcommand)]
        action: ListenAction,
    },
    /// Print process-wide statistics as JSON.
    Stat,
    /// Get or set the local datacenter tag.
    Datacenter {
        #[command(subcommand)]
        action: DatacenterAction,
    },
    /// Adjust logging verbosity (acknowledgement only).
    Log {
        #[command(subcommand)]
        action: LogAction,
    },
    /// Adjust connection/data-rate limiters.
    Limit {
        #[command(subcommand)]
        action: LimitAction,
    },
    /// TLS context configuration (out of scope; acknowledgement only).
    Tls { args: Vec<String> },
    /// Authentication service configuration.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// List every supported verb.
    Help,
}

#[derive(Subcommand, Debug)]
pub enum BackendAction {
    Add {
        name: String,
        host: String,
        port: u16,
        datacenter: Option<String>,
        #[arg(long)]
        proxy_protocol: bool,
        #[arg(long)]
        tls: bool,
    },
    Delete { name: String },
    Print,
}

#[derive(Subcommand, Debug)]
pub enum FarmAction {
    Add {
        name: String,
        selector: String,
        members: Option<String>,
    },
    Delete { name: String },
    Print,
    SetSelector { name: String, selector: String },
    AddPolicy { name: String, policy: String },
}

#[derive(Subcommand, Debug)]
pub enum MapAction {
    Vhost { vhost: String, farm: String },
    Backend { vhost: String, backend: String },
    Unmap { vhost: String },
    Print,
    Default { farm: String },
    RemoveDefault,
}

#[derive(Subcommand, Debug)]
pub enum VhostAction {
    Pause { vhost: String },
    Unpause { vhost: String },
    ForceDisconnect { vhost: String },
    Print,
    BackendDisconnect { vhost: String },
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    Pause,
    DisconnectGraceful,
    ForceDisconnect,
}

#[derive(Subcommand, Debug)]
pub enum ListenAction {
    Start,
    StartSecure,
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum DatacenterAction {
    Set { tag: String },
    Print,
}

#[derive(Subcommand, Debug)]
pub enum LogAction {
    Console { verbosity: String },
    File { verbosity: String },
}

#[derive(Subcommand, Debug)]
pub enum LimitAction {
    ConnRate { connections: u32, window_secs: u32 },
    ConnCount { connections: u32 },
    DataRate { vhost: String, bytes_per_sec: usize },
    DataRateAlarm { vhost: String, bytes_per_sec: usize },
}

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    Service { url: String },
    Print,
}

/// Render a parsed `Command` into the exact line-protocol command the
/// server's control socket expects.
pub fn to_wire_command(command: &Command) -> String {
    match command {
        Command::Backend { action } => match action {
            BackendAction::Add {
                name,
                host,
                port,
                datacenter,
                proxy_protocol,
                tls,
            } => format!(
                "BACKEND ADD {name} {host} {port} {} {proxy_protocol} {tls}",
                datacenter.as_deref().unwrap_or("")
            ),
            BackendAction::Delete { name } => format!("BACKEND DELETE {name}"),
            BackendAction::Print => "BACKEND PRINT".to_string(),
        },
        Command::Farm { action } => match action {
            FarmAction::Add { name, selector, members } => {
                format!("FARM ADD {name} {selector} {}", members.as_deref().unwrap_or(""))
            }
            FarmAction::Delete { name } => format!("FARM DELETE {name}"),
            FarmAction::Print => "FARM PRINT".to_string(),
            FarmAction::SetSelector { name, selector } => format!("FARM SET_SELECTOR {name} {selector}"),
            FarmAction::AddPolicy { name, policy } => format!("FARM ADD_POLICY {name} {policy}"),
        },
        Command::Map { action } => match action {
            MapAction::Vhost { vhost, farm } => format!("MAP VHOST {vhost} {farm}"),
            MapAction::Backend { vhost, backend } => format!("MAP BACKEND {vhost} {backend}"),
            MapAction::Unmap { vhost } => format!("MAP UNMAP {vhost}"),
            MapAction::Print => "MAP PRINT".to_string(),
            MapAction::Default { farm } => format!("MAP DEFAULT {farm}"),
            MapAction::RemoveDefault => "MAP REMOVE_DEFAULT".to_string(),
        },
        Command::Maphostname { host, service, addr } => format!("MAPHOSTNAME DNS {host} {service} {addr}"),
        Command::Vhost { action } => match action {
            VhostAction::Pause { vhost } => format!("VHOST PAUSE {vhost}"),
            VhostAction::Unpause { vhost } => format!("VHOST UNPAUSE {vhost}"),
            VhostAction::ForceDisconnect { vhost } => format!("VHOST FORCE_DISCONNECT {vhost}"),
            VhostAction::Print => "VHOST PRINT".to_string(),
            VhostAction::BackendDisconnect { vhost } => format!("VHOST BACKEND_DISCONNECT {vhost}"),
        },
        Command::Session { id, action } => {
            let verb = match action {
                SessionAction::Pause => "PAUSE",
                SessionAction::DisconnectGraceful => "DISCONNECT_GRACEFUL",
                SessionAction::ForceDisconnect => "FORCE_DISCONNECT",
            };
            format!("SESSION {id} {verb}")
        }
        Command::Conn => "CONN".to_string(),
        Command::Listen { action } => {
            let verb = match action {
                ListenAction::Start => "START",
                ListenAction::StartSecure => "START_SECURE",
                ListenAction::Stop => "STOP",
            };
            format!("LISTEN {verb}")
        }
        Command::Stat => "STAT".to_string(),
        Command::Datacenter { action } => match action {
            DatacenterAction::Set { tag } => format!("DATACENTER SET {tag}"),
            DatacenterAction::Print => "DATACENTER PRINT".to_string(),
        },
        Command::Log { action } => match action {
            LogAction::Console { verbosity } => format!("LOG CONSOLE {verbosity}"),
            LogAction::File { verbosity } => format!("LOG FILE {verbosity}"),
        },
        Command::Limit { action } => match action {
            LimitAction::ConnRate { connections, window_secs } => {
                format!("LIMIT CONN_RATE {connections} {window_secs}")
            }
            LimitAction::ConnCount { connections } => format!("LIMIT CONN_COUNT {connections}"),
            LimitAction::DataRate { vhost, bytes_per_sec } => format!("LIMIT DATA_RATE {vhost} {bytes_per_sec}"),
            LimitAction::DataRateAlarm { vhost, bytes_per_sec } => {
                format!("LIMIT DATA_RATE_ALARM {vhost} {bytes_per_sec}")
            }
        },
        Command::Tls { args } => format!("TLS {}", args.join(" ")),
        Command::Auth { action } => match action {
            AuthAction::Service { url } => format!("AUTH SERVICE {url}"),
            AuthAction::Print => "AUTH PRINT".to_string(),
        },
        Command::Help => "HELP".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_add_renders_space_separated_verb() {
        let action = BackendAction::Add {
            name: "b1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5672,
            datacenter: Some("ny".to_string()),
            proxy_protocol: false,
            tls: false,
        };
        assert_eq!(
            to_wire_command(&Command::Backend { action }),
            "BACKEND ADD b1 127.0.0.1 5672 ny false false"
        );
    }

    #[test]
    fn session_command_includes_id_before_verb() {
        let cmd = Command::Session {
            id: 7,
            action: SessionAction::ForceDisconnect,
        };
        assert_eq!(to_wire_command(&cmd), "SESSION 7 FORCE_DISCONNECT");
    }
}
