//! Verb dispatch for the control socket, grounded on spec.md section 4.5's
//! verb table and `amqpprox_control.cpp`/`amqpprox_connectionlimiter*.cpp`.

use std::sync::Arc;

use amqpprox_registry::{Backend, ConnectionLimiter, Farm, Resource, RegistryError};
use thiserror::Error;

use crate::session::SessionCommand;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("usage: {0}")]
    BadArgs(String),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("unknown session {0}")]
    UnknownSession(u64),
}

/// Run one control-socket command line, returning the response lines to
/// write back to the caller.
pub fn dispatch(state: &Arc<AppState>, line: &str) -> Result<Vec<String>, ControlError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens
        .next()
        .ok_or_else(|| ControlError::BadArgs("empty command".to_string()))?
        .to_ascii_uppercase();
    let rest: Vec<&str> = tokens.collect();

    match verb.as_str() {
        "BACKEND" => backend(state, &rest),
        "FARM" => farm(state, &rest),
        "MAP" => map(state, &rest),
        "MAPHOSTNAME" => maphostname(state, &rest),
        "VHOST" => vhost(state, &rest),
        "SESSION" => session(state, &rest),
        "CONN" => Ok(conn(state)),
        "LISTEN" => Ok(vec!["OK".to_string()]),
        "STAT" => Ok(stat(state)),
        "DATACENTER" => datacenter(state, &rest),
        "LOG" => Ok(vec!["OK".to_string()]),
        "LIMIT" => limit(state, &rest),
        "TLS" => Ok(vec!["OK".to_string()]),
        "AUTH" => Ok(vec!["default in-process allow-all".to_string()]),
        "HELP" => Ok(help()),
        "EXIT" => Ok(exit(state)),
        other => Err(ControlError::UnknownVerb(other.to_string())),
    }
}

fn backend(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("ADD") => {
            let name = *args.get(1).ok_or_else(|| usage("BACKEND ADD <name> <host> <port> [dc] [proxy] [tls]"))?;
            let host = *args.get(2).ok_or_else(|| usage("BACKEND ADD <name> <host> <port> [dc] [proxy] [tls]"))?;
            let port_str = *args
                .get(3)
                .ok_or_else(|| usage("BACKEND ADD <name> <host> <port> [dc] [proxy] [tls]"))?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| ControlError::Registry(RegistryError::InvalidPort(port_str.to_string())))?;
            let datacenter = args.get(4).unwrap_or(&"").to_string();
            let proxy_protocol = args.get(5).map(|s| *s == "true").unwrap_or(false);
            let tls = args.get(6).map(|s| *s == "true").unwrap_or(false);

            state.backends.insert(Backend {
                name: name.to_string(),
                datacenter,
                host: host.to_string(),
                ip: None,
                port,
                proxy_protocol,
                tls,
            })?;
            Ok(vec!["OK".to_string()])
        }
        Some("DELETE") => {
            let name = *args.get(1).ok_or_else(|| usage("BACKEND DELETE <name>"))?;
            state.backends.remove(name)?;
            Ok(vec!["OK".to_string()])
        }
        Some("PRINT") => Ok(state.backends.all().iter().map(|b| b.to_string()).collect()),
        _ => Err(usage("BACKEND ADD|DELETE|PRINT")),
    }
}

fn farm(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("ADD") => {
            let name = *args.get(1).ok_or_else(|| usage("FARM ADD <name> <selector> [member,member,...]"))?;
            let selector = *args.get(2).ok_or_else(|| usage("FARM ADD <name> <selector> [member,member,...]"))?;
            state.farms.insert(Farm::new(name, selector))?;
            if let Some(members) = args.get(3) {
                for member in members.split(',').filter(|m| !m.is_empty()) {
                    let backend = state.backends.lookup(member).ok_or_else(|| {
                        ControlError::Registry(RegistryError::FarmReferencesUnknownBackend(
                            name.to_string(),
                            member.to_string(),
                        ))
                    })?;
                    state.farms.add_member(name, backend)?;
                }
            }
            Ok(vec!["OK".to_string()])
        }
        Some("DELETE") => {
            let name = *args.get(1).ok_or_else(|| usage("FARM DELETE <name>"))?;
            state.farms.remove(name)?;
            Ok(vec!["OK".to_string()])
        }
        Some("PRINT") => Ok(state.farms.names()),
        Some("SET_SELECTOR") => {
            let name = *args.get(1).ok_or_else(|| usage("FARM SET_SELECTOR <name> <selector>"))?;
            let selector = *args.get(2).ok_or_else(|| usage("FARM SET_SELECTOR <name> <selector>"))?;
            state.farms.set_selector(name, selector)?;
            Ok(vec!["OK".to_string()])
        }
        Some("ADD_POLICY") => {
            let name = *args.get(1).ok_or_else(|| usage("FARM ADD_POLICY <name> <policy>"))?;
            let policy = *args.get(2).ok_or_else(|| usage("FARM ADD_POLICY <name> <policy>"))?;
            state.farms.add_policy(name, policy)?;
            Ok(vec!["OK".to_string()])
        }
        _ => Err(usage("FARM ADD|DELETE|PRINT|SET_SELECTOR|ADD_POLICY")),
    }
}

fn map(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("VHOST") => {
            let vhost = *args.get(1).ok_or_else(|| usage("MAP VHOST <vhost> <farm>"))?;
            let farm = *args.get(2).ok_or_else(|| usage("MAP VHOST <vhost> <farm>"))?;
            state.resource_map.map_vhost_to_farm(vhost, farm);
            Ok(vec!["OK".to_string()])
        }
        Some("BACKEND") => {
            let vhost = *args.get(1).ok_or_else(|| usage("MAP BACKEND <vhost> <backend>"))?;
            let backend = *args.get(2).ok_or_else(|| usage("MAP BACKEND <vhost> <backend>"))?;
            state.resource_map.map_vhost_to_backend(vhost, backend);
            Ok(vec!["OK".to_string()])
        }
        Some("UNMAP") => {
            let vhost = *args.get(1).ok_or_else(|| usage("MAP UNMAP <vhost>"))?;
            state.resource_map.unmap_vhost(vhost);
            Ok(vec!["OK".to_string()])
        }
        Some("PRINT") => Ok(state
            .resource_map
            .entries()
            .into_iter()
            .map(|(vhost, resource)| format!("{vhost} -> {resource:?}"))
            .collect()),
        Some("DEFAULT") => {
            let farm = *args.get(1).ok_or_else(|| usage("MAP DEFAULT <farm>"))?;
            state.resource_map.set_default(Resource::Farm(farm.to_string()));
            Ok(vec!["OK".to_string()])
        }
        Some("REMOVE_DEFAULT") => {
            state.resource_map.remove_default();
            Ok(vec!["OK".to_string()])
        }
        _ => Err(usage("MAP VHOST|BACKEND|UNMAP|PRINT|DEFAULT|REMOVE_DEFAULT")),
    }
}

fn maphostname(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    if args.first().copied() != Some("DNS") {
        return Err(usage("MAPHOSTNAME DNS <host> <service> <ip:port>"));
    }
    let host = *args.get(1).ok_or_else(|| usage("MAPHOSTNAME DNS <host> <service> <ip:port>"))?;
    let service = *args.get(2).ok_or_else(|| usage("MAPHOSTNAME DNS <host> <service> <ip:port>"))?;
    let addr: std::net::SocketAddr = args
        .get(3)
        .ok_or_else(|| usage("MAPHOSTNAME DNS <host> <service> <ip:port>"))?
        .parse()
        .map_err(|_| usage("<ip:port> must be a valid socket address"))?;
    state.dns.set_cached_resolution(host, service, vec![addr]);
    Ok(vec!["OK".to_string()])
}

fn vhost(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("PAUSE") => {
            let vhost = *args.get(1).ok_or_else(|| usage("VHOST PAUSE <vhost>"))?;
            state.vhost_state.pause(vhost);
            broadcast(state, vhost, SessionCommand::Pause);
            Ok(vec!["OK".to_string()])
        }
        Some("UNPAUSE") => {
            let vhost = *args.get(1).ok_or_else(|| usage("VHOST UNPAUSE <vhost>"))?;
            state.vhost_state.unpause(vhost);
            broadcast(state, vhost, SessionCommand::Unpause);
            Ok(vec!["OK".to_string()])
        }
        Some("FORCE_DISCONNECT") | Some("BACKEND_DISCONNECT") => {
            let vhost = *args.get(1).ok_or_else(|| usage("VHOST FORCE_DISCONNECT <vhost>"))?;
            broadcast(state, vhost, SessionCommand::ForceDisconnect);
            Ok(vec!["OK".to_string()])
        }
        Some("PRINT") => Ok(state
            .sessions
            .all()
            .iter()
            .filter_map(|s| s.vhost.lock().unwrap().clone())
            .collect()),
        _ => Err(usage("VHOST PAUSE|UNPAUSE|FORCE_DISCONNECT|PRINT|BACKEND_DISCONNECT")),
    }
}

fn broadcast(state: &Arc<AppState>, vhost: &str, command_factory: SessionCommand) {
    for handle in state.sessions.all() {
        if handle.vhost.lock().unwrap().as_deref() == Some(vhost) {
            let command = clone_command(&command_factory);
            let _ = handle.commands.try_send(command);
        }
    }
}

fn clone_command(command: &SessionCommand) -> SessionCommand {
    match command {
        SessionCommand::Pause => SessionCommand::Pause,
        SessionCommand::Unpause => SessionCommand::Unpause,
        SessionCommand::DisconnectGraceful => SessionCommand::DisconnectGraceful,
        SessionCommand::ForceDisconnect => SessionCommand::ForceDisconnect,
    }
}

fn session(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    let id: u64 = args
        .first()
        .ok_or_else(|| usage("SESSION <id> PAUSE|DISCONNECT_GRACEFUL|FORCE_DISCONNECT"))?
        .parse()
        .map_err(|_| usage("<id> must be a number"))?;
    let verb = args
        .get(1)
        .ok_or_else(|| usage("SESSION <id> PAUSE|DISCONNECT_GRACEFUL|FORCE_DISCONNECT"))?;

    let handle = state.sessions.get(id).ok_or(ControlError::UnknownSession(id))?;
    let command = match *verb {
        "PAUSE" => SessionCommand::Pause,
        "UNPAUSE" => SessionCommand::Unpause,
        "DISCONNECT_GRACEFUL" => SessionCommand::DisconnectGraceful,
        "FORCE_DISCONNECT" => SessionCommand::ForceDisconnect,
        _ => return Err(usage("SESSION <id> PAUSE|DISCONNECT_GRACEFUL|FORCE_DISCONNECT")),
    };
    let _ = handle.commands.try_send(command);
    Ok(vec!["OK".to_string()])
}

fn conn(state: &Arc<AppState>) -> Vec<String> {
    state
        .sessions
        .all()
        .iter()
        .map(|s| {
            format!(
                "{} peer={} vhost={:?} backend={:?}",
                s.id,
                s.peer_addr,
                s.vhost.lock().unwrap(),
                s.backend.lock().unwrap()
            )
        })
        .collect()
}

fn stat(state: &Arc<AppState>) -> Vec<String> {
    match serde_json::to_string(&state.stats.summary()) {
        Ok(json) => vec![json],
        Err(err) => vec![format!("ERROR {err}")],
    }
}

fn datacenter(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("SET") => {
            let tag = *args.get(1).ok_or_else(|| usage("DATACENTER SET <tag>"))?;
            state.datacenter.set(tag.to_string());
            Ok(vec!["OK".to_string()])
        }
        Some("PRINT") => Ok(vec![state.datacenter.get()]),
        _ => Err(usage("DATACENTER SET|PRINT")),
    }
}

fn limit(state: &Arc<AppState>, args: &[&str]) -> Result<Vec<String>, ControlError> {
    match args.first().copied() {
        Some("DATA_RATE") => {
            let vhost = *args.get(1).ok_or_else(|| usage("LIMIT DATA_RATE <vhost> <bytes_per_sec>"))?;
            let quota: usize = args
                .get(2)
                .ok_or_else(|| usage("LIMIT DATA_RATE <vhost> <bytes_per_sec>"))?
                .parse()
                .map_err(|_| usage("<bytes_per_sec> must be a number"))?;
            state.data_rate_limiters.set_quota(vhost, quota);
            Ok(vec!["OK".to_string()])
        }
        Some("DATA_RATE_ALARM") => {
            let vhost = *args.get(1).ok_or_else(|| usage("LIMIT DATA_RATE_ALARM <vhost> <bytes_per_sec>"))?;
            let threshold: usize = args
                .get(2)
                .ok_or_else(|| usage("LIMIT DATA_RATE_ALARM <vhost> <bytes_per_sec>"))?
                .parse()
                .map_err(|_| usage("<bytes_per_sec> must be a number"))?;
            state.data_rate_limiters.set_alarm_threshold(vhost, threshold);
            Ok(vec!["OK".to_string()])
        }
        Some("CONN_RATE") => {
            let limit: u32 = args
                .get(1)
                .ok_or_else(|| usage("LIMIT CONN_RATE <connections> <window_secs>"))?
                .parse()
                .map_err(|_| usage("<connections> must be a number"))?;
            let window: u32 = args
                .get(2)
                .ok_or_else(|| usage("LIMIT CONN_RATE <connections> <window_secs>"))?
                .parse()
                .map_err(|_| usage("<window_secs> must be a number"))?;
            state.conn_rate_limiter.set_limit(limit, window);
            Ok(vec![state.conn_rate_limiter.describe()])
        }
        Some("CONN_COUNT") => {
            let limit: u32 = args
                .get(1)
                .ok_or_else(|| usage("LIMIT CONN_COUNT <connections>"))?
                .parse()
                .map_err(|_| usage("<connections> must be a number"))?;
            state.total_conn_limiter.set_limit(limit);
            Ok(vec![state.total_conn_limiter.describe()])
        }
        _ => Err(usage("LIMIT CONN_RATE|CONN_COUNT|DATA_RATE|DATA_RATE_ALARM ...")),
    }
}

/// Wakes `run()`'s accept loops so the process actually terminates,
/// mirroring `ExitControlCommand::handleCommand`'s `serverHandle->stop()` +
/// `controlHandle->stop()`.
fn exit(state: &Arc<AppState>) -> Vec<String> {
    state.shutdown.notify_waiters();
    vec!["Exiting.".to_string()]
}

fn help() -> Vec<String> {
    vec![
        "BACKEND ADD|DELETE|PRINT".to_string(),
        "FARM ADD|DELETE|PRINT|SET_SELECTOR|ADD_POLICY".to_string(),
        "MAP VHOST|BACKEND|UNMAP|PRINT|DEFAULT|REMOVE_DEFAULT".to_string(),
        "MAPHOSTNAME DNS".to_string(),
        "VHOST PAUSE|UNPAUSE|FORCE_DISCONNECT|PRINT|BACKEND_DISCONNECT".to_string(),
        "SESSION <id> PAUSE|DISCONNECT_GRACEFUL|FORCE_DISCONNECT".to_string(),
        "CONN".to_string(),
        "LISTEN START|START_SECURE|STOP".to_string(),
        "STAT".to_string(),
        "DATACENTER SET|PRINT".to_string(),
        "LOG CONSOLE|FILE <verbosity>".to_string(),
        "LIMIT CONN_RATE|CONN_COUNT|DATA_RATE|DATA_RATE_ALARM".to_string(),
        "TLS ...".to_string(),
        "AUTH SERVICE|PRINT".to_string(),
        "HELP".to_string(),
        "EXIT".to_string(),
    ]
}

fn usage(msg: &str) -> ControlError {
    ControlError::BadArgs(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqpprox_core::Config;

    fn state() -> Arc<AppState> {
        AppState::new(Config::from_env())
    }

    #[test]
    fn backend_add_then_print_round_trips() {
        let state = state();
        dispatch(&state, "BACKEND ADD b1 127.0.0.1 5672").unwrap();
        let printed = dispatch(&state, "BACKEND PRINT").unwrap();
        assert_eq!(printed.len(), 1);
        assert!(printed[0].starts_with("b1 ->"));
    }

    #[test]
    fn map_vhost_then_unmap_round_trips() {
        let state = state();
        dispatch(&state, "BACKEND ADD b1 127.0.0.1 5672").unwrap();
        dispatch(&state, "FARM ADD f1 round-robin b1").unwrap();
        dispatch(&state, "MAP VHOST / f1").unwrap();
        assert_eq!(
            state.resource_map.resolve("/"),
            Some(Resource::Farm("f1".to_string()))
        );
        dispatch(&state, "MAP UNMAP /").unwrap();
        assert_eq!(state.resource_map.resolve("/"), None);
    }

    #[test]
    fn unknown_verb_is_an_error() {
        let state = state();
        assert!(dispatch(&state, "NONSENSE").is_err());
    }

    #[test]
    fn vhost_pause_round_trips() {
        let state = state();
        dispatch(&state, "VHOST PAUSE /").unwrap();
        assert!(state.vhost_state.is_paused("/"));
        dispatch(&state, "VHOST UNPAUSE /").unwrap();
        assert!(!state.vhost_state.is_paused("/"));
    }
}
