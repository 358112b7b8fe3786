//! The amqpprox daemon's module tree, exposed as a library so integration
//! tests can drive a full session over a loopback socket. `main.rs` is a
//! thin CLI wrapper around [`run`].

pub mod app_config;
pub mod connector;
pub mod control;
pub mod framing;
pub mod process_stats;
pub mod proxy_protocol;
pub mod session;
pub mod splice;
pub mod state;
pub mod stats;

use std::sync::Arc;

use amqpprox_core::Config;
use tokio::net::TcpListener;
use tracing::{error, info};

use state::AppState;
use stats::{LogEmitter, StatsEmitter};

/// Build an [`AppState`], seed its routing tables, bind the client listener
/// and control socket, and serve forever.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config);
    seed_routing(&state);

    let listen_addr = format!("{}:{}", state.config.listen.bind_address, state.config.listen.port);
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "listening for AMQP clients");

    tokio::spawn(control::serve(state.clone()));
    tokio::spawn(emit_stats_periodically(state.clone()));

    serve_clients(state, listener).await;
    info!("shutdown complete, exiting");
    Ok(())
}

/// Accept loop factored out so tests can drive it against a pre-bound
/// listener without going through [`run`]'s control-socket/stats wiring.
/// Returns once the `EXIT` control verb notifies `state.shutdown`, so
/// `run()` can return and the process actually terminate.
pub async fn serve_clients(state: Arc<AppState>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = state.shutdown.notified() => {
                info!("EXIT requested, stopping client accept loop");
                return;
            }
            accepted = listener.accept() => {
                let (client, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(error = %err, "accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    session::run(state, client, peer_addr).await;
                });
            }
        }
    }
}

/// Apply the seed backends/farms/mappings named in `RoutingConfig`, mirroring
/// the control-socket verbs so a fixed topology can be supplied purely via
/// environment/profile configuration. Entries are colon-separated
/// (`name:host:port[:datacenter]`, `farm:selector:backend1,backend2,...`,
/// `vhost:farm-or-backend`); each is translated into the equivalent
/// space-separated control command before dispatch.
pub fn seed_routing(state: &Arc<AppState>) {
    for line in &state.config.routing.seed_backends {
        let fields: Vec<&str> = line.split(':').collect();
        let command = format!("BACKEND ADD {}", fields.join(" "));
        match control::commands::dispatch(state, &command) {
            Ok(lines) => {
                for line in lines {
                    info!(%line, "seed backend");
                }
            }
            Err(err) => error!(error = %err, line, "failed to seed backend"),
        }
    }
    for line in &state.config.routing.seed_farms {
        let fields: Vec<&str> = line.splitn(3, ':').collect();
        let command = format!("FARM ADD {}", fields.join(" "));
        match control::commands::dispatch(state, &command) {
            Ok(lines) => {
                for line in lines {
                    info!(%line, "seed farm");
                }
            }
            Err(err) => error!(error = %err, line, "failed to seed farm"),
        }
    }
    for line in &state.config.routing.seed_mappings {
        let fields: Vec<&str> = line.splitn(2, ':').collect();
        let command = format!("MAP VHOST {}", fields.join(" "));
        match control::commands::dispatch(state, &command) {
            Ok(lines) => {
                for line in lines {
                    info!(%line, "seed mapping");
                }
            }
            Err(err) => error!(error = %err, line, "failed to seed mapping"),
        }
    }
}

async fn emit_stats_periodically(state: Arc<AppState>) {
    let interval = std::time::Duration::from_secs(state.config.session.stats_interval_secs.max(1));
    let emitter = LogEmitter;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        state.stats.sample_process();
        emitter.emit(&state.stats.summary()).await;
    }
}
