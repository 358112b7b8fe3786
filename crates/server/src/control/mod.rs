//! The local control socket: one line-oriented command per connection,
//! grounded on spec.md section 4.5 and `amqpprox_control.cpp`.

pub mod commands;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Bind the control socket and serve connections until the process exits.
/// Each accepted connection gets exactly one command line, then is closed.
pub async fn serve(state: Arc<AppState>) {
    let path = state.config.control.socket_path.clone();
    let _ = std::fs::remove_file(&path);

    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to bind control socket");
            return;
        }
    };
    info!(path = %path.display(), "control socket listening");

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "control socket accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(state, stream).await {
                warn!(error = %err, "control connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    state: Arc<AppState>,
    stream: tokio::net::UnixStream,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let line = line.trim_end_matches(['\r', '\n']);

    let response = match commands::dispatch(&state, line) {
        Ok(lines) => lines,
        Err(err) => vec![format!("ERROR {err}")],
    };

    for out in response {
        write_half.write_all(out.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    write_half.shutdown().await?;
    Ok(())
}
