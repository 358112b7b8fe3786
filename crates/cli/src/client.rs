//! UNIX-domain line-protocol client for the control socket, grounded on
//! the teacher's `ServerClient` wrapper style (`cli/src/server_client.rs`)
//! transposed from an HTTP+SSE client to a one-shot UDS line client, per
//! spec.md section 4.5's "one line-oriented command per connection".

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Thin client for the amqpprox control socket: one command in, zero or
/// more response lines out, then the server closes the connection.
pub struct ControlClient {
    socket_path: std::path::PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        ControlClient {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn send(&self, command: &str) -> Result<Vec<String>> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("cannot connect to control socket at {}", self.socket_path.display()))?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        stream
            .write_all(line.as_bytes())
            .await
            .context("failed to write command to control socket")?;
        stream.shutdown().await.ok();

        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let n = reader
                .read_line(&mut buf)
                .await
                .context("failed to read response from control socket")?;
            if n == 0 {
                break;
            }
            lines.push(buf.trim_end_matches(['\r', '\n']).to_string());
        }

        if let Some(first) = lines.first() {
            if let Some(reason) = first.strip_prefix("ERROR ") {
                bail!("{reason}");
            }
        }
        Ok(lines)
    }
}
