use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::ops::Dispatcher;
use crate::transport::mcp::handle_message;

/// Serve JSON-RPC over the process's stdin and stdout until stdin closes
pub async fn serve(dispatcher: &Dispatcher) -> io::Result<()> {
    tracing::info!("MCP build server listening on stdio");
    serve_io(dispatcher, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Line-delimited JSON-RPC loop over any reader/writer pair.
///
/// Requests are handled strictly one at a time.
pub async fn serve_io<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed JSON-RPC line");
                continue;
            }
        };

        if let Some(reply) = handle_message(dispatcher, &message).await {
            let mut bytes = serde_json::to_vec(&reply).map_err(io::Error::other)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
