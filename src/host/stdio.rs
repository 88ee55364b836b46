//! Stdin/stdout JSON bridge for the scheduler host.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through a [`CommandHandler`], and writes one
//! `ResponseEnvelope` per line to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use super::handler::CommandHandler;
use crate::error::{Result, YumeError};

/// Why the bridge loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// Input reached end of file.
    Eof,
    /// A `runtime.stop` command was handled.
    StopRequested,
}

/// Run the bridge on the process's stdin/stdout.
pub async fn run_stdio_bridge(handler: CommandHandler) -> Result<BridgeExit> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::BufWriter::new(tokio::io::stdout());
    run_bridge(handler, reader, writer).await
}

/// Run the bridge over arbitrary line-oriented streams.
pub async fn run_bridge<R, W>(handler: CommandHandler, mut reader: R, mut writer: W) -> Result<BridgeExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| YumeError::Channel(format!("failed to read command: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); shutting down bridge");
            return Ok(BridgeExit::Eof);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::RuntimeStop;
        let response = handler.handle(envelope).await;
        write_response(&mut writer, &response).await?;

        if is_stop && response.ok {
            tracing::info!("runtime.stop received; shutting down bridge");
            return Ok(BridgeExit::StopRequested);
        }
    }
}

/// Write one response as a JSON line and flush.
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &ResponseEnvelope) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| YumeError::Channel(format!("failed to serialize response: {e}")))?;
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| YumeError::Channel(format!("failed to write response: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| YumeError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| YumeError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
