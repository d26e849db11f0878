//! Line-delimited JSON-RPC transport over stdin/stdout.
//!
//! One JSON object per line in, one JSON object per line out. stdout carries
//! only JSON-RPC traffic; all diagnostics go through `tracing` to stderr.

use std::io::{self, BufRead, BufReader, Write};

use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

const FALLBACK_INTERNAL_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal error"}}"#;

#[derive(Default)]
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Drives `server` until stdin closes or a read fails. Parse failures on
    /// a single line produce a JSON-RPC parse-error reply and continue; they
    /// never terminate the loop.
    pub async fn run(self, mut server: McpServer) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout().lock();

        for line in BufReader::new(stdin.lock()).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("stdin read failed: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            debug!(bytes = line.len(), "request line received");

            match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => {
                    if let Some(response) = server.handle_request(request).await {
                        write_response(&mut stdout, &response)?;
                    }
                }
                Err(e) => {
                    warn!("malformed JSON-RPC line: {e}");
                    write_response(&mut stdout, &JsonRpcResponse::error(None, JsonRpcError::parse_error()))?;
                }
            }
        }

        Ok(())
    }
}

fn write_response(out: &mut impl Write, response: &JsonRpcResponse) -> io::Result<()> {
    match serde_json::to_string(response) {
        Ok(json) => {
            writeln!(out, "{json}")?;
            out.flush()
        }
        Err(e) => {
            error!("failed to serialize response, sending fallback: {e}");
            writeln!(out, "{FALLBACK_INTERNAL_ERROR}")?;
            out.flush()
        }
    }
}
