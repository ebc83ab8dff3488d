//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! One request per line, one response per line. Notifications produce no
//! output. Logging must go to stderr in this mode.

use crate::mcp::{McpHandler, ToolRegistry};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Serve requests from `reader` until end of input.
pub async fn serve<R, W>(registry: &ToolRegistry, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Serving MCP on stdio");
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = McpHandler::handle_message(registry, line.as_bytes()).await else {
            continue;
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    debug!("stdin closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::query::{QueryEngine, QueryLimits};
    use serde_json::Value;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(
            QueryEngine::mock(QueryLimits::default()),
            Config::default().effective(),
        )
    }

    async fn run(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(&registry(), input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let input = concat!(
            r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#,
            "\n",
            r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#,
            "\n",
            "\n",
            r#"{"jsonrpc": "2.0", "id": 2, "method": "tools/list"}"#,
            "\n",
        );
        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_the_loop() {
        let input = "garbage\n{\"id\": 9, \"method\": \"ping\"}";
        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["id"], 9);
    }
}
