use std::process::Stdio;
use std::time::Duration;

use meshrelay_core::config::{QueryAdapterConfig, QueryTypeConfig};
use meshrelay_ipc::{QueryRequest, QueryResponse, QueryStatus};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{QueryAdapterError, Result};

/// Safe-exec primitive for the External Query Adapter (§4.8): every
/// invocation runs a fixed, configured argument vector — never a shell —
/// and is always time-bounded.
pub struct QueryAdapter {
    config: QueryAdapterConfig,
}

impl QueryAdapter {
    pub fn new(config: QueryAdapterConfig) -> Self {
        Self { config }
    }

    fn lookup(&self, query_type: &str) -> Option<(&QueryTypeConfig, bool)> {
        if let Some(entry) = self
            .config
            .read_allowlist
            .iter()
            .find(|e| e.query_type == query_type)
        {
            return Some((entry, false));
        }
        if let Some(entry) = self
            .config
            .write_allowlist
            .iter()
            .find(|e| e.query_type == query_type)
        {
            return Some((entry, true));
        }
        None
    }

    /// Runs an allowlisted query and always returns a response — unknown
    /// types, denied writes, timeouts, and nonzero exits all degrade to
    /// `QueryStatus::Error` instead of propagating (§4.8, §7).
    pub async fn handle(&self, request: &QueryRequest, is_main_group: bool) -> QueryResponse {
        match self.run(request, is_main_group).await {
            Ok(result) => QueryResponse {
                uuid: request.uuid.clone(),
                status: QueryStatus::Ok,
                result,
            },
            Err(e) => {
                warn!(query_type = %request.query_type, error = %e, "query adapter request failed");
                QueryResponse {
                    uuid: request.uuid.clone(),
                    status: QueryStatus::Error,
                    result: serde_json::Value::String(e.to_string()),
                }
            }
        }
    }

    async fn run(&self, request: &QueryRequest, is_main_group: bool) -> Result<serde_json::Value> {
        let (entry, is_write) = self
            .lookup(&request.query_type)
            .ok_or_else(|| QueryAdapterError::UnknownQueryType(request.query_type.clone()))?;

        if is_write && self.config.require_main_group_for_writes && !is_main_group {
            return Err(QueryAdapterError::WriteNotAllowed(request.query_type.clone()));
        }

        let mut cmd = Command::new(&entry.binary);
        cmd.args(&entry.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|source| QueryAdapterError::Spawn { binary: entry.binary.clone(), source })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&request.params)?;
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        }

        // `kill_on_drop` means a timed-out wait drops (and kills) the child
        // rather than leaving it running (§4.8).
        let output = tokio::time::timeout(Duration::from_millis(entry.timeout_ms), child.wait_with_output())
            .await
            .map_err(|_| QueryAdapterError::Timeout { ms: entry.timeout_ms })??;

        if !output.status.success() {
            return Err(QueryAdapterError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(query_type = %request.query_type, "query adapter request succeeded");
        Ok(serde_json::from_slice(&output.stdout).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrelay_ipc::QueryRequest;
    use serde_json::json;

    fn config_with(entry: QueryTypeConfig, is_write: bool) -> QueryAdapterConfig {
        let mut config = QueryAdapterConfig {
            read_allowlist: vec![],
            write_allowlist: vec![],
            require_main_group_for_writes: true,
        };
        if is_write {
            config.write_allowlist.push(entry);
        } else {
            config.read_allowlist.push(entry);
        }
        config
    }

    fn request(query_type: &str) -> QueryRequest {
        QueryRequest {
            uuid: "abc".to_string(),
            query_type: query_type.to_string(),
            params: json!({}),
        }
    }

    #[tokio::test]
    async fn unknown_query_type_degrades_to_error_response() {
        let adapter = QueryAdapter::new(QueryAdapterConfig::default());
        let response = adapter.handle(&request("weather"), true).await;
        assert_eq!(response.status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn write_query_denied_from_non_main_group() {
        let config = config_with(
            QueryTypeConfig {
                query_type: "write_file".to_string(),
                binary: "/bin/true".to_string(),
                args: vec![],
                timeout_ms: 1000,
            },
            true,
        );
        let adapter = QueryAdapter::new(config);
        let response = adapter.handle(&request("write_file"), false).await;
        assert_eq!(response.status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn read_query_runs_fixed_argv_and_captures_stdout() {
        let config = config_with(
            QueryTypeConfig {
                query_type: "echo".to_string(),
                binary: "/bin/echo".to_string(),
                args: vec!["hello".to_string()],
                timeout_ms: 2000,
            },
            false,
        );
        let adapter = QueryAdapter::new(config);
        let response = adapter.handle(&request("echo"), true).await;
        assert_eq!(response.status, QueryStatus::Ok);
        assert_eq!(response.result, json!("hello"));
    }

    #[tokio::test]
    async fn nonexistent_binary_degrades_to_error_response() {
        let config = config_with(
            QueryTypeConfig {
                query_type: "ghost".to_string(),
                binary: "/no/such/binary-xyz".to_string(),
                args: vec![],
                timeout_ms: 1000,
            },
            false,
        );
        let adapter = QueryAdapter::new(config);
        let response = adapter.handle(&request("ghost"), true).await;
        assert_eq!(response.status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn timeout_degrades_to_error_response() {
        let config = config_with(
            QueryTypeConfig {
                query_type: "sleepy".to_string(),
                binary: "/bin/sleep".to_string(),
                args: vec!["5".to_string()],
                timeout_ms: 50,
            },
            false,
        );
        let adapter = QueryAdapter::new(config);
        let response = adapter.handle(&request("sleepy"), true).await;
        assert_eq!(response.status, QueryStatus::Error);
    }
}
