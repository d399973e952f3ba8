//! Workspace-session shell introspection: port discovery, port kill, and
//! file/line counters for the code tab.
//!
//! All of it runs through the upstream's per-session shell endpoint using
//! the process-wide workspace session. Failures are soft: a listing error
//! yields an empty list, a kill error is logged and swallowed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::upstream::UpstreamClient;

const LIST_PORTS_CMD: &str = "lsof -iTCP -sTCP:LISTEN -P -n";

const STATS_CMD: &str = "FILES=$(find . -type f -not -path './.git/*' -not -path './node_modules/*'); \
echo \"$FILES\" | sed '/^$/d' | wc -l; \
echo \"$FILES\" | sed '/^$/d' | xargs cat 2>/dev/null | wc -l";

/// Delay after a kill so the OS reaps the listener before a re-list.
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// File and line counters for the workspace tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkspaceStats {
    pub files: usize,
    pub lines: usize,
}

pub struct WorkspaceInspector {
    upstream: Arc<UpstreamClient>,
    workspace_session: String,
    denied_ports: BTreeSet<u16>,
}

impl WorkspaceInspector {
    /// `denied_ports` holds the gateway/agent/terminal ports that must
    /// never show up as user application ports.
    pub fn new(
        upstream: Arc<UpstreamClient>,
        workspace_session: impl Into<String>,
        denied_ports: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            upstream,
            workspace_session: workspace_session.into(),
            denied_ports: denied_ports.into_iter().collect(),
        }
    }

    /// Sorted, de-duplicated listening TCP ports in the sandbox, excluding
    /// the deny-list and everything below 1024. Transport errors yield an
    /// empty list.
    pub async fn list_user_ports(&self) -> Vec<u16> {
        let output = match self
            .upstream
            .shell(&self.workspace_session, LIST_PORTS_CMD)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "port listing failed");
                return Vec::new();
            }
        };
        parse_listening_ports(&output)
            .into_iter()
            .filter(|port| *port >= 1024 && !self.denied_ports.contains(port))
            .collect()
    }

    /// Best-effort kill of whatever listens on `port`, then a short sleep
    /// so a follow-up listing sees the freed port.
    pub async fn kill_port(&self, port: u16) {
        let command = format!("kill $(lsof -t -i:{port}) 2>/dev/null || true");
        if let Err(err) = self.upstream.shell(&self.workspace_session, &command).await {
            tracing::warn!(port, error = %err, "port kill failed");
        }
        tokio::time::sleep(KILL_SETTLE).await;
    }

    /// File and line counters for the code tab. Errors degrade to zeros.
    pub async fn workspace_stats(&self) -> WorkspaceStats {
        match self.upstream.shell(&self.workspace_session, STATS_CMD).await {
            Ok(output) => parse_stats(&output),
            Err(err) => {
                tracing::warn!(error = %err, "workspace stats failed");
                WorkspaceStats::default()
            }
        }
    }
}

/// Pull listening ports out of `lsof -iTCP -sTCP:LISTEN -P -n` output.
///
/// The address column looks like `*:3000`, `127.0.0.1:8080`, or
/// `[::1]:5173`; the port is whatever follows the last colon.
fn parse_listening_ports(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter_map(|line| {
            let addr = line
                .split_whitespace()
                .find(|field| field.contains(':'))?;
            addr.rsplit(':').next()?.parse::<u16>().ok()
        })
        .collect()
}

fn parse_stats(output: &str) -> WorkspaceStats {
    let mut numbers = output
        .split_whitespace()
        .filter_map(|field| field.parse::<usize>().ok());
    WorkspaceStats {
        files: numbers.next().unwrap_or(0),
        lines: numbers.next().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LSOF_OUTPUT: &str = "\
COMMAND   PID USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
node     1201 dev   23u  IPv4  91234      0t0  TCP *:3000 (LISTEN)
node     1201 dev   24u  IPv6  91235      0t0  TCP [::1]:3000 (LISTEN)
python   1388 dev    3u  IPv4  93456      0t0  TCP 127.0.0.1:8000 (LISTEN)
sshd        7 root   4u  IPv4    456      0t0  TCP *:22 (LISTEN)
ttyd     1002 dev    5u  IPv4  90001      0t0  TCP *:7681 (LISTEN)
";

    #[test]
    fn parses_sorts_and_dedups_ports() {
        let ports = parse_listening_ports(LSOF_OUTPUT);
        assert_eq!(
            ports.into_iter().collect::<Vec<_>>(),
            vec![22, 3000, 7681, 8000]
        );
    }

    #[test]
    fn header_and_garbage_lines_are_ignored() {
        let ports = parse_listening_ports("COMMAND PID\nnot a port line\n");
        assert!(ports.is_empty());
    }

    #[test]
    fn stats_parse_two_counters() {
        assert_eq!(
            parse_stats("12\n3456\n"),
            WorkspaceStats {
                files: 12,
                lines: 3456
            }
        );
        assert_eq!(parse_stats("garbage"), WorkspaceStats::default());
    }

    fn shell_reply(output: &str) -> serde_json::Value {
        serde_json::json!({
            "parts": [{
                "id": "p1",
                "sessionID": "ws",
                "messageID": "m1",
                "type": "tool",
                "tool": "bash",
                "state": { "status": "completed", "output": output }
            }]
        })
    }

    #[tokio::test]
    async fn user_ports_exclude_denied_and_privileged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/ws/shell"))
            .respond_with(ResponseTemplate::new(200).set_body_json(shell_reply(LSOF_OUTPUT)))
            .mount(&server)
            .await;

        let upstream = Arc::new(UpstreamClient::new(&server.uri()).unwrap());
        let inspector = WorkspaceInspector::new(upstream, "ws", [7681, 8080]);
        assert_eq!(inspector.list_user_ports().await, vec![3000, 8000]);
    }

    #[tokio::test]
    async fn transport_error_yields_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let upstream = Arc::new(UpstreamClient::new(&server.uri()).unwrap());
        let inspector = WorkspaceInspector::new(upstream, "ws", []);
        assert!(inspector.list_user_ports().await.is_empty());
    }

    #[tokio::test]
    async fn kill_port_issues_the_expected_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/ws/shell"))
            .and(body_partial_json(serde_json::json!({
                "command": "kill $(lsof -t -i:3000) 2>/dev/null || true"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(shell_reply("")))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = Arc::new(UpstreamClient::new(&server.uri()).unwrap());
        let inspector = WorkspaceInspector::new(upstream, "ws", []);
        inspector.kill_port(3000).await;
    }
}
