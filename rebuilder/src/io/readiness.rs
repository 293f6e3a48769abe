//! Polling the relaunched editor until it can take commands again.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::reply::{is_error_reply, reply_str};
use crate::core::types::ReadinessStatus;
use crate::io::client::SessionClient;
use crate::io::config::SessionConfig;
use crate::io::kill::ProcessController;

pub const PING_COMMAND: &str = "ping";
pub const LEVEL_COMMAND: &str = "get_current_level_name";

pub struct ReadinessPoller<'a> {
    client: &'a dyn SessionClient,
    processes: Option<&'a ProcessController>,
    probe_timeout: Duration,
    command_timeout: Duration,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(
        client: &'a dyn SessionClient,
        processes: Option<&'a ProcessController>,
        session: &SessionConfig,
    ) -> Self {
        Self {
            client,
            processes,
            probe_timeout: session.probe_timeout(),
            command_timeout: session.command_timeout(),
        }
    }

    /// One fresh snapshot.
    pub fn check_once(&self) -> ReadinessStatus {
        let started = Instant::now();
        let mut status = ReadinessStatus::default();
        self.check(&mut status);
        status.attempts = 1;
        status.elapsed_ms = started.elapsed().as_millis() as u64;
        status
    }

    /// Poll until ready or `timeout` passes. Sleeps exactly `poll_interval` between attempts.
    #[instrument(skip(self), fields(timeout_secs = timeout.as_secs()))]
    pub fn wait_ready(&self, timeout: Duration, poll_interval: Duration) -> ReadinessStatus {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut status = ReadinessStatus::default();
            self.check(&mut status);
            let now = Instant::now();
            status.attempts = attempts;
            status.elapsed_ms = now.duration_since(started).as_millis() as u64;

            if status.overall_ready {
                info!(attempts, elapsed_ms = status.elapsed_ms, "editor ready");
                return status;
            }
            debug!(
                attempts,
                port_open = status.port_open,
                ping = status.ping_acknowledged,
                loaded = status.session_loaded,
                "not ready yet"
            );
            if now >= deadline {
                return status;
            }
            thread::sleep(poll_interval);
        }
    }

    /// Gates in dependency order; the first failing one ends the check.
    fn check(&self, status: &mut ReadinessStatus) {
        match self.processes {
            Some(processes) if processes.can_introspect() => {
                if let Some(handle) = processes.find_running() {
                    status.process_detected = true;
                    status.details.pid = Some(handle.pid);
                }
            }
            _ => {
                status.details.process_note = Some("process introspection unavailable".to_string());
            }
        }

        status.port_open = self.client.is_port_open(self.probe_timeout);
        if !status.port_open {
            status.settle();
            return;
        }

        status.ping_acknowledged = self
            .client
            .send(PING_COMMAND, Value::Null, self.command_timeout)
            .is_ok_and(|reply| !is_error_reply(&reply));
        if !status.ping_acknowledged {
            status.settle();
            return;
        }

        if let Ok(reply) = self
            .client
            .send(LEVEL_COMMAND, Value::Null, self.command_timeout)
            && !is_error_reply(&reply)
            && let Some(level) = reply_str(&reply, "level_name")
        {
            status.session_loaded = true;
            status.details.level_name = Some(level.to_string());
        }
        status.settle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBackend, ScriptedClient};
    use serde_json::json;

    fn session() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn gates_short_circuit_in_order() {
        let client = ScriptedClient::offline();
        let poller = ReadinessPoller::new(&client, None, &session());
        let status = poller.check_once();
        assert!(!status.port_open);
        assert!(!status.ping_acknowledged);
        assert!(!status.overall_ready);
        assert_eq!(client.sent(), Vec::<String>::new());
        assert!(status.details.process_note.is_some());
    }

    #[test]
    fn empty_level_name_is_not_loaded() {
        let client = ScriptedClient::online()
            .reply("get_current_level_name", json!({"status": "success", "result": {"level_name": ""}}));
        let poller = ReadinessPoller::new(&client, None, &session());
        let status = poller.check_once();
        assert!(status.port_open && status.ping_acknowledged);
        assert!(!status.session_loaded);
        assert!(!status.overall_ready);
    }

    #[test]
    fn process_detection_is_advisory() {
        let client = ScriptedClient::online();
        let controller = ProcessController::with_backend(
            Box::new(FakeBackend::running(4242)),
            vec!["UnrealEditor".to_string()],
        );
        let poller = ReadinessPoller::new(&client, Some(&controller), &session());
        let status = poller.check_once();
        assert!(status.process_detected);
        assert_eq!(status.details.pid, Some(4242));
        assert!(status.overall_ready);
        assert_eq!(status.details.level_name.as_deref(), Some("/Game/Maps/Main"));

        let nothing = ProcessController::with_backend(
            Box::new(FakeBackend::default()),
            Vec::new(),
        );
        let poller = ReadinessPoller::new(&client, Some(&nothing), &session());
        let status = poller.check_once();
        assert!(!status.process_detected);
        assert!(status.overall_ready);
    }

    #[test]
    fn becomes_ready_after_some_polls() {
        let client = ScriptedClient::online().port_opens_after(3);
        let poller = ReadinessPoller::new(&client, None, &session());
        let interval = Duration::from_millis(20);
        let status = poller.wait_ready(Duration::from_secs(5), interval);
        assert!(status.overall_ready);
        assert_eq!(status.attempts, 4);
        assert!(status.elapsed() >= interval * 3);
        assert!(status.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn never_ready_times_out_near_deadline() {
        let client = ScriptedClient::offline();
        let poller = ReadinessPoller::new(&client, None, &session());
        let timeout = Duration::from_millis(200);
        let interval = Duration::from_millis(50);
        let status = poller.wait_ready(timeout, interval);
        assert!(!status.overall_ready);
        assert!(status.elapsed() >= timeout);
        assert!(status.elapsed() < timeout + interval * 4);
        assert!(status.attempts >= 4);
    }
}
