//! Batch command runner for checking a live session end to end.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::reply::{error_message, is_error_reply, preview};
use crate::exit_codes;
use crate::io::client::SessionClient;

/// Characters of each reply shown in the report.
pub const PREVIEW_CHARS: usize = 120;

/// Read-only commands every healthy session answers.
pub const BUILTIN_SMOKE_COMMANDS: &[&str] = &[
    "ping",
    "get_capabilities",
    "get_current_level_name",
    "get_world_settings",
    "get_project_settings",
    "get_live_coding_status",
    "get_engine_path",
    "get_actors_in_level",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SmokeCommand {
    #[serde(rename = "type", alias = "command")]
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeOutcome {
    pub command: String,
    pub ok: bool,
    pub elapsed_ms: u64,
    pub preview: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmokeSummary {
    pub outcomes: Vec<SmokeOutcome>,
}

impl SmokeSummary {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok).count()
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }

    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            exit_codes::OK
        } else {
            exit_codes::FAILURE
        }
    }
}

pub fn builtin_commands() -> Vec<SmokeCommand> {
    BUILTIN_SMOKE_COMMANDS
        .iter()
        .map(|name| SmokeCommand {
            name: (*name).to_string(),
            params: Value::Null,
        })
        .collect()
}

/// Load a JSON array of `{"type": ..., "params": {...}}` objects.
pub fn load_script(path: &Path) -> Result<Vec<SmokeCommand>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let commands: Vec<SmokeCommand> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    if commands.is_empty() {
        bail!("{} contains no commands", path.display());
    }
    Ok(commands)
}

/// Run every command in order. Failures do not stop the batch.
pub fn run_smoke(
    client: &dyn SessionClient,
    commands: &[SmokeCommand],
    timeout: Duration,
    on_result: &mut dyn FnMut(&SmokeOutcome),
) -> SmokeSummary {
    let mut summary = SmokeSummary::default();
    for command in commands {
        let started = Instant::now();
        let (ok, text) = match client.send(&command.name, command.params.clone(), timeout) {
            Ok(reply) if is_error_reply(&reply) => (
                false,
                error_message(&reply).unwrap_or_else(|| reply.to_string()),
            ),
            Ok(reply) => (true, reply.to_string()),
            Err(err) => (false, err.to_string()),
        };
        let outcome = SmokeOutcome {
            command: command.name.clone(),
            ok,
            elapsed_ms: started.elapsed().as_millis() as u64,
            preview: preview(&text, PREVIEW_CHARS),
        };
        debug!(command = %outcome.command, ok, "smoke command finished");
        on_result(&outcome);
        summary.outcomes.push(outcome);
    }
    summary
}
