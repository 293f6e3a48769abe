//! Append-only phase log for a single rebuild run.

use std::fmt;

use serde::Serialize;

/// Pipeline phases, including the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreSave,
    Kill,
    WaitPortClose,
    Cleanup,
    Build,
    Relaunch,
    WaitReady,
    Done,
    RelaunchSkipped,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreSave => "pre_save",
            Phase::Kill => "kill",
            Phase::WaitPortClose => "wait_port_close",
            Phase::Cleanup => "cleanup",
            Phase::Build => "build",
            Phase::Relaunch => "relaunch",
            Phase::WaitReady => "wait_ready",
            Phase::Done => "done",
            Phase::RelaunchSkipped => "relaunch_skipped",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::RelaunchSkipped | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub outcome: String,
}

impl fmt::Display for PhaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.phase, self.outcome)
    }
}

/// Ordered audit trail. Records can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RebuildSession {
    records: Vec<PhaseRecord>,
}

impl RebuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: Phase, outcome: impl Into<String>) -> &PhaseRecord {
        self.records.push(PhaseRecord {
            phase,
            outcome: outcome.into(),
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.records.iter().filter(|r| r.phase == phase).count()
    }

    pub fn last(&self) -> Option<&PhaseRecord> {
        self.records.last()
    }

    /// The terminal phase, once the run has reached one.
    pub fn terminal(&self) -> Option<Phase> {
        self.last().map(|r| r.phase).filter(Phase::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_insertion_order() {
        let mut session = RebuildSession::new();
        session.record(Phase::PreSave, "skipped (editor offline)");
        session.record(Phase::Kill, "killed=[]");
        session.record(Phase::Failed, "build tool not found");

        let phases: Vec<Phase> = session.records().iter().map(|r| r.phase).collect();
        assert_eq!(phases, vec![Phase::PreSave, Phase::Kill, Phase::Failed]);
        assert_eq!(session.terminal(), Some(Phase::Failed));
        assert_eq!(session.count(Phase::Kill), 1);
    }

    #[test]
    fn terminal_is_none_mid_run() {
        let mut session = RebuildSession::new();
        session.record(Phase::Build, "rc=0");
        assert_eq!(session.terminal(), None);
        assert_eq!(session.records()[0].to_string(), "build: rc=0");
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut session = RebuildSession::new();
        session.record(Phase::WaitReady, "timeout after 3s");
        let json = serde_json::to_string(&session).expect("serialize");
        assert_eq!(json, r#"[{"phase":"wait_ready","outcome":"timeout after 3s"}]"#);
    }
}
