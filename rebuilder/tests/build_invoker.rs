//! Build invoker tests against stub build scripts.
//!
//! The stubs ignore their arguments and only shape exit codes and output, so
//! they exercise spawning, draining and tail capping for real.
#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use rebuilder::core::types::{BuildConfiguration, BuildOutcome, BuildRequest};
use rebuilder::io::build::{BuildInvocation, BuildRunner, ToolBuildInvoker};
use rebuilder::test_support::write_script;

fn invocation(tool: &Path, timeout: Duration) -> BuildInvocation {
    let project = tool.with_file_name("Stub.uproject");
    BuildInvocation {
        tool: tool.to_path_buf(),
        request: BuildRequest::new(
            None,
            Some(&project),
            BuildConfiguration::Development,
            Some("Linux"),
            None,
        ),
        project_file: Some(project),
        timeout,
        tail_chars: 3000,
    }
}

#[test]
fn zero_exit_is_success() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tool = write_script(temp.path(), "Build.sh", "echo \"building $1\"\nexit 0");

    let result = ToolBuildInvoker
        .run(&invocation(&tool, Duration::from_secs(30)))
        .expect("build runs");

    assert!(result.success());
    assert_eq!(result.return_code(), Some(0));
    assert!(!result.timed_out());
    assert!(result.stdout_tail.contains("building StubEditor"));
    assert_eq!(result.command[1], "StubEditor");
}

#[test]
fn nonzero_exit_keeps_tool_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tool = write_script(temp.path(), "Build.sh", "echo 'compile error' >&2\nexit 2");

    let result = ToolBuildInvoker
        .run(&invocation(&tool, Duration::from_secs(30)))
        .expect("build runs");

    assert!(!result.success());
    assert_eq!(result.outcome, BuildOutcome::Exited { code: 2 });
    assert!(result.stderr_tail.contains("compile error"));
}

#[test]
fn long_output_is_capped_to_the_tail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = "yes ab | head -n 5000 | tr -d '\\n'\n\
                printf END\n\
                yes cd | head -n 5000 | tr -d '\\n' >&2\n\
                printf END >&2\n\
                exit 0";
    let tool = write_script(temp.path(), "Build.sh", body);

    let result = ToolBuildInvoker
        .run(&invocation(&tool, Duration::from_secs(30)))
        .expect("build runs");

    assert!(result.success());
    assert_eq!(result.stdout_tail.chars().count(), 3000);
    assert_eq!(result.stderr_tail.chars().count(), 3000);
    assert!(result.stdout_tail.ends_with("abEND"));
    assert!(result.stderr_tail.ends_with("cdEND"));
}

#[test]
fn hung_tool_times_out() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tool = write_script(temp.path(), "Build.sh", "exec sleep 5");

    let result = ToolBuildInvoker
        .run(&invocation(&tool, Duration::from_millis(200)))
        .expect("build runs");

    assert!(result.timed_out());
    assert_eq!(result.return_code(), None);
    assert!(!result.success());
}

#[test]
fn timeout_also_stops_tools_that_fork() {
    let temp = tempfile::tempdir().expect("tempdir");
    // No `exec`: the shell forks `sleep`, which inherits the output pipes.
    let tool = write_script(temp.path(), "Build.sh", "echo compiling\nsleep 6\nexit 0");

    let started = Instant::now();
    let result = ToolBuildInvoker
        .run(&invocation(&tool, Duration::from_millis(300)))
        .expect("build runs");

    assert!(result.timed_out());
    assert!(!result.success());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "returned after {:?}",
        started.elapsed()
    );
    assert!(result.stdout_tail.contains("compiling"));
}

#[test]
fn missing_tool_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = ToolBuildInvoker
        .run(&invocation(
            &temp.path().join("Build.sh"),
            Duration::from_secs(1),
        ))
        .unwrap_err();
    assert!(err.to_string().contains("build tool not found"));
}
