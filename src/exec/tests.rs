use std::{fs, thread, time::Duration};

use pretty_assertions::assert_eq;

use super::*;
use crate::common::Error;
use crate::system::{
    kill,
    signal::consts::*,
    wait::{Wait, WaitOptions},
};

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|word| word.to_string()).collect()
}

fn quick() -> ExecOptions {
    ExecOptions {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn background_pids(outcome: Outcome) -> (JobId, Vec<ProcessId>) {
    match outcome {
        Outcome::Background { job, pids } => (job, pids),
        Outcome::Foreground(_) => panic!("expected a background job"),
    }
}

fn wait_until_gone(table: &ProcessTable, pid: ProcessId) {
    for _ in 0..200 {
        table.reap_detached();
        if !table.contains(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("{pid} is still running");
}

#[test]
fn foreground_returns_output() {
    let mut executor = Executor::new(VarStore::new());
    let outcome = executor
        .run(StatusVar::new("status"), &quick(), &argv(&["echo", "hi"]))
        .unwrap();

    assert_eq!(outcome, Outcome::Foreground(b"hi".to_vec()));
    let status = executor.host().get_str("status").unwrap().into_owned();
    assert!(status.starts_with("EXITED "), "{status}");
    assert!(status.ends_with(" 0 {child completed normally}"), "{status}");
}

#[test]
fn abnormal_exit_is_an_error() {
    let mut executor = Executor::new(VarStore::new());
    let result = executor.run(
        StatusVar::new("status"),
        &quick(),
        &argv(&["sh", "-c", "exit 3"]),
    );

    let record = match result {
        Err(Error::ChildStatus(record)) => record,
        other => panic!("unexpected result: {other:?}"),
    };
    assert_eq!(record.kind(), ExitKind::Exited);
    assert_eq!(record.code(), 3);
    assert_eq!(
        executor.host().get_str("status").unwrap(),
        format!("EXITED {} 3 {{child process exited abnormally}}", record.pid())
    );
}

#[test]
fn exit_code_can_be_ignored() {
    let mut executor = Executor::new(VarStore::new());
    let options = ExecOptions {
        ignore_exit_code: true,
        ..quick()
    };
    let outcome = executor
        .run(
            StatusVar::anonymous(),
            &options,
            &argv(&["sh", "-c", "echo out; exit 2"]),
        )
        .unwrap();
    assert_eq!(outcome, Outcome::Foreground(b"out".to_vec()));
}

#[test]
fn background_job_fills_variables() {
    let mut executor = Executor::new(VarStore::new());
    let mut options = quick();
    options.stdout.final_var = Some("out".into());
    options.stderr.final_var = Some("err".into());

    let outcome = executor
        .run(
            StatusVar::new("done"),
            &options,
            &argv(&["sh", "-c", "echo data; echo oops >&2", "&"]),
        )
        .unwrap();
    let (job, pids) = background_pids(outcome);
    assert_eq!(pids.len(), 1);
    assert!(executor.is_running(job));

    executor.run_until_idle().unwrap();
    let host = executor.host();
    assert_eq!(host.get("out"), Some(&b"data"[..]));
    assert_eq!(host.get("err"), Some(&b"oops"[..]));
    assert!(host.get_str("done").unwrap().starts_with("EXITED "));
    assert_eq!(host.history("done").len(), 1);
}

#[test]
fn line_buffered_update_variable() {
    let mut executor = Executor::new(VarStore::new());
    let mut options = ExecOptions {
        line_buffered: true,
        ..quick()
    };
    options.stdout.update_var = Some("line".into());

    executor
        .run(
            StatusVar::anonymous(),
            &options,
            &argv(&["printf", "a\\nb\\n", "&"]),
        )
        .unwrap();
    executor.run_until_idle().unwrap();

    assert_eq!(
        executor.host().history("line"),
        &[b"a".to_vec(), b"b".to_vec()]
    );
}

#[test]
fn environment_overrides() {
    let mut executor = Executor::new(VarStore::new());
    let options = ExecOptions {
        env: vec![("BGEXEC_X".into(), "1".into()), ("BGEXEC_X".into(), "2".into())],
        ..quick()
    };
    let outcome = executor
        .run(
            StatusVar::anonymous(),
            &options,
            &argv(&["sh", "-c", "echo $BGEXEC_X"]),
        )
        .unwrap();
    assert_eq!(outcome, Outcome::Foreground(b"2".to_vec()));
}

#[test]
fn cancelling_kills_the_pipeline() {
    let mut executor = Executor::new(VarStore::new());
    let mut options = quick();
    options.stdout.update_var = Some("tick".into());

    let status = StatusVar::new("status");
    let token = status.token();
    let outcome = executor
        .run(
            status,
            &options,
            &argv(&["sh", "-c", "while :; do echo tick; sleep 0.05; done", "&"]),
        )
        .unwrap();
    let (job, pids) = background_pids(outcome);

    while executor.host().history("tick").is_empty() {
        executor.do_one_event().unwrap();
    }

    token.cancel();
    executor.do_one_event().unwrap();
    assert!(!executor.is_running(job));

    let (_, wait_status) = pids[0].wait(WaitOptions::new()).unwrap();
    assert_eq!(wait_status.term_signal(), Some(SIGTERM));

    let ticks = executor.host().history("tick").len();
    thread::sleep(Duration::from_millis(100));
    for _ in 0..3 {
        executor.do_one_event().unwrap();
    }
    assert_eq!(executor.host().history("tick").len(), ticks);
    // A cancelled job does not publish its status.
    assert_eq!(executor.host().get("status"), None);
}

/// Cancels the job as soon as the first line arrives, the way a callback writing to the status
/// variable would.
struct CancelOnOutput {
    store: VarStore,
    token: CancelToken,
}

impl Host for CancelOnOutput {
    fn set_var(&mut self, name: &str, value: &[u8]) -> Result<(), String> {
        self.token.cancel();
        self.store.set_var(name, value)
    }

    fn eval_callback(&mut self, command: &[String], arg: &[u8]) -> Result<(), String> {
        self.store.eval_callback(command, arg)
    }

    fn background_error(&mut self, message: &str) {
        self.store.background_error(message)
    }
}

#[test]
fn foreground_job_cancelled_from_a_notification() {
    let status = StatusVar::new("status");
    let mut executor = Executor::new(CancelOnOutput {
        store: VarStore::new(),
        token: status.token(),
    });
    let mut options = quick();
    options.stdout.update_var = Some("line".into());

    let result = executor.run(
        status,
        &options,
        &argv(&["sh", "-c", "echo first; sleep 5"]),
    );
    assert!(matches!(result, Err(Error::Cancelled(SIGTERM))), "{result:?}");
    assert_eq!(executor.host().store.get("status"), None);
}

#[test]
fn lines_after_a_cancelling_notification_are_dropped() {
    let status = StatusVar::new("status");
    let mut executor = Executor::new(CancelOnOutput {
        store: VarStore::new(),
        token: status.token(),
    });
    let mut options = ExecOptions {
        line_buffered: true,
        ..quick()
    };
    options.stdout.update_var = Some("line".into());

    let result = executor.run(
        status,
        &options,
        &argv(&["sh", "-c", "printf 'a\\nb\\nc\\n'; sleep 5"]),
    );
    assert!(matches!(result, Err(Error::Cancelled(SIGTERM))), "{result:?}");
    assert_eq!(executor.host().store.history("line"), &[b"a".to_vec()]);
}

#[test]
fn fully_redirected_pipeline_is_polled() {
    let path = std::env::temp_dir().join(format!("bgexec-redirect-{}", std::process::id()));
    let mut executor = Executor::new(VarStore::new());

    let outcome = executor
        .run(
            StatusVar::new("status"),
            &quick(),
            &argv(&["sh", "-c", "echo x; echo y >&2", ">&", path.to_str().unwrap()]),
        )
        .unwrap();

    assert_eq!(outcome, Outcome::Foreground(Vec::new()));
    assert_eq!(fs::read_to_string(&path).unwrap(), "x\ny\n");
    assert!(executor.host().get("status").is_some());
    fs::remove_file(path).unwrap();
}

#[test]
fn pty_output_loses_carriage_returns() {
    let mut executor = Executor::new(VarStore::new());
    let options = ExecOptions { pty: true, ..quick() };
    let outcome = executor
        .run(StatusVar::anonymous(), &options, &argv(&["printf", "a\\nb\\n"]))
        .unwrap();
    assert_eq!(outcome, Outcome::Foreground(b"a\nb".to_vec()));
}

#[test]
fn session_cancellation_reaches_the_leader() {
    let mut executor = Executor::new(VarStore::new());
    let options = ExecOptions {
        session: true,
        ..quick()
    };
    let status = StatusVar::anonymous();
    let token = status.token();
    let outcome = executor
        .run(status, &options, &argv(&["sleep", "30", "&"]))
        .unwrap();
    let (_, pids) = background_pids(outcome);

    token.cancel();
    executor.do_one_event().unwrap();

    let (_, wait_status) = pids[0].wait(WaitOptions::new()).unwrap();
    assert_eq!(wait_status.term_signal(), Some(SIGHUP));
}

#[test]
fn shutdown_spares_detached_jobs() {
    let table = ProcessTable::new();
    let mut executor = Executor::with_table(VarStore::new(), table.clone());

    let (_, attached) = background_pids(
        executor
            .run(StatusVar::anonymous(), &quick(), &argv(&["sleep", "30", "&"]))
            .unwrap(),
    );
    let detached_options = ExecOptions {
        detach: true,
        ..quick()
    };
    let (_, detached) = background_pids(
        executor
            .run(
                StatusVar::anonymous(),
                &detached_options,
                &argv(&["sleep", "30", "&"]),
            )
            .unwrap(),
    );

    executor.shutdown();
    assert_eq!(executor.running_jobs(), 0);

    wait_until_gone(&table, attached[0]);
    assert!(table.contains(detached[0]));
    assert!(kill(detached[0], 0).is_ok());

    kill(detached[0], SIGKILL).unwrap();
    wait_until_gone(&table, detached[0]);
}

#[test]
fn foreground_wait_serves_background_jobs() {
    let mut executor = Executor::new(VarStore::new());
    let mut options = quick();
    options.stdout.final_var = Some("bg".into());
    executor
        .run(
            StatusVar::new("bg_status"),
            &options,
            &argv(&["echo", "background", "&"]),
        )
        .unwrap();

    let outcome = executor
        .run(
            StatusVar::anonymous(),
            &quick(),
            &argv(&["sh", "-c", "sleep 0.2; echo foreground"]),
        )
        .unwrap();
    assert_eq!(outcome, Outcome::Foreground(b"foreground".to_vec()));
    assert_eq!(executor.host().get("bg"), Some(&b"background"[..]));
    assert!(executor.host().get("bg_status").is_some());
}

#[test]
fn launch_failures() {
    let mut executor = Executor::new(VarStore::new());
    let result = executor.run(
        StatusVar::new("status"),
        &quick(),
        &argv(&["no-such-program-anywhere"]),
    );
    assert!(matches!(result, Err(Error::Spawn { .. })), "{result:?}");

    let result = executor.run(StatusVar::anonymous(), &quick(), &argv(&["|", "wc"]));
    assert!(matches!(result, Err(Error::Pipeline(_))), "{result:?}");

    assert_eq!(executor.host().get("status"), None);
    assert_eq!(executor.running_jobs(), 0);
}
