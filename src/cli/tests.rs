use std::time::Duration;

use super::{BgexecAction, BgexecOptions};
use crate::exec::{Echo, StreamEncoding};
use pretty_assertions::assert_eq;

fn run_args(options: BgexecOptions) -> Vec<String> {
    match options.action {
        BgexecAction::Run(args) => args,
        action => panic!("expected a command, got {action:?}"),
    }
}

/// Without options everything is the command
#[test]
fn plain_command() {
    let options = BgexecOptions::try_parse_from(["bgexec", "echo", "-n", "hi"]).unwrap();
    assert_eq!(run_args(options), vec!["echo", "-n", "hi"]);
}

/// Pipeline operators after the command are passed through
#[test]
fn pipeline_words_are_kept() {
    let options =
        BgexecOptions::try_parse_from(["bgexec", "-l", "ls", "|", "wc", "-l", "&"]).unwrap();
    assert!(options.line_buffered);
    assert_eq!(run_args(options), vec!["ls", "|", "wc", "-l", "&"]);
}

/// Long options take their value as the next word or after '='
#[test]
fn long_option_values() {
    let options = BgexecOptions::try_parse_from([
        "bgexec",
        "--status-var",
        "done",
        "--poll-interval=25",
        "--kill-signal=INT",
        "--echo",
        "both",
        "sleep",
        "1",
    ])
    .unwrap();
    assert_eq!(options.status_var.as_deref(), Some("done"));
    assert_eq!(options.poll_interval, Some(Duration::from_millis(25)));
    assert_eq!(options.kill_signal, Some(libc::SIGINT));
    assert_eq!(options.echo, Echo::Both);
}

/// Short flags may be clustered, and '-e' takes the rest of the cluster
#[test]
fn short_flag_clusters() {
    let options = BgexecOptions::try_parse_from(["bgexec", "-stkeoutput", "cat"]).unwrap();
    assert!(options.session);
    assert!(options.pty);
    assert!(options.keep_newline);
    assert_eq!(options.echo, Echo::Output);

    let options = BgexecOptions::try_parse_from(["bgexec", "-die", "error", "cat"]).unwrap();
    assert!(options.detach && options.ignore_exit_code);
    assert_eq!(options.echo, Echo::Error);
}

/// Leading assignments and '--env' both end up in the environment list, in order
#[test]
fn environment_assignments() {
    let options = BgexecOptions::try_parse_from([
        "bgexec",
        "A=1",
        "--env",
        "B=two words",
        "--env=A=3",
        "env",
    ])
    .unwrap();
    assert_eq!(
        options.env_var_list,
        vec![
            ("A".to_owned(), "1".to_owned()),
            ("B".to_owned(), "two words".to_owned()),
            ("A".to_owned(), "3".to_owned()),
        ]
    );
    assert_eq!(run_args(options), vec!["env"]);
}

/// Everything after '--' is the command, even when it looks like an option or an assignment
#[test]
fn double_dash_stops_option_processing() {
    let options = BgexecOptions::try_parse_from(["bgexec", "--", "--pty", "X=1"]).unwrap();
    assert!(!options.pty);
    assert!(options.env_var_list.is_empty());
    assert_eq!(run_args(options), vec!["--pty", "X=1"]);
}

/// Callbacks are split into words
#[test]
fn callbacks() {
    let options =
        BgexecOptions::try_parse_from(["bgexec", "--on-output", "logger -t job", "make"]).unwrap();
    assert_eq!(
        options.on_output,
        Some(vec!["logger".to_owned(), "-t".to_owned(), "job".to_owned()])
    );

    let exec = options.exec_options();
    assert_eq!(exec.stdout.callback, options.on_output);
    assert_eq!(exec.stderr.callback, None);
}

#[test]
fn encodings() {
    let options = BgexecOptions::try_parse_from([
        "bgexec",
        "--encode-output=binary",
        "--encode-error",
        "latin1",
        "cat",
    ])
    .unwrap();
    let exec = options.exec_options();
    assert_eq!(exec.stdout.encoding, StreamEncoding::Binary);
    assert_eq!(
        exec.stderr.encoding,
        StreamEncoding::Named(encoding_rs::WINDOWS_1252)
    );

    assert!(BgexecOptions::try_parse_from(["bgexec", "--encode-output=klingon", "cat"]).is_err());
}

#[test]
fn exec_options_defaults() {
    let options = BgexecOptions::try_parse_from(["bgexec", "true"]).unwrap();
    let exec = options.exec_options();
    assert_eq!(exec, crate::exec::ExecOptions::default());
}

#[test]
fn help_and_version() {
    let options = BgexecOptions::try_parse_from(["bgexec", "-h"]).unwrap();
    assert_eq!(options.action, BgexecAction::Help);

    let options = BgexecOptions::try_parse_from(["bgexec", "--version"]).unwrap();
    assert_eq!(options.action, BgexecAction::Version);

    // help wins over a command
    let options = BgexecOptions::try_parse_from(["bgexec", "--help", "ls"]).unwrap();
    assert_eq!(options.action, BgexecAction::Help);
}

#[test]
fn invalid_invocations() {
    for args in [
        &["bgexec"][..],
        &["bgexec", "--pty"],
        &["bgexec", "--nope", "ls"],
        &["bgexec", "-x", "ls"],
        &["bgexec", "--pty=yes", "ls"],
        &["bgexec", "--status-var"],
        &["bgexec", "--poll-interval", "soon", "ls"],
        &["bgexec", "--poll-interval", "0", "ls"],
        &["bgexec", "--kill-signal", "SIGNOPE", "ls"],
        &["bgexec", "--echo", "loud", "ls"],
        &["bgexec", "--env", "=x", "ls"],
        &["bgexec", "--on-error", " ", "ls"],
    ] {
        assert!(
            BgexecOptions::try_parse_from(args.iter().copied()).is_err(),
            "{args:?} should be rejected"
        );
    }
}
