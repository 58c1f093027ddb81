#![forbid(unsafe_code)]

use std::{
    ffi::OsStr,
    io::{self, Write},
    os::unix::ffi::OsStrExt,
    process::{self, Command},
};

use crate::cli::{help, BgexecAction, BgexecOptions};
use crate::common::Error;
use crate::exec::{Executor, Host, Outcome, StatusVar, VarStore};
use crate::log::{dev_info, user_error, BgexecLogger};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name the status record is published under unless `--status-var` says otherwise.
const DEFAULT_STATUS_VAR: &str = "status";

/// Keeps variables in memory and runs callbacks as external commands.
struct CommandHost {
    vars: VarStore,
}

impl Host for CommandHost {
    fn set_var(&mut self, name: &str, value: &[u8]) -> Result<(), String> {
        self.vars.set_var(name, value)
    }

    fn eval_callback(&mut self, command: &[String], arg: &[u8]) -> Result<(), String> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let status = Command::new(program)
            .args(args)
            .arg(OsStr::from_bytes(arg))
            .status()
            .map_err(|err| format!("couldn't execute \"{program}\": {err}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("callback \"{}\" failed: {status}", command.join(" ")))
        }
    }

    fn background_error(&mut self, message: &str) {
        user_error!("{message}");
    }
}

/// Exit code carried by a published status record: the pipeline's own code, or 1 if it did not
/// exit by itself.
fn exit_code(record: &str) -> i32 {
    record
        .split_whitespace()
        .nth(2)
        .and_then(|code| code.parse::<i32>().ok())
        .filter(|code| *code >= 0)
        .unwrap_or(1)
}

fn write_output(output: &[u8]) {
    let mut stdout = io::stdout().lock();
    let result = stdout
        .write_all(output)
        .and_then(|()| match output.last() {
            Some(b'\n') | None => Ok(()),
            Some(_) => stdout.write_all(b"\n"),
        })
        .and_then(|()| stdout.flush());
    if let Err(err) = result {
        dev_info!("cannot write output: {err}");
    }
}

fn run(options: &BgexecOptions, argv: &[String]) -> Result<i32, Error> {
    let exec_options = options.exec_options();
    let status_name = options
        .status_var
        .as_deref()
        .unwrap_or(DEFAULT_STATUS_VAR);

    let mut executor = Executor::new(CommandHost {
        vars: VarStore::new(),
    });
    executor.forward_signals()?;

    let code = match executor.run(StatusVar::new(status_name), &exec_options, argv)? {
        Outcome::Foreground(output) => {
            write_output(&output);
            executor
                .host()
                .vars
                .get_str(status_name)
                .map_or(0, |record| exit_code(&record))
        }
        Outcome::Background { job, pids } => {
            let pids: Vec<String> = pids.iter().map(ToString::to_string).collect();
            println_ignore_io_error!("{}", pids.join(" "));
            dev_info!("{job} started, waiting for it to complete");

            executor.run_until_idle()?;

            // Only a cancelled job leaves its status variable untouched.
            let Some(record) = executor.host().vars.get_str(status_name) else {
                return Err(Error::Cancelled(exec_options.kill_signal()));
            };
            eprintln_ignore_io_error!("{record}");
            exit_code(&record)
        }
    };

    executor.shutdown();
    Ok(code)
}

pub fn main() {
    BgexecLogger::new("bgexec: ").into_global_logger();

    dev_info!("development logs are enabled");

    let options = match BgexecOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            eprintln_ignore_io_error!("{e}\n{}", help::USAGE_MSG);
            process::exit(Error::Options(e).exit_code());
        }
    };

    match &options.action {
        BgexecAction::Help => {
            println_ignore_io_error!("{}", help::long_help_message());
            process::exit(0);
        }
        BgexecAction::Version => {
            println_ignore_io_error!("bgexec {VERSION}");
            process::exit(0);
        }
        BgexecAction::Run(argv) => match run(&options, argv) {
            Ok(code) => process::exit(code),
            Err(error) => {
                user_error!("{error}");
                process::exit(error.exit_code());
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{exit_code, CommandHost};
    use crate::exec::{Host, VarStore};

    #[test]
    fn exit_code_from_record() {
        assert_eq!(exit_code("EXITED 12 0 {child completed normally}"), 0);
        assert_eq!(exit_code("EXITED 12 3 {child process exited abnormally}"), 3);
        assert_eq!(exit_code("KILLED 12 -1 SIGTERM"), 1);
        assert_eq!(exit_code("garbage"), 1);
    }

    #[test]
    fn callbacks_run_as_commands() {
        let mut host = CommandHost {
            vars: VarStore::new(),
        };
        let command = vec!["test".to_string(), "chunk".to_string(), "=".to_string()];
        assert_eq!(host.eval_callback(&command, b"chunk"), Ok(()));
        assert!(host.eval_callback(&command, b"other").is_err());
        assert!(host
            .eval_callback(&["no-such-program-anywhere".to_string()], b"")
            .is_err());
    }
}
