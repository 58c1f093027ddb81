use std::{
    collections::HashMap,
    ffi::c_int,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::Path,
    process::{self, Command, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
};

use super::{
    options::ProcessClass,
    pipeline::{Input, Output, Pipeline, Stage},
    reaper::ProcessGroup,
    table::ProcessTable,
};
use crate::common::Error;
use crate::log::{dev_info, dev_warn};
use crate::system::{
    _exit, dup2, fork,
    interface::ProcessId,
    killpg, pipe, set_nonblocking, setsid,
    signal::{consts::*, reset_to_default, SignalNumber, SignalSet},
    term::{Pty, Terminal},
    wait::{Wait, WaitError, WaitOptions},
    FileCloser, ForkResult,
};

/// A running pipeline and the read ends of its collected streams.
pub(crate) struct Launched {
    pub(crate) group: ProcessGroup,
    pub(crate) stdout: Option<File>,
    pub(crate) stderr: Option<File>,
}

/// Where the ends of the pipeline are connected, from the point of view of the pipeline.
struct Ends {
    /// `None` inherits our standard input.
    stdin: Option<File>,
    stdout: File,
    stderr: File,
    /// Follower side of the pseudo-terminal.
    terminal: Option<File>,
}

/// Launch `pipeline` in the given process class.
///
/// The returned read ends are non-blocking. On failure every process started so far is killed
/// with `signal` and handed to `table`.
pub(crate) fn launch(
    class: ProcessClass,
    pipeline: &Pipeline,
    env: &HashMap<String, String>,
    signal: SignalNumber,
    table: &ProcessTable,
) -> Result<Launched, Error> {
    let (ends, stdout, stderr) = connect(class, pipeline)?;

    let pids = match class {
        ProcessClass::Plain => launch_plain(&pipeline.stages, env, ends, signal, table)?,
        ProcessClass::Session | ProcessClass::Pty => {
            vec![launch_session(&pipeline.stages, env, ends, table)?]
        }
    };
    dev_info!("launched {class:?} pipeline {pids:?}");

    for source in stdout.iter().chain(stderr.iter()) {
        set_nonblocking(source)?;
    }

    Ok(Launched {
        group: ProcessGroup::new(class, pids),
        stdout,
        stderr,
    })
}

/// Open everything the pipeline reads from and writes to, returning our read ends alongside.
fn connect(
    class: ProcessClass,
    pipeline: &Pipeline,
) -> Result<(Ends, Option<File>, Option<File>), Error> {
    let stdin = match &pipeline.stdin {
        Input::Inherit => None,
        Input::File(path) => {
            Some(File::open(path).map_err(|err| Error::Io(Some(path.clone()), err))?)
        }
        Input::Literal(text) => Some(literal_input(text)?),
    };

    let (terminal, leader) = if class == ProcessClass::Pty {
        let Pty {
            path,
            leader,
            follower,
        } = Pty::open()?;
        dev_info!("allocated pty {}", path.to_string_lossy());
        (Some(follower), Some(leader))
    } else {
        (None, None)
    };

    let (stdout_source, stdout) = match (&pipeline.stdout, leader, &terminal) {
        (Output::File { path, append }, _, _) => (None, open_output(path, *append)?),
        (_, Some(leader), Some(follower)) => (Some(leader), follower.try_clone()?),
        _ => {
            let (rx, tx) = pipe()?;
            (Some(rx), tx)
        }
    };

    let (stderr_source, stderr) = match &pipeline.stderr {
        Output::Collect => {
            let (rx, tx) = pipe()?;
            (Some(rx), tx)
        }
        Output::File { path, append } => (None, open_output(path, *append)?),
        Output::Stdout => (None, stdout.try_clone()?),
    };

    let ends = Ends {
        stdin,
        stdout,
        stderr,
        terminal,
    };
    Ok((ends, stdout_source, stderr_source))
}

fn open_output(path: &Path, append: bool) -> Result<File, Error> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|err| Error::Io(Some(path.to_path_buf()), err))
}

/// An unlinked temporary file holding `text`, positioned at its start.
fn literal_input(text: &str) -> io::Result<File> {
    static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

    let path = std::env::temp_dir().join(format!(
        "bgexec-input-{}-{}",
        process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    fs::remove_file(&path)?;

    file.write_all(text.as_bytes())?;
    file.rewind()?;
    Ok(file)
}

/// Spawn the stages connected by pipes, pushing each pid to `pids` as it starts.
fn spawn_stages(
    stages: &[Stage],
    env: &HashMap<String, String>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: &dyn Fn() -> io::Result<Stdio>,
    pids: &mut Vec<ProcessId>,
) -> Result<(), Error> {
    let mut input = Some(stdin);
    let mut output = Some(stdout);

    for (index, stage) in stages.iter().enumerate() {
        let (program, args) = stage
            .argv
            .split_first()
            .ok_or_else(|| Error::Pipeline("empty pipeline stage".into()))?;

        let (stage_stdout, stage_stderr, next) = if index + 1 == stages.len() {
            (output.take().unwrap_or_else(Stdio::null), stderr()?, None)
        } else {
            let (rx, tx) = pipe()?;
            let stage_stderr = if stage.pipe_stderr {
                Stdio::from(tx.try_clone()?)
            } else {
                stderr()?
            };
            (Stdio::from(tx), stage_stderr, Some(Stdio::from(rx)))
        };

        let child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(input.take().unwrap_or_else(Stdio::null))
            .stdout(stage_stdout)
            .stderr(stage_stderr)
            .spawn()
            .map_err(|error| Error::Spawn {
                command: program.clone(),
                error,
            })?;
        pids.push(ProcessId::from(child.id()));

        input = next;
    }

    Ok(())
}

fn launch_plain(
    stages: &[Stage],
    env: &HashMap<String, String>,
    ends: Ends,
    signal: SignalNumber,
    table: &ProcessTable,
) -> Result<Vec<ProcessId>, Error> {
    let Ends {
        stdin,
        stdout,
        stderr,
        terminal: _,
    } = ends;

    let mut pids = Vec::with_capacity(stages.len());
    let result = spawn_stages(
        stages,
        env,
        stdin.map_or_else(Stdio::inherit, Stdio::from),
        Stdio::from(stdout),
        &|| stderr.try_clone().map(Stdio::from),
        &mut pids,
    );

    if let Err(err) = result {
        let mut group = ProcessGroup::new(ProcessClass::Plain, pids);
        group.kill(signal);
        group.detach(table);
        return Err(err);
    }

    Ok(pids)
}

fn launch_session(
    stages: &[Stage],
    env: &HashMap<String, String>,
    ends: Ends,
    table: &ProcessTable,
) -> Result<ProcessId, Error> {
    // Anything the leader writes here before exiting is a startup error.
    let (mut errors_rx, errors_tx) = pipe()?;

    // SAFETY: the leader allocates and spawns the stages with `Command` without calling `exec`
    // first, which is only sound while this process has a single thread. With other threads
    // running (a test harness for instance) the leader can deadlock on a lock one of them held
    // at the time of the fork.
    let ForkResult::Parent(leader) = (unsafe { fork() })? else {
        drop(errors_rx);
        _exit(lead(stages, env, ends, errors_tx));
    };

    drop(errors_tx);
    drop(ends);

    let mut message = Vec::new();
    errors_rx.read_to_end(&mut message)?;

    if !message.is_empty() {
        if let Err(err) = killpg(leader, SIGKILL) {
            dev_info!("cannot kill process group of {leader}: {err}");
        }
        table.detach([leader]);
        let message = String::from_utf8_lossy(&message);
        return Err(Error::Startup(message.trim_end().to_string()));
    }

    Ok(leader)
}

/// Body of the session leader. Returns its exit code.
fn lead(
    stages: &[Stage],
    env: &HashMap<String, String>,
    ends: Ends,
    mut errors: File,
) -> c_int {
    let mut pids = Vec::with_capacity(stages.len());
    if let Err(err) = start_session(stages, env, ends, &errors, &mut pids) {
        // There is nobody to report to if this fails.
        let _ = errors.write_all(err.to_string().as_bytes());
        return 1;
    }
    drop(errors);

    wait_all(&pids)
}

fn start_session(
    stages: &[Stage],
    env: &HashMap<String, String>,
    ends: Ends,
    errors: &File,
    pids: &mut Vec<ProcessId>,
) -> Result<(), Error> {
    // The parent may stream these into its own socket; the leader has to die from them.
    reset_to_default(&[SIGINT, SIGTERM, SIGHUP, SIGQUIT, SIGPIPE, SIGCHLD])?;
    SignalSet::empty()?.set_mask()?;

    setsid()?;

    let Ends {
        stdin,
        stdout,
        stderr,
        terminal,
    } = ends;

    if let Some(terminal) = &terminal {
        terminal.make_controlling_terminal()?;
        dup2(terminal, libc::STDIN_FILENO)?;
    }
    dup2(&stdout, libc::STDOUT_FILENO)?;
    dup2(&stderr, libc::STDERR_FILENO)?;
    drop((stdout, stderr, terminal));

    let mut closer = FileCloser::new();
    closer.except(errors);
    if let Some(stdin) = &stdin {
        closer.except(stdin);
    }
    closer.close_the_universe()?;

    spawn_stages(
        stages,
        env,
        stdin.map_or_else(Stdio::inherit, Stdio::from),
        Stdio::inherit(),
        &|| Ok(Stdio::inherit()),
        pids,
    )
}

/// Wait for every stage, returning the exit code of the last one.
fn wait_all(pids: &[ProcessId]) -> c_int {
    let mut code = 0;
    for pid in pids {
        loop {
            match pid.wait(WaitOptions::new()) {
                Ok((_, status)) => {
                    if let Some(exit_code) = status.exit_status() {
                        code = exit_code;
                    } else if let Some(signal) = status.term_signal() {
                        code = 128 + signal;
                    }
                    break;
                }
                Err(WaitError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    dev_warn!("cannot wait for {pid}: {err:?}");
                    break;
                }
            }
        }
    }
    code
}
