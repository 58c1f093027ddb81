use std::io::{self, Write};

use super::{
    cancel::CancelToken,
    host::Host,
    sink::{Chunk, ReadStatus, Sink, SinkKind},
};
use crate::common::Error;
use crate::log::dev_warn;

/// What a readiness notification left the sink in.
#[derive(Debug)]
pub(crate) enum Collected {
    /// The stream is still open.
    Pending,
    /// The stream reached end of file.
    Closed,
    /// Reading or cooking failed; the stream should be closed.
    Failed(Error),
}

/// Pull whatever is readable from `sink` and tell the host about it.
///
/// Deliveries stop as soon as `token` has a pending cancellation, even halfway through a batch of
/// lines.
pub(crate) fn collect<H: Host>(sink: &mut Sink, host: &mut H, token: &CancelToken) -> Collected {
    if !sink.collects_all() {
        sink.reset();
    }

    sink.read_bytes();
    if let Err(err) = sink.cook() {
        return Collected::Failed(err);
    }

    if sink.options().notifies() {
        notify(sink, host, token);
    }

    match sink.status() {
        ReadStatus::Count(_) | ReadStatus::Again => Collected::Pending,
        ReadStatus::Eof => Collected::Closed,
        ReadStatus::Error => Collected::Failed(Error::Stream(
            sink.take_error()
                .unwrap_or_else(|| io::ErrorKind::Other.into()),
        )),
    }
}

fn notify<H: Host>(sink: &mut Sink, host: &mut H, token: &CancelToken) {
    if sink.is_line_buffered() {
        while !token.is_pending() {
            let Some(chunk) = sink.next_line() else {
                break;
            };
            deliver(sink, &chunk, host, token);
        }
        // An unterminated last line is still a line.
        if sink.is_finished() && !token.is_pending() {
            if let Some(chunk) = sink.next_block() {
                deliver(sink, &chunk, host, token);
            }
        }
    } else if let Some(chunk) = sink.next_block() {
        deliver(sink, &chunk, host, token);
    }
}

fn deliver<H: Host>(sink: &Sink, chunk: &Chunk, host: &mut H, token: &CancelToken) {
    let options = sink.options();
    let value = sink.bytes(chunk.value.clone());

    if options.echo {
        echo(sink.kind(), sink.bytes(chunk.full.clone()));
    }

    if let Some(command) = &options.callback {
        if let Err(err) = host.eval_callback(command, value) {
            host.background_error(&err);
        }
    }

    if token.is_pending() {
        return;
    }

    if let Some(name) = &options.update_var {
        if let Err(err) = host.set_var(name, value) {
            host.background_error(&err);
        }
    }
}

fn echo(kind: SinkKind, data: &[u8]) {
    let result = match kind {
        SinkKind::Stdout => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data).and_then(|()| stdout.flush())
        }
        SinkKind::Stderr => io::stderr().lock().write_all(data),
    };
    if let Err(err) = result {
        dev_warn!("cannot echo {kind:?}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::exec::{ExecOptions, StatusVar, VarStore};
    use crate::system::{pipe, set_nonblocking};
    use pretty_assertions::assert_eq;

    #[test]
    fn line_buffered_updates_once_per_line() {
        let mut options = ExecOptions {
            line_buffered: true,
            ..Default::default()
        };
        options.stdout.update_var = Some("line".into());
        options.stdout.callback = Some(vec!["log".into(), "-v".into()]);

        let (rx, mut tx) = pipe().unwrap();
        set_nonblocking(&rx).unwrap();
        let mut sink = Sink::new(SinkKind::Stdout, &options, false);
        sink.attach(rx);
        let mut host = VarStore::new();

        tx.write_all(b"first\nsec").unwrap();
        assert!(matches!(collect(&mut sink, &mut host, &CancelToken::new()), Collected::Pending));
        assert_eq!(host.history("line"), &[b"first".to_vec()]);

        tx.write_all(b"ond\n").unwrap();
        drop(tx);
        assert!(matches!(collect(&mut sink, &mut host, &CancelToken::new()), Collected::Closed));
        assert_eq!(host.history("line"), &[b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(host.callbacks().len(), 2);
        assert_eq!(host.callbacks()[1].0, vec!["log".to_string(), "-v".to_string()]);
    }

    #[test]
    fn blocks_are_delivered_whole() {
        let mut options = ExecOptions::default();
        options.stderr.update_var = Some("err".into());

        let (rx, mut tx) = pipe().unwrap();
        set_nonblocking(&rx).unwrap();
        let mut sink = Sink::new(SinkKind::Stderr, &options, false);
        sink.attach(rx);
        let mut host = VarStore::new();

        tx.write_all(b"a\nb\n").unwrap();
        drop(tx);
        assert!(matches!(collect(&mut sink, &mut host, &CancelToken::new()), Collected::Closed));
        assert_eq!(host.get("err"), Some(&b"a\nb"[..]));
    }

    /// Cancels through `token` on its first variable assignment.
    struct CancelOnAssign {
        store: VarStore,
        token: CancelToken,
    }

    impl Host for CancelOnAssign {
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
    fn nothing_is_delivered_after_cancellation() {
        let mut options = ExecOptions {
            line_buffered: true,
            ..Default::default()
        };
        options.stdout.update_var = Some("line".into());
        options.stdout.callback = Some(vec!["log".into()]);

        let (rx, mut tx) = pipe().unwrap();
        set_nonblocking(&rx).unwrap();
        let mut sink = Sink::new(SinkKind::Stdout, &options, false);
        sink.attach(rx);

        let status = StatusVar::anonymous();
        let mut host = CancelOnAssign {
            store: VarStore::new(),
            token: status.token(),
        };

        tx.write_all(b"a\nb\nc\n").unwrap();
        collect(&mut sink, &mut host, &status.token());
        assert_eq!(host.store.history("line"), &[b"a".to_vec()]);
        assert_eq!(host.store.callbacks().len(), 1);
    }

    #[test]
    fn partial_line_is_delivered_when_reading_fails() {
        let mut options = ExecOptions {
            line_buffered: true,
            ..Default::default()
        };
        options.stdout.update_var = Some("line".into());

        let (rx, mut tx) = pipe().unwrap();
        set_nonblocking(&rx).unwrap();
        let mut sink = Sink::new(SinkKind::Stdout, &options, false);
        sink.attach(rx);
        let mut host = VarStore::new();
        let token = CancelToken::new();

        tx.write_all(b"whole\nhalf").unwrap();
        assert!(matches!(collect(&mut sink, &mut host, &token), Collected::Pending));
        assert_eq!(host.history("line"), &[b"whole".to_vec()]);

        // Reading from the write end of a pipe fails with EBADF.
        sink.attach(tx);
        assert!(matches!(
            collect(&mut sink, &mut host, &token),
            Collected::Failed(Error::Stream(_))
        ));
        assert_eq!(host.history("line"), &[b"whole".to_vec(), b"half".to_vec()]);
    }
}
