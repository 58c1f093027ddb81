use std::{fmt, time::Duration};

use super::{
    cancel::StatusVar,
    event::{EventHandle, EventRegistry, Process, TimerHandle},
    executor::Event,
    host::Host,
    launch::{launch, Launched},
    notify::{collect, Collected},
    options::ExecOptions,
    pipeline::Pipeline,
    reaper::{ProcessGroup, StatusRecord},
    sink::{Sink, SinkKind},
    table::ProcessTable,
};
use crate::common::Error;
use crate::log::dev_info;
use crate::system::{interface::ProcessId, signal::SignalNumber};

/// Identifies a job within its executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job{}", self.0)
    }
}

/// What woke a job up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    Output(SinkKind),
    /// Time to check whether the pipeline terminated.
    Timer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// At least one stream is still open.
    Collecting,
    /// Every stream is closed; waiting for the processes to terminate.
    Polling,
    Done,
}

/// One running pipeline: its processes, its output sinks and the triggers feeding them.
pub(crate) struct Bgexec {
    id: JobId,
    state: State,
    status: StatusVar,
    signal: SignalNumber,
    interval: Duration,
    foreground: bool,
    ignore_exit_code: bool,
    detach: bool,
    group: ProcessGroup,
    stdout: Sink,
    stderr: Sink,
    stdout_event: Option<EventHandle>,
    stderr_event: Option<EventHandle>,
    timer: Option<TimerHandle>,
    table: ProcessTable,
    outcome: Option<Result<Vec<u8>, Error>>,
}

impl Bgexec {
    /// Launch `pipeline` and register its streams with `registry`.
    pub(crate) fn start<P: Process<Event = Event>>(
        id: JobId,
        status: StatusVar,
        options: &ExecOptions,
        pipeline: &Pipeline,
        table: ProcessTable,
        registry: &mut EventRegistry<P>,
    ) -> Result<Self, Error> {
        let foreground = !pipeline.background;
        let signal = options.kill_signal();
        let Launched {
            group,
            stdout,
            stderr,
        } = launch(
            options.process_class(),
            pipeline,
            &options.environment(),
            signal,
            &table,
        )?;

        let mut job = Self {
            id,
            state: State::Collecting,
            status,
            signal,
            interval: options.poll_interval,
            foreground,
            ignore_exit_code: options.ignore_exit_code,
            detach: options.detach,
            group,
            stdout: Sink::new(SinkKind::Stdout, options, foreground),
            stderr: Sink::new(SinkKind::Stderr, options, foreground),
            stdout_event: None,
            stderr_event: None,
            timer: None,
            table,
            outcome: None,
        };

        if let Some(file) = stdout {
            let event = Event::Job(id, Trigger::Output(SinkKind::Stdout));
            job.stdout_event = Some(registry.register_read_event(&file, event));
            job.stdout.attach(file);
        }
        if let Some(file) = stderr {
            let event = Event::Job(id, Trigger::Output(SinkKind::Stderr));
            job.stderr_event = Some(registry.register_read_event(&file, event));
            job.stderr.attach(file);
        }

        // End of stream cannot tell when a pipeline writing only to files is done.
        if pipeline.is_fully_redirected() {
            job.state = State::Polling;
            job.timer = Some(registry.add_timer(job.interval, Event::Job(id, Trigger::Timer)));
        }

        Ok(job)
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn pids(&self) -> &[ProcessId] {
        self.group.pids()
    }

    pub(crate) fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// The result of a foreground job, once it is done.
    pub(crate) fn take_outcome(&mut self) -> Option<Result<Vec<u8>, Error>> {
        self.outcome.take()
    }

    /// Consume a pending cancellation request, if any.
    pub(crate) fn cancel_requested(&self) -> bool {
        !self.is_done() && self.status.token().take()
    }

    pub(crate) fn request_cancel(&self) {
        self.status.token().cancel();
    }

    pub(crate) fn on_trigger<H: Host, P: Process<Event = Event>>(
        &mut self,
        trigger: Trigger,
        host: &mut H,
        registry: &mut EventRegistry<P>,
    ) {
        // A pending cancellation is acted upon after the current batch; until then nothing is
        // delivered.
        if self.is_done() || self.status.token().is_pending() {
            return;
        }

        match trigger {
            Trigger::Output(kind) => self.on_output(kind, host, registry),
            Trigger::Timer => self.on_timer(host, registry),
        }
    }

    fn sink_mut(&mut self, kind: SinkKind) -> (&mut Sink, &mut Option<EventHandle>) {
        match kind {
            SinkKind::Stdout => (&mut self.stdout, &mut self.stdout_event),
            SinkKind::Stderr => (&mut self.stderr, &mut self.stderr_event),
        }
    }

    fn on_output<H: Host, P: Process<Event = Event>>(
        &mut self,
        kind: SinkKind,
        host: &mut H,
        registry: &mut EventRegistry<P>,
    ) {
        let token = self.status.token();
        let (sink, _) = self.sink_mut(kind);
        if !sink.is_open() {
            return;
        }

        let collected = collect(sink, host, &token);
        if token.is_pending() {
            return;
        }
        match collected {
            Collected::Pending => return,
            Collected::Closed => self.close_sink(kind, host, registry),
            Collected::Failed(err) => {
                self.close_sink(kind, host, registry);
                host.background_error(&err.to_string());
            }
        }

        if !self.stdout.is_open() && !self.stderr.is_open() && self.timer.is_none() {
            dev_info!("{}: output closed, waiting for {:?}", self.id, self.group.tracked());
            self.state = State::Polling;
            let event = Event::Job(self.id, Trigger::Timer);
            self.timer = Some(registry.add_timer(Duration::ZERO, event));
        }
    }

    /// Close the stream and publish its final value.
    fn close_sink<H: Host, P: Process<Event = Event>>(
        &mut self,
        kind: SinkKind,
        host: &mut H,
        registry: &mut EventRegistry<P>,
    ) {
        let (sink, event) = self.sink_mut(kind);
        if let Some(handle) = event.take() {
            registry.deregister(handle);
        }
        sink.close();

        if let Some(name) = &sink.options().final_var {
            if let Err(err) = host.set_var(name, sink.final_value()) {
                host.background_error(&err);
            }
        }
    }

    fn on_timer<H: Host, P: Process<Event = Event>>(
        &mut self,
        host: &mut H,
        registry: &mut EventRegistry<P>,
    ) {
        self.timer = None;
        match self.group.check() {
            Some(record) => self.complete(record, host, registry),
            None => {
                let event = Event::Job(self.id, Trigger::Timer);
                self.timer = Some(registry.add_timer(self.interval, event));
            }
        }
    }

    /// Stop every trigger of this job. Buffered output is discarded.
    fn disable_triggers<P: Process<Event = Event>>(&mut self, registry: &mut EventRegistry<P>) {
        for kind in [SinkKind::Stdout, SinkKind::Stderr] {
            let (sink, event) = self.sink_mut(kind);
            if let Some(handle) = event.take() {
                registry.deregister(handle);
            }
            sink.close();
        }
        if let Some(timer) = self.timer.take() {
            registry.cancel_timer(timer);
        }
    }

    fn complete<H: Host, P: Process<Event = Event>>(
        &mut self,
        record: StatusRecord,
        host: &mut H,
        registry: &mut EventRegistry<P>,
    ) {
        dev_info!("{}: completed with {record}", self.id);
        self.disable_triggers(registry);
        self.group.detach(&self.table);

        // Our own write must not be taken for a cancellation.
        self.status.token().disarm();
        if let Some(name) = self.status.name() {
            if let Err(err) = host.set_var(name, record.to_string().as_bytes()) {
                host.background_error(&err);
            }
        }

        if self.foreground {
            self.outcome = Some(if record.is_success() || self.ignore_exit_code {
                Ok(self.result())
            } else {
                Err(Error::ChildStatus(record))
            });
        }
        self.state = State::Done;
    }

    /// Standard output, unless it went to a variable.
    fn result(&self) -> Vec<u8> {
        if self.stdout.options().final_var.is_some() {
            Vec::new()
        } else {
            self.stdout.final_value().to_vec()
        }
    }

    /// Kill the pipeline after its status variable was written to.
    pub(crate) fn cancel<P: Process<Event = Event>>(&mut self, registry: &mut EventRegistry<P>) {
        dev_info!("{}: cancelled, sending signal {}", self.id, self.signal);
        self.group.kill(self.signal);
        self.disable_triggers(registry);
        self.group.detach(&self.table);

        if self.foreground {
            self.outcome = Some(Err(Error::Cancelled(self.signal)));
        }
        self.state = State::Done;
    }

    /// Stop watching the pipeline for good. Unless it was asked to be left alone, it is killed
    /// first.
    pub(crate) fn teardown<P: Process<Event = Event>>(&mut self, registry: &mut EventRegistry<P>) {
        if self.is_done() {
            return;
        }
        self.status.token().disarm();
        if self.detach {
            dev_info!("{}: leaving {:?} running", self.id, self.group.tracked());
        } else {
            self.group.kill(self.signal);
        }
        self.disable_triggers(registry);
        self.group.detach(&self.table);
        self.state = State::Done;
    }
}
