use std::{collections::BTreeMap, io};

use super::{
    cancel::StatusVar,
    controller::{Bgexec, JobId, Trigger},
    event::{EventHandle, EventRegistry, Process},
    host::Host,
    options::ExecOptions,
    pipeline,
    table::ProcessTable,
};
use crate::common::Error;
use crate::log::{dev_info, dev_warn};
use crate::system::{
    interface::ProcessId,
    signal::{consts::*, signal_fmt, SignalHandler, SignalStream},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Job(JobId, Trigger),
    /// One of the forwarded signals arrived.
    Signal,
}

/// What [`Executor::run`] returns.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The standard output of a foreground pipeline.
    Foreground(Vec<u8>),
    /// A pipeline was started in the background.
    Background { job: JobId, pids: Vec<ProcessId> },
}

struct ForwardedSignals {
    event: EventHandle,
    stream: &'static SignalStream,
    _handlers: [SignalHandler; 3],
}

struct Jobs<H> {
    host: H,
    table: ProcessTable,
    running: BTreeMap<JobId, Bgexec>,
    /// Outcomes of foreground jobs not collected yet.
    finished: BTreeMap<JobId, Result<Vec<u8>, Error>>,
    signals: Option<ForwardedSignals>,
}

impl<H: Host> Jobs<H> {
    fn retire(&mut self, id: JobId) {
        if let Some(mut job) = self.running.remove(&id) {
            if let Some(outcome) = job.take_outcome() {
                self.finished.insert(id, outcome);
            }
        }
    }

    /// Act on writes to the status variable of any running job.
    fn process_cancellations(&mut self, registry: &mut EventRegistry<Self>) {
        let cancelled: Vec<JobId> = self
            .running
            .values()
            .filter(|job| job.cancel_requested())
            .map(Bgexec::id)
            .collect();

        for id in cancelled {
            if let Some(job) = self.running.get_mut(&id) {
                job.cancel(registry);
            }
            self.retire(id);
        }
    }

    fn on_signal(&mut self) {
        let Some(signals) = &self.signals else {
            return;
        };

        loop {
            match signals.stream.recv() {
                Ok(info) => {
                    dev_info!("received {}, cancelling every job", signal_fmt(info.signal()));
                    for job in self.running.values() {
                        job.request_cancel();
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    dev_warn!("cannot read from signal stream: {err}");
                    break;
                }
            }
        }
    }
}

impl<H: Host> Process for Jobs<H> {
    type Event = Event;

    fn on_event(&mut self, event: Self::Event, registry: &mut EventRegistry<Self>) {
        match event {
            Event::Job(id, trigger) => {
                // Jobs retired earlier in the same batch have nothing left to do.
                let Some(job) = self.running.get_mut(&id) else {
                    return;
                };
                job.on_trigger(trigger, &mut self.host, registry);
                if job.is_done() {
                    self.retire(id);
                }
                // A notification may have cancelled this job or another one; the rest of the
                // batch must not reach them.
                self.process_cancellations(registry);
            }
            Event::Signal => self.on_signal(),
        }
    }
}

/// Runs pipelines and drives their event loop.
///
/// Foreground pipelines are waited for in [`Executor::run`], which keeps serving every other job
/// in the meantime. Background pipelines progress whenever [`Executor::do_one_event`] is called.
pub struct Executor<H: Host> {
    registry: EventRegistry<Jobs<H>>,
    jobs: Jobs<H>,
    next_id: u64,
    shut_down: bool,
}

impl<H: Host> Executor<H> {
    pub fn new(host: H) -> Self {
        Self::with_table(host, ProcessTable::new())
    }

    /// Create an executor handing abandoned processes to `table`.
    pub fn with_table(host: H, table: ProcessTable) -> Self {
        Self {
            registry: EventRegistry::new(),
            jobs: Jobs {
                host,
                table,
                running: BTreeMap::new(),
                finished: BTreeMap::new(),
                signals: None,
            },
            next_id: 0,
            shut_down: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.jobs.host
    }

    pub fn table(&self) -> &ProcessTable {
        &self.jobs.table
    }

    /// Launch the pipeline described by `argv`.
    ///
    /// Without a trailing `&` this waits for the pipeline to complete and returns its output.
    /// Writing to `status` through its token cancels the pipeline.
    pub fn run(
        &mut self,
        status: StatusVar,
        options: &ExecOptions,
        argv: &[String],
    ) -> Result<Outcome, Error> {
        let pipeline = pipeline::parse(argv)?;

        let id = JobId(self.next_id);
        self.next_id += 1;

        let job = Bgexec::start(
            id,
            status,
            options,
            &pipeline,
            self.jobs.table.clone(),
            &mut self.registry,
        )?;
        let pids = job.pids().to_vec();
        let foreground = job.is_foreground();
        self.jobs.running.insert(id, job);

        if !foreground {
            dev_info!("{id}: running in the background as {pids:?}");
            return Ok(Outcome::Background { job: id, pids });
        }

        loop {
            if let Some(outcome) = self.jobs.finished.remove(&id) {
                return outcome.map(Outcome::Foreground);
            }
            if !self.do_one_event()? {
                return Err(Error::Io(
                    None,
                    io::Error::new(io::ErrorKind::Other, "no event left to wait for"),
                ));
            }
        }
    }

    /// Reap detached processes, then wait for and dispatch one batch of events.
    ///
    /// Returns `false` without waiting when nothing is registered.
    pub fn do_one_event(&mut self) -> Result<bool, Error> {
        self.jobs.table.reap_detached();
        self.jobs.process_cancellations(&mut self.registry);

        let dispatched = self.registry.poll_once(&mut self.jobs)?;
        self.jobs.process_cancellations(&mut self.registry);

        Ok(dispatched)
    }

    /// Serve events until no job is running.
    pub fn run_until_idle(&mut self) -> Result<(), Error> {
        while !self.jobs.running.is_empty() {
            self.do_one_event()?;
        }
        Ok(())
    }

    pub fn is_running(&self, job: JobId) -> bool {
        self.jobs.running.contains_key(&job)
    }

    pub fn running_jobs(&self) -> usize {
        self.jobs.running.len()
    }

    /// Cancel every job when we receive `SIGINT`, `SIGTERM` or `SIGHUP`.
    pub fn forward_signals(&mut self) -> Result<(), Error> {
        if self.jobs.signals.is_some() {
            return Ok(());
        }

        let stream = SignalStream::init()?;
        let handlers = stream.forward([SIGINT, SIGTERM, SIGHUP])?;
        let event = self.registry.register_read_event(stream, Event::Signal);

        self.jobs.signals = Some(ForwardedSignals {
            event,
            stream,
            _handlers: handlers,
        });
        Ok(())
    }

    /// Kill every job that was not asked to be left running and reap what already terminated.
    ///
    /// Forwarded signals get their previous handlers back. Calling this more than once has no
    /// further effect.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let ids: Vec<JobId> = self.jobs.running.keys().copied().collect();
        for id in ids {
            if let Some(job) = self.jobs.running.get_mut(&id) {
                job.teardown(&mut self.registry);
            }
            self.jobs.retire(id);
        }
        self.jobs.table.reap_detached();

        if let Some(signals) = self.jobs.signals.take() {
            self.registry.deregister(signals.event);
        }
    }
}

impl<H: Host> Drop for Executor<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
