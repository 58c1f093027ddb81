use std::{
    collections::BTreeMap,
    io,
    os::fd::AsRawFd,
    time::{Duration, Instant},
};

use crate::system::poll::PollSet;

pub(crate) trait Process: Sized {
    /// IO and timer events that this process should handle.
    type Event: Copy + Eq;
    /// Handle the corresponding event.
    fn on_event(&mut self, event: Self::Event, registry: &mut EventRegistry<Self>);
}

#[derive(PartialEq, Eq, Hash, Ord, PartialOrd, Clone, Copy, Debug)]
struct EventId(usize);

/// A registered file descriptor. Pass it to [`EventRegistry::deregister`] to stop polling it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct EventHandle(EventId);

/// A pending timer. Pass it to [`EventRegistry::cancel_timer`] to drop it before it fires.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TimerHandle(EventId);

/// A type able to register file descriptors to be polled and timers to be fired.
pub(crate) struct EventRegistry<T: Process> {
    seed: usize,
    poll_set: PollSet<EventId>,
    events: BTreeMap<EventId, T::Event>,
    timers: BTreeMap<EventId, (Instant, T::Event)>,
}

impl<T: Process> EventRegistry<T> {
    /// Create a new and empty registry.
    pub(crate) fn new() -> Self {
        Self {
            seed: 0,
            poll_set: PollSet::new(),
            events: BTreeMap::new(),
            timers: BTreeMap::new(),
        }
    }

    fn next_id(&mut self) -> EventId {
        let id = EventId(self.seed);
        self.seed += 1;
        id
    }

    /// Set the `fd` descriptor to be polled for read events and `event` to be dispatched when
    /// `fd` is ready or hung up.
    pub(crate) fn register_read_event<F: AsRawFd>(&mut self, fd: &F, event: T::Event) -> EventHandle {
        let id = self.next_id();
        self.poll_set.add_reader(id, fd);
        self.events.insert(id, event);
        EventHandle(id)
    }

    /// Stop polling the descriptor behind `handle`.
    pub(crate) fn deregister(&mut self, handle: EventHandle) {
        self.poll_set.remove_fd(&handle.0);
        self.events.remove(&handle.0);
    }

    /// Dispatch `event` once, after `delay` has elapsed.
    pub(crate) fn add_timer(&mut self, delay: Duration, event: T::Event) -> TimerHandle {
        let id = self.next_id();
        self.timers.insert(id, (Instant::now() + delay, event));
        TimerHandle(id)
    }

    /// Drop a timer that has not fired yet. Returns `false` if it already fired.
    pub(crate) fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle.0).is_some()
    }

    /// Return whether there is nothing left that could ever dispatch an event.
    pub(crate) fn is_idle(&self) -> bool {
        self.events.is_empty() && self.timers.is_empty()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|&(deadline, _)| deadline).min()
    }

    /// Wait until at least one descriptor is ready or one timer expired and dispatch all of them.
    ///
    /// Descriptor events are dispatched before timers. Returns `false` without waiting if the
    /// registry is idle.
    pub(crate) fn poll_once(&mut self, process: &mut T) -> io::Result<bool> {
        if self.is_idle() {
            return Ok(false);
        }

        let timeout = self
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        let mut event_queue = Vec::with_capacity(self.events.len() + self.timers.len());

        match self.poll_set.poll(timeout) {
            Ok(ids) => {
                // A callback may deregister a descriptor that is also ready in this batch, so the
                // events are looked up before any of them is dispatched.
                event_queue.extend(ids.iter().filter_map(|id| self.events.get(id).copied()));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        let expired: Vec<EventId> = self
            .timers
            .iter()
            .filter_map(|(&id, &(deadline, _))| (deadline <= now).then_some(id))
            .collect();
        for id in expired {
            if let Some((_, event)) = self.timers.remove(&id) {
                event_queue.push(event);
            }
        }

        for event in event_queue {
            process.on_event(event, self);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::{EventHandle, EventRegistry, Process};

    #[derive(Default)]
    struct Recorder {
        seen: Vec<u8>,
        handle: Option<EventHandle>,
    }

    impl Process for Recorder {
        type Event = u8;

        fn on_event(&mut self, event: u8, registry: &mut EventRegistry<Self>) {
            self.seen.push(event);
            if event == 1 {
                if let Some(handle) = self.handle.take() {
                    registry.deregister(handle);
                }
            }
        }
    }

    #[test]
    fn dispatches_descriptors_then_timers() {
        let (rx, mut tx) = crate::system::pipe().unwrap();
        let mut registry = EventRegistry::new();
        let mut recorder = Recorder::default();

        recorder.handle = Some(registry.register_read_event(&rx, 1));
        registry.add_timer(Duration::ZERO, 2);
        tx.write_all(b"x").unwrap();

        assert!(registry.poll_once(&mut recorder).unwrap());
        assert_eq!(recorder.seen, vec![1, 2]);

        // The descriptor was deregistered and the timer fired.
        assert!(registry.is_idle());
        assert!(!registry.poll_once(&mut recorder).unwrap());
    }

    #[test]
    fn timers_wait_for_their_deadline() {
        let mut registry = EventRegistry::new();
        let mut recorder = Recorder::default();

        let start = std::time::Instant::now();
        registry.add_timer(Duration::from_millis(30), 3);
        let cancelled = registry.add_timer(Duration::from_millis(10), 4);
        assert!(registry.cancel_timer(cancelled));

        while recorder.seen.is_empty() {
            registry.poll_once(&mut recorder).unwrap();
        }

        assert_eq!(recorder.seen, vec![3]);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
