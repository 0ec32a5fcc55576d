use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use tracing::trace;

use crate::error::SimError;
use crate::sim::resource::Ticket;

/// Virtual time, in simulated seconds.
pub type SimTime = f64;

/// Identifies a process enrolled in the scheduler. Ids are dense and
/// allocated in spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(usize);

// ---------------------------------------------------------------------------
// Suspension protocol
// ---------------------------------------------------------------------------

/// What a suspended process was waiting for, delivered when it is resumed.
#[derive(Debug, Clone, Copy)]
pub enum Wakeup {
    /// First resumption after [`Sim::spawn`].
    Started,
    /// A [`Step::Sleep`] delay elapsed.
    TimerFired,
    /// A queued resource request was granted; the ticket carries the
    /// original submission time.
    Granted(Ticket),
    /// Every process joined with [`Step::Join`] has completed.
    ChildrenDone,
}

/// Returned by [`Process::resume`] to tell the scheduler how to proceed.
pub enum Step {
    /// Suspend for the given non-negative virtual delay.
    Sleep(SimTime),
    /// Suspend until a resource grants a request this process queued on.
    AwaitGrant,
    /// Suspend until all listed processes have completed.
    Join(Vec<ProcessId>),
    /// The process is finished; joined waiters are woken.
    Done,
    /// Abort the whole run with a fatal error.
    Fail(SimError),
}

/// A cooperative simulated process.
///
/// Between suspensions control is uninterrupted: `resume` runs the process
/// up to its next yield point and reports that point as a [`Step`]. Exactly
/// one process executes at a time.
pub trait Process {
    fn resume(&mut self, sim: &Sim, pid: ProcessId, wakeup: Wakeup) -> Step;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum EventKind {
    /// Initial activation of a freshly spawned process.
    ProcessResume,
    /// A sleep delay elapsed.
    Timeout,
    /// A resource unit was handed to a queued waiter.
    ResourceGranted(Ticket),
    /// All joined children of the target completed.
    Completion,
}

/// A scheduled resumption. Ordered by time, then by insertion sequence so
/// that simultaneous events dispatch strictly FIFO.
struct Event {
    time: SimTime,
    seq: u64,
    target: ProcessId,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

// ---------------------------------------------------------------------------
// Process table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    Runnable,
    Suspended,
    Completed,
}

struct ProcSlot {
    state: ProcState,
    /// Taken out of the slot while the process is executing.
    behavior: Option<Box<dyn Process>>,
    /// Processes joined on this one.
    waiters: Vec<ProcessId>,
    /// Children this process is still joined on.
    pending: usize,
}

pub(crate) struct SimCore {
    now: SimTime,
    next_seq: u64,
    next_request_id: u64,
    queue: BinaryHeap<Reverse<Event>>,
    procs: Vec<ProcSlot>,
}

impl SimCore {
    fn schedule(&mut self, delay: SimTime, target: ProcessId, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Event {
            time: self.now + delay.max(0.0),
            seq,
            target,
            kind,
        }));
    }
}

// ---------------------------------------------------------------------------
// Sim — shared scheduler handle
// ---------------------------------------------------------------------------

/// Shared handle to the virtual-time scheduler.
///
/// Cloning is cheap; every component of a simulation (servers, requesters,
/// user groups) holds a clone of the same underlying state. A simulation is
/// single-threaded and cooperative: "concurrency" means multiple processes
/// suspended at different virtual times.
#[derive(Clone)]
pub struct Sim {
    core: Rc<RefCell<SimCore>>,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            core: Rc::new(RefCell::new(SimCore {
                now: 0.0,
                next_seq: 0,
                next_request_id: 0,
                queue: BinaryHeap::new(),
                procs: Vec::new(),
            })),
        }
    }

    /// Current virtual time. Monotonically non-decreasing, starting at 0.
    pub fn now(&self) -> SimTime {
        self.core.borrow().now
    }

    /// Enroll a process. It first resumes at the current virtual time, after
    /// every event already queued for that time. Consuming the behavior here
    /// is what makes enqueueing the same process twice unrepresentable.
    pub fn spawn(&self, behavior: Box<dyn Process>) -> ProcessId {
        let mut core = self.core.borrow_mut();
        let pid = ProcessId(core.procs.len());
        core.procs.push(ProcSlot {
            state: ProcState::Runnable,
            behavior: Some(behavior),
            waiters: Vec::new(),
            pending: 0,
        });
        core.schedule(0.0, pid, EventKind::ProcessResume);
        pid
    }

    /// Whether the given process has run to completion.
    pub fn is_completed(&self, pid: ProcessId) -> bool {
        self.core.borrow().procs[pid.0].state == ProcState::Completed
    }

    /// Next per-run service request id.
    pub(crate) fn next_request_id(&self) -> u64 {
        let mut core = self.core.borrow_mut();
        let id = core.next_request_id;
        core.next_request_id += 1;
        id
    }

    /// Called by a resource on release to hand a unit to a queued waiter.
    pub(crate) fn schedule_grant(&self, target: ProcessId, ticket: Ticket) {
        self.core
            .borrow_mut()
            .schedule(0.0, target, EventKind::ResourceGranted(ticket));
    }

    /// Run the event loop until the queue drains or virtual time reaches
    /// `until`. Events scheduled at or past the horizon are never
    /// dispatched; processes still suspended at that point are abandoned,
    /// and the clock is left at `until`.
    pub fn run(&self, until: SimTime) -> Result<(), SimError> {
        if !(until >= 0.0) {
            return Err(SimError::construction(format!(
                "simulation horizon must be non-negative, got {until}"
            )));
        }

        loop {
            let event = {
                let mut core = self.core.borrow_mut();
                match core.queue.peek() {
                    None => None,
                    Some(Reverse(head)) if head.time >= until => {
                        core.now = until;
                        None
                    }
                    Some(_) => core.queue.pop().map(|Reverse(e)| e),
                }
            };
            let Some(event) = event else { break };

            let behavior = {
                let mut core = self.core.borrow_mut();
                if event.time > core.now {
                    core.now = event.time;
                }
                let slot = &mut core.procs[event.target.0];
                if slot.state == ProcState::Completed {
                    None
                } else {
                    slot.state = ProcState::Runnable;
                    slot.behavior.take()
                }
            };
            let Some(mut behavior) = behavior else { continue };

            let wakeup = match event.kind {
                EventKind::ProcessResume => Wakeup::Started,
                EventKind::Timeout => Wakeup::TimerFired,
                EventKind::ResourceGranted(t) => Wakeup::Granted(t),
                EventKind::Completion => Wakeup::ChildrenDone,
            };
            trace!(pid = event.target.0, time = event.time, "dispatching event");

            let step = behavior.resume(self, event.target, wakeup);

            let mut core = self.core.borrow_mut();
            match step {
                Step::Sleep(delay) => {
                    let slot = &mut core.procs[event.target.0];
                    slot.state = ProcState::Suspended;
                    slot.behavior = Some(behavior);
                    core.schedule(delay, event.target, EventKind::Timeout);
                }
                Step::AwaitGrant => {
                    // The resource queued this process and schedules the
                    // grant itself on release.
                    let slot = &mut core.procs[event.target.0];
                    slot.state = ProcState::Suspended;
                    slot.behavior = Some(behavior);
                }
                Step::Join(children) => {
                    {
                        let slot = &mut core.procs[event.target.0];
                        slot.state = ProcState::Suspended;
                        slot.behavior = Some(behavior);
                    }
                    let mut outstanding = 0;
                    for child in children {
                        let child_slot = &mut core.procs[child.0];
                        if child_slot.state != ProcState::Completed {
                            child_slot.waiters.push(event.target);
                            outstanding += 1;
                        }
                    }
                    core.procs[event.target.0].pending = outstanding;
                    if outstanding == 0 {
                        core.schedule(0.0, event.target, EventKind::Completion);
                    }
                }
                Step::Done => {
                    let waiters = {
                        let slot = &mut core.procs[event.target.0];
                        slot.state = ProcState::Completed;
                        std::mem::take(&mut slot.waiters)
                    };
                    let mut ready = Vec::new();
                    for waiter in waiters {
                        let ws = &mut core.procs[waiter.0];
                        ws.pending -= 1;
                        if ws.pending == 0 {
                            ready.push(waiter);
                        }
                    }
                    for waiter in ready {
                        core.schedule(0.0, waiter, EventKind::Completion);
                    }
                }
                Step::Fail(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
