use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SimError;
use crate::server::Server;
use crate::sim::scheduler::{Process, ProcessId, Sim, SimTime};

// ---------------------------------------------------------------------------
// TimeLabel
// ---------------------------------------------------------------------------

/// Well-defined points in a service request's lifecycle at which the
/// virtual time is recorded. For any completed request, the times at these
/// labels (where present) are non-decreasing in the order listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeLabel {
    Submitted,
    SwThreadRequested,
    SwThreadAcquired,
    HwThreadRequested,
    HwThreadAcquired,
    HwThreadReleased,
    SwThreadReleased,
    Completed,
}

impl TimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeLabel::Submitted => "submitted",
            TimeLabel::SwThreadRequested => "sw_thread_requested",
            TimeLabel::SwThreadAcquired => "sw_thread_acquired",
            TimeLabel::HwThreadRequested => "hw_thread_requested",
            TimeLabel::HwThreadAcquired => "hw_thread_acquired",
            TimeLabel::HwThreadReleased => "hw_thread_released",
            TimeLabel::SwThreadReleased => "sw_thread_released",
            TimeLabel::Completed => "completed",
        }
    }

    /// The canonical lifecycle order, used when checking monotonicity.
    pub const ORDERED: [TimeLabel; 8] = [
        TimeLabel::Submitted,
        TimeLabel::SwThreadRequested,
        TimeLabel::SwThreadAcquired,
        TimeLabel::HwThreadRequested,
        TimeLabel::HwThreadAcquired,
        TimeLabel::HwThreadReleased,
        TimeLabel::SwThreadReleased,
        TimeLabel::Completed,
    ];
}

impl std::fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SvcRequest
// ---------------------------------------------------------------------------

/// Turns a manufactured request into its runnable process at submit time.
pub(crate) type BehaviorGen = Box<dyn FnOnce(Rc<SvcRequest>) -> Box<dyn Process>>;

/// One execution of a service: the per-request record every requester
/// factory manufactures.
///
/// Patterned after a completable future: the request is submitted exactly
/// once, runs as a cooperative process against its server(s), and completes
/// exactly once with an output value. All lifecycle timestamps are recorded
/// into the time log for post-hoc analysis.
pub struct SvcRequest {
    sim: Sim,
    /// Weak back-reference to the owning `Rc`, needed when submission
    /// hands the request to its own behavior.
    self_ref: RefCell<Weak<SvcRequest>>,
    id: u64,
    svc_name: String,
    server: RefCell<Option<Rc<Server>>>,
    parent: RefCell<Option<Weak<SvcRequest>>>,
    in_val: RefCell<Value>,
    out_val: RefCell<Value>,
    in_blocking_call: Cell<bool>,
    /// `false` for requests (such as `Async` wrappers) that must never be
    /// routed to a server by an enclosing combinator.
    server_assignable: bool,
    submitted: Cell<bool>,
    completed: Cell<bool>,
    time_log: RefCell<Vec<(TimeLabel, SimTime)>>,
    /// The enclosed request of a wrapper, or the head child of a
    /// sequential composite.
    enclosed: RefCell<Option<Rc<SvcRequest>>>,
    gen: RefCell<Option<BehaviorGen>>,
}

impl SvcRequest {
    pub(crate) fn new(
        sim: &Sim,
        svc_name: impl Into<String>,
        server: Option<Rc<Server>>,
        in_val: Value,
        in_blocking_call: bool,
        server_assignable: bool,
        gen: BehaviorGen,
    ) -> Rc<Self> {
        let request = Rc::new(SvcRequest {
            sim: sim.clone(),
            self_ref: RefCell::new(Weak::new()),
            id: sim.next_request_id(),
            svc_name: svc_name.into(),
            server: RefCell::new(server),
            parent: RefCell::new(None),
            in_val: RefCell::new(in_val),
            out_val: RefCell::new(Value::Null),
            in_blocking_call: Cell::new(in_blocking_call),
            server_assignable,
            submitted: Cell::new(false),
            completed: Cell::new(false),
            time_log: RefCell::new(Vec::new()),
            enclosed: RefCell::new(None),
            gen: RefCell::new(Some(gen)),
        });
        *request.self_ref.borrow_mut() = Rc::downgrade(&request);
        request
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn svc_name(&self) -> &str {
        &self.svc_name
    }

    /// The target server, if resolved. Composite requests may stay
    /// unresolved until submission.
    pub fn server(&self) -> Option<Rc<Server>> {
        self.server.borrow().clone()
    }

    /// The enclosing request, if this one was manufactured as part of a
    /// composite. The link is borrowed, never owned.
    pub fn parent(&self) -> Option<Rc<SvcRequest>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn in_val(&self) -> Value {
        self.in_val.borrow().clone()
    }

    /// The output value; `Null` until completion.
    pub fn out_val(&self) -> Value {
        self.out_val.borrow().clone()
    }

    /// Whether this request executes inside a blocking scope and therefore
    /// inherits an already-held software thread.
    pub fn in_blocking_call(&self) -> bool {
        self.in_blocking_call.get()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.get()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    /// The wrapped request of a wrapper combinator, or the head child of a
    /// sequential composite.
    pub fn enclosed_request(&self) -> Option<Rc<SvcRequest>> {
        self.enclosed.borrow().clone()
    }

    pub(crate) fn set_parent(&self, parent: &Rc<SvcRequest>) {
        *self.parent.borrow_mut() = Some(Rc::downgrade(parent));
    }

    pub(crate) fn set_enclosed(&self, enclosed: Rc<SvcRequest>) {
        *self.enclosed.borrow_mut() = Some(enclosed);
    }

    /// Route this request to `server`. Combinators use this to make
    /// children continue on their parent's server.
    pub(crate) fn assign_server(&self, server: &Rc<Server>) -> Result<(), SimError> {
        if !self.server_assignable {
            return Err(SimError::contract(format!(
                "service request '{}' cannot be routed to a server",
                self.svc_name
            )));
        }
        *self.server.borrow_mut() = Some(Rc::clone(server));
        Ok(())
    }

    /// Record `label` at the current virtual time.
    pub(crate) fn record(&self, label: TimeLabel) {
        let now = self.sim.now();
        self.time_log.borrow_mut().push((label, now));
    }

    /// Submit the request, enrolling its behavior as a new process.
    /// A request is submitted exactly once.
    pub fn submit(&self) -> Result<ProcessId, SimError> {
        if self.submitted.replace(true) {
            return Err(SimError::contract(format!(
                "double submission of service request '{}'",
                self.svc_name
            )));
        }
        debug!(svc = %self.svc_name, id = self.id, "submitting service request");
        self.record(TimeLabel::Submitted);
        let gen = self.gen.borrow_mut().take().ok_or_else(|| {
            SimError::contract(format!(
                "service request '{}' has no behavior",
                self.svc_name
            ))
        })?;
        let this = self.self_ref.borrow().upgrade().ok_or_else(|| {
            SimError::contract(format!(
                "service request '{}' outlived its owner",
                self.svc_name
            ))
        })?;
        Ok(self.sim.spawn(gen(this)))
    }

    /// Complete the request with `val`. A request completes exactly once.
    pub(crate) fn complete(&self, val: Value) -> Result<(), SimError> {
        if self.completed.replace(true) {
            return Err(SimError::contract(format!(
                "completing already-completed service request '{}'",
                self.svc_name
            )));
        }
        *self.out_val.borrow_mut() = val;
        self.record(TimeLabel::Completed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Time-log queries
    // -----------------------------------------------------------------------

    /// The ordered `(label, time)` log as recorded.
    pub fn time_log(&self) -> Vec<(TimeLabel, SimTime)> {
        self.time_log.borrow().clone()
    }

    /// Time at the first occurrence of `label`, if recorded.
    pub fn label_time(&self, label: TimeLabel) -> Option<SimTime> {
        self.time_log
            .borrow()
            .iter()
            .find(|(l, _)| *l == label)
            .map(|&(_, t)| t)
    }

    pub fn time_submitted(&self) -> Option<SimTime> {
        self.label_time(TimeLabel::Submitted)
    }

    pub fn time_completed(&self) -> Option<SimTime> {
        self.label_time(TimeLabel::Completed)
    }

    /// End-to-end virtual time from submission to completion.
    pub fn response_time(&self) -> Option<f64> {
        Some(self.time_completed()? - self.time_submitted()?)
    }

    /// Time spent holding a hardware thread.
    pub fn process_time(&self) -> Option<f64> {
        Some(
            self.label_time(TimeLabel::HwThreadReleased)?
                - self.label_time(TimeLabel::HwThreadAcquired)?,
        )
    }

    /// Time spent queued for a hardware thread.
    pub fn hw_queue_time(&self) -> Option<f64> {
        Some(
            self.label_time(TimeLabel::HwThreadAcquired)?
                - self.label_time(TimeLabel::HwThreadRequested)?,
        )
    }

    /// Time spent queued for a software thread.
    pub fn thread_queue_time(&self) -> Option<f64> {
        Some(
            self.label_time(TimeLabel::SwThreadAcquired)?
                - self.label_time(TimeLabel::SwThreadRequested)?,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
