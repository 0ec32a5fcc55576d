use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::SimError;
use crate::server::Server;
use crate::service::request::{SvcRequest, TimeLabel};
use crate::sim::resource::{Acquire, Ticket};
use crate::sim::scheduler::{Process, ProcessId, Sim, Step, Wakeup};

// ---------------------------------------------------------------------------
// Injected ports
// ---------------------------------------------------------------------------

/// Nullary sampler of the compute units a core request will consume.
pub type CompUnitsGen = Rc<dyn Fn() -> f64>;

/// Routes a service name to a target server at manufacture time.
pub type LoadBalancer = Box<dyn Fn(&str) -> Rc<Server>>;

/// Maps a request's input value to its output value.
pub type OutputFn = Rc<dyn Fn(&Value) -> Value>;

// ---------------------------------------------------------------------------
// SvcRequester
// ---------------------------------------------------------------------------

/// A service request factory.
///
/// Requesters form an immutable composition tree; each `make_request` call
/// manufactures one [`SvcRequest`] ready to be submitted. By default a
/// request is non-blocking: it holds a software thread on its target server
/// only while it itself executes. Inside a blocking scope
/// (`in_blocking_call = true`) it inherits an already-held thread instead.
pub trait SvcRequester {
    /// The service name carried by requests this factory produces.
    fn name(&self) -> &str;

    /// Manufacture a service request with the given input value and
    /// blocking scope.
    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest>;
}

// ---------------------------------------------------------------------------
// CoreSvcRequester — the atomic leaf
// ---------------------------------------------------------------------------

/// The atomic service requester: acquires a software thread (unless inside
/// a blocking scope) and a hardware thread on its load-balanced target
/// server, executes for a sampled number of compute units, and completes
/// with `out_fn(in_val)`.
///
/// The target server is chosen when the request is manufactured, not when
/// it is submitted, so the choice is visible to enclosing combinators.
pub struct CoreSvcRequester {
    sim: Sim,
    name: String,
    comp_units_gen: CompUnitsGen,
    load_balancer: LoadBalancer,
    out_fn: Option<OutputFn>,
}

impl CoreSvcRequester {
    pub fn new(
        sim: &Sim,
        name: impl Into<String>,
        comp_units_gen: CompUnitsGen,
        load_balancer: LoadBalancer,
        out_fn: Option<OutputFn>,
    ) -> Rc<Self> {
        Rc::new(CoreSvcRequester {
            sim: sim.clone(),
            name: name.into(),
            comp_units_gen,
            load_balancer,
            out_fn,
        })
    }
}

impl SvcRequester for CoreSvcRequester {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest> {
        let server = (self.load_balancer)(&self.name);
        let comp_units_gen = Rc::clone(&self.comp_units_gen);
        let out_fn = self.out_fn.clone();
        SvcRequest::new(
            &self.sim,
            &self.name,
            Some(server),
            in_val,
            in_blocking_call,
            true,
            Box::new(move |req| {
                Box::new(CoreBehavior {
                    req,
                    comp_units_gen,
                    out_fn,
                    phase: CorePhase::Start,
                    comp_units: 0.0,
                    sw_ticket: None,
                    hw_ticket: None,
                })
            }),
        )
    }
}

enum CorePhase {
    Start,
    AwaitSwThread,
    RequestHw,
    AwaitHwThread,
    Processing,
}

struct CoreBehavior {
    req: Rc<SvcRequest>,
    comp_units_gen: CompUnitsGen,
    out_fn: Option<OutputFn>,
    phase: CorePhase,
    comp_units: f64,
    sw_ticket: Option<Ticket>,
    hw_ticket: Option<Ticket>,
}

impl Process for CoreBehavior {
    fn resume(&mut self, sim: &Sim, pid: ProcessId, wakeup: Wakeup) -> Step {
        let Some(server) = self.req.server() else {
            return Step::Fail(SimError::contract(format!(
                "core request '{}' has no target server",
                self.req.svc_name()
            )));
        };
        let mut wakeup = Some(wakeup);
        loop {
            match self.phase {
                CorePhase::Start => {
                    self.comp_units = (self.comp_units_gen)();
                    debug!(
                        svc = %self.req.svc_name(),
                        server = %server.name(),
                        units = self.comp_units,
                        time = sim.now(),
                        "core request started"
                    );
                    if self.req.in_blocking_call() {
                        self.phase = CorePhase::RequestHw;
                        continue;
                    }
                    self.req.record(TimeLabel::SwThreadRequested);
                    match server.thread_acquire(pid, Some(&self.req)) {
                        Acquire::Granted(t) => {
                            self.req.record(TimeLabel::SwThreadAcquired);
                            self.sw_ticket = Some(t);
                            self.phase = CorePhase::RequestHw;
                        }
                        Acquire::Queued => {
                            self.phase = CorePhase::AwaitSwThread;
                            return Step::AwaitGrant;
                        }
                    }
                }
                CorePhase::AwaitSwThread => {
                    let Some(Wakeup::Granted(t)) = wakeup.take() else {
                        return Step::Fail(SimError::contract(
                            "core request resumed without a software-thread grant",
                        ));
                    };
                    self.req.record(TimeLabel::SwThreadAcquired);
                    self.sw_ticket = Some(t);
                    self.phase = CorePhase::RequestHw;
                }
                CorePhase::RequestHw => {
                    self.req.record(TimeLabel::HwThreadRequested);
                    match server.hw_acquire(pid, Some(&self.req)) {
                        Acquire::Granted(t) => {
                            self.req.record(TimeLabel::HwThreadAcquired);
                            self.hw_ticket = Some(t);
                            self.phase = CorePhase::Processing;
                            return Step::Sleep(server.process_duration(self.comp_units));
                        }
                        Acquire::Queued => {
                            self.phase = CorePhase::AwaitHwThread;
                            return Step::AwaitGrant;
                        }
                    }
                }
                CorePhase::AwaitHwThread => {
                    let Some(Wakeup::Granted(t)) = wakeup.take() else {
                        return Step::Fail(SimError::contract(
                            "core request resumed without a hardware-thread grant",
                        ));
                    };
                    self.req.record(TimeLabel::HwThreadAcquired);
                    self.hw_ticket = Some(t);
                    self.phase = CorePhase::Processing;
                    return Step::Sleep(server.process_duration(self.comp_units));
                }
                CorePhase::Processing => {
                    if let Some(t) = self.hw_ticket.take() {
                        server.hw_release(t);
                    }
                    self.req.record(TimeLabel::HwThreadReleased);
                    let out = match &self.out_fn {
                        Some(f) => f(&self.req.in_val()),
                        None => Value::Null,
                    };
                    if let Err(e) = self.req.complete(out) {
                        return Step::Fail(e);
                    }
                    if let Some(t) = self.sw_ticket.take() {
                        server.thread_release(t);
                        self.req.record(TimeLabel::SwThreadReleased);
                    }
                    debug!(
                        svc = %self.req.svc_name(),
                        server = %server.name(),
                        time = sim.now(),
                        "core request completed"
                    );
                    return Step::Done;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Async — fire-and-forget wrapper
// ---------------------------------------------------------------------------

/// Wraps a requester so its requests run detached: the wrapper submits the
/// inner request as an independent top-level request, completes immediately
/// with `Null`, and consumes no virtual time. The detached request races
/// against the end of the simulation.
pub struct Async {
    sim: Sim,
    name: String,
    inner: Rc<dyn SvcRequester>,
}

impl Async {
    pub fn new(sim: &Sim, inner: Rc<dyn SvcRequester>) -> Rc<Self> {
        let name = format!("Async({})", inner.name());
        Rc::new(Async {
            sim: sim.clone(),
            name,
            inner,
        })
    }
}

impl SvcRequester for Async {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest> {
        let inner = Rc::clone(&self.inner);
        // No server, and none may ever be assigned.
        SvcRequest::new(
            &self.sim,
            &self.name,
            None,
            in_val,
            in_blocking_call,
            false,
            Box::new(move |req| {
                Box::new(AsyncBehavior {
                    req,
                    inner,
                    lingering: false,
                })
            }),
        )
    }
}

struct AsyncBehavior {
    req: Rc<SvcRequest>,
    inner: Rc<dyn SvcRequester>,
    lingering: bool,
}

impl Process for AsyncBehavior {
    fn resume(&mut self, _sim: &Sim, _pid: ProcessId, _wakeup: Wakeup) -> Step {
        if self.lingering {
            return Step::Done;
        }
        self.lingering = true;
        // Detached: fresh top level, no parent link, no blocking scope.
        let detached = self.inner.make_request(self.req.in_val(), false);
        if let Err(e) = detached.submit() {
            return Step::Fail(e);
        }
        if let Err(e) = self.req.complete(Value::Null) {
            return Step::Fail(e);
        }
        Step::Sleep(0.0)
    }
}

// ---------------------------------------------------------------------------
// Blocking — software-thread-holding wrapper
// ---------------------------------------------------------------------------

/// Wraps a requester so its requests hold one software thread on the target
/// server for the whole span of the wrapped request, sub-requests included.
/// Atoms inside the wrapped structure see `in_blocking_call = true` and skip
/// their own thread acquisition.
pub struct Blocking {
    sim: Sim,
    name: String,
    inner: Rc<dyn SvcRequester>,
}

impl Blocking {
    pub fn new(sim: &Sim, inner: Rc<dyn SvcRequester>) -> Rc<Self> {
        let name = format!("Blocking({})", inner.name());
        Rc::new(Blocking {
            sim: sim.clone(),
            name,
            inner,
        })
    }
}

impl SvcRequester for Blocking {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest> {
        let enclosed = self.inner.make_request(in_val.clone(), true);
        let server = enclosed.server();
        let req = SvcRequest::new(
            &self.sim,
            &self.name,
            server,
            in_val,
            in_blocking_call,
            true,
            {
                let enclosed = Rc::clone(&enclosed);
                Box::new(move |req| {
                    Box::new(BlockingBehavior {
                        req,
                        enclosed,
                        sw_ticket: None,
                        phase: BlockingPhase::Start,
                    })
                })
            },
        );
        enclosed.set_parent(&req);
        req.set_enclosed(enclosed);
        req
    }
}

enum BlockingPhase {
    Start,
    AwaitSwThread,
    Submit,
    AwaitInner,
}

struct BlockingBehavior {
    req: Rc<SvcRequest>,
    enclosed: Rc<SvcRequest>,
    sw_ticket: Option<Ticket>,
    phase: BlockingPhase,
}

impl Process for BlockingBehavior {
    fn resume(&mut self, _sim: &Sim, pid: ProcessId, wakeup: Wakeup) -> Step {
        let mut wakeup = Some(wakeup);
        loop {
            match self.phase {
                BlockingPhase::Start => {
                    // The enclosed request continues on this request's
                    // server, which an enclosing combinator may have
                    // re-routed after manufacture.
                    if let Some(server) = self.req.server() {
                        if let Err(e) = self.enclosed.assign_server(&server) {
                            return Step::Fail(e);
                        }
                    }
                    if self.req.in_blocking_call() {
                        // Already inside a blocking scope holding a thread.
                        self.phase = BlockingPhase::Submit;
                        continue;
                    }
                    let Some(server) = self.req.server() else {
                        return Step::Fail(SimError::contract(format!(
                            "blocking request '{}' has no resolvable server",
                            self.req.svc_name()
                        )));
                    };
                    self.req.record(TimeLabel::SwThreadRequested);
                    match server.thread_acquire(pid, Some(&self.req)) {
                        Acquire::Granted(t) => {
                            self.req.record(TimeLabel::SwThreadAcquired);
                            self.sw_ticket = Some(t);
                            self.phase = BlockingPhase::Submit;
                        }
                        Acquire::Queued => {
                            self.phase = BlockingPhase::AwaitSwThread;
                            return Step::AwaitGrant;
                        }
                    }
                }
                BlockingPhase::AwaitSwThread => {
                    let Some(Wakeup::Granted(t)) = wakeup.take() else {
                        return Step::Fail(SimError::contract(
                            "blocking request resumed without a software-thread grant",
                        ));
                    };
                    self.req.record(TimeLabel::SwThreadAcquired);
                    self.sw_ticket = Some(t);
                    self.phase = BlockingPhase::Submit;
                }
                BlockingPhase::Submit => match self.enclosed.submit() {
                    Ok(child) => {
                        self.phase = BlockingPhase::AwaitInner;
                        return Step::Join(vec![child]);
                    }
                    Err(e) => return Step::Fail(e),
                },
                BlockingPhase::AwaitInner => {
                    if let Some(t) = self.sw_ticket.take() {
                        if let Some(server) = self.req.server() {
                            server.thread_release(t);
                        }
                        self.req.record(TimeLabel::SwThreadReleased);
                    }
                    if let Err(e) = self.req.complete(self.enclosed.out_val()) {
                        return Step::Fail(e);
                    }
                    return Step::Done;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
