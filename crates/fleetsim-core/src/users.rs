use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::SimError;
use crate::randutil::{SimRng, WeightedChooser};
use crate::service::request::SvcRequest;
use crate::service::requester::SvcRequester;
use crate::sim::scheduler::{Process, ProcessId, Sim, SimTime, Step, Wakeup};
use crate::stats::{SampleTally, Tally, TallyFactory};

// ---------------------------------------------------------------------------
// UserLoad
// ---------------------------------------------------------------------------

/// Number of active users over time: either a constant or a right-continuous
/// step function `[(t0 = 0, n0), (t1, n1), ...]`: between `t_i` and
/// `t_{i+1}` exactly `n_i` user slots are active.
#[derive(Debug, Clone)]
pub enum UserLoad {
    Constant(u32),
    Steps(Vec<(SimTime, u32)>),
}

impl From<u32> for UserLoad {
    fn from(n: u32) -> Self {
        UserLoad::Constant(n)
    }
}

impl From<Vec<(SimTime, u32)>> for UserLoad {
    fn from(steps: Vec<(SimTime, u32)>) -> Self {
        UserLoad::Steps(steps)
    }
}

impl UserLoad {
    /// Canonicalize to a validated step sequence.
    fn into_steps(self) -> Result<Vec<(SimTime, u32)>, SimError> {
        let steps = match self {
            UserLoad::Constant(n) => vec![(0.0, n)],
            UserLoad::Steps(steps) => steps,
        };
        if steps.is_empty() {
            return Err(SimError::construction("user step sequence must be non-empty"));
        }
        if steps[0].0 != 0.0 {
            return Err(SimError::construction(
                "user step sequence must start at time 0",
            ));
        }
        for pair in steps.windows(2) {
            if !(pair[1].0 > pair[0].0) {
                return Err(SimError::construction(
                    "user step times must be strictly increasing",
                ));
            }
        }
        if steps.iter().any(|(t, _)| !t.is_finite()) {
            return Err(SimError::construction("user step times must be finite"));
        }
        Ok(steps)
    }
}

/// Shared request log: one `(group_name, request)` pair per submission.
pub type GroupReqLog = Rc<RefCell<Vec<(String, Rc<SvcRequest>)>>>;

// ---------------------------------------------------------------------------
// UserGroup
// ---------------------------------------------------------------------------

struct GroupTallies {
    overall: Box<dyn Tally>,
    per_svc: Vec<Box<dyn Tally>>,
    dispatched: Vec<u64>,
    dispatched_total: u64,
}

/// Context shared by all user processes of one group.
struct UserContext {
    group_name: String,
    steps: Vec<(SimTime, u32)>,
    requesters: Vec<Rc<dyn SvcRequester>>,
    chooser: WeightedChooser,
    min_think: f64,
    max_think: f64,
    rng: SimRng,
    tallies: Rc<RefCell<GroupTallies>>,
    svc_req_log: Option<GroupReqLog>,
}

impl UserContext {
    /// The active slot count and the next step boundary at `now`.
    fn step_at(&self, now: SimTime) -> (u32, SimTime) {
        let mut slots = self.steps[0].1;
        let mut next_break = SimTime::INFINITY;
        for (i, &(t, n)) in self.steps.iter().enumerate() {
            if now >= t {
                slots = n;
                next_break = self
                    .steps
                    .get(i + 1)
                    .map(|&(t, _)| t)
                    .unwrap_or(SimTime::INFINITY);
            }
        }
        (slots, next_break)
    }
}

/// A population of identical users repeatedly issuing service requests.
///
/// Each user loops forever: think for a uniform time, pick a requester by
/// weight, submit one request, await the response and tally it. Users whose
/// slot index exceeds the active count for the current step sleep until the
/// next step boundary.
pub struct UserGroup {
    sim: Sim,
    name: String,
    steps: Vec<(SimTime, u32)>,
    max_users: u32,
    quantiles: Vec<f64>,
    tally_factory: Rc<TallyFactory>,
    ctx: Rc<UserContext>,
    activated: Cell<bool>,
}

impl std::fmt::Debug for UserGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserGroup")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("max_users", &self.max_users)
            .field("quantiles", &self.quantiles)
            .field("activated", &self.activated)
            .finish()
    }
}

impl UserGroup {
    pub fn new(
        sim: &Sim,
        name: impl Into<String>,
        num_users: impl Into<UserLoad>,
        weighted_svcs: Vec<(Rc<dyn SvcRequester>, f64)>,
        min_think: f64,
        max_think: f64,
        rng: &SimRng,
    ) -> Result<Self, SimError> {
        let name = name.into();
        let steps = num_users.into().into_steps()?;
        if weighted_svcs.is_empty() {
            return Err(SimError::construction(format!(
                "user group '{name}' needs at least one weighted service"
            )));
        }
        if !(min_think >= 0.0) {
            return Err(SimError::construction(format!(
                "user group '{name}': min think time must be non-negative"
            )));
        }
        if !(min_think <= max_think) {
            return Err(SimError::construction(format!(
                "user group '{name}': min think time exceeds max think time"
            )));
        }

        let weights: Vec<f64> = weighted_svcs.iter().map(|(_, w)| *w).collect();
        let chooser = WeightedChooser::new(&weights)?;
        let requesters: Vec<Rc<dyn SvcRequester>> =
            weighted_svcs.into_iter().map(|(r, _)| r).collect();
        let max_users = steps.iter().map(|&(_, n)| n).max().unwrap_or(0);

        let quantiles = vec![0.5, 0.95, 0.99];
        let tally_factory: Rc<TallyFactory> = Rc::new(|_| SampleTally::boxed());
        let tallies = Rc::new(RefCell::new(Self::build_tallies(
            &*tally_factory,
            &quantiles,
            requesters.len(),
        )));

        let ctx = Rc::new(UserContext {
            group_name: name.clone(),
            steps: steps.clone(),
            requesters,
            chooser,
            min_think,
            max_think,
            rng: rng.clone(),
            tallies,
            svc_req_log: None,
        });

        Ok(UserGroup {
            sim: sim.clone(),
            name,
            steps,
            max_users,
            quantiles,
            tally_factory,
            ctx,
            activated: Cell::new(false),
        })
    }

    fn build_tallies(factory: &TallyFactory, quantiles: &[f64], svcs: usize) -> GroupTallies {
        GroupTallies {
            overall: factory(quantiles),
            per_svc: (0..svcs).map(|_| factory(quantiles)).collect(),
            dispatched: vec![0; svcs],
            dispatched_total: 0,
        }
    }

    fn rebuild_context(&mut self, svc_req_log: Option<GroupReqLog>) {
        let ctx = Rc::clone(&self.ctx);
        let tallies = Rc::new(RefCell::new(Self::build_tallies(
            &*self.tally_factory,
            &self.quantiles,
            ctx.requesters.len(),
        )));
        self.ctx = Rc::new(UserContext {
            group_name: ctx.group_name.clone(),
            steps: ctx.steps.clone(),
            requesters: ctx.requesters.clone(),
            chooser: ctx.chooser.clone(),
            min_think: ctx.min_think,
            max_think: ctx.max_think,
            rng: ctx.rng.clone(),
            tallies,
            svc_req_log: svc_req_log.or_else(|| ctx.svc_req_log.clone()),
        });
    }

    /// Replace the tallied quantile set (default `[0.5, 0.95, 0.99]`).
    /// Only meaningful before activation.
    pub fn with_quantiles(mut self, quantiles: Vec<f64>) -> Result<Self, SimError> {
        if quantiles.is_empty() || quantiles.iter().any(|q| !(*q > 0.0 && *q < 1.0)) {
            return Err(SimError::construction(format!(
                "user group '{}': quantiles must lie strictly between 0 and 1",
                self.name
            )));
        }
        self.quantiles = quantiles;
        self.rebuild_context(None);
        Ok(self)
    }

    /// Log every submitted request into `log`. Only meaningful before
    /// activation.
    pub fn with_request_log(mut self, log: GroupReqLog) -> Self {
        self.rebuild_context(Some(log));
        self
    }

    /// Substitute the statistics sink used for response-time tallies.
    /// Only meaningful before activation.
    pub fn with_tally_factory(
        mut self,
        factory: impl Fn(&[f64]) -> Box<dyn Tally> + 'static,
    ) -> Self {
        self.tally_factory = Rc::new(factory);
        self.rebuild_context(None);
        self
    }

    /// Spawn one process per user slot. Users start evaluating the step
    /// function at the current virtual time.
    pub fn activate_users(&self) -> Result<(), SimError> {
        if self.activated.replace(true) {
            return Err(SimError::contract(format!(
                "user group '{}' was already activated",
                self.name
            )));
        }
        debug!(group = %self.name, users = self.max_users, "activating users");
        for user_index in 0..self.max_users {
            self.sim.spawn(Box::new(UserProcess {
                ctx: Rc::clone(&self.ctx),
                user_index,
                phase: UserPhase::Decide,
            }));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_users(&self) -> u32 {
        self.max_users
    }

    pub fn steps(&self) -> &[(SimTime, u32)] {
        &self.steps
    }

    /// The quantile points tallied for this group.
    pub fn tracked_quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// Names of the weighted services, in construction order.
    pub fn svc_names(&self) -> Vec<String> {
        self.ctx
            .requesters
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    fn svc_index(&self, svc: Option<&str>) -> Option<usize> {
        let name = svc?;
        self.ctx.requesters.iter().position(|r| r.name() == name)
    }

    fn with_tally<R>(&self, svc: Option<&str>, f: impl FnOnce(&dyn Tally) -> R, empty: R) -> R {
        let tallies = self.ctx.tallies.borrow();
        match svc {
            None => f(tallies.overall.as_ref()),
            Some(_) => match self.svc_index(svc) {
                Some(i) => f(tallies.per_svc[i].as_ref()),
                None => empty,
            },
        }
    }

    /// Mean response time for one service, or across all (`svc = None`).
    pub fn avg_response_time(&self, svc: Option<&str>) -> f64 {
        self.with_tally(svc, |t| t.average(), 0.0)
    }

    pub fn std_dev_response_time(&self, svc: Option<&str>) -> f64 {
        self.with_tally(svc, |t| t.variance().abs().sqrt(), 0.0)
    }

    pub fn min_response_time(&self, svc: Option<&str>) -> f64 {
        self.with_tally(svc, |t| t.min(), 0.0)
    }

    pub fn max_response_time(&self, svc: Option<&str>) -> f64 {
        self.with_tally(svc, |t| t.max(), 0.0)
    }

    /// Response-time quantiles at the group's tracked quantile points.
    pub fn response_time_quantiles(&self, svc: Option<&str>) -> Vec<f64> {
        self.with_tally(svc, |t| t.quantiles(&self.quantiles), Vec::new())
    }

    /// Requests submitted and responded to.
    pub fn responded_request_count(&self, svc: Option<&str>) -> u64 {
        self.with_tally(svc, |t| t.count(), 0)
    }

    /// Requests manufactured and submitted, responded or not.
    pub fn dispatched_request_count(&self, svc: Option<&str>) -> u64 {
        let tallies = self.ctx.tallies.borrow();
        match svc {
            None => tallies.dispatched_total,
            Some(_) => match self.svc_index(svc) {
                Some(i) => tallies.dispatched[i],
                None => 0,
            },
        }
    }

    /// Requests submitted but not yet responded to.
    pub fn unresponded_request_count(&self, svc: Option<&str>) -> u64 {
        self.dispatched_request_count(svc) - self.responded_request_count(svc)
    }

    /// Responded requests per unit of virtual time.
    pub fn throughput(&self, svc: Option<&str>) -> f64 {
        let now = self.sim.now();
        if now > 0.0 {
            self.responded_request_count(svc) as f64 / now
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// UserProcess
// ---------------------------------------------------------------------------

enum UserPhase {
    Decide,
    Dormant,
    Thinking,
    Awaiting {
        svc_index: usize,
        started_at: SimTime,
    },
}

struct UserProcess {
    ctx: Rc<UserContext>,
    user_index: u32,
    phase: UserPhase,
}

impl Process for UserProcess {
    fn resume(&mut self, sim: &Sim, _pid: ProcessId, _wakeup: Wakeup) -> Step {
        loop {
            match self.phase {
                UserPhase::Decide => {
                    let now = sim.now();
                    let (active, next_break) = self.ctx.step_at(now);
                    if self.user_index >= active {
                        if next_break.is_infinite() {
                            // This slot never becomes active again.
                            return Step::Done;
                        }
                        self.phase = UserPhase::Dormant;
                        return Step::Sleep(next_break - now);
                    }
                    let think = self.ctx.rng.uniform(self.ctx.min_think, self.ctx.max_think);
                    self.phase = UserPhase::Thinking;
                    return Step::Sleep(think);
                }
                UserPhase::Dormant => {
                    self.phase = UserPhase::Decide;
                }
                UserPhase::Thinking => {
                    let now = sim.now();
                    // The slot may have stepped down while this user was
                    // thinking; re-check before submitting.
                    let (active, _) = self.ctx.step_at(now);
                    if self.user_index >= active {
                        self.phase = UserPhase::Decide;
                        continue;
                    }
                    let svc_index = self.ctx.chooser.pick(&self.ctx.rng);
                    {
                        let mut tallies = self.ctx.tallies.borrow_mut();
                        tallies.dispatched[svc_index] += 1;
                        tallies.dispatched_total += 1;
                    }
                    let request =
                        self.ctx.requesters[svc_index].make_request(Value::Null, false);
                    if let Some(log) = &self.ctx.svc_req_log {
                        log.borrow_mut()
                            .push((self.ctx.group_name.clone(), Rc::clone(&request)));
                    }
                    match request.submit() {
                        Ok(child) => {
                            self.phase = UserPhase::Awaiting {
                                svc_index,
                                started_at: now,
                            };
                            return Step::Join(vec![child]);
                        }
                        Err(e) => return Step::Fail(e),
                    }
                }
                UserPhase::Awaiting {
                    svc_index,
                    started_at,
                } => {
                    let response_time = sim.now() - started_at;
                    let mut tallies = self.ctx.tallies.borrow_mut();
                    tallies.overall.add(response_time);
                    tallies.per_svc[svc_index].add(response_time);
                    drop(tallies);
                    self.phase = UserPhase::Decide;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
