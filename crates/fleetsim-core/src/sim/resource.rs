use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::SimError;
use crate::sim::scheduler::{ProcessId, Sim, SimTime};

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Proof of a granted resource unit. Carries the virtual time at which the
/// request was originally submitted, which prices the eventual release.
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    pub submission_time: SimTime,
}

/// Outcome of an acquisition attempt.
pub enum Acquire {
    /// A unit was free; the caller proceeds without suspending.
    Granted(Ticket),
    /// All units are busy; the caller was queued FIFO and must suspend with
    /// `Step::AwaitGrant` until the grant event arrives.
    Queued,
}

struct Waiter {
    pid: ProcessId,
    submission_time: SimTime,
}

// ---------------------------------------------------------------------------
// MeasuredResource
// ---------------------------------------------------------------------------

struct ResourceState {
    capacity: usize,
    in_use: usize,
    queue: VecDeque<Waiter>,
    releases: u64,
    cum_queue_time: f64,
    cum_service_time: f64,
}

/// A bounded-capacity FIFO resource that tallies queueing and service times,
/// from which throughput, average queue length (Little's Law), and
/// utilization are derived at read time.
///
/// Grant order is strictly the order of acquisition attempts. A waiter that
/// never reaches its grant by the end of a run contributes nothing to any
/// cumulative counter.
#[derive(Clone)]
pub struct MeasuredResource {
    sim: Sim,
    state: Rc<RefCell<ResourceState>>,
}

impl MeasuredResource {
    pub fn new(sim: &Sim, capacity: usize) -> Result<Self, SimError> {
        if capacity == 0 {
            return Err(SimError::construction("resource capacity must be at least 1"));
        }
        Ok(MeasuredResource {
            sim: sim.clone(),
            state: Rc::new(RefCell::new(ResourceState {
                capacity,
                in_use: 0,
                queue: VecDeque::new(),
                releases: 0,
                cum_queue_time: 0.0,
                cum_service_time: 0.0,
            })),
        })
    }

    /// Try to acquire one unit for `pid`. An immediate grant has zero queue
    /// time; otherwise the caller joins the wait queue.
    pub fn acquire(&self, pid: ProcessId) -> Acquire {
        let now = self.sim.now();
        let mut st = self.state.borrow_mut();
        if st.in_use < st.capacity {
            st.in_use += 1;
            Acquire::Granted(Ticket {
                submission_time: now,
            })
        } else {
            st.queue.push_back(Waiter {
                pid,
                submission_time: now,
            });
            Acquire::Queued
        }
    }

    /// Release one unit. If the wait queue is non-empty the unit transfers
    /// to the head waiter within this same dispatch: its queue time is
    /// tallied and a grant event is scheduled at the current time, so
    /// `in_use` never dips below capacity while anyone is waiting.
    pub fn release(&self, ticket: Ticket) {
        let now = self.sim.now();
        let granted = {
            let mut st = self.state.borrow_mut();
            st.releases += 1;
            st.cum_service_time += now - ticket.submission_time;
            match st.queue.pop_front() {
                Some(waiter) => {
                    st.cum_queue_time += now - waiter.submission_time;
                    Some((
                        waiter.pid,
                        Ticket {
                            submission_time: waiter.submission_time,
                        },
                    ))
                }
                None => {
                    st.in_use -= 1;
                    None
                }
            }
        };
        if let Some((pid, ticket)) = granted {
            self.sim.schedule_grant(pid, ticket);
        }
    }

    // -----------------------------------------------------------------------
    // Read-time metrics
    // -----------------------------------------------------------------------

    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    pub fn in_use_count(&self) -> usize {
        self.state.borrow().in_use
    }

    pub fn queue_length(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn releases(&self) -> u64 {
        self.state.borrow().releases
    }

    /// Releases per unit of virtual time, 0 before the clock moves.
    pub fn throughput(&self) -> f64 {
        let now = self.sim.now();
        if now > 0.0 {
            self.state.borrow().releases as f64 / now
        } else {
            0.0
        }
    }

    /// Average queueing time per release, 0 before the first release.
    pub fn avg_queue_time(&self) -> f64 {
        let st = self.state.borrow();
        if st.releases > 0 {
            st.cum_queue_time / st.releases as f64
        } else {
            0.0
        }
    }

    /// Average end-to-end (queue + use) time per release.
    pub fn avg_service_time(&self) -> f64 {
        let st = self.state.borrow();
        if st.releases > 0 {
            st.cum_service_time / st.releases as f64
        } else {
            0.0
        }
    }

    /// Average holding time per release.
    pub fn avg_use_time(&self) -> f64 {
        self.avg_service_time() - self.avg_queue_time()
    }

    /// Time-average wait-queue length, by Little's formula.
    pub fn avg_queue_length(&self) -> f64 {
        self.throughput() * self.avg_queue_time()
    }

    /// Fraction of capacity in use over the run so far.
    pub fn utilization(&self) -> f64 {
        let now = self.sim.now();
        if now <= 0.0 {
            return 0.0;
        }
        let st = self.state.borrow();
        (st.cum_service_time - st.cum_queue_time) / (st.capacity as f64 * now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
