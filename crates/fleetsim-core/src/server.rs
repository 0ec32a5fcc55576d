use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::service::request::SvcRequest;
use crate::sim::resource::{Acquire, MeasuredResource, Ticket};
use crate::sim::scheduler::{ProcessId, Sim};

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

/// Which of a server's two resources an acquisition log entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Hardware,
    Software,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Hardware => "hw",
            ResourceKind::Software => "sw",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared acquisition log: one `(kind, server_name, request)` triple is
/// appended per resource acquisition attempt.
pub type SvcReqLog = Rc<RefCell<Vec<(ResourceKind, String, Rc<SvcRequest>)>>>;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A server with bounded hardware concurrency and a pool of software
/// threads, each modelled as a [`MeasuredResource`].
///
/// `speed` is the aggregate compute rate across all hardware threads, so a
/// request of `c` compute units holds one hardware thread for
/// `c * max_concurrency / speed` virtual seconds.
pub struct Server {
    name: String,
    max_concurrency: usize,
    num_threads: usize,
    speed: f64,
    hardware: MeasuredResource,
    threads: MeasuredResource,
    hw_svc_req_log: RefCell<Option<SvcReqLog>>,
    sw_svc_req_log: RefCell<Option<SvcReqLog>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("max_concurrency", &self.max_concurrency)
            .field("num_threads", &self.num_threads)
            .field("speed", &self.speed)
            .finish()
    }
}

impl Server {
    pub fn new(
        sim: &Sim,
        name: impl Into<String>,
        max_concurrency: usize,
        num_threads: usize,
        speed: f64,
    ) -> Result<Rc<Self>, SimError> {
        let name = name.into();
        if max_concurrency == 0 {
            return Err(SimError::construction(format!(
                "server '{name}': max_concurrency must be at least 1"
            )));
        }
        if num_threads == 0 {
            return Err(SimError::construction(format!(
                "server '{name}': num_threads must be at least 1"
            )));
        }
        if !(speed > 0.0) || !speed.is_finite() {
            return Err(SimError::construction(format!(
                "server '{name}': speed must be positive, got {speed}"
            )));
        }
        Ok(Rc::new(Server {
            hardware: MeasuredResource::new(sim, max_concurrency)?,
            threads: MeasuredResource::new(sim, num_threads)?,
            name,
            max_concurrency,
            num_threads,
            speed,
            hw_svc_req_log: RefCell::new(None),
            sw_svc_req_log: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Record hardware acquisitions into `log`.
    pub fn set_hw_svc_req_log(&self, log: SvcReqLog) {
        *self.hw_svc_req_log.borrow_mut() = Some(log);
    }

    /// Record software-thread acquisitions into `log`.
    pub fn set_sw_svc_req_log(&self, log: SvcReqLog) {
        *self.sw_svc_req_log.borrow_mut() = Some(log);
    }

    /// Virtual time needed to process `comp_units` on one hardware thread.
    pub fn process_duration(&self, comp_units: f64) -> f64 {
        comp_units * self.max_concurrency as f64 / self.speed
    }

    // -----------------------------------------------------------------------
    // Resource access
    // -----------------------------------------------------------------------

    /// Request a hardware thread for `svc_req`.
    pub fn hw_acquire(&self, pid: ProcessId, svc_req: Option<&Rc<SvcRequest>>) -> Acquire {
        if let Some(req) = svc_req {
            if let Some(log) = self.hw_svc_req_log.borrow().as_ref() {
                log.borrow_mut()
                    .push((ResourceKind::Hardware, self.name.clone(), Rc::clone(req)));
            }
        }
        self.hardware.acquire(pid)
    }

    /// Release a previously granted hardware thread.
    pub fn hw_release(&self, ticket: Ticket) {
        self.hardware.release(ticket)
    }

    /// Request a software thread for `svc_req`.
    pub fn thread_acquire(&self, pid: ProcessId, svc_req: Option<&Rc<SvcRequest>>) -> Acquire {
        if let Some(req) = svc_req {
            if let Some(log) = self.sw_svc_req_log.borrow().as_ref() {
                log.borrow_mut()
                    .push((ResourceKind::Software, self.name.clone(), Rc::clone(req)));
            }
        }
        self.threads.acquire(pid)
    }

    /// Release a previously granted software thread.
    pub fn thread_release(&self, ticket: Ticket) {
        self.threads.release(ticket)
    }

    // -----------------------------------------------------------------------
    // Hardware metrics
    // -----------------------------------------------------------------------

    /// Hardware releases per unit of virtual time.
    pub fn throughput(&self) -> f64 {
        self.hardware.throughput()
    }

    pub fn avg_hw_queue_time(&self) -> f64 {
        self.hardware.avg_queue_time()
    }

    /// Average time spent executing per hardware release.
    pub fn avg_process_time(&self) -> f64 {
        self.hardware.avg_use_time()
    }

    pub fn avg_hw_queue_length(&self) -> f64 {
        self.hardware.avg_queue_length()
    }

    /// Requests currently queued for a hardware thread.
    pub fn hw_queue_length(&self) -> usize {
        self.hardware.queue_length()
    }

    /// Requests currently executing.
    pub fn hw_in_use_count(&self) -> usize {
        self.hardware.in_use_count()
    }

    /// Fraction of hardware capacity used.
    pub fn utilization(&self) -> f64 {
        self.hardware.utilization()
    }

    // -----------------------------------------------------------------------
    // Software-thread metrics
    // -----------------------------------------------------------------------

    pub fn avg_thread_queue_time(&self) -> f64 {
        self.threads.avg_queue_time()
    }

    pub fn avg_thread_use_time(&self) -> f64 {
        self.threads.avg_use_time()
    }

    /// Average thread wait + use time per software-thread release.
    pub fn avg_service_time(&self) -> f64 {
        self.threads.avg_service_time()
    }

    pub fn avg_thread_queue_length(&self) -> f64 {
        self.threads.avg_queue_length()
    }

    pub fn thread_queue_length(&self) -> usize {
        self.threads.queue_length()
    }

    pub fn thread_in_use_count(&self) -> usize {
        self.threads.in_use_count()
    }

    /// Fraction of software-thread capacity used.
    pub fn thread_utilization(&self) -> f64 {
        self.threads.utilization()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
