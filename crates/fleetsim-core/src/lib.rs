//! Discrete-event simulation of multi-tier server deployments.
//!
//! A simulation couples three pieces: a virtual-time scheduler driving
//! cooperative processes ([`sim`]), a service-request algebra whose
//! combinators compose atomic requests into sequential, parallel,
//! asynchronous and blocking shapes ([`service`]), and measured resources
//! that derive queueing-theoretic metrics from the event stream
//! ([`sim::resource`], [`server`]). User populations ([`users`]) drive the
//! request tree; [`results`] turns the outcome into summaries and exports.
//!
//! All time is virtual. A run is single-threaded and in-memory, and a fixed
//! seed with a fixed topology reproduces it exactly.
//!
//! ```
//! use std::rc::Rc;
//! use fleetsim_core::{
//!     const_gen, single_server, CoreSvcRequester, Server, Sim, SimRng,
//!     SvcRequester, UserGroup,
//! };
//!
//! let sim = Sim::new();
//! let rng = SimRng::seed_from(12345);
//! let server = Server::new(&sim, "app_1", 10, 20, 20.0).unwrap();
//! let svc = CoreSvcRequester::new(
//!     &sim, "svc_1", const_gen(2.0), single_server(&server), None,
//! );
//! let group = UserGroup::new(
//!     &sim, "users", 100u32,
//!     vec![(svc as Rc<dyn SvcRequester>, 1.0)],
//!     2.0, 10.0, &rng,
//! ).unwrap();
//! group.activate_users().unwrap();
//! sim.run(500.0).unwrap();
//! assert!(group.responded_request_count(None) > 0);
//! ```

pub mod error;
pub mod randutil;
pub mod results;
pub mod server;
pub mod service;
pub mod sim;
pub mod stats;
pub mod users;

pub use error::SimError;
pub use randutil::{const_gen, random_server, single_server, uniform_gen, SimRng, WeightedChooser};
pub use results::export::{export_json, export_requests_csv, RunReport};
pub use results::{minibatch_response_times, GroupSummary, ServerSummary, TimeBucket};
pub use server::{ResourceKind, Server, SvcReqLog};
pub use service::{
    Async, Blocking, CallPar, CallSeq, CompUnitsGen, CoreSvcRequester, LoadBalancer, OutputFn,
    ReducerFn, SvcRequest, SvcRequester, TimeLabel,
};
pub use sim::{Acquire, MeasuredResource, Process, ProcessId, Sim, SimTime, Step, Ticket, Wakeup};
pub use stats::{SampleTally, Tally};
pub use users::{GroupReqLog, UserGroup, UserLoad};
