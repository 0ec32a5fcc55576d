pub mod resource;
pub mod scheduler;

pub use resource::{Acquire, MeasuredResource, Ticket};
pub use scheduler::{Process, ProcessId, Sim, SimTime, Step, Wakeup};
