//! Seeded randomness and weighted choice for simulation inputs.
//!
//! Everything random in a simulation flows through a [`SimRng`] so that a
//! fixed seed reproduces the run bit for bit.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;
use crate::server::Server;
use crate::service::requester::{CompUnitsGen, LoadBalancer};

// ---------------------------------------------------------------------------
// SimRng
// ---------------------------------------------------------------------------

/// Shared, seeded random number generator handle. Clones share the same
/// underlying stream.
#[derive(Clone)]
pub struct SimRng {
    inner: Rc<RefCell<StdRng>>,
}

impl SimRng {
    pub fn seed_from(seed: u64) -> Self {
        SimRng {
            inner: Rc::new(RefCell::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Uniform sample on `[0, 1)`.
    pub fn random(&self) -> f64 {
        self.inner.borrow_mut().gen::<f64>()
    }

    /// Uniform sample on `[low, high)`, or exactly `low` when the interval
    /// is degenerate.
    pub fn uniform(&self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.random()
    }

    /// Uniform integer sample on `[low, high]`, both ends inclusive.
    pub fn uniform_int(&self, low: i64, high: i64) -> i64 {
        if low >= high {
            return low;
        }
        self.inner.borrow_mut().gen_range(low..=high)
    }

    /// Uniform index into a slice of the given non-zero length.
    pub fn pick_index(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        self.inner.borrow_mut().gen_range(0..len)
    }
}

// ---------------------------------------------------------------------------
// WeightedChooser
// ---------------------------------------------------------------------------

/// Picks indices with probability proportional to their weights.
///
/// Weights are normalized once at construction into cumulative thresholds;
/// the final threshold is forced to exactly 1.0 to absorb rounding, so a
/// sample on `[0, 1)` always lands in some bucket.
#[derive(Clone)]
pub struct WeightedChooser {
    cum_freqs: Vec<f64>,
}

impl WeightedChooser {
    pub fn new(weights: &[f64]) -> Result<Self, SimError> {
        if weights.is_empty() {
            return Err(SimError::construction(
                "weighted chooser needs at least one weight",
            ));
        }
        if weights.iter().any(|w| !(*w > 0.0) || !w.is_finite()) {
            return Err(SimError::construction(
                "weighted chooser weights must be positive",
            ));
        }
        let total: f64 = weights.iter().sum();
        let mut cum = 0.0;
        let mut cum_freqs: Vec<f64> = weights
            .iter()
            .map(|w| {
                cum += w / total;
                cum
            })
            .collect();
        let last = cum_freqs.len() - 1;
        cum_freqs[last] = 1.0;
        Ok(WeightedChooser { cum_freqs })
    }

    pub fn len(&self) -> usize {
        self.cum_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cum_freqs.is_empty()
    }

    /// Pick an index using one `[0, 1)` sample from `rng`.
    pub fn pick(&self, rng: &SimRng) -> usize {
        let sample = rng.random();
        self.cum_freqs
            .iter()
            .position(|&threshold| threshold > sample)
            .unwrap_or(self.cum_freqs.len() - 1)
    }
}

// ---------------------------------------------------------------------------
// Samplers and load balancers
// ---------------------------------------------------------------------------

/// A compute-units generator that always returns `units`.
pub fn const_gen(units: f64) -> CompUnitsGen {
    Rc::new(move || units)
}

/// A compute-units generator uniform on `[low, high)`.
pub fn uniform_gen(rng: &SimRng, low: f64, high: f64) -> CompUnitsGen {
    let rng = rng.clone();
    Rc::new(move || rng.uniform(low, high))
}

/// A load balancer that routes every service to one server.
pub fn single_server(server: &Rc<Server>) -> LoadBalancer {
    let server = Rc::clone(server);
    Box::new(move |_| Rc::clone(&server))
}

/// A load balancer that picks uniformly at random among `servers`.
pub fn random_server(rng: &SimRng, servers: Vec<Rc<Server>>) -> Result<LoadBalancer, SimError> {
    if servers.is_empty() {
        return Err(SimError::construction(
            "random load balancer needs at least one server",
        ));
    }
    let rng = rng.clone();
    Ok(Box::new(move |_| {
        Rc::clone(&servers[rng.pick_index(servers.len())])
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
