use std::rc::Rc;

use serde_json::Value;

use crate::error::SimError;
use crate::service::request::SvcRequest;
use crate::service::requester::SvcRequester;
use crate::sim::scheduler::{Process, ProcessId, Sim, Step, Wakeup};

/// Folds the ordered outputs of a parallel composite into one value.
pub type ReducerFn = Rc<dyn Fn(&[Value]) -> Value>;

// ---------------------------------------------------------------------------
// CallSeq — sequential composition
// ---------------------------------------------------------------------------

/// Combines a non-empty list of requesters into a sequential composite:
/// each child request is submitted when the previous one completes, and the
/// previous output value becomes the next input value.
///
/// With `cont = true` the composite models in-server continuation: every
/// child runs on the composite's server (the head child's server), and if
/// the whole sequence sits inside a blocking scope no child re-acquires a
/// software thread. With `cont = false` each hop after the head is an
/// independent out-of-server call, load-balanced on its own.
pub struct CallSeq {
    sim: Sim,
    name: String,
    requesters: Vec<Rc<dyn SvcRequester>>,
    cont: bool,
}

impl CallSeq {
    pub fn new(
        sim: &Sim,
        name: impl Into<String>,
        requesters: Vec<Rc<dyn SvcRequester>>,
        cont: bool,
    ) -> Result<Rc<Self>, SimError> {
        let name = name.into();
        if requesters.is_empty() {
            return Err(SimError::construction(format!(
                "sequential composite '{name}' must have at least one sub-requester"
            )));
        }
        Ok(Rc::new(CallSeq {
            sim: sim.clone(),
            name,
            requesters,
            cont,
        }))
    }
}

impl SvcRequester for CallSeq {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest> {
        // The head is manufactured eagerly so the composite's server is
        // already resolved when an enclosing Blocking wrapper needs it.
        let head = self.requesters[0].make_request(in_val.clone(), in_blocking_call);
        let server = head.server();
        let req = SvcRequest::new(
            &self.sim,
            &self.name,
            server,
            in_val,
            in_blocking_call,
            true,
            {
                let requesters = self.requesters.clone();
                let cont = self.cont;
                let head = Rc::clone(&head);
                Box::new(move |req| {
                    Box::new(SeqBehavior {
                        req,
                        requesters,
                        cont,
                        next_index: 1,
                        current: Some(head),
                        started: false,
                    })
                })
            },
        );
        head.set_parent(&req);
        req.set_enclosed(head);
        req
    }
}

struct SeqBehavior {
    req: Rc<SvcRequest>,
    requesters: Vec<Rc<dyn SvcRequester>>,
    cont: bool,
    next_index: usize,
    current: Option<Rc<SvcRequest>>,
    started: bool,
}

impl SeqBehavior {
    fn submit_current(&mut self) -> Step {
        let Some(current) = self.current.as_ref() else {
            return Step::Fail(SimError::contract(
                "sequential composite lost its pending child",
            ));
        };
        match current.submit() {
            Ok(child) => Step::Join(vec![child]),
            Err(e) => Step::Fail(e),
        }
    }
}

impl Process for SeqBehavior {
    fn resume(&mut self, _sim: &Sim, _pid: ProcessId, _wakeup: Wakeup) -> Step {
        if !self.started {
            self.started = true;
            // Adopt the head's server as the composite's server.
            if let Some(server) = self.current.as_ref().and_then(|head| head.server()) {
                if let Err(e) = self.req.assign_server(&server) {
                    return Step::Fail(e);
                }
            }
            return self.submit_current();
        }

        let Some(done) = self.current.take() else {
            return Step::Fail(SimError::contract(
                "sequential composite resumed without a pending child",
            ));
        };
        let val = done.out_val();

        if self.next_index < self.requesters.len() {
            // Continuations share the composite's server and blocking
            // scope; independent hops are freshly load-balanced.
            let in_blocking = if self.cont {
                self.req.in_blocking_call()
            } else {
                false
            };
            let child = self.requesters[self.next_index].make_request(val, in_blocking);
            self.next_index += 1;
            if self.cont {
                if let Some(server) = self.req.server() {
                    if let Err(e) = child.assign_server(&server) {
                        return Step::Fail(e);
                    }
                }
            }
            child.set_parent(&self.req);
            self.current = Some(child);
            return self.submit_current();
        }

        if let Err(e) = self.req.complete(val) {
            return Step::Fail(e);
        }
        Step::Done
    }
}

// ---------------------------------------------------------------------------
// CallPar — parallel composition
// ---------------------------------------------------------------------------

/// Combines a non-empty list of requesters into a parallel composite: one
/// child request per requester, all submitted back-to-back at the same
/// virtual time, joined on completion of all, completed with
/// `reducer(child outputs)` (`Null` if no reducer is given).
///
/// With `cont = true` all children run on the composite's server: the
/// parent's if already routed, else the first child's. With `cont = false`
/// every child is independently load-balanced and runs outside any blocking
/// scope.
pub struct CallPar {
    sim: Sim,
    name: String,
    requesters: Vec<Rc<dyn SvcRequester>>,
    reducer: Option<ReducerFn>,
    cont: bool,
}

impl CallPar {
    pub fn new(
        sim: &Sim,
        name: impl Into<String>,
        requesters: Vec<Rc<dyn SvcRequester>>,
        reducer: Option<ReducerFn>,
        cont: bool,
    ) -> Result<Rc<Self>, SimError> {
        let name = name.into();
        if requesters.is_empty() {
            return Err(SimError::construction(format!(
                "parallel composite '{name}' must have at least one sub-requester"
            )));
        }
        Ok(Rc::new(CallPar {
            sim: sim.clone(),
            name,
            requesters,
            reducer,
            cont,
        }))
    }
}

impl SvcRequester for CallPar {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_request(&self, in_val: Value, in_blocking_call: bool) -> Rc<SvcRequest> {
        let requesters = self.requesters.clone();
        let reducer = self.reducer.clone();
        let cont = self.cont;
        // Unresolved composite: the server is settled at submit time.
        SvcRequest::new(
            &self.sim,
            &self.name,
            None,
            in_val,
            in_blocking_call,
            true,
            Box::new(move |req| {
                Box::new(ParBehavior {
                    req,
                    requesters,
                    reducer,
                    cont,
                    children: Vec::new(),
                    started: false,
                })
            }),
        )
    }
}

struct ParBehavior {
    req: Rc<SvcRequest>,
    requesters: Vec<Rc<dyn SvcRequester>>,
    reducer: Option<ReducerFn>,
    cont: bool,
    children: Vec<Rc<SvcRequest>>,
    started: bool,
}

impl Process for ParBehavior {
    fn resume(&mut self, _sim: &Sim, _pid: ProcessId, _wakeup: Wakeup) -> Step {
        if !self.started {
            self.started = true;
            let in_blocking = if self.cont {
                self.req.in_blocking_call()
            } else {
                false
            };
            let children: Vec<Rc<SvcRequest>> = self
                .requesters
                .iter()
                .map(|r| r.make_request(self.req.in_val(), in_blocking))
                .collect();

            if self.cont {
                // Parent's server if already routed, else the first child's.
                let server = self.req.server().or_else(|| children[0].server());
                if let Some(server) = server {
                    if let Err(e) = self.req.assign_server(&server) {
                        return Step::Fail(e);
                    }
                    for child in &children {
                        if let Err(e) = child.assign_server(&server) {
                            return Step::Fail(e);
                        }
                    }
                }
            }

            let mut pids = Vec::with_capacity(children.len());
            for child in &children {
                child.set_parent(&self.req);
                match child.submit() {
                    Ok(pid) => pids.push(pid),
                    Err(e) => return Step::Fail(e),
                }
            }
            self.children = children;
            return Step::Join(pids);
        }

        let outs: Vec<Value> = self.children.iter().map(|c| c.out_val()).collect();
        let val = match &self.reducer {
            Some(f) => f(&outs),
            None => Value::Null,
        };
        if let Err(e) = self.req.complete(val) {
            return Step::Fail(e);
        }
        Step::Done
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
