pub mod combinators;
pub mod request;
pub mod requester;

pub use combinators::{CallPar, CallSeq, ReducerFn};
pub use request::{SvcRequest, TimeLabel};
pub use requester::{
    Async, Blocking, CompUnitsGen, CoreSvcRequester, LoadBalancer, OutputFn, SvcRequester,
};
