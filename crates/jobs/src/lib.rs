// crates/jobs/src/lib.rs
//! Client side of the remote job protocol: start a job, poll its pages until
//! it finishes, cancel it, and optionally pour the pages into a `ResultStore`.

pub mod controller;
pub mod dispatcher;
pub mod http;
pub mod sink;
pub mod transport;

pub use controller::{JobCallback, JobController};
pub use dispatcher::JobDispatcher;
pub use http::HttpTransport;
pub use sink::{SinkHandle, SinkReport, StoreSink};
pub use transport::Transport;
