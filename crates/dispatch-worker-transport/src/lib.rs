//! Worker-side transport: the websocket duplex session compute nodes use
//! to receive tasks and stream fragments back to the dispatch router.

pub mod error;
pub mod handler;
pub mod session;

pub use error::{Error, Result};
pub use handler::{router, WorkerTransportState};
