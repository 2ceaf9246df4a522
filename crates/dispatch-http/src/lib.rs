//! HTTP ingress adapter: accepts chat completion requests, admits them onto
//! the right model's arrival queue, and streams the response back as it is
//! produced by whichever worker ends up serving it.

pub mod error;
pub mod handler;

pub use error::{Error, Result};
pub use handler::{router, IngressState};
