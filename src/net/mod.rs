//! Request/response model and the network capability.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub(crate) use types::path_extension;
pub use types::{find_header, Headers, Request, Response};
