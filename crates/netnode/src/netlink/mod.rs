//! rtnetlink protocol implementation.
//!
//! A small, namespace-aware subset of rtnetlink: link attributes, addresses,
//! routes and qdiscs. Every [`Connection`] is bound to the network namespace
//! its socket was opened in.

pub mod addr;
pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod link;
pub mod message;
pub mod route;
pub mod socket;
pub mod tc;
pub mod types;

pub use addr::AddressInfo;
pub use builder::MessageBuilder;
pub use connection::Connection;
pub use error::{Error, Result};
pub use link::LinkInfo;
pub use route::{Route, RouteInfo};
pub use tc::{NetemConfig, QdiscConfig, QdiscInfo, TbfConfig, TbfTuning};
pub use types::{AF_INET, AF_INET6, tc_handle};
