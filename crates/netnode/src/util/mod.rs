//! Utility helpers.

pub mod addr;

pub use addr::{AddrError, IpNet, format_mac, parse_mac};
