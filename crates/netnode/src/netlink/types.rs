//! Fixed-layout rtnetlink headers and the attribute numbers used with them.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

pub const AF_UNSPEC: u8 = 0;
pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;

fn parse_prefix<T: FromBytes + KnownLayout + Immutable>(data: &[u8]) -> Result<&T> {
    T::ref_from_prefix(data)
        .map(|(hdr, _)| hdr)
        .map_err(|_| Error::Truncated {
            expected: std::mem::size_of::<T>(),
            actual: data.len(),
        })
}

/// Interface info message (struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfInfoMsg {
    pub ifi_family: u8,
    pub __ifi_pad: u8,
    pub ifi_type: u16,
    pub ifi_index: i32,
    pub ifi_flags: u32,
    pub ifi_change: u32,
}

impl IfInfoMsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.ifi_index = index as i32;
        self
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        parse_prefix(data)
    }
}

/// Interface flags (IFF_*).
pub mod iff {
    pub const UP: u32 = 0x1;
    pub const LOWER_UP: u32 = 0x10000;
}

/// Link attributes (IFLA_*).
pub mod ifla {
    pub const ADDRESS: u16 = 1;
    pub const IFNAME: u16 = 3;
    pub const MTU: u16 = 4;
    pub const TXQLEN: u16 = 13;
    pub const GROUP: u16 = 27;
    /// Extended filter mask for GETLINK.
    pub const EXT_MASK: u16 = 29;
}

/// Interface address message (struct ifaddrmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfAddrMsg {
    pub ifa_family: u8,
    pub ifa_prefixlen: u8,
    pub ifa_flags: u8,
    pub ifa_scope: u8,
    pub ifa_index: u32,
}

impl IfAddrMsg {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        parse_prefix(data)
    }
}

/// Address attributes (IFA_*).
pub mod ifa {
    pub const ADDRESS: u16 = 1;
    pub const LOCAL: u16 = 2;
    pub const LABEL: u16 = 3;
    pub const BROADCAST: u16 = 4;
}

/// Route message (struct rtmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtMsg {
    pub rtm_family: u8,
    pub rtm_dst_len: u8,
    pub rtm_src_len: u8,
    pub rtm_tos: u8,
    pub rtm_table: u8,
    pub rtm_protocol: u8,
    pub rtm_scope: u8,
    pub rtm_type: u8,
    pub rtm_flags: u32,
}

impl RtMsg {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        parse_prefix(data)
    }
}

/// Route attributes (RTA_*).
pub mod rta {
    pub const DST: u16 = 1;
    pub const OIF: u16 = 4;
    pub const GATEWAY: u16 = 5;
    pub const PRIORITY: u16 = 6;
    pub const TABLE: u16 = 15;
}

pub mod rt_table {
    pub const UNSPEC: u32 = 0;
    pub const MAIN: u32 = 254;
}

pub mod rt_proto {
    pub const BOOT: u8 = 3;
}

pub mod rt_scope {
    pub const UNIVERSE: u8 = 0;
    pub const LINK: u8 = 253;
    pub const HOST: u8 = 254;
}

pub mod rtn {
    pub const UNICAST: u8 = 1;
}

/// Traffic control message (struct tcmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcMsg {
    pub tcm_family: u8,
    pub tcm__pad1: u8,
    pub tcm__pad2: u16,
    pub tcm_ifindex: i32,
    pub tcm_handle: u32,
    pub tcm_parent: u32,
    pub tcm_info: u32,
}

impl TcMsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.tcm_ifindex = ifindex as i32;
        self
    }

    pub fn with_handle(mut self, handle: u32) -> Self {
        self.tcm_handle = handle;
        self
    }

    pub fn with_parent(mut self, parent: u32) -> Self {
        self.tcm_parent = parent;
        self
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        parse_prefix(data)
    }
}

/// Traffic control attributes (TCA_*).
pub mod tca {
    pub const KIND: u16 = 1;
    pub const OPTIONS: u16 = 2;
}

/// `major:minor` qdisc handles.
pub mod tc_handle {
    pub const ROOT: u32 = 0xFFFF_FFFF;
    pub const UNSPEC: u32 = 0;

    pub const fn make(major: u16, minor: u16) -> u32 {
        ((major as u32) << 16) | minor as u32
    }

    pub const fn major(handle: u32) -> u16 {
        (handle >> 16) as u16
    }

    pub const fn minor(handle: u32) -> u16 {
        (handle & 0xFFFF) as u16
    }

    /// Render as `tc` does: `root`, `1:` or `1:10`.
    pub fn format(handle: u32) -> String {
        match handle {
            ROOT => "root".to_string(),
            UNSPEC => "none".to_string(),
            h if minor(h) == 0 => format!("{:x}:", major(h)),
            h => format!("{:x}:{:x}", major(h), minor(h)),
        }
    }
}
