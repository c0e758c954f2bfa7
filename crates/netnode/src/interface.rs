//! Interface descriptors and the configuration plans derived from them.

use std::fmt;

use crate::netlink::tc::{NetemConfig, QdiscConfig, TbfConfig};
use crate::netlink::types::tc_handle;
use crate::util::addr::format_mac;

/// Handle of the netem qdisc (`1:0`).
pub const NETEM_HANDLE: u32 = tc_handle::make(1, 0);
/// Handle of the tbf qdisc (`2:0`).
pub const TBF_HANDLE: u32 = tc_handle::make(2, 0);

/// Link attributes to apply. Unset or zero values keep the kernel's default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkAttrs {
    pub mtu: Option<u32>,
    pub hardware_addr: Option<[u8; 6]>,
    pub tx_queue_len: Option<u32>,
    pub group: Option<u32>,
}

/// A single attribute change, in the order it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAttribute {
    Mtu(u32),
    HardwareAddr([u8; 6]),
    TxQueueLen(u32),
    Group(u32),
}

impl fmt::Display for LinkAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mtu(v) => write!(f, "mtu {v}"),
            Self::HardwareAddr(mac) => write!(f, "address {}", format_mac(mac)),
            Self::TxQueueLen(v) => write!(f, "txqueuelen {v}"),
            Self::Group(v) => write!(f, "group {v}"),
        }
    }
}

impl LinkAttrs {
    /// Changes to make: MTU, hardware address, tx queue length, group.
    pub fn plan(&self) -> Vec<LinkAttribute> {
        let nonzero = |v: Option<u32>| v.filter(|&v| v != 0);
        let mut plan = Vec::with_capacity(4);
        if let Some(mtu) = nonzero(self.mtu) {
            plan.push(LinkAttribute::Mtu(mtu));
        }
        if let Some(mac) = self.hardware_addr.filter(|mac| *mac != [0; 6]) {
            plan.push(LinkAttribute::HardwareAddr(mac));
        }
        if let Some(qlen) = nonzero(self.tx_queue_len) {
            plan.push(LinkAttribute::TxQueueLen(qlen));
        }
        if let Some(group) = nonzero(self.group) {
            plan.push(LinkAttribute::Group(group));
        }
        plan
    }
}

/// One qdisc of the chain: where it hangs and what it is.
pub struct QdiscLink<'a> {
    pub parent: u32,
    pub handle: u32,
    pub config: &'a dyn QdiscConfig,
}

impl QdiscLink<'_> {
    pub fn kind(&self) -> &'static str {
        self.config.kind()
    }
}

impl fmt::Debug for QdiscLink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdiscLink")
            .field("kind", &self.kind())
            .field("parent", &tc_handle::format(self.parent))
            .field("handle", &tc_handle::format(self.handle))
            .finish()
    }
}

/// A link inside a node's namespace and how it should be configured.
///
/// ```
/// use std::time::Duration;
/// use netnode::Interface;
/// use netnode::netlink::NetemConfig;
///
/// let eth0 = Interface::new("eth0")
///     .mtu(1400)
///     .netem(NetemConfig::new().delay(Duration::from_millis(10)));
/// assert_eq!(eth0.qdisc_chain().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub name: String,
    pub attrs: LinkAttrs,
    /// Adds a netem qdisc when set.
    pub netem: Option<NetemConfig>,
    /// Adds a tbf qdisc when set.
    pub tbf: Option<TbfConfig>,
    index: Option<u32>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.attrs.mtu = Some(mtu);
        self
    }

    pub fn hardware_addr(mut self, mac: [u8; 6]) -> Self {
        self.attrs.hardware_addr = Some(mac);
        self
    }

    pub fn tx_queue_len(mut self, len: u32) -> Self {
        self.attrs.tx_queue_len = Some(len);
        self
    }

    pub fn group(mut self, group: u32) -> Self {
        self.attrs.group = Some(group);
        self
    }

    pub fn netem(mut self, config: NetemConfig) -> Self {
        self.netem = Some(config);
        self
    }

    pub fn tbf(mut self, config: TbfConfig) -> Self {
        self.tbf = Some(config);
        self
    }

    /// Kernel index, known once the interface has been configured.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = Some(index);
    }

    /// Qdiscs to create, in order.
    ///
    /// netem sits at `1:0` under root; tbf sits at `2:0` under netem when
    /// both are present, else directly under root.
    pub fn qdisc_chain(&self) -> Vec<QdiscLink<'_>> {
        let mut chain = Vec::with_capacity(2);
        let mut parent = tc_handle::ROOT;

        if let Some(netem) = &self.netem {
            chain.push(QdiscLink {
                parent,
                handle: NETEM_HANDLE,
                config: netem,
            });
            parent = NETEM_HANDLE;
        }
        if let Some(tbf) = &self.tbf {
            chain.push(QdiscLink {
                parent,
                handle: TBF_HANDLE,
                config: tbf,
            });
        }
        chain
    }
}
