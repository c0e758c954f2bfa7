//! Interface address management.

use std::net::IpAddr;

use super::attr::{AttrIter, get};
use super::connection::{Connection, create_request, dump_request, reply_payload};
use super::error::Result;
use super::message::NlMsgType;
use super::types::{AF_INET, AF_INET6, AF_UNSPEC, IfAddrMsg, ifa, rt_scope};
use crate::util::addr::{IpNet, ip_octets};

/// An address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub ifindex: u32,
    pub address: IpNet,
    pub broadcast: Option<IpAddr>,
    pub scope: u8,
}

impl AddressInfo {
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>> {
        let msg = IfAddrMsg::from_bytes(payload)?;
        let attrs = &payload[std::mem::size_of::<IfAddrMsg>()..];

        let mut local = None;
        let mut address = None;
        let mut broadcast = None;
        for (kind, data) in AttrIter::new(attrs) {
            match kind {
                ifa::LOCAL => local = Some(get::ip_addr(data)?),
                ifa::ADDRESS => address = Some(get::ip_addr(data)?),
                ifa::BROADCAST => broadcast = Some(get::ip_addr(data)?),
                _ => {}
            }
        }

        // IFA_LOCAL is the interface's own address; IFA_ADDRESS is the peer
        // on point-to-point links and equal to IFA_LOCAL otherwise.
        let Some(addr) = local.or(address) else {
            return Ok(None);
        };
        let Ok(address) = IpNet::new(addr, msg.ifa_prefixlen) else {
            return Ok(None);
        };

        Ok(Some(Self {
            ifindex: msg.ifa_index,
            address,
            broadcast,
            scope: msg.ifa_scope,
        }))
    }
}

/// Build an RTM_NEWADDR request.
pub(crate) fn new_address_request(ifindex: u32, address: &IpNet) -> super::builder::MessageBuilder {
    let family = if address.is_ipv4() { AF_INET } else { AF_INET6 };
    let ifaddr = IfAddrMsg {
        ifa_family: family,
        ifa_prefixlen: address.prefix_len(),
        ifa_scope: rt_scope::UNIVERSE,
        ifa_index: ifindex,
        ..Default::default()
    };

    let octets = ip_octets(&address.addr());
    let mut builder = create_request(NlMsgType::RTM_NEWADDR);
    builder.append(&ifaddr);
    builder.append_attr(ifa::LOCAL, &octets);
    builder.append_attr(ifa::ADDRESS, &octets);
    if let Some(brd) = address.broadcast() {
        builder.append_attr(ifa::BROADCAST, &brd.octets());
    }
    builder
}

impl Connection {
    /// Add `address` to the interface with index `ifindex`.
    pub async fn add_address(&self, ifindex: u32, address: &IpNet) -> Result<()> {
        self.request_ack(new_address_request(ifindex, address)).await
    }

    /// Addresses configured on `ifindex`.
    pub async fn get_addresses(&self, ifindex: u32) -> Result<Vec<AddressInfo>> {
        let mut builder = dump_request(NlMsgType::RTM_GETADDR);
        builder.append(&IfAddrMsg {
            ifa_family: AF_UNSPEC,
            ..Default::default()
        });

        let mut out = Vec::new();
        for reply in self.dump(builder).await? {
            if let Some(info) = AddressInfo::from_payload(reply_payload(&reply)?)?
                && info.ifindex == ifindex
            {
                out.push(info);
            }
        }
        Ok(out)
    }
}
