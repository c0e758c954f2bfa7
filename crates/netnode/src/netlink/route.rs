//! Route management.
//!
//! ```ignore
//! use netnode::netlink::route::Route;
//!
//! // 10.1.0.0/16 via 10.0.0.254
//! let route = Route::new("10.1.0.0/16".parse()?).gateway("10.0.0.254".parse()?);
//! conn.add_route(&route, None).await?;
//!
//! // on-link route out of eth0
//! let route = Route::new("10.2.0.0/16".parse()?).dev("eth0");
//! conn.add_route(&route, Some(eth0_index)).await?;
//! ```

use std::fmt;
use std::net::IpAddr;

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::connection::{Connection, create_request, dump_request, reply_payload};
use super::error::{Error, Result};
use super::message::NlMsgType;
use super::types::{AF_INET, AF_INET6, RtMsg, rt_proto, rt_scope, rt_table, rta, rtn};
use crate::util::addr::{IpNet, ip_octets};

/// A unicast route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpNet,
    pub gateway: Option<IpAddr>,
    /// Output interface, by name inside the node's namespace.
    pub dev: Option<String>,
    /// Routing table; main when unset.
    pub table: Option<u32>,
    pub metric: Option<u32>,
}

impl Route {
    pub fn new(destination: IpNet) -> Self {
        Self {
            destination,
            gateway: None,
            dev: None,
            table: None,
            metric: None,
        }
    }

    pub fn gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn dev(mut self, dev: impl Into<String>) -> Self {
        self.dev = Some(dev.into());
        self
    }

    pub fn table(mut self, table: u32) -> Self {
        self.table = Some(table);
        self
    }

    pub fn metric(mut self, metric: u32) -> Self {
        self.metric = Some(metric);
        self
    }

    fn family(&self) -> u8 {
        if self.destination.is_ipv4() {
            AF_INET
        } else {
            AF_INET6
        }
    }

    /// Build the RTM_NEWROUTE request. `oif` is the resolved index of `dev`.
    pub(crate) fn build(&self, oif: Option<u32>) -> Result<MessageBuilder> {
        if let Some(gw) = self.gateway
            && gw.is_ipv4() != self.destination.is_ipv4()
        {
            return Err(Error::InvalidAttribute(format!(
                "gateway {gw} does not match the family of {}",
                self.destination
            )));
        }

        let table = self.table.unwrap_or(rt_table::MAIN);
        // On-link IPv4 routes get link scope, like `ip route add ... dev X`.
        let scope = if self.gateway.is_none() && self.destination.is_ipv4() {
            rt_scope::LINK
        } else {
            rt_scope::UNIVERSE
        };

        let rtmsg = RtMsg {
            rtm_family: self.family(),
            rtm_dst_len: self.destination.prefix_len(),
            rtm_table: if table > 255 {
                rt_table::UNSPEC as u8
            } else {
                table as u8
            },
            rtm_protocol: rt_proto::BOOT,
            rtm_scope: scope,
            rtm_type: rtn::UNICAST,
            ..Default::default()
        };

        let mut builder = create_request(NlMsgType::RTM_NEWROUTE);
        builder.append(&rtmsg);

        if self.destination.prefix_len() > 0 {
            builder.append_attr(rta::DST, &ip_octets(&self.destination.network()));
        }
        if let Some(gw) = self.gateway {
            builder.append_attr(rta::GATEWAY, &ip_octets(&gw));
        }
        if let Some(oif) = oif {
            builder.append_attr_u32(rta::OIF, oif);
        }
        builder.append_attr_u32(rta::TABLE, table);
        if let Some(metric) = self.metric {
            builder.append_attr_u32(rta::PRIORITY, metric);
        }

        Ok(builder)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        if let Some(dev) = &self.dev {
            write!(f, " dev {dev}")?;
        }
        if let Some(table) = self.table {
            write!(f, " table {table}")?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {metric}")?;
        }
        Ok(())
    }
}

/// A route as reported by RTM_NEWROUTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub destination: IpNet,
    pub gateway: Option<IpAddr>,
    pub oif: Option<u32>,
    pub table: u32,
    pub metric: Option<u32>,
    pub scope: u8,
    pub protocol: u8,
}

impl RouteInfo {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let msg = RtMsg::from_bytes(payload)?;
        let attrs = &payload[std::mem::size_of::<RtMsg>()..];

        let mut dst = None;
        let mut gateway = None;
        let mut oif = None;
        let mut table = msg.rtm_table as u32;
        let mut metric = None;
        for (kind, data) in AttrIter::new(attrs) {
            match kind {
                rta::DST => dst = Some(get::ip_addr(data)?),
                rta::GATEWAY => gateway = Some(get::ip_addr(data)?),
                rta::OIF => oif = Some(get::u32_ne(data)?),
                rta::TABLE => table = get::u32_ne(data)?,
                rta::PRIORITY => metric = Some(get::u32_ne(data)?),
                _ => {}
            }
        }

        let destination = match (dst, msg.rtm_family) {
            (Some(addr), _) => IpNet::new(addr, msg.rtm_dst_len),
            (None, AF_INET6) => Ok(IpNet::default_v6()),
            (None, _) => Ok(IpNet::default_v4()),
        }
        .map_err(|e| Error::InvalidAttribute(e.to_string()))?;

        Ok(Self {
            destination,
            gateway,
            oif,
            table,
            metric,
            scope: msg.rtm_scope,
            protocol: msg.rtm_protocol,
        })
    }

    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }
}

impl Connection {
    /// Add `route`; `oif` is the output interface index if the route names one.
    pub async fn add_route(&self, route: &Route, oif: Option<u32>) -> Result<()> {
        self.request_ack(route.build(oif)?).await
    }

    /// Routes of one address family (`AF_INET` or `AF_INET6`), all tables.
    pub async fn get_routes(&self, family: u8) -> Result<Vec<RouteInfo>> {
        let mut builder = dump_request(NlMsgType::RTM_GETROUTE);
        builder.append(&RtMsg {
            rtm_family: family,
            ..Default::default()
        });

        let mut out = Vec::new();
        for reply in self.dump(builder).await? {
            let info = RouteInfo::from_payload(reply_payload(&reply)?)?;
            if info.destination.is_ipv4() == (family == AF_INET) {
                out.push(info);
            }
        }
        Ok(out)
    }
}
