//! Link queries and attribute changes.

use super::attr::{AttrIter, get};
use super::connection::{Connection, ack_request, dump_request, reply_payload};
use super::error::Result;
use super::message::NlMsgType;
use super::types::{IfInfoMsg, iff, ifla};
use crate::util::addr::format_mac;

/// Snapshot of a link as reported by RTM_NEWLINK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    pub flags: u32,
    pub mtu: Option<u32>,
    pub tx_queue_len: Option<u32>,
    pub group: Option<u32>,
    pub hardware_addr: Option<Vec<u8>>,
}

impl LinkInfo {
    /// Parse the payload (after the netlink header) of an RTM_NEWLINK message.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let ifinfo = IfInfoMsg::from_bytes(payload)?;
        let mut info = LinkInfo {
            index: ifinfo.ifi_index as u32,
            flags: ifinfo.ifi_flags,
            ..Default::default()
        };

        let attrs = &payload[std::mem::size_of::<IfInfoMsg>()..];
        for (kind, data) in AttrIter::new(attrs) {
            match kind {
                ifla::IFNAME => info.name = get::string(data)?.to_string(),
                ifla::MTU => info.mtu = Some(get::u32_ne(data)?),
                ifla::TXQLEN => info.tx_queue_len = Some(get::u32_ne(data)?),
                ifla::GROUP => info.group = Some(get::u32_ne(data)?),
                ifla::ADDRESS => info.hardware_addr = Some(data.to_vec()),
                _ => {}
            }
        }
        Ok(info)
    }

    pub fn is_up(&self) -> bool {
        self.flags & iff::UP != 0
    }

    /// Hardware address as `aa:bb:cc:dd:ee:ff`.
    pub fn mac(&self) -> Option<String> {
        self.hardware_addr.as_deref().map(format_mac)
    }
}

impl Connection {
    /// Look up a link by name. `None` if it does not exist in this namespace.
    pub async fn get_link(&self, name: &str) -> Result<Option<LinkInfo>> {
        let mut builder = ack_request(NlMsgType::RTM_GETLINK);
        builder.append(&IfInfoMsg::new());
        builder.append_attr_str(ifla::IFNAME, name);

        let replies = match self.request(builder).await {
            Ok(replies) => replies,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        for reply in &replies {
            let info = LinkInfo::from_payload(reply_payload(reply)?)?;
            if info.name == name {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// All links in this namespace.
    pub async fn get_links(&self) -> Result<Vec<LinkInfo>> {
        let mut builder = dump_request(NlMsgType::RTM_GETLINK);
        builder.append(&IfInfoMsg::new());

        self.dump(builder)
            .await?
            .iter()
            .map(|reply| LinkInfo::from_payload(reply_payload(reply)?))
            .collect()
    }

    async fn set_link_attr(&self, ifindex: u32, attr: u16, data: &[u8]) -> Result<()> {
        let mut builder = ack_request(NlMsgType::RTM_SETLINK);
        builder.append(&IfInfoMsg::new().with_index(ifindex));
        builder.append_attr(attr, data);
        self.request_ack(builder).await
    }

    pub async fn set_link_mtu(&self, ifindex: u32, mtu: u32) -> Result<()> {
        self.set_link_attr(ifindex, ifla::MTU, &mtu.to_ne_bytes()).await
    }

    pub async fn set_link_address(&self, ifindex: u32, addr: &[u8]) -> Result<()> {
        self.set_link_attr(ifindex, ifla::ADDRESS, addr).await
    }

    pub async fn set_link_txqlen(&self, ifindex: u32, txqlen: u32) -> Result<()> {
        self.set_link_attr(ifindex, ifla::TXQLEN, &txqlen.to_ne_bytes())
            .await
    }

    pub async fn set_link_group(&self, ifindex: u32, group: u32) -> Result<()> {
        self.set_link_attr(ifindex, ifla::GROUP, &group.to_ne_bytes())
            .await
    }

    /// Set the link administratively up.
    pub async fn set_link_up(&self, ifindex: u32) -> Result<()> {
        let mut ifinfo = IfInfoMsg::new().with_index(ifindex);
        ifinfo.ifi_flags = iff::UP;
        ifinfo.ifi_change = iff::UP;

        let mut builder = ack_request(NlMsgType::RTM_SETLINK);
        builder.append(&ifinfo);
        self.request_ack(builder).await
    }
}
