//! Netlink connection with request/response handling.

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NLMSG_HDRLEN,
    NlMsgError,
};
use super::socket::NetlinkSocket;
use crate::namespace::NamespaceFd;

/// rtnetlink connection.
///
/// A connection lives in the namespace its socket was opened in; every
/// request it sends acts on that namespace.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Connect in the caller's namespace.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    /// Connect inside `ns`.
    ///
    /// ```ignore
    /// let ns = Namespace::adopt_by_name("blue")?;
    /// let conn = Connection::new_in(ns.fd())?;
    /// let lo = conn.get_link("lo").await?;
    /// ```
    pub fn new_in(ns: &NamespaceFd) -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new_in(ns)?,
        })
    }

    pub fn socket(&self) -> &NetlinkSocket {
        &self.socket
    }

    /// Send a request and collect every reply message until the kernel
    /// acknowledges it.
    ///
    /// The returned messages include their netlink header. Requests built
    /// without `NLM_F_ACK` will wait for an error that never comes; use
    /// [`ack_request`] or [`dump`](Self::dump).
    pub async fn request(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());
        self.socket.send(&builder.finish()).await?;

        let mut replies = Vec::new();
        loop {
            let data = self.socket.recv_msg().await?;
            for result in MessageIter::new(&data) {
                let (header, payload, whole) = result?;
                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_error() {
                    NlMsgError::from_bytes(payload)?.into_result(header.nlmsg_flags, payload)?;
                    return Ok(replies);
                }
                replies.push(whole.to_vec());
            }
        }
    }

    /// Send a request that expects only an ACK.
    pub async fn request_ack(&self, builder: MessageBuilder) -> Result<()> {
        self.request(builder).await.map(|_| ())
    }

    /// Send a dump request and collect all replies up to NLMSG_DONE.
    pub async fn dump(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());
        self.socket.send(&builder.finish()).await?;

        let mut responses = Vec::new();
        loop {
            let data = self.socket.recv_msg().await?;
            for result in MessageIter::new(&data) {
                let (header, payload, whole) = result?;
                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_done() {
                    return Ok(responses);
                }
                if header.is_error() {
                    NlMsgError::from_bytes(payload)?.into_result(header.nlmsg_flags, payload)?;
                    return Ok(responses);
                }
                responses.push(whole.to_vec());
            }
        }
    }
}

/// Strip the netlink header off a reply.
pub(crate) fn reply_payload(reply: &[u8]) -> Result<&[u8]> {
    reply.get(NLMSG_HDRLEN..).ok_or(Error::Truncated {
        expected: NLMSG_HDRLEN,
        actual: reply.len(),
    })
}

pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

pub fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}

/// Create, failing if the object already exists.
pub fn create_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL)
}
