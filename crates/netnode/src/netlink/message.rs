//! Netlink message header, message types and the receive-side iterator.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::AttrIter;
use super::error::{Error, Result};

/// Netlink message alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Round `len` up to the netlink message alignment.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(hdr, _)| hdr)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Message types used by this crate.
pub struct NlMsgType;

impl NlMsgType {
    pub const NOOP: u16 = 1;
    pub const ERROR: u16 = 2;
    pub const DONE: u16 = 3;
    pub const OVERRUN: u16 = 4;

    pub const RTM_NEWLINK: u16 = 16;
    pub const RTM_GETLINK: u16 = 18;
    pub const RTM_SETLINK: u16 = 19;

    pub const RTM_NEWADDR: u16 = 20;
    pub const RTM_GETADDR: u16 = 22;

    pub const RTM_NEWROUTE: u16 = 24;
    pub const RTM_GETROUTE: u16 = 26;

    pub const RTM_NEWQDISC: u16 = 36;
    pub const RTM_GETQDISC: u16 = 38;
}

pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;

// GET modifiers
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// NEW modifiers
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;

// ACK modifiers (set by the kernel on NLMSG_ERROR)
pub const NLM_F_CAPPED: u16 = 0x100;
pub const NLM_F_ACK_TLVS: u16 = 0x200;

/// Extended ACK attribute carrying a human-readable message.
pub const NLMSGERR_ATTR_MSG: u16 = 1;

/// Iterator over the netlink messages packed into one datagram.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    /// Header, payload (without header) and the whole message.
    type Item = Result<(&'a NlMsgHdr, &'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let len = header.nlmsg_len as usize;
        if len < NLMSG_HDRLEN || len > self.data.len() {
            self.data = &[];
            return Some(Err(Error::InvalidMessage(format!(
                "invalid message length: {len}"
            ))));
        }

        let whole = &self.data[..len];
        let payload = &self.data[NLMSG_HDRLEN..len];
        self.data = self.data.get(nlmsg_align(len)..).unwrap_or(&[]);

        Some(Ok((header, payload, whole)))
    }
}

/// Payload of an NLMSG_ERROR message (struct nlmsgerr).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Negative errno, or 0 for an ACK.
    pub error: i32,
    /// Header of the request that caused this message.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(err, _)| err)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }

    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Extended-ACK message text, if the kernel attached one.
    ///
    /// `flags` are the flags of the NLMSG_ERROR header. Unless the kernel
    /// capped the echo, the offending request is echoed back in full before
    /// the TLVs.
    pub fn ext_ack_message<'a>(&self, flags: u16, payload: &'a [u8]) -> Option<&'a str> {
        if flags & NLM_F_ACK_TLVS == 0 {
            return None;
        }
        let echoed = if flags & NLM_F_CAPPED != 0 {
            NLMSG_HDRLEN
        } else {
            nlmsg_align(self.msg.nlmsg_len as usize)
        };
        let tlvs = payload.get(std::mem::size_of::<i32>() + echoed..)?;
        AttrIter::new(tlvs)
            .find(|(kind, _)| *kind == NLMSGERR_ATTR_MSG)
            .and_then(|(_, data)| super::attr::get::string(data).ok())
            .filter(|msg| !msg.is_empty())
    }

    /// Convert into `Ok(())` for ACKs and a kernel error otherwise.
    pub fn into_result(&self, flags: u16, payload: &[u8]) -> Result<()> {
        if self.is_ack() {
            return Ok(());
        }
        let mut err = Error::from_errno(self.error);
        if let Some(msg) = self.ext_ack_message(flags, payload) {
            err = err.with_ext_ack(msg);
        }
        Err(err)
    }
}
