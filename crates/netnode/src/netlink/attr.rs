//! Netlink attribute (rtattr) header, iteration and payload accessors.

use std::collections::HashMap;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

pub const NLA_ALIGNTO: usize = 4;

#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Attribute header (struct nlattr / struct rtattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttr {
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Attribute type with the nested / byte-order flags stripped.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(attr, _)| attr)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Iterator over the attributes in a buffer. Stops at the first malformed one.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Attribute type and payload.
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let attr = NlAttr::from_bytes(self.data).ok()?;
        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > self.data.len() {
            self.data = &[];
            return None;
        }

        let payload = &self.data[NLA_HDRLEN..len];
        self.data = self.data.get(nla_align(len)..).unwrap_or(&[]);
        Some((attr.kind(), payload))
    }
}

/// Collect attributes into a map keyed by type. Later duplicates win.
pub fn parse_attrs(data: &[u8]) -> HashMap<u16, &[u8]> {
    AttrIter::new(data).collect()
}

/// Typed accessors for attribute payloads.
pub mod get {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use super::super::error::{Error, Result};

    fn array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
        data.get(..N)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::Truncated {
                expected: N,
                actual: data.len(),
            })
    }

    pub fn u8(data: &[u8]) -> Result<u8> {
        array::<1>(data).map(|b| b[0])
    }

    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        array(data).map(u32::from_ne_bytes)
    }

    pub fn i32_ne(data: &[u8]) -> Result<i32> {
        array(data).map(i32::from_ne_bytes)
    }

    /// NUL-terminated (or unterminated) string.
    pub fn string(data: &[u8]) -> Result<&str> {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..end])
            .map_err(|e| Error::InvalidAttribute(format!("invalid utf-8: {e}")))
    }

    /// IPv4 or IPv6 address, chosen by payload length.
    pub fn ip_addr(data: &[u8]) -> Result<IpAddr> {
        match data.len() {
            4 => Ok(IpAddr::V4(Ipv4Addr::from(array::<4>(data)?))),
            16 => Ok(IpAddr::V6(Ipv6Addr::from(array::<16>(data)?))),
            n => Err(Error::InvalidAttribute(format!(
                "address attribute of {n} bytes"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = NlAttr::new(kind, payload.len()).as_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf.resize(nla_align(buf.len()), 0);
        buf
    }

    #[test]
    fn iterates_and_strips_flags() {
        let mut buf = encode(3, b"eth0\0");
        buf.extend(encode(2 | NLA_F_NESTED, &[]));
        buf.extend(encode(4, &1500u32.to_ne_bytes()));

        let attrs: Vec<_> = AttrIter::new(&buf).collect();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0], (3, &b"eth0\0"[..]));
        assert_eq!(attrs[1].0, 2);
        assert_eq!(get::u32_ne(attrs[2].1).unwrap(), 1500);
    }

    #[test]
    fn stops_on_overlong_attribute() {
        let mut buf = encode(1, &[1, 2, 3, 4]);
        buf[0] = 64;
        assert_eq!(AttrIter::new(&buf).count(), 0);
    }

    #[test]
    fn accessors() {
        assert_eq!(get::string(b"lo\0\0").unwrap(), "lo");
        assert_eq!(get::string(b"noterm").unwrap(), "noterm");
        assert_eq!(
            get::ip_addr(&[10, 0, 0, 1]).unwrap().to_string(),
            "10.0.0.1"
        );
        assert!(get::ip_addr(&[1, 2, 3]).is_err());
        assert!(get::u32_ne(&[1, 2]).is_err());
    }
}
