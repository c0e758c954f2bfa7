//! Queueing discipline configuration: netem and tbf.
//!
//! ```ignore
//! use std::time::Duration;
//! use netnode::netlink::tc::{NetemConfig, TbfConfig};
//! use netnode::netlink::types::tc_handle;
//!
//! let netem = NetemConfig::new().delay(Duration::from_millis(10)).loss(0.5);
//! conn.add_qdisc(ifindex, tc_handle::ROOT, tc_handle::make(1, 0), &netem).await?;
//!
//! let tbf = TbfConfig::new().rate_bps(10_000_000).burst(32 * 1024);
//! conn.add_qdisc(ifindex, tc_handle::make(1, 0), tc_handle::make(2, 0), &tbf).await?;
//! ```

use std::time::Duration;

use serde::Deserialize;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::connection::{Connection, create_request, dump_request, reply_payload};
use super::error::{Error, Result};
use super::message::NlMsgType;
use super::types::{TcMsg, tca};

/// A qdisc whose options can be encoded into TCA_OPTIONS.
pub trait QdiscConfig: Send + Sync {
    /// Kernel name of the discipline ("netem", "tbf").
    fn kind(&self) -> &'static str;

    /// Write the TCA_OPTIONS payload.
    fn write_options(&self, builder: &mut MessageBuilder) -> Result<()>;
}

// Kernel time base for the legacy tick fields: 1 tick = 64ns.
const PSCHED_SHIFT: u32 = 6;

fn ns_to_ticks(ns: u128) -> u32 {
    (ns >> PSCHED_SHIFT).min(u32::MAX as u128) as u32
}

/// Percentage (0-100) to the kernel's 32-bit probability scale.
pub fn percent_to_prob(percent: f64) -> u32 {
    if percent <= 0.0 {
        0
    } else if percent >= 100.0 {
        u32::MAX
    } else {
        (percent / 100.0 * u32::MAX as f64) as u32
    }
}

pub mod netem {
    pub const TCA_NETEM_CORR: u16 = 1;
    pub const TCA_NETEM_REORDER: u16 = 3;
    pub const TCA_NETEM_CORRUPT: u16 = 4;
    pub const TCA_NETEM_RATE: u16 = 6;
    pub const TCA_NETEM_RATE64: u16 = 8;
    pub const TCA_NETEM_LATENCY64: u16 = 10;
    pub const TCA_NETEM_JITTER64: u16 = 11;
}

pub mod tbf {
    pub const TCA_TBF_PARMS: u16 = 1;
    pub const TCA_TBF_RATE64: u16 = 4;
    pub const TCA_TBF_PRATE64: u16 = 5;
    pub const TCA_TBF_BURST: u16 = 6;
    pub const TCA_TBF_PBURST: u16 = 7;
}

/// struct tc_netem_qopt
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcNetemQopt {
    /// Added delay in ticks.
    pub latency: u32,
    /// Queue limit in packets.
    pub limit: u32,
    pub loss: u32,
    pub gap: u32,
    pub duplicate: u32,
    /// Delay jitter in ticks.
    pub jitter: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct TcNetemCorr {
    delay_corr: u32,
    loss_corr: u32,
    dup_corr: u32,
}

/// Shared layout of tc_netem_reorder and tc_netem_corrupt.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct TcNetemProb {
    probability: u32,
    correlation: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct TcNetemRate {
    rate: u32,
    packet_overhead: i32,
    cell_size: u32,
    cell_overhead: i32,
}

/// Network emulator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NetemConfig {
    pub delay: Option<Duration>,
    pub jitter: Option<Duration>,
    /// Percentages, 0-100.
    pub delay_correlation: f64,
    pub loss: f64,
    pub loss_correlation: f64,
    pub duplicate: f64,
    pub duplicate_correlation: f64,
    pub corrupt: f64,
    pub corrupt_correlation: f64,
    /// Reordering needs a delay to have any effect.
    pub reorder: f64,
    pub reorder_correlation: f64,
    pub gap: u32,
    /// Bytes per second.
    pub rate: Option<u64>,
    /// Queue limit in packets.
    pub limit: u32,
}

impl Default for NetemConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NetemConfig {
    pub fn new() -> Self {
        Self {
            delay: None,
            jitter: None,
            delay_correlation: 0.0,
            loss: 0.0,
            loss_correlation: 0.0,
            duplicate: 0.0,
            duplicate_correlation: 0.0,
            corrupt: 0.0,
            corrupt_correlation: 0.0,
            reorder: 0.0,
            reorder_correlation: 0.0,
            gap: 0,
            rate: None,
            limit: 1000,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn delay_correlation(mut self, corr: f64) -> Self {
        self.delay_correlation = corr.clamp(0.0, 100.0);
        self
    }

    pub fn loss(mut self, percent: f64) -> Self {
        self.loss = percent.clamp(0.0, 100.0);
        self
    }

    pub fn loss_correlation(mut self, corr: f64) -> Self {
        self.loss_correlation = corr.clamp(0.0, 100.0);
        self
    }

    pub fn duplicate(mut self, percent: f64) -> Self {
        self.duplicate = percent.clamp(0.0, 100.0);
        self
    }

    pub fn duplicate_correlation(mut self, corr: f64) -> Self {
        self.duplicate_correlation = corr.clamp(0.0, 100.0);
        self
    }

    pub fn corrupt(mut self, percent: f64) -> Self {
        self.corrupt = percent.clamp(0.0, 100.0);
        self
    }

    pub fn corrupt_correlation(mut self, corr: f64) -> Self {
        self.corrupt_correlation = corr.clamp(0.0, 100.0);
        self
    }

    pub fn reorder(mut self, percent: f64) -> Self {
        self.reorder = percent.clamp(0.0, 100.0);
        self
    }

    pub fn reorder_correlation(mut self, corr: f64) -> Self {
        self.reorder_correlation = corr.clamp(0.0, 100.0);
        self
    }

    pub fn gap(mut self, gap: u32) -> Self {
        self.gap = gap;
        self
    }

    pub fn rate(mut self, bytes_per_sec: u64) -> Self {
        self.rate = Some(bytes_per_sec);
        self
    }

    pub fn rate_bps(mut self, bits_per_sec: u64) -> Self {
        self.rate = Some(bits_per_sec / 8);
        self
    }

    pub fn limit(mut self, packets: u32) -> Self {
        self.limit = packets;
        self
    }
}

impl QdiscConfig for NetemConfig {
    fn kind(&self) -> &'static str {
        "netem"
    }

    fn write_options(&self, builder: &mut MessageBuilder) -> Result<()> {
        use netem::*;

        if self.reorder > 0.0 && self.delay.is_none() {
            return Err(Error::InvalidAttribute(
                "netem: reorder requires a delay".into(),
            ));
        }

        let qopt = TcNetemQopt {
            latency: self.delay.map_or(0, |d| ns_to_ticks(d.as_nanos())),
            limit: self.limit,
            loss: percent_to_prob(self.loss),
            // Reordering every packet is expressed as gap 1.
            gap: if self.reorder > 0.0 && self.gap == 0 {
                1
            } else {
                self.gap
            },
            duplicate: percent_to_prob(self.duplicate),
            jitter: self.jitter.map_or(0, |d| ns_to_ticks(d.as_nanos())),
        };
        builder.append(&qopt);

        if let Some(delay) = self.delay {
            let ns = delay.as_nanos().min(i64::MAX as u128) as i64;
            builder.append_attr(TCA_NETEM_LATENCY64, &ns.to_ne_bytes());
        }
        if let Some(jitter) = self.jitter {
            let ns = jitter.as_nanos().min(i64::MAX as u128) as i64;
            builder.append_attr(TCA_NETEM_JITTER64, &ns.to_ne_bytes());
        }

        if self.delay_correlation > 0.0
            || self.loss_correlation > 0.0
            || self.duplicate_correlation > 0.0
        {
            let corr = TcNetemCorr {
                delay_corr: percent_to_prob(self.delay_correlation),
                loss_corr: percent_to_prob(self.loss_correlation),
                dup_corr: percent_to_prob(self.duplicate_correlation),
            };
            builder.append_attr(TCA_NETEM_CORR, corr.as_bytes());
        }

        if self.reorder > 0.0 {
            let reorder = TcNetemProb {
                probability: percent_to_prob(self.reorder),
                correlation: percent_to_prob(self.reorder_correlation),
            };
            builder.append_attr(TCA_NETEM_REORDER, reorder.as_bytes());
        }

        if self.corrupt > 0.0 {
            let corrupt = TcNetemProb {
                probability: percent_to_prob(self.corrupt),
                correlation: percent_to_prob(self.corrupt_correlation),
            };
            builder.append_attr(TCA_NETEM_CORRUPT, corrupt.as_bytes());
        }

        if let Some(rate) = self.rate {
            let spec = TcNetemRate {
                rate: rate.min(u32::MAX as u64) as u32,
                ..Default::default()
            };
            builder.append_attr(TCA_NETEM_RATE, spec.as_bytes());
            if rate >= 1 << 32 {
                builder.append_attr_u64(TCA_NETEM_RATE64, rate);
            }
        }

        Ok(())
    }
}

/// struct tc_ratespec
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcRateSpec {
    pub cell_log: u8,
    pub linklayer: u8,
    pub overhead: u16,
    pub cell_align: i16,
    pub mpu: u16,
    /// Bytes per second, saturated to u32.
    pub rate: u32,
}

const TC_LINKLAYER_ETHERNET: u8 = 1;

impl TcRateSpec {
    /// An ethernet rate; the kernel then computes the rate table itself.
    pub fn ethernet(bytes_per_sec: u64) -> Self {
        Self {
            linklayer: TC_LINKLAYER_ETHERNET,
            rate: bytes_per_sec.min(u32::MAX as u64) as u32,
            ..Default::default()
        }
    }
}

/// struct tc_tbf_qopt
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcTbfQopt {
    pub rate: TcRateSpec,
    pub peakrate: TcRateSpec,
    /// Bytes queued before dropping.
    pub limit: u32,
    /// Bucket size in ticks.
    pub buffer: u32,
    /// Peak bucket size in ticks.
    pub mtu: u32,
}

/// Fixed tbf tuning applied under every configured rate.
///
/// The kernel rejects a peak rate that is not above the configured rate, so
/// links faster than `peak_rate` need a larger override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TbfTuning {
    /// Queue limit in bytes.
    pub limit: u32,
    /// Peak bucket size in bytes.
    pub min_burst: u32,
    /// Bucket size in ticks, used when no burst is given.
    pub buffer: u32,
    /// Bytes per second.
    pub peak_rate: u64,
}

impl Default for TbfTuning {
    fn default() -> Self {
        Self {
            limit: 0x7000,
            min_burst: 1600,
            buffer: 300_000,
            peak_rate: 0x100_0000,
        }
    }
}

/// Token bucket filter parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TbfConfig {
    /// Bytes per second.
    pub rate: u64,
    /// Bucket size in bytes; `tuning.buffer` applies when unset.
    pub burst: Option<u32>,
    /// Queue limit in bytes; `tuning.limit` applies when unset.
    pub limit: Option<u32>,
    pub tuning: TbfTuning,
}

impl TbfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(mut self, bytes_per_sec: u64) -> Self {
        self.rate = bytes_per_sec;
        self
    }

    pub fn rate_bps(mut self, bits_per_sec: u64) -> Self {
        self.rate = bits_per_sec / 8;
        self
    }

    pub fn burst(mut self, bytes: u32) -> Self {
        self.burst = Some(bytes);
        self
    }

    pub fn limit(mut self, bytes: u32) -> Self {
        self.limit = Some(bytes);
        self
    }

    pub fn tuning(mut self, tuning: TbfTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

impl QdiscConfig for TbfConfig {
    fn kind(&self) -> &'static str {
        "tbf"
    }

    fn write_options(&self, builder: &mut MessageBuilder) -> Result<()> {
        use tbf::*;

        if self.rate == 0 {
            return Err(Error::InvalidAttribute("tbf: rate must be set".into()));
        }

        let peak = self.tuning.peak_rate;
        let qopt = TcTbfQopt {
            rate: TcRateSpec::ethernet(self.rate),
            peakrate: if peak > 0 {
                TcRateSpec::ethernet(peak)
            } else {
                TcRateSpec::default()
            },
            limit: self.limit.unwrap_or(self.tuning.limit),
            buffer: self.tuning.buffer,
            mtu: 0,
        };
        builder.append_attr(TCA_TBF_PARMS, qopt.as_bytes());

        if self.rate >= 1 << 32 {
            builder.append_attr_u64(TCA_TBF_RATE64, self.rate);
        }
        if peak >= 1 << 32 {
            builder.append_attr_u64(TCA_TBF_PRATE64, peak);
        }
        if let Some(burst) = self.burst {
            builder.append_attr_u32(TCA_TBF_BURST, burst);
        }
        if peak > 0 {
            builder.append_attr_u32(TCA_TBF_PBURST, self.tuning.min_burst);
        }

        Ok(())
    }
}

/// A qdisc as reported by RTM_NEWQDISC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdiscInfo {
    pub ifindex: u32,
    pub handle: u32,
    pub parent: u32,
    pub kind: String,
    /// Raw TCA_OPTIONS payload.
    pub options: Vec<u8>,
}

impl QdiscInfo {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let msg = TcMsg::from_bytes(payload)?;
        let mut info = QdiscInfo {
            ifindex: msg.tcm_ifindex as u32,
            handle: msg.tcm_handle,
            parent: msg.tcm_parent,
            kind: String::new(),
            options: Vec::new(),
        };

        let attrs = &payload[std::mem::size_of::<TcMsg>()..];
        for (kind, data) in AttrIter::new(attrs) {
            match kind {
                tca::KIND => info.kind = get::string(data)?.to_string(),
                tca::OPTIONS => info.options = data.to_vec(),
                _ => {}
            }
        }
        Ok(info)
    }

    /// Configured delay of a netem qdisc.
    pub fn netem_delay(&self) -> Option<Duration> {
        if self.kind != "netem" {
            return None;
        }
        let (qopt, rest) = TcNetemQopt::read_from_prefix(&self.options).ok()?;
        let latency64 = AttrIter::new(rest)
            .find(|(kind, _)| *kind == netem::TCA_NETEM_LATENCY64)
            .and_then(|(_, data)| data.get(..8)?.try_into().ok())
            .map(i64::from_ne_bytes);
        match latency64 {
            Some(ns) => Some(Duration::from_nanos(ns.max(0) as u64)),
            None => Some(Duration::from_nanos((qopt.latency as u64) << PSCHED_SHIFT)),
        }
    }
}

impl Connection {
    /// Create a qdisc at `handle` under `parent` on `ifindex`.
    pub async fn add_qdisc(
        &self,
        ifindex: u32,
        parent: u32,
        handle: u32,
        config: &dyn QdiscConfig,
    ) -> Result<()> {
        self.request_ack(new_qdisc_request(ifindex, parent, handle, config)?)
            .await
    }

    /// Qdiscs attached to `ifindex`.
    pub async fn get_qdiscs(&self, ifindex: u32) -> Result<Vec<QdiscInfo>> {
        let mut builder = dump_request(NlMsgType::RTM_GETQDISC);
        builder.append(&TcMsg::new());

        let mut out = Vec::new();
        for reply in self.dump(builder).await? {
            let info = QdiscInfo::from_payload(reply_payload(&reply)?)?;
            if info.ifindex == ifindex {
                out.push(info);
            }
        }
        Ok(out)
    }
}

pub(crate) fn new_qdisc_request(
    ifindex: u32,
    parent: u32,
    handle: u32,
    config: &dyn QdiscConfig,
) -> Result<MessageBuilder> {
    let tcmsg = TcMsg::new()
        .with_ifindex(ifindex)
        .with_parent(parent)
        .with_handle(handle);

    let mut builder = create_request(NlMsgType::RTM_NEWQDISC);
    builder.append(&tcmsg);
    builder.append_attr_str(tca::KIND, config.kind());

    let options = builder.nest_start(tca::OPTIONS);
    config.write_options(&mut builder)?;
    builder.nest_end(options);

    Ok(builder)
}
