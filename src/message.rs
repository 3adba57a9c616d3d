//! Wire format for concentration readings.
//!
//! One JSON object per measurement cycle, terminated with CRLF so the
//! collector can split messages on the stream. Fields whose source read
//! failed that cycle are omitted entirely, never sent as null or zero.

use serde::Serialize;

/// Fixed message type tag expected by the collector.
pub const MESSAGE_TYPE: &str = "concentration";

/// One cycle's measurements, keyed by the cycle index.
///
/// `timeStamp` carries the zero-based cycle counter, not wall-clock time.
/// Key order on the wire follows field declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "timeStamp")]
    time_stamp: u64,
    #[serde(rename = "Ethanol", skip_serializing_if = "Option::is_none")]
    ethanol_raw: Option<u16>,
    #[serde(rename = "H2", skip_serializing_if = "Option::is_none")]
    h2_raw: Option<u16>,
    #[serde(rename = "tVOC", skip_serializing_if = "Option::is_none")]
    tvoc_ppb: Option<u16>,
    #[serde(rename = "CO2", skip_serializing_if = "Option::is_none")]
    co2eq_ppm: Option<u16>,
}

impl Reading {
    pub fn new(cycle: u64) -> Self {
        Self {
            kind: MESSAGE_TYPE,
            time_stamp: cycle,
            ethanol_raw: None,
            h2_raw: None,
            tvoc_ppb: None,
            co2eq_ppm: None,
        }
    }

    pub fn set_raw_signals(&mut self, ethanol: u16, h2: u16) {
        self.ethanol_raw = Some(ethanol);
        self.h2_raw = Some(h2);
    }

    pub fn set_iaq(&mut self, tvoc_ppb: u16, co2eq_ppm: u16) {
        self.tvoc_ppb = Some(tvoc_ppb);
        self.co2eq_ppm = Some(co2eq_ppm);
    }

    /// Render the reading as one CRLF-terminated JSON frame.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(b"\r\n");
        Ok(frame)
    }
}
