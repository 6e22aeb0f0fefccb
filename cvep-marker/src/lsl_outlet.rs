//! Lab Streaming Layer outlet, so the recorder writes markers into the same
//! file as the EEG.

use lsl::{ChannelFormat, ExPushable, StreamOutlet};
use tracing::{debug, info};

use crate::{MarkerError, MarkerOutlet, StreamInfo};

/// Irregular string stream on the LSL network.
///
/// Timestamps arrive on the emitter's clock and are moved onto LSL's clock by
/// an offset measured when the outlet opens.
pub struct LslMarkerOutlet {
    outlet: StreamOutlet,
    info: StreamInfo,
    offset_s: f64,
}

impl LslMarkerOutlet {
    /// `now_ns` is the emitter clock read right before the call.
    pub fn open(info: StreamInfo, now_ns: u64) -> Result<Self, MarkerError> {
        let lsl_info = lsl::StreamInfo::new(
            &info.name,
            &info.stream_type,
            info.channel_count,
            info.nominal_srate,
            ChannelFormat::String,
            &info.source_id,
        )
        .map_err(MarkerError::lsl)?;
        let outlet = StreamOutlet::new(&lsl_info, 0, 360).map_err(MarkerError::lsl)?;
        let offset_s = lsl::local_clock() - to_seconds(now_ns);
        info!(stream = %info.name, source_id = %info.source_id, "LSL marker outlet open");
        debug!(offset_s, "emitter to LSL clock offset");
        Ok(Self {
            outlet,
            info,
            offset_s,
        })
    }

    /// LSL time of an emitter timestamp.
    pub fn lsl_time(&self, timestamp_ns: u64) -> f64 {
        to_seconds(timestamp_ns) + self.offset_s
    }
}

impl MarkerOutlet for LslMarkerOutlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn push_sample(&mut self, sample: &[String], timestamp_ns: u64) -> Result<(), MarkerError> {
        self.outlet
            .push_sample_ex(&sample.to_vec(), self.lsl_time(timestamp_ns), true)
            .map_err(MarkerError::lsl)
    }
}

fn to_seconds(ns: u64) -> f64 {
    ns as f64 / 1e9
}
