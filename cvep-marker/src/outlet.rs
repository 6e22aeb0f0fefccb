use std::cell::RefCell;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MarkerError;

/// Description of the outbound marker stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub channel_count: u32,
    /// 0 for irregular, event-driven streams.
    pub nominal_srate: f64,
    pub source_id: String,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            name: "MarkerStream".into(),
            stream_type: "Markers".into(),
            channel_count: 1,
            nominal_srate: 0.0,
            source_id: "MarkerStream".into(),
        }
    }
}

/// Sink for single-string marker samples.
pub trait MarkerOutlet {
    fn info(&self) -> &StreamInfo;
    fn push_sample(&mut self, sample: &[String], timestamp_ns: u64) -> Result<(), MarkerError>;
}

impl<O: MarkerOutlet + ?Sized> MarkerOutlet for Box<O> {
    fn info(&self) -> &StreamInfo {
        (**self).info()
    }

    fn push_sample(&mut self, sample: &[String], timestamp_ns: u64) -> Result<(), MarkerError> {
        (**self).push_sample(sample, timestamp_ns)
    }
}

/// Wire record of one pushed sample, one JSON object per datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub stream: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub source_id: String,
    /// Seconds on the emitter's clock.
    pub timestamp: f64,
    pub sample: Vec<String>,
}

impl MarkerRecord {
    pub fn new(info: &StreamInfo, sample: &[String], timestamp_ns: u64) -> Self {
        Self {
            stream: info.name.clone(),
            stream_type: info.stream_type.clone(),
            source_id: info.source_id.clone(),
            timestamp: timestamp_ns as f64 / 1e9,
            sample: sample.to_vec(),
        }
    }
}

/// Sends each sample as a JSON datagram to an acquisition host.
#[derive(Debug)]
pub struct UdpMarkerOutlet {
    socket: UdpSocket,
    target: SocketAddr,
    info: StreamInfo,
}

impl UdpMarkerOutlet {
    pub fn connect(target: &str, info: StreamInfo) -> Result<Self, MarkerError> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MarkerError::Resolve {
                target: target.to_string(),
            })?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        debug!(%target, stream = %info.name, "marker outlet ready");
        Ok(Self {
            socket,
            target,
            info,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl MarkerOutlet for UdpMarkerOutlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn push_sample(&mut self, sample: &[String], timestamp_ns: u64) -> Result<(), MarkerError> {
        let record = MarkerRecord::new(&self.info, sample, timestamp_ns);
        let mut payload = serde_json::to_vec(&record)?;
        payload.push(b'\n');
        self.socket.send_to(&payload, self.target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedMarker {
    pub sample: Vec<String>,
    pub timestamp_ns: u64,
}

/// Read side of a [`MemoryOutlet`].
#[derive(Debug, Clone, Default)]
pub struct MarkerLog(Rc<RefCell<Vec<PushedMarker>>>);

impl MarkerLog {
    pub fn records(&self) -> Vec<PushedMarker> {
        self.0.borrow().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .flat_map(|m| m.sample.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Keeps pushed samples in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryOutlet {
    info: StreamInfo,
    log: MarkerLog,
}

impl MemoryOutlet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MarkerLog {
        self.log.clone()
    }
}

impl MarkerOutlet for MemoryOutlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn push_sample(&mut self, sample: &[String], timestamp_ns: u64) -> Result<(), MarkerError> {
        self.log.0.borrow_mut().push(PushedMarker {
            sample: sample.to_vec(),
            timestamp_ns,
        });
        Ok(())
    }
}
