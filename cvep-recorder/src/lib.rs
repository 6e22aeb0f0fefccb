pub mod channel;
pub mod client;
pub mod error;
pub mod launch;

pub use channel::{ControlChannel, TcpChannel};
pub use client::{
    AckPolicy, DEFAULT_ADDRESS, DEFAULT_PORT, RecorderClient, RecorderCommand, RecorderSession,
    RecorderState, SettleDelays,
};
pub use error::RecorderError;
pub use launch::launch_recorder_app;
