//! Remote control of an external recording process.
//!
//! The recorder listens for newline-terminated commands:
//!
//! ```text
//! filename {root:<root>} {task:<task>} {run:<run-as-hex>} {participant:<subject>} {session:<session>}
//! update
//! start
//! stop
//! ```
//!
//! It sends nothing back, so every command is followed by a fixed settle delay
//! that must exceed the recorder's real reaction time. Under [`AckPolicy::None`]
//! a recorder that silently ignores a command cannot be told apart from one that
//! obeyed it. [`AckPolicy::Line`] is for recorders that answer each command with a
//! reply line (`OK...` on success).

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use cvep_timing::{HighPrecisionTimer, Timer};
use tracing::{debug, info, warn};

use crate::{ControlChannel, RecorderError, TcpChannel};

pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u16 = 22345;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Disconnected,
    Connected,
    Configured,
    Recording,
    Stopped,
}

/// Wait after each command before assuming the recorder acted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub filename: Duration,
    pub update: Duration,
    pub start: Duration,
    pub stop: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            filename: Duration::from_secs(1),
            update: Duration::from_secs(2),
            start: Duration::from_secs(5),
            stop: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Fire and sleep.
    #[default]
    None,
    /// Expect one reply line per command; resend up to `retries` times on timeout.
    Line { timeout: Duration, retries: u32 },
}

/// Where and under which identifiers the recorder writes its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSession {
    pub root: String,
    pub subject: String,
    pub session: String,
    pub run: u32,
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderCommand {
    Filename(RecorderSession),
    Update,
    Start,
    Stop,
}

impl RecorderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RecorderCommand::Filename(_) => "filename",
            RecorderCommand::Update => "update",
            RecorderCommand::Start => "start",
            RecorderCommand::Stop => "stop",
        }
    }

    /// The exact line sent, newline included.
    pub fn to_line(&self) -> String {
        match self {
            RecorderCommand::Filename(s) => format!(
                "filename {{root:{}}} {{task:{}}} {{run:{:x}}} {{participant:{}}} {{session:{}}}\n",
                s.root, s.task, s.run, s.subject, s.session
            ),
            other => format!("{}\n", other.name()),
        }
    }

    fn settle(&self, delays: &SettleDelays) -> Duration {
        match self {
            RecorderCommand::Filename(_) => delays.filename,
            RecorderCommand::Update => delays.update,
            RecorderCommand::Start => delays.start,
            RecorderCommand::Stop => delays.stop,
        }
    }
}

pub struct RecorderClient<C: ControlChannel = TcpChannel, T: Timer = HighPrecisionTimer> {
    channel: Option<C>,
    timer: T,
    state: RecorderState,
    delays: SettleDelays,
    ack: AckPolicy,
    session: Option<RecorderSession>,
}

impl RecorderClient<TcpChannel, HighPrecisionTimer> {
    /// Open the control connection. Failure is fatal; there is no retry.
    pub fn connect(address: &str, port: u16) -> Result<Self, RecorderError> {
        let connect_err = |source: io::Error| RecorderError::Connect {
            address: address.to_string(),
            port,
            source,
        };
        let stream = TcpStream::connect((address, port)).map_err(connect_err)?;
        let channel = TcpChannel::new(stream).map_err(connect_err)?;
        info!(address, port, "connected to recorder");
        Ok(Self::from_channel(channel, HighPrecisionTimer::new()))
    }
}

impl<C: ControlChannel, T: Timer> RecorderClient<C, T> {
    /// Wrap an already open channel; the client starts out `Connected`.
    pub fn from_channel(channel: C, timer: T) -> Self {
        Self {
            channel: Some(channel),
            timer,
            state: RecorderState::Connected,
            delays: SettleDelays::default(),
            ack: AckPolicy::default(),
            session: None,
        }
    }

    pub fn with_settle_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_ack_policy(mut self, ack: AckPolicy) -> Self {
        self.ack = ack;
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn session(&self) -> Option<&RecorderSession> {
        self.session.as_ref()
    }

    /// Set the output file. Allowed while connected, configured, or after a stop
    /// (to prepare another run).
    pub fn configure(
        &mut self,
        root: &str,
        subject: &str,
        session: &str,
        run: u32,
        task: &str,
    ) -> Result<(), RecorderError> {
        self.require(
            "filename",
            &[
                RecorderState::Connected,
                RecorderState::Configured,
                RecorderState::Stopped,
            ],
        )?;
        let target = RecorderSession {
            root: root.to_string(),
            subject: subject.to_string(),
            session: session.to_string(),
            run,
            task: task.to_string(),
        };
        self.send(RecorderCommand::Filename(target.clone()))?;
        info!(root, subject, session, run, task, "recorder configured");
        self.session = Some(target);
        self.state = RecorderState::Configured;
        Ok(())
    }

    /// Ask the recorder to rescan its streams. Idempotent.
    pub fn refresh(&mut self) -> Result<(), RecorderError> {
        self.require("update", &[RecorderState::Configured])?;
        self.send(RecorderCommand::Update)
    }

    pub fn start(&mut self) -> Result<(), RecorderError> {
        self.require("start", &[RecorderState::Configured])?;
        self.send(RecorderCommand::Start)?;
        self.state = RecorderState::Recording;
        info!("recorder started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RecorderError> {
        self.require("stop", &[RecorderState::Recording])?;
        self.send(RecorderCommand::Stop)?;
        self.state = RecorderState::Stopped;
        info!("recorder stopped");
        Ok(())
    }

    /// Close the control connection. Does not stop a running recording.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if self.state == RecorderState::Recording {
                warn!("closing recorder connection while recording");
            }
            if let Err(e) = channel.shutdown() {
                debug!(error = %e, "recorder shutdown");
            }
        }
        self.state = RecorderState::Disconnected;
    }

    fn require(&self, command: &'static str, allowed: &[RecorderState]) -> Result<(), RecorderError> {
        if self.channel.is_none() {
            return Err(RecorderError::NotConnected);
        }
        if !allowed.contains(&self.state) {
            return Err(RecorderError::InvalidTransition {
                command,
                state: self.state,
            });
        }
        Ok(())
    }

    fn send(&mut self, command: RecorderCommand) -> Result<(), RecorderError> {
        let name = command.name();
        let line = command.to_line();
        let channel = self.channel.as_mut().ok_or(RecorderError::NotConnected)?;

        match self.ack {
            AckPolicy::None => {
                channel
                    .send_line(&line)
                    .map_err(|source| RecorderError::Write { command: name, source })?;
            }
            AckPolicy::Line { timeout, retries } => {
                let attempts = retries + 1;
                let mut acknowledged = false;
                for attempt in 1..=attempts {
                    channel
                        .send_line(&line)
                        .map_err(|source| RecorderError::Write { command: name, source })?;
                    match channel.read_line(timeout) {
                        Ok(Some(reply)) if reply.starts_with("OK") => {
                            acknowledged = true;
                            break;
                        }
                        Ok(Some(reply)) => {
                            return Err(RecorderError::Rejected {
                                command: name,
                                reply,
                            });
                        }
                        Ok(None) => {
                            return Err(RecorderError::Read {
                                command: name,
                                source: io::ErrorKind::UnexpectedEof.into(),
                            });
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) =>
                        {
                            warn!(command = name, attempt, "recorder did not acknowledge in time");
                        }
                        Err(source) => return Err(RecorderError::Read { command: name, source }),
                    }
                }
                if !acknowledged {
                    return Err(RecorderError::NoAcknowledgement {
                        command: name,
                        attempts,
                    });
                }
            }
        }

        let settle = command.settle(&self.delays);
        debug!(command = name, settle_ms = settle.as_millis() as u64, "recorder command sent");
        self.timer.sleep(settle);
        Ok(())
    }
}

impl<C: ControlChannel, T: Timer> Drop for RecorderClient<C, T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::rc::Rc;

    use cvep_timing::ManualTimer;

    use super::*;

    #[derive(Default)]
    struct FakeChannel {
        sent: Rc<RefCell<Vec<String>>>,
        replies: VecDeque<io::Result<Option<String>>>,
        fail_writes: bool,
    }

    impl ControlChannel for FakeChannel {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.sent.borrow_mut().push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(io::ErrorKind::TimedOut.into()))
        }

        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client() -> (RecorderClient<FakeChannel, ManualTimer>, Rc<RefCell<Vec<String>>>, ManualTimer) {
        let channel = FakeChannel::default();
        let sent = Rc::clone(&channel.sent);
        let timer = ManualTimer::new();
        (
            RecorderClient::from_channel(channel, timer.clone()),
            sent,
            timer,
        )
    }

    #[test]
    fn filename_line_renders_run_in_hex() {
        let (mut rec, sent, _) = client();
        rec.configure("X", "01", "02", 3, "cvep").unwrap();
        assert_eq!(
            sent.borrow()[0],
            "filename {root:X} {task:cvep} {run:3} {participant:01} {session:02}\n"
        );

        rec.configure("/data/cvep", "01", "02", 26, "cvep").unwrap();
        assert!(sent.borrow()[1].contains("{run:1a}"));
    }

    #[test]
    fn full_lifecycle_sends_commands_and_settles() {
        let (mut rec, sent, timer) = client();
        rec.configure("root", "01", "01", 1, "cvep").unwrap();
        rec.refresh().unwrap();
        rec.refresh().unwrap();
        rec.start().unwrap();
        assert_eq!(rec.state(), RecorderState::Recording);
        rec.stop().unwrap();
        assert_eq!(rec.state(), RecorderState::Stopped);

        assert_eq!(
            sent.borrow()[1..].to_vec(),
            vec!["update\n", "update\n", "start\n", "stop\n"]
        );
        assert_eq!(
            timer.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn out_of_order_commands_are_refused_without_sending() {
        let (mut rec, sent, _) = client();
        assert!(matches!(
            rec.start(),
            Err(RecorderError::InvalidTransition {
                command: "start",
                state: RecorderState::Connected
            })
        ));
        assert!(matches!(rec.refresh(), Err(RecorderError::InvalidTransition { .. })));
        assert!(matches!(rec.stop(), Err(RecorderError::InvalidTransition { .. })));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn write_failure_is_surfaced() {
        let channel = FakeChannel {
            fail_writes: true,
            ..FakeChannel::default()
        };
        let mut rec = RecorderClient::from_channel(channel, ManualTimer::new());
        assert!(matches!(
            rec.configure("r", "s", "s", 1, "t"),
            Err(RecorderError::Write { command: "filename", .. })
        ));
        assert_eq!(rec.state(), RecorderState::Connected);
    }

    #[test]
    fn closed_client_is_not_connected() {
        let (mut rec, _, _) = client();
        rec.close();
        assert_eq!(rec.state(), RecorderState::Disconnected);
        assert!(matches!(
            rec.configure("r", "s", "s", 1, "t"),
            Err(RecorderError::NotConnected)
        ));
    }

    #[test]
    fn acknowledged_commands_retry_on_timeout() {
        let channel = FakeChannel {
            replies: VecDeque::from(vec![
                Err(io::ErrorKind::TimedOut.into()),
                Ok(Some("OK".to_string())),
            ]),
            ..FakeChannel::default()
        };
        let sent = Rc::clone(&channel.sent);
        let mut rec = RecorderClient::from_channel(channel, ManualTimer::new()).with_ack_policy(
            AckPolicy::Line {
                timeout: Duration::from_millis(200),
                retries: 2,
            },
        );
        rec.configure("r", "s", "s", 1, "t").unwrap();
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn unacknowledged_command_gives_up() {
        let (rec, _, timer) = client();
        let mut rec = rec.with_ack_policy(AckPolicy::Line {
            timeout: Duration::from_millis(200),
            retries: 1,
        });
        assert!(matches!(
            rec.configure("r", "s", "s", 1, "t"),
            Err(RecorderError::NoAcknowledgement {
                command: "filename",
                attempts: 2
            })
        ));
        assert!(timer.sleeps().is_empty());
    }

    #[test]
    fn rejection_is_reported() {
        let channel = FakeChannel {
            replies: VecDeque::from(vec![Ok(Some("ERR no streams".to_string()))]),
            ..FakeChannel::default()
        };
        let mut rec = RecorderClient::from_channel(channel, ManualTimer::new()).with_ack_policy(
            AckPolicy::Line {
                timeout: Duration::from_millis(200),
                retries: 0,
            },
        );
        let err = rec.configure("r", "s", "s", 1, "t").unwrap_err();
        assert!(matches!(err, RecorderError::Rejected { reply, .. } if reply == "ERR no streams"));
    }

    #[test]
    fn tcp_client_talks_to_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut lines = Vec::new();
            for line in BufReader::new(stream).lines() {
                lines.push(line.unwrap());
            }
            lines
        });

        let mut rec = RecorderClient::connect("127.0.0.1", port)
            .unwrap()
            .with_settle_delays(SettleDelays {
                filename: Duration::ZERO,
                update: Duration::ZERO,
                start: Duration::ZERO,
                stop: Duration::ZERO,
            });
        rec.configure("X", "01", "02", 3, "cvep").unwrap();
        rec.start().unwrap();
        rec.stop().unwrap();
        rec.close();

        let lines = server.join().unwrap();
        assert_eq!(
            lines,
            vec![
                "filename {root:X} {task:cvep} {run:3} {participant:01} {session:02}",
                "start",
                "stop"
            ]
        );
    }

    #[test]
    fn unreachable_recorder_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(matches!(
            RecorderClient::connect("127.0.0.1", port),
            Err(RecorderError::Connect { .. })
        ));
    }
}
