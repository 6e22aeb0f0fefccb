use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Line-oriented, bidirectional control connection.
pub trait ControlChannel {
    fn send_line(&mut self, line: &str) -> io::Result<()>;
    /// Read one reply line, waiting at most `timeout`. `Ok(None)` means the peer closed.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;
    fn shutdown(&mut self) -> io::Result<()>;
}

/// TCP control connection.
///
/// Bytes of a reply that is still incomplete when a read times out are kept
/// and completed by the next read.
#[derive(Debug)]
pub struct TcpChannel {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    pending: Vec<u8>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
            pending: Vec::new(),
        })
    }
}

impl ControlChannel for TcpChannel {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        // A zero read timeout is rejected by the OS.
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        // On error `read_until` leaves what it already consumed in `pending`.
        let read = self.reader.read_until(b'\n', &mut self.pending)?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(line.trim_end().to_string()))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown(Shutdown::Both)
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    fn pair() -> (TcpChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (TcpChannel::new(client).unwrap(), server)
    }

    #[test]
    fn reply_split_across_a_timeout_is_read_whole() {
        let (mut channel, mut server) = pair();
        let (go, wait) = mpsc::channel::<()>();
        let writer = thread::spawn(move || {
            server.write_all(b"O").unwrap();
            server.flush().unwrap();
            wait.recv().unwrap();
            server.write_all(b"K\n").unwrap();
            server
        });

        let err = channel.read_line(Duration::from_millis(50)).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            "{err:?}"
        );
        go.send(()).unwrap();
        let line = channel.read_line(Duration::from_secs(5)).unwrap();
        assert_eq!(line.as_deref(), Some("OK"));
        drop(writer.join().unwrap());
    }

    #[test]
    fn lines_come_back_one_at_a_time() {
        let (mut channel, mut server) = pair();
        server.write_all(b"OK\r\nERR busy\n").unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(channel.read_line(timeout).unwrap().as_deref(), Some("OK"));
        assert_eq!(channel.read_line(timeout).unwrap().as_deref(), Some("ERR busy"));
    }

    #[test]
    fn closed_peer_reads_as_none() {
        let (mut channel, server) = pair();
        drop(server);
        assert_eq!(channel.read_line(Duration::from_secs(5)).unwrap(), None);
    }
}
