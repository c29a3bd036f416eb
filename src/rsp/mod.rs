//! C2 — RSP Codec.
//!
//! Frames and deframes `$payload#cc` packets, computes/verifies the
//! modulo-256 checksum, escapes/unescapes binary payloads, and converts
//! between hex and raw bytes. Adapted from the teacher's synchronous
//! `GdbServer<R, W>` (`gdb_server.rs`), but hand-rolls the framing instead
//! of delegating it to an external `gdb-protocol` crate: the escape/checksum
//! rules are simple enough, and the spec calls for them to live in this
//! core rather than behind another dependency.

mod codec;

pub use codec::{byte_to_hex, escape, hex_to_bytes, unescape, Checksum};

use std::io::{self, prelude::*, BufReader};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A single parsed-and-checksum-verified RSP packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
}

impl Packet {
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Blocking reader/writer pair implementing RSP framing over any
/// `BufRead`/`Write` transport. `listen` binds the TCP surface described
/// in spec §6; `tester` drives the same logic against an in-memory buffer
/// for unit tests, exactly as the teacher's `GdbServer::tester` does.
pub struct GdbConnection<R, W>
where
    R: BufRead,
    W: Write,
{
    reader: R,
    writer: W,
}

impl GdbConnection<BufReader<TcpStream>, TcpStream> {
    /// Binds `addr`, accepts exactly one client, and returns a connection
    /// bound to it. The listening socket is dropped immediately after
    /// `accept` returns — spec §6 calls for no multiplexing.
    pub fn listen<A>(addr: A) -> io::Result<Self>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr)?;
        let (stream, _peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self::new(reader, stream))
    }
}

impl<'a> GdbConnection<&'a mut &'a [u8], Vec<u8>> {
    pub fn tester(input: &'a mut &'a [u8]) -> Self {
        Self::new(input, Vec::new())
    }

    pub fn response(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.writer)
    }
}

/// Reader capability backing [`GdbConnection::peek_interrupt`]. The real
/// socket path has to flip into non-blocking mode for the duration of the
/// peek (`fill_buf` on a `BufReader<TcpStream>` otherwise blocks forever
/// with nothing pending, starving the continue loop's status poll); the
/// in-memory `tester` path never blocks, so it just peeks directly.
pub trait InterruptPeek: BufRead {
    fn peek_interrupt(&mut self) -> io::Result<bool>;
}

impl InterruptPeek for BufReader<TcpStream> {
    fn peek_interrupt(&mut self) -> io::Result<bool> {
        self.get_ref().set_nonblocking(true)?;
        let outcome = self.fill_buf().map(|buf| memchr::memchr(0x03, buf));
        let _ = self.get_ref().set_nonblocking(false);

        match outcome {
            Ok(Some(pos)) => {
                self.consume(pos + 1);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl<'a> InterruptPeek for &'a [u8] {
    fn peek_interrupt(&mut self) -> io::Result<bool> {
        let found = self.fill_buf().map(|buf| memchr::memchr(0x03, buf))?;
        match found {
            Some(pos) => {
                BufRead::consume(self, pos + 1);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<R, W> GdbConnection<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads one packet, discarding any bytes before the next `$` (the
    /// resync-on-garbage behavior spec §5 requires after a break). Sends
    /// `+`/`-` per spec §4.2, retrying on bad checksum. Returns `Ok(None)`
    /// on EOF.
    pub fn next_packet(&mut self) -> io::Result<Option<Packet>> {
        loop {
            // Skip anything before the next frame start.
            loop {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                match memchr::memchr(b'$', buf) {
                    Some(0) => break,
                    Some(pos) => {
                        self.reader.consume(pos);
                        break;
                    }
                    None => {
                        let len = buf.len();
                        self.reader.consume(len);
                    }
                }
            }

            let mut raw = Vec::new();
            self.read_until_byte(b'$', &mut raw)?; // consume the leading '$'
            raw.clear();
            let found = self.read_until_byte(b'#', &mut raw)?;
            if !found {
                return Ok(None);
            }
            let mut checksum_digits = [0u8; 2];
            if self.read_exact_relaxed(&mut checksum_digits)?.is_none() {
                return Ok(None);
            }

            let expected = Checksum::of(&raw);
            let received = hex_byte(&checksum_digits).unwrap_or(0xFF);
            if expected.0 == received {
                self.writer.write_all(b"+")?;
                self.writer.flush()?;
                let unescaped = unescape(&raw);
                return Ok(Some(Packet::from_data(unescaped)));
            } else {
                self.writer.write_all(b"-")?;
                self.writer.flush()?;
                continue;
            }
        }
    }

    /// Sends a packet and waits for `+`/`-`, retrying on a `-` as long as
    /// our own checksum was valid.
    pub fn dispatch(&mut self, data: &[u8]) -> io::Result<()> {
        let escaped = escape(data);
        let checksum = Checksum::of(&escaped);
        loop {
            self.writer.write_all(b"$")?;
            self.writer.write_all(&escaped)?;
            self.writer.write_all(b"#")?;
            self.writer.write_all(&checksum.hex())?;
            self.writer.flush()?;

            let buf = self.reader.fill_buf()?;
            match buf.first() {
                Some(b'+') => {
                    self.reader.consume(1);
                    break;
                }
                Some(b'-') => {
                    self.reader.consume(1);
                    continue;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_until_byte(&mut self, delim: u8, out: &mut Vec<u8>) -> io::Result<bool> {
        loop {
            let (found, consumed) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(false);
                }
                match memchr::memchr(delim, buf) {
                    Some(pos) => {
                        out.extend_from_slice(&buf[..pos]);
                        (true, pos + 1)
                    }
                    None => {
                        out.extend_from_slice(buf);
                        (false, buf.len())
                    }
                }
            };
            self.reader.consume(consumed);
            if found {
                return Ok(true);
            }
        }
    }

    fn read_exact_relaxed(&mut self, out: &mut [u8]) -> io::Result<Option<()>> {
        let mut filled = 0;
        while filled < out.len() {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }
            let take = (out.len() - filled).min(buf.len());
            out[filled..filled + take].copy_from_slice(&buf[..take]);
            self.reader.consume(take);
            filled += take;
        }
        Ok(Some(()))
    }
}

impl<R, W> GdbConnection<R, W>
where
    R: InterruptPeek,
    W: Write,
{
    /// Peeks the underlying reader for a pending `0x03` break byte without
    /// consuming any in-progress packet framing. Used while a `c` (continue)
    /// is in flight to implement Ctrl-C per spec §4.2/§5. Never blocks: on
    /// the real socket path this is a non-blocking peek, and the in-memory
    /// tester path is never blocking to begin with.
    pub fn peek_interrupt(&mut self) -> io::Result<bool> {
        self.reader.peek_interrupt()
    }
}

fn hex_byte(digits: &[u8; 2]) -> Option<u8> {
    let hi = (digits[0] as char).to_digit(16)?;
    let lo = (digits[1] as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

/// Interrupt check poll period used by the continue loop (spec §4.8's
/// state machine: "poll (100 ms)").
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
