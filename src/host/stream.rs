//! Stream Readers
//!
//! Reads a child pipe line by line on a background thread and forwards
//! each line to the consumer over a channel.

use crossbeam_channel::Sender;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::thread::JoinHandle;

/// Which child pipe an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Event sent by a reader thread
#[derive(Debug)]
pub enum StreamEvent {
    /// One decoded line, without its terminator
    Line(Stream, String),
    /// Reading the pipe failed; no further events follow for this stream
    Failed(Stream, io::Error),
    /// End of file; no further events follow for this stream
    Closed(Stream),
}

/// Start a named thread that reads `pipe` until EOF.
pub fn spawn_reader<R>(
    stream: Stream,
    pipe: R,
    events: Sender<StreamEvent>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("{}-reader", stream))
        .spawn(move || read_lines(stream, pipe, &events))
}

/// Read `pipe` until EOF, sending one event per line.
///
/// `\n`, `\r\n` and a lone `\r` all end a line.
fn read_lines<R: Read>(stream: Stream, pipe: R, events: &Sender<StreamEvent>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                for line in split_lines(&buf) {
                    if events.send(StreamEvent::Line(stream, line)).is_err() {
                        // Consumer already returned
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = events.send(StreamEvent::Failed(stream, e));
                return;
            }
        }
    }

    let _ = events.send(StreamEvent::Closed(stream));
}

/// Split a chunk that ends in `\n` (or at EOF) into lossily decoded lines.
///
/// The terminator is dropped; every other `\r` inside the chunk is a break.
pub fn split_lines(raw: &[u8]) -> Vec<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    raw.split(|&b| b == b'\r')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}
