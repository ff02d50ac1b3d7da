//! The loopback module provides a scripted power supply for testing purposes.

use std::{collections::VecDeque, time::Duration};

use crate::{LinkError, LinkInterface};

/// One expected command from host to instrument, optionally paired with the payload the
/// instrument answers with.
#[derive(Debug, Clone)]
pub struct Exchange {
    host: String,
    reply: Option<String>,
}

impl Exchange {
    /// A command that the instrument does not answer, e.g., a setter.
    pub fn command(host: &str) -> Self {
        Exchange {
            host: host.to_string(),
            reply: None,
        }
    }

    /// A query that the instrument answers with `reply`.
    ///
    /// The real supply sends its payloads without any terminator, so none is appended
    /// here either.
    pub fn query(host: &str, reply: &str) -> Self {
        Exchange {
            host: host.to_string(),
            reply: Some(reply.to_string()),
        }
    }
}

/// A link that allows you to simply write tests for your instrument driver.
///
/// The loopback link is constructed from a script of [`Exchange`]s that are expected to
/// take place, in order. Whenever the driver under test writes a command that is not the
/// next expected one, the loopback panics. When the loopback is dropped, a `finalize`
/// function is called that panics if part of the script was never used. This way, your
/// tests easily ensure that all commands are sent exactly as expected.
///
/// Replies become available for polling via `read_available` as soon as the matching
/// query was written. By default a reply is handed out in one piece; use
/// [`with_chunk`](LoopbackLink::with_chunk) to deliver it a few bytes per poll and
/// exercise the polling loop of `read_at_least`.
pub struct LoopbackLink {
    script: Vec<Exchange>,
    index: usize,
    pending: VecDeque<u8>,
    chunk: usize,
    timeout: Duration,
}

impl LoopbackLink {
    /// Create a new loopback link with the given script of expected exchanges.
    pub fn new(script: Vec<Exchange>) -> Self {
        LoopbackLink {
            script,
            index: 0,
            pending: VecDeque::new(),
            chunk: usize::MAX,
            timeout: Duration::from_millis(100),
        }
    }

    /// Deliver at most `chunk` bytes of a pending reply per `read_available` poll.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// This command panics if not all exchanges in the script have been used.
    ///
    /// It is automatically called when the [`LoopbackLink`] is dropped, but you can also
    /// call it manually to ensure that the whole script has been consumed.
    pub fn finalize(&mut self) {
        if let Some(exchange) = self.script.get(self.index) {
            panic!(
                "Leftover expected command found from host to instrument: {}",
                exchange.host
            );
        }
    }
}

impl LinkInterface for LoopbackLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let exchange = self
            .script
            .get(self.index)
            .expect("No more commands were expected from host to instrument.");
        self.index += 1;
        let exp = format!("{}\n", exchange.host);
        assert_eq!(
            exp.as_bytes(),
            data,
            "Expected command '{exp}', got '{:?}'",
            str::from_utf8(data)
        );
        if let Some(reply) = &exchange.reply {
            self.pending.extend(reply.as_bytes());
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let n = self.pending.len().min(self.chunk);
        Ok(self.pending.drain(..n).collect())
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        // Do not double-panic when a test is already going down.
        if !std::thread::panicking() {
            self.finalize();
        }
    }
}
