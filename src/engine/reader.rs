use std::io;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use tracing::debug;

use crate::counters::{CounterSnapshot, ReadError};

use super::{lock, SharedSource};

/// Runs counter reads on a helper thread so a stalled source cannot hold up the sampler.
///
/// At most one read is in flight. A read that outlives the timeout is reported as
/// [`ReadError::Timeout`] and its eventual result answers the next call.
pub(super) struct TimedReader {
    requests: channel::Sender<()>,
    responses: channel::Receiver<Result<CounterSnapshot, ReadError>>,
    in_flight: bool,
    timeout: Duration,
}

impl TimedReader {
    pub(super) fn spawn(source: SharedSource, timeout: Duration) -> io::Result<Self> {
        let (requests, request_rx) = channel::bounded::<()>(1);
        let (response_tx, responses) = channel::bounded(1);
        thread::Builder::new().name("netspeed-reader".into()).spawn(move || {
            for () in request_rx {
                let result = lock(&*source).read();
                if response_tx.send(result).is_err() {
                    break;
                }
            }
            debug!("Counter reader exiting");
        })?;
        Ok(Self { requests, responses, in_flight: false, timeout })
    }

    /// One read bounded by the timeout. `None` means `stop` fired while waiting.
    pub(super) fn read(&mut self, stop: &channel::Receiver<()>) -> Option<Result<CounterSnapshot, ReadError>> {
        if !self.in_flight {
            if self.requests.send(()).is_err() {
                return Some(Err(ReadError::Unavailable));
            }
            self.in_flight = true;
        }
        channel::select! {
            recv(self.responses) -> msg => {
                self.in_flight = false;
                Some(msg.unwrap_or_else(|_| Err(ReadError::Unavailable)))
            }
            recv(stop) -> _ => None,
            default(self.timeout) => Some(Err(ReadError::Timeout(self.timeout))),
        }
    }
}
