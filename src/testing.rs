//! An in-memory stand-in for a stove, replaying canned responses.
use crate::connection::{Error, Transport};
use crate::protocol::{Frame, Request};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Frame, Error>>>,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: impl IntoIterator<Item = Result<Frame, Error>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every exchange take this long.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: &Request) -> Result<Frame, Error> {
        self.requests.lock().unwrap().push(*request);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        // Running out of script looks like a stove that has gone away.
        self.responses.lock().unwrap().pop_front().unwrap_or_else(refused)
    }
}

pub(crate) fn data(text: &str) -> Result<Frame, Error> {
    Ok(Frame::parse(text))
}

pub(crate) fn blank() -> Result<Frame, Error> {
    Ok(Frame::parse(""))
}

pub(crate) fn refused() -> Result<Frame, Error> {
    let error = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
    Err(Error::Connect(error, "stove:80".to_string()))
}
