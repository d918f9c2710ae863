use crate::protocol::{self, Frame, Request, StoveCodec};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _};
use tracing::{debug, trace};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("`{0}` did not resolve to any address")]
    NoAddress(String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not encode the request")]
    Encode(#[source] std::io::Error),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("could not decode the response")]
    Decode(#[source] std::io::Error),
    #[error("the connection was closed without a response")]
    EmptyResponse,
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Something that can deliver a single request to a stove and hand back its response.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request) -> impl Future<Output = Result<Frame, Error>> + Send;
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Host name or address of the stove's network module.
    #[arg(long)]
    pub host: String,

    /// TCP port the network module listens on.
    #[arg(long, default_value_t = protocol::TCP_PORT)]
    pub port: u16,

    /// Abandon an exchange (connect, send and receive together) after this long.
    #[arg(long, default_value = "10s")]
    pub timeout: humantime::Duration,

    /// Largest response read from the stove, in bytes.
    ///
    /// Responses are read with a single read call, anything beyond this size is lost.
    #[arg(long, default_value_t = protocol::SOCKET_BUFFER)]
    pub buffer_size: usize,
}

impl Args {
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: protocol::TCP_PORT,
            timeout: DEFAULT_TIMEOUT.into(),
            buffer_size: protocol::SOCKET_BUFFER,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A stove reachable over TCP.
///
/// Every request opens a fresh connection which is closed again once the response has been read.
/// Requests to the same stove are serialized, so there is never more than one connection to the
/// device at a time.
pub struct Connection {
    args: Args,
    in_flight: Mutex<()>,
}

impl Connection {
    pub fn new(args: Args) -> Self {
        Self { args, in_flight: Mutex::new(()) }
    }

    async fn connect(&self) -> Result<TcpStream, Error> {
        let address = self.args.address();
        debug!(message = "connecting...", %address);
        let addresses = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        if addresses.is_empty() {
            return Err(Error::NoAddress(address));
        }
        trace!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        Ok(socket)
    }

    async fn exchange(&self, request: &Request) -> Result<Frame, Error> {
        let mut codec = StoveCodec {};
        let mut buffer = BytesMut::new();
        codec.encode(request, &mut buffer).map_err(Error::Encode)?;
        let mut socket = self.connect().await?;
        socket.write_all(&buffer).await.map_err(Error::Send)?;
        socket.flush().await.map_err(Error::Send)?;

        let mut response = vec![0; self.args.buffer_size];
        let read = socket.read(&mut response).await.map_err(Error::Receive)?;
        // A failure to shut down cleanly does not invalidate the response we already have.
        let shutdown_result = socket.shutdown().await;
        trace!(message = "closed connection", is_error = ?shutdown_result.err());
        drop(socket);

        let mut buffer = BytesMut::from(&response[..read]);
        let frame = codec.decode_eof(&mut buffer).map_err(Error::Decode)?;
        let frame = frame.ok_or(Error::EmptyResponse)?;
        trace!(message = "decoded a response", fields = ?frame.fields);
        Ok(frame)
    }
}

impl Transport for Connection {
    async fn send(&self, request: &Request) -> Result<Frame, Error> {
        let _guard = self.in_flight.lock().await;
        let timeout = *self.args.timeout;
        // Dropping the exchange future on timeout drops, and thereby closes, its socket.
        let frame = tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        debug!(message = "exchanged a frame", ?request, fields = frame.fields.len());
        Ok(frame)
    }
}
