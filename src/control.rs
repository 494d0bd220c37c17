//! Client for the TCP control port.
//!
//! Get/set variable and restart ride on the same TLV framing as discovery,
//! sent over a persistent connection to the device's control port. Every
//! read and write is bounded by the connection timeout; an expired timeout
//! is a transport failure, never silently retried.

use super::constants::*;
use super::error::{ControlError, Error, Result};
use super::protocol::Frame;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use std::io;

/// A connection to one device's control port.
///
/// ```no_run
/// # use hdhomerun::ControlConnection;
/// # async fn run() -> Result<(), hdhomerun::Error> {
/// let mut control = ControlConnection::connect("192.168.0.20").await?;
/// let version = control.get_var("/sys/version").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ControlConnection {
    host: String,
    stream: TcpStream,
    timeout: Duration,
}

impl ControlConnection {
    /// Connect with the default timeout. The host may carry an explicit
    /// port, otherwise the protocol control port is used.
    pub async fn connect<S: Into<String>>(host: S) -> Result<Self> {
        Self::connect_with_timeout(host, Duration::from_secs(DEFAULT_TIMEOUT)).await
    }

    pub async fn connect_with_timeout<S: Into<String>>(
        host: S,
        io_timeout: Duration,
    ) -> Result<Self> {
        let host = host.into();
        let target = if host.contains(':') {
            host.clone()
        } else {
            format!("{}:{}", host, CONTROL_TCP_PORT)
        };

        let stream = timeout(io_timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| elapsed("connect"))?
            .map_err(transport)?;

        Ok(Self {
            host,
            stream,
            timeout: io_timeout,
        })
    }

    pub fn host(&self) -> String {
        self.host.clone()
    }

    /// Read a named protocol variable.
    ///
    /// A device answering "unknown variable" is a normal negative result and
    /// surfaces as [`ControlError::UnknownVariable`], distinct from any
    /// transport fault.
    pub async fn get_var(&mut self, name: &str) -> Result<String> {
        let request = Frame::new(TYPE_GETSET_REQ).put_cstr(TAG_GETSET_NAME, name);
        let reply = self.transact(request).await?;
        reply_value(name, &reply)
    }

    /// Write a named protocol variable, returning the value the device
    /// reports back.
    pub async fn set_var(&mut self, name: &str, value: &str) -> Result<String> {
        let request = Frame::new(TYPE_GETSET_REQ)
            .put_cstr(TAG_GETSET_NAME, name)
            .put_cstr(TAG_GETSET_VALUE, value);
        let reply = self.transact(request).await?;
        reply_value(name, &reply)
    }

    /// Restart the device.
    ///
    /// The device drops the connection while rebooting, so a reset counts
    /// as success; only other transport errors are failures.
    pub async fn restart(mut self) -> Result<()> {
        log::debug!("sending restart to {}", self.host);
        match self.set_var(VAR_RESTART, "self").await {
            Ok(_) => Ok(()),
            Err(e) if connection_dropped(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn version(&mut self) -> Result<String> {
        self.get_var(VAR_VERSION).await
    }

    pub async fn model(&mut self) -> Result<String> {
        self.get_var(VAR_MODEL).await
    }

    pub async fn hwmodel(&mut self) -> Result<String> {
        self.get_var(VAR_HWMODEL).await
    }

    pub async fn tuner_status(&mut self, tuner: usize) -> Result<String> {
        self.get_var(&format!("/tuner{}/status", tuner)).await
    }

    pub async fn tuner_program(&mut self, tuner: usize) -> Result<String> {
        self.get_var(&format!("/tuner{}/program", tuner)).await
    }

    pub async fn tuner_streaminfo(&mut self, tuner: usize) -> Result<String> {
        self.get_var(&format!("/tuner{}/streaminfo", tuner)).await
    }

    pub async fn tuner_target(&mut self, tuner: usize) -> Result<String> {
        self.get_var(&format!("/tuner{}/target", tuner)).await
    }

    async fn transact(&mut self, request: Frame) -> Result<Frame> {
        let bytes = request.encode();
        timeout(self.timeout, self.stream.write_all(&bytes))
            .await
            .map_err(|_| elapsed("write"))?
            .map_err(transport)?;

        let mut header = [0; 4];
        timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| elapsed("read"))?
            .map_err(transport)?;

        let payload_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut rest = vec![0; payload_len + 4];
        timeout(self.timeout, self.stream.read_exact(&mut rest))
            .await
            .map_err(|_| elapsed("read"))?
            .map_err(transport)?;

        let mut buf = header.to_vec();
        buf.extend_from_slice(&rest);
        Frame::decode(&buf)
    }
}

fn reply_value(name: &str, reply: &Frame) -> Result<String> {
    if reply.frame_type() != TYPE_GETSET_RPY {
        return Err(Error::MalformedPacket(format!(
            "unexpected frame type {:#06x} in getset reply",
            reply.frame_type()
        )));
    }

    if let Some(message) = reply.get_str(TAG_ERROR_MESSAGE) {
        return Err(ControlError::UnknownVariable {
            name: name.to_string(),
            message,
        }
        .into());
    }

    reply
        .get_str(TAG_GETSET_VALUE)
        .ok_or_else(|| Error::MalformedPacket("getset reply without a value".into()))
}

fn transport(e: io::Error) -> Error {
    ControlError::TransportFailure(e).into()
}

fn elapsed(operation: &str) -> Error {
    transport(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("control {} timed out", operation),
    ))
}

fn connection_dropped(e: &Error) -> bool {
    let kind = match e {
        Error::Control(ControlError::TransportFailure(io_err)) => io_err.kind(),
        Error::Io(io_err) => io_err.kind(),
        _ => return false,
    };
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
