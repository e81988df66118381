use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use rustls::{ClientConnection, StreamOwned};

use crate::directory::RecorderLocation;
use crate::error::{Result, StreamError};
use crate::transport::tls;

/// Connection to a recorder, plain or TLS-wrapped.
pub enum RecorderStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl RecorderStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            RecorderStream::Plain(s) => s,
            RecorderStream::Tls(s) => s.get_ref(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, RecorderStream::Tls(_))
    }
}

impl Read for RecorderStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RecorderStream::Plain(s) => s.read(buf),
            // Recorders close without close_notify, and so does a local
            // shutdown through CloseHandle; both end the stream.
            RecorderStream::Tls(s) => match s.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::trace!("TLS peer closed without close_notify");
                    Ok(0)
                }
                other => other,
            },
        }
    }
}

impl Write for RecorderStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RecorderStream::Plain(s) => s.write(buf),
            RecorderStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RecorderStream::Plain(s) => s.flush(),
            RecorderStream::Tls(s) => s.flush(),
        }
    }
}

/// Unblocks and terminates a connection from another thread.
///
/// Shutting down the socket makes a pending receive on the owning thread
/// return, which the reader sees as end of stream or an I/O error.
#[derive(Debug)]
pub struct CloseHandle {
    socket: TcpStream,
}

impl CloseHandle {
    pub fn close(&self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(error = %e, "socket shutdown failed");
            }
        }
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(CloseHandle {
            socket: self.socket.try_clone()?,
        })
    }
}

/// Dial a recorder, applying `timeout` to connect, reads and writes.
pub fn dial(
    location: &RecorderLocation,
    timeout: Option<Duration>,
) -> Result<(RecorderStream, CloseHandle)> {
    let addrs: Vec<SocketAddr> = (location.host.as_str(), location.port)
        .to_socket_addrs()
        .map_err(|e| StreamError::Connect(format!("cannot resolve {}: {e}", location.address())))?
        .collect();

    let mut last_err = None;
    let mut tcp = None;
    for addr in &addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    let tcp = tcp.ok_or_else(|| {
        let reason = last_err.map_or_else(|| "no addresses".to_string(), |e| e.to_string());
        StreamError::Connect(format!("unable to connect to {}: {reason}", location.address()))
    })?;

    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)?;
    tcp.set_nodelay(true)?;

    let handle = CloseHandle {
        socket: tcp.try_clone()?,
    };

    let stream = if location.tls {
        let conn = ClientConnection::new(tls::client_config()?, tls::server_name(&location.host)?)?;
        RecorderStream::Tls(Box::new(StreamOwned::new(conn, tcp)))
    } else {
        RecorderStream::Plain(tcp)
    };

    tracing::info!(
        recorder = %location.address(),
        tls = location.tls,
        "connected to recording server"
    );
    Ok((stream, handle))
}
