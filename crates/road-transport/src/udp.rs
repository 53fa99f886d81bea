use std::io::ErrorKind;
use std::net::UdpSocket;

use crate::{HostAddr, RoadTransportError, Transport, TransportConfig};

/// Non-blocking UDP transport.
///
/// The socket is put in non-blocking mode at bind time, so `receive`
/// returns `Ok(None)` instead of waiting when nothing has arrived.
pub struct UdpTransport {
    socket: UdpSocket,
    local: HostAddr,
    buf: Vec<u8>,
    max_datagram_size: usize,
}

impl UdpTransport {
    /// Bind a UDP socket at `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: HostAddr, config: TransportConfig) -> Result<Self, RoadTransportError> {
        let bind_err = |source| RoadTransportError::Bind { addr, source };
        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let local = socket.local_addr().map_err(bind_err)?;
        tracing::info!("udp: bound {local}");
        Ok(Self {
            socket,
            local,
            buf: vec![0u8; config.max_datagram_size],
            max_datagram_size: config.max_datagram_size,
        })
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> HostAddr {
        self.local
    }

    fn send(&mut self, to: HostAddr, data: &[u8]) -> Result<(), RoadTransportError> {
        if data.len() > self.max_datagram_size {
            return Err(RoadTransportError::MessageTooLarge {
                size: data.len(),
                max: self.max_datagram_size,
            });
        }
        match self.socket.send_to(data, to) {
            Ok(_) => Ok(()),
            // A full send buffer loses the datagram like any other drop
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::debug!("udp: send buffer full, datagram to {to} lost");
                Ok(())
            }
            Err(source) => Err(RoadTransportError::Send { addr: to, source }),
        }
    }

    fn receive(&mut self) -> Result<Option<(HostAddr, Vec<u8>)>, RoadTransportError> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, from)) => return Ok(Some((from, self.buf[..n].to_vec()))),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(RoadTransportError::Receive(e)),
            }
        }
    }
}
