//! Connection establishment (§4.2): wraps an accepted or dialed TCP stream
//! in optional TLS, runs the EBCDIC pre-connection probe, and hands back a
//! [`FramedTransport`] speaking whole inner frames.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::config::{SecurityMode, TransportConfig};
use crate::error::TransportError;
use crate::handshake;
use crate::stream::{BoxedStream, PrefixedStream};
use crate::tls;

/// Negotiated TLS parameters, surfaced for audit logging (§6).
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
}

pub struct FramedTransport {
    framed: Framed<PrefixedStream, LengthDelimitedCodec>,
    peer_addr: SocketAddr,
    ebcdic: bool,
    tls_info: Option<TlsInfo>,
}

impl FramedTransport {
    fn new(stream: PrefixedStream, peer_addr: SocketAddr, ebcdic: bool, tls_info: Option<TlsInfo>, max_frame_len: usize) -> Self {
        let codec = LengthDelimitedCodec::builder().length_field_length(2).big_endian().max_frame_length(max_frame_len).new_codec();
        Self { framed: Framed::new(stream, codec), peer_addr, ebcdic, tls_info }
    }

    /// Reads the next inner frame (header + body, outer length prefix
    /// already stripped). `Ok(None)` means the peer closed cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(bytes)) => Ok(Some(bytes.to_vec())),
            Some(Err(e)) => Err(TransportError::Io(e)),
        }
    }

    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.framed.send(bytes.to_vec().into()).await.map_err(TransportError::Io)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn ebcdic(&self) -> bool {
        self.ebcdic
    }

    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls_info.as_ref()
    }
}

fn apply_socket_options(stream: &TcpStream) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    Ok(())
}

/// Server side: takes an already-`accept()`-ed TCP stream, applies TLS if
/// configured, and probes for the EBCDIC preamble before framing.
pub async fn accept(stream: TcpStream, cfg: &TransportConfig) -> Result<FramedTransport, TransportError> {
    apply_socket_options(&stream)?;
    let peer_addr = stream.peer_addr()?;

    let (boxed, tls_info): (BoxedStream, Option<TlsInfo>) = match &cfg.security {
        SecurityMode::Plain => (Box::new(stream), None),
        SecurityMode::Tls(tls_cfg) => {
            let acceptor = tls::acceptor(tls_cfg)?;
            let tls_stream = acceptor.accept(stream).await.map_err(|e| TransportError::Tls(e.to_string()))?;
            let info = tls_info_of_server(&tls_stream);
            (Box::new(tls_stream), info)
        }
    };

    let (ebcdic, prefixed) = handshake::detect(boxed).await?;
    Ok(FramedTransport::new(prefixed, peer_addr, ebcdic, tls_info, cfg.max_frame_len))
}

/// Client side: dials `addr`, applies TLS if configured, and sends the
/// EBCDIC preamble first when `request_ebcdic` is set.
pub async fn connect(
    addr: impl ToSocketAddrs,
    cfg: &TransportConfig,
    request_ebcdic: bool,
) -> Result<FramedTransport, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    apply_socket_options(&stream)?;
    let peer_addr = stream.peer_addr()?;

    let (boxed, tls_info): (BoxedStream, Option<TlsInfo>) = match &cfg.security {
        SecurityMode::Plain => (Box::new(stream), None),
        SecurityMode::Tls(tls_cfg) => {
            let connector = tls::connector(tls_cfg)?;
            let server_name = rustls::pki_types::ServerName::try_from("pesit-partner".to_string())
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let tls_stream = connector.connect(server_name, stream).await.map_err(|e| TransportError::Tls(e.to_string()))?;
            let info = tls_info_of_client(&tls_stream);
            (Box::new(tls_stream), info)
        }
    };

    let prefixed = if request_ebcdic {
        handshake::initiate(boxed).await?
    } else {
        PrefixedStream::without_prefix(boxed)
    };

    Ok(FramedTransport::new(prefixed, peer_addr, request_ebcdic, tls_info, cfg.max_frame_len))
}

fn tls_info_of_server(stream: &tokio_rustls::server::TlsStream<TcpStream>) -> Option<TlsInfo> {
    let (_, conn) = stream.get_ref();
    Some(TlsInfo {
        protocol_version: format!("{:?}", conn.protocol_version()?),
        cipher_suite: format!("{:?}", conn.negotiated_cipher_suite()?.suite()),
    })
}

fn tls_info_of_client(stream: &tokio_rustls::client::TlsStream<TcpStream>) -> Option<TlsInfo> {
    let (_, conn) = stream.get_ref();
    Some(TlsInfo {
        protocol_version: format!("{:?}", conn.protocol_version()?),
        cipher_suite: format!("{:?}", conn.negotiated_cipher_suite()?.suite()),
    })
}
