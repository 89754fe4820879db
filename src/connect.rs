//! TLS edge: dials `host:port` and negotiates `h2` via ALPN.
//!
//! Certificate verification policy belongs to the caller: the supplied
//! `rustls::ClientConfig` is used as-is, only the ALPN list is forced.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::Error;

/// Establishes TLS connections that the [`Builder`](crate::Builder) can
/// hand-shake HTTP/2 over.
#[derive(Clone)]
pub struct Connector {
    inner: TlsConnector,
}

impl Connector {
    /// Wrap a caller-configured TLS client. The ALPN protocol list is
    /// overwritten to offer exactly `h2`.
    pub fn new(mut config: ClientConfig) -> Connector {
        config.alpn_protocols = vec![b"h2".to_vec()];
        Connector {
            inner: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Connect and verify that the peer selected `h2`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TlsStream<TcpStream>, Error> {
        let tcp = TcpStream::connect((host, port)).await?;
        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| Error::InvalidUsage("invalid server name"))?;
        let tls = self.inner.connect(name, tcp).await?;

        let (_, session) = tls.get_ref();
        if session.alpn_protocol() != Some(b"h2".as_slice()) {
            debug!(host, "peer refused h2 via ALPN");
            return Err(Error::Alpn);
        }
        Ok(tls)
    }
}
