//! Tunnels riding over an SSH session.
//!
//! Three flavors: `local` (listen here, forward over the session),
//! `remote` (listen there, forward back), and `dynamic` (a local SOCKS5
//! proxy, CONNECT only). A tunnel's lifetime is bound to its parent
//! session; teardown closes the listener task and every open relay.

use super::session::SshSession;
use super::types::{TunnelInfo, TunnelKind, TunnelSpec, TunnelStatus};
use russh::client::Msg;
use russh::Channel;
use ry_common::{Error, Result, TunnelId};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A live tunnel: its info plus the shutdown handle for its task.
pub struct Tunnel {
    pub info: TunnelInfo,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Tunnel {
    /// Open a tunnel on the session per the spec.
    pub async fn open(session: &Arc<SshSession>, spec: TunnelSpec) -> Result<Tunnel> {
        let info = TunnelInfo {
            id: TunnelId::new(),
            session_id: session.id.clone(),
            kind: spec.kind,
            local_host: spec.local_host.clone(),
            local_port: spec.local_port,
            remote_host: spec.remote_host.clone(),
            remote_port: spec.remote_port,
            status: TunnelStatus::Open,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        match spec.kind {
            TunnelKind::Local => {
                let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port))
                    .await
                    .map_err(|err| Error::TunnelFailed(err.to_string()))?;
                tokio::spawn(local_forward_task(
                    Arc::clone(session),
                    listener,
                    spec,
                    shutdown_rx,
                ));
            }
            TunnelKind::Dynamic => {
                let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port))
                    .await
                    .map_err(|err| Error::TunnelFailed(err.to_string()))?;
                tokio::spawn(socks_task(Arc::clone(session), listener, shutdown_rx));
            }
            TunnelKind::Remote => {
                let mut handle = session.handle.lock().await;
                let handle = handle.as_mut().ok_or_else(|| {
                    Error::TunnelFailed("session has no live connection".to_string())
                })?;
                handle
                    .tcpip_forward(spec.remote_host.as_str(), u32::from(spec.remote_port))
                    .await
                    .map_err(|err| Error::TunnelFailed(err.to_string()))?;
                // Forwarded-channel delivery is handled by the session's
                // client handler; nothing to poll here.
                drop(shutdown_rx);
            }
        }

        debug!(
            tunnel = %info.id,
            session = %info.session_id,
            kind = ?info.kind,
            "tunnel opened"
        );
        session.add_tunnel(info.clone());
        Ok(Tunnel {
            info,
            shutdown: Some(shutdown_tx),
        })
    }

    /// Tear the tunnel down.
    pub fn close(&mut self, session: &SshSession) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.info.status = TunnelStatus::Closed;
        session.remove_tunnel(&self.info.id);
    }
}

/// Accept loop for a local forward.
async fn local_forward_task(
    session: Arc<SshSession>,
    listener: TcpListener,
    spec: TunnelSpec,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { break };
                match open_direct_channel(&session, &spec.remote_host, spec.remote_port).await {
                    Ok(channel) => {
                        tokio::spawn(relay(stream, channel));
                    }
                    Err(err) => {
                        warn!(peer = %peer, "direct-tcpip open failed: {}", err);
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }
    debug!(session = %session.id, "local forward closed");
}

async fn open_direct_channel(
    session: &SshSession,
    host: &str,
    port: u16,
) -> Result<Channel<Msg>> {
    let mut handle = session.handle.lock().await;
    let handle = handle
        .as_mut()
        .ok_or_else(|| Error::TunnelFailed("session has no live connection".to_string()))?;
    handle
        .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
        .await
        .map_err(|err| Error::TunnelFailed(err.to_string()))
}

/// Pump bytes both ways between a TCP stream and an SSH channel.
async fn relay(mut stream: TcpStream, channel: Channel<Msg>) {
    let mut channel_stream = channel.into_stream();
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await;
}

/// Minimal SOCKS5 server: no auth, CONNECT only.
async fn socks_task(
    session: Arc<SshSession>,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { break };
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    if let Err(err) = serve_socks(session, stream).await {
                        debug!("socks connection ended: {}", err);
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }
    debug!(session = %session.id, "dynamic forward closed");
}

async fn serve_socks(session: Arc<SshSession>, mut stream: TcpStream) -> std::io::Result<()> {
    use std::io::{Error as IoError, ErrorKind};

    // Greeting: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != 5 {
        return Err(IoError::new(ErrorKind::InvalidData, "not SOCKS5"));
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    // NO AUTHENTICATION REQUIRED
    stream.write_all(&[5, 0]).await?;

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[1] != 1 {
        stream.write_all(&[5, 7, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        return Err(IoError::new(ErrorKind::Unsupported, "only CONNECT"));
    }
    let host = match request[3] {
        1 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv4Addr::from(addr).to_string()
        }
        3 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        4 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv6Addr::from(addr).to_string()
        }
        _ => return Err(IoError::new(ErrorKind::InvalidData, "bad address type")),
    };
    let mut port_bytes = [0u8; 2];
    stream.read_exact(&mut port_bytes).await?;
    let port = u16::from_be_bytes(port_bytes);

    match open_direct_channel(&session, &host, port).await {
        Ok(channel) => {
            stream.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            let mut channel_stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await;
            Ok(())
        }
        Err(err) => {
            stream.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            Err(IoError::new(ErrorKind::ConnectionRefused, err.to_string()))
        }
    }
}
