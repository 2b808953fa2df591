//! Runtime - listener lifecycle and per-connection dispatch
//!
//! One tokio task per accepted connection; each task gates the HTTP
//! upgrade and then hands the socket to a [`Session`]. Sessions are
//! mutually isolated — the only state they share is the read-only
//! credential, the dial seam, and the pooled DoH client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::auth::Credential;
use crate::common::{Address, IntoStream, Result};
use crate::config::Config;
use crate::relay::dns::DohResolver;
use crate::session::{upgrade, Session};
use crate::transport::{TcpTransport, Transport};

/// Runtime manages the tunnel listener lifecycle
pub struct Runtime {
    listen: String,
    credential: Arc<Credential>,
    transport: Arc<dyn Transport>,
    resolver: Arc<DohResolver>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Runtime {
    /// Build runtime from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.password.is_empty() {
            warn!("empty password configured; the tunnel is effectively unauthenticated");
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listen: config.listen.clone(),
            credential: Arc::new(Credential::from_secret(&config.password)),
            transport: Arc::new(TcpTransport::new()),
            resolver: Arc::new(DohResolver::new(&config.dns.resolver)?),
            shutdown_tx,
        })
    }

    /// Run the listener until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        info!("listening on {}", listener.local_addr()?);

        let credential = self.credential.clone();
        let transport = self.transport.clone();
        let resolver = self.resolver.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let accept_handle = tokio::spawn(async move {
            accept_loop(listener, credential, transport, resolver, &mut shutdown_rx).await;
        });

        tokio::signal::ctrl_c().await?;
        info!("shutting down...");

        let _ = self.shutdown_tx.send(());
        let _ = accept_handle.await;

        Ok(())
    }

    /// Handle for requesting shutdown (for embedding)
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Accept connections until shutdown; one task per connection.
async fn accept_loop(
    listener: TcpListener,
    credential: Arc<Credential>,
    transport: Arc<dyn Transport>,
    resolver: Arc<DohResolver>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut conn_count: u64 = 0;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        conn_count += 1;
                        let conn_id = conn_count;
                        debug!("new connection #{} from {}", conn_id, peer);

                        let credential = credential.clone();
                        let transport = transport.clone();
                        let resolver = resolver.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, peer, credential, transport, resolver).await
                            {
                                debug!("connection #{} from {} ended: {}", conn_id, peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("listener stopped (handled {} connections)", conn_count);
                break;
            }
        }
    }
}

/// Gate the upgrade and run a session over the accepted socket.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    credential: Arc<Credential>,
    transport: Arc<dyn Transport>,
    resolver: Arc<DohResolver>,
) -> Result<()> {
    stream.set_nodelay(true)?;

    match upgrade::accept(stream.into_stream()).await? {
        None => {
            debug!("[{}] non-upgrade request answered 404", peer);
            Ok(())
        }
        Some(upgraded) => {
            let session = Session::new(Address::Socket(peer), credential, transport, resolver);
            session.run(upgraded).await;
            Ok(())
        }
    }
}
