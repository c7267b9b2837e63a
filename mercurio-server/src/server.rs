use std::{future::Future, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, oneshot},
    time::{self, Duration, Instant},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use mercurio_core::Result;
use mercurio_packets::{connect::ConnectPacket, pingresp::PingRespPacket, ControlPacket};
use mercurio_storage::{
    memory::{MemoryMessageStore, MemorySessionsStore, MemorySubscriptionIndex},
    MessageStore, Session, SessionsStore, SubscriptionIndex,
};

use crate::{
    auth::{AllowAllValidator, AuthService, CredentialValidator},
    connection::Connection,
    interceptor::{Interceptor, TracingInterceptor},
    processor::{ConnectOutcome, Processor},
    shutdown::Shutdown,
    tls::TlsConfig,
};

/// Authentication configuration for the server.
pub struct AuthConfig {
    /// Validates CONNECT username/password pairs. Defaults to accepting
    /// every CONNECT, credentials or not, when left unset.
    pub credential_validator: Option<Arc<dyn CredentialValidator>>,
    /// Whether a CONNECT with no username is accepted at all. When
    /// `false`, such a CONNECT is rejected with `BadUserNameOrPassword`
    /// before the credential validator is ever consulted.
    pub allow_anonymous: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_validator: None,
            allow_anonymous: true,
        }
    }
}

struct Listener {
    listener: TcpListener,
    processor: Arc<Processor>,
    notify_shutdown: broadcast::Sender<()>,
    tls_acceptor: Option<TlsAcceptor>,
}

struct Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    processor: Arc<Processor>,
    connection: Connection<S>,
    shutdown: Shutdown,
}

/// Run the MQTT broker with plain TCP connections.
pub async fn run(listener: TcpListener, shutdown: impl Future) {
    run_with_tls(listener, None, AuthConfig::default(), shutdown).await
}

/// Run the MQTT broker with optional TLS support and authentication.
pub async fn run_with_tls(
    listener: TcpListener,
    tls_config: Option<TlsConfig>,
    auth_config: AuthConfig,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = broadcast::channel(1);

    let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let sessions: Arc<dyn SessionsStore> = Arc::new(MemorySessionsStore::new(Arc::clone(&message_store)));
    let subscription_index: Arc<dyn SubscriptionIndex> = Arc::new(MemorySubscriptionIndex::new());
    let interceptor: Arc<dyn Interceptor> = Arc::new(TracingInterceptor);
    let validator = auth_config
        .credential_validator
        .unwrap_or_else(|| Arc::new(AllowAllValidator));
    let auth = Arc::new(AuthService::new(validator));

    let processor = Arc::new(Processor::new(
        message_store,
        sessions,
        subscription_index,
        interceptor,
        auth,
        auth_config.allow_anonymous,
    ));

    let tls_acceptor = match tls_config {
        Some(config) => match config.build_acceptor() {
            Ok(acceptor) => {
                info!("TLS enabled");
                Some(acceptor)
            }
            Err(e) => {
                error!("Failed to configure TLS: {}", e);
                return;
            }
        },
        None => {
            debug!("TLS not configured, using plain TCP");
            None
        }
    };

    let mut server = Listener {
        listener,
        processor,
        notify_shutdown,
        tls_acceptor,
    };

    tokio::select! {
        result = server.run() => {
            if result.is_err() {
                error!("Failed to accept new connection");
            }
        }
        _ = shutdown => {
            info!("Shutting down!");
        }
    }
}

impl Listener {
    async fn run(&mut self) -> Result<()> {
        loop {
            let socket = self.accept().await?;
            let peer_addr = socket.peer_addr().ok();

            info!("Got a connection: {:?}", peer_addr);

            let processor = Arc::clone(&self.processor);
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());

            if let Some(ref tls_acceptor) = self.tls_acceptor {
                let acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(tls_stream) => {
                            debug!("TLS handshake completed for {:?}", peer_addr);
                            let mut handler = Handler {
                                processor,
                                connection: Connection::new_tls(tls_stream),
                                shutdown,
                            };
                            Self::handle_connection(&mut handler).await;
                        }
                        Err(e) => {
                            error!("TLS handshake failed for {:?}: {}", peer_addr, e);
                        }
                    }
                });
            } else {
                tokio::spawn(async move {
                    let mut handler = Handler {
                        processor,
                        connection: Connection::new(socket),
                        shutdown,
                    };
                    Self::handle_connection(&mut handler).await;
                });
            }
        }
    }

    async fn handle_connection<S>(handler: &mut Handler<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match handler.connection.read_packet().await {
            // [MQTT-3.1.0-1] the first packet on a new connection must be CONNECT.
            Ok(Some(ControlPacket::Connect(p))) => {
                if let Err(err) = handler.run(p).await {
                    error!(cause = ?err, "Connection error");
                }
            }
            _ => error!("ConnectPacket expectation not met"),
        }
    }

    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;

            backoff *= 2;
        }
    }
}

/// Why a session's connection loop exited, driving what happens to the
/// session afterwards (graceful teardown vs. will publication).
enum EndReason {
    Graceful,
    Lost,
    Shutdown,
}

impl<S> Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(&mut self, connect_packet: ConnectPacket) -> Result<()> {
        let keepalive = connect_packet.keepalive;
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();

        let outcome = self
            .processor
            .handle_connect(connect_packet, outbox_tx.clone())
            .await
            .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;

        let (client_id, session, mut handle) = match outcome {
            ConnectOutcome::Accepted { ack, client_id, session, handle } => {
                self.connection.write_packet(ack).await?;
                (client_id, session, handle)
            }
            ConnectOutcome::Rejected { ack } => {
                let _ = self.connection.write_packet(ack).await;
                return Ok(());
            }
        };

        // Run the session loop to completion first, then reconcile
        // broker-side state no matter how it ended: a protocol error or
        // I/O failure is itself an abnormal disconnect and must still
        // publish the will and decide the session's fate.
        let result = self
            .handle_session(&client_id, &session, &mut handle.takeover, keepalive, &outbox_tx, &mut outbox_rx)
            .await;

        let cleanup = match &result {
            Ok(EndReason::Graceful) => Some(self.processor.handle_disconnect(&client_id, &session, &handle).await),
            Ok(EndReason::Lost) | Err(_) => Some(self.processor.handle_connection_lost(&client_id, &session, &handle).await),
            Ok(EndReason::Shutdown) => None,
        };

        if let Some(cleanup) = cleanup {
            cleanup.map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;
        }

        result.map(|_| ())
    }

    async fn handle_session(
        &mut self,
        client_id: &str,
        session: &Arc<Session>,
        takeover: &mut oneshot::Receiver<()>,
        keepalive: u16,
        outbox_tx: &mpsc::UnboundedSender<ControlPacket>,
        outbox_rx: &mut mpsc::UnboundedReceiver<ControlPacket>,
    ) -> Result<EndReason> {
        // Keep-alive timeout: 1.5x keepalive seconds per MQTT-3.1.2-24.
        // A keepalive of 0 disables the check.
        let timeout_duration = if keepalive == 0 {
            Duration::from_secs(u64::MAX / 2)
        } else {
            Duration::from_secs((keepalive as u64 * 3) / 2)
        };

        let deadline = time::sleep(timeout_duration);
        tokio::pin!(deadline);

        loop {
            if self.shutdown.is_shutdown() {
                return Ok(EndReason::Shutdown);
            }

            tokio::select! {
                maybe_packet = self.connection.read_packet() => {
                    let packet = match maybe_packet? {
                        None => return Ok(EndReason::Lost),
                        Some(ControlPacket::Disconnect(_)) => return Ok(EndReason::Graceful),
                        Some(packet) => packet,
                    };

                    self.dispatch(client_id, session, packet, outbox_tx).await?;
                    deadline.as_mut().reset(Instant::now() + timeout_duration);
                }

                Some(packet) = outbox_rx.recv() => {
                    self.connection.write_packet(packet).await?;
                }

                _ = &mut *takeover => {
                    info!(client_id, "session taken over by a newer connection");
                    return Ok(EndReason::Lost);
                }

                _ = &mut deadline => {
                    warn!(client_id, seconds = timeout_duration.as_secs(), "keep-alive timeout");
                    return Ok(EndReason::Lost);
                }

                _ = self.shutdown.recv() => {
                    return Ok(EndReason::Shutdown);
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        client_id: &str,
        session: &Arc<Session>,
        packet: ControlPacket,
        outbox_tx: &mpsc::UnboundedSender<ControlPacket>,
    ) -> Result<()> {
        match packet {
            ControlPacket::Publish(p) => {
                if let Some(ack) = self
                    .processor
                    .handle_publish(client_id, session, p)
                    .await
                    .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?
                {
                    self.connection.write_packet(ack).await?;
                }
            }
            ControlPacket::PubAck(p) => self.processor.handle_pub_ack(session, p.packet_id),
            ControlPacket::PubRec(p) => {
                let ack = self.processor.handle_pub_rec(session, p.packet_id);
                self.connection.write_packet(ack).await?;
            }
            ControlPacket::PubRel(p) => {
                let ack = self
                    .processor
                    .handle_pub_rel(client_id, session, p.packet_id)
                    .await
                    .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;
                self.connection.write_packet(ack).await?;
            }
            ControlPacket::PubComp(p) => self.processor.handle_pub_comp(session, p.packet_id),
            ControlPacket::Subscribe(p) => {
                let ack = self
                    .processor
                    .handle_subscribe(client_id, session, p, outbox_tx)
                    .await
                    .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;
                self.connection.write_packet(ack).await?;
            }
            ControlPacket::Unsubscribe(p) => {
                let ack = self
                    .processor
                    .handle_unsubscribe(client_id, session, p)
                    .await
                    .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;
                self.connection.write_packet(ack).await?;
            }
            ControlPacket::PingReq(_) => {
                self.connection
                    .write_packet(ControlPacket::PingResp(PingRespPacket {}))
                    .await?;
            }
            ControlPacket::Connect(_) => {
                warn!(client_id, "second CONNECT on an established connection");
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected CONNECT").into());
            }
            other => {
                debug!(client_id, packet = ?other, "ignoring unexpected packet from client");
            }
        }

        Ok(())
    }
}
