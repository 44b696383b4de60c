//! `MetamindServer` builder and server loop.
//!
//! This is the entry point for running a MetaMind server. It ties the
//! layers together: transport → protocol → session → sync.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metamind_protocol::{ClientId, JsonCodec, Snapshot};
use metamind_session::{
    ModuleError, ModuleRegistry, SessionConfig, SessionService, StateManager,
    TrainingModule,
};
use metamind_sync::{SyncConfig, SyncContext, init_sync_context};
use metamind_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ChannelSink, MetamindError};

/// Counter for generating unique client IDs.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) sessions: SessionService,
    pub(crate) sink: Arc<ChannelSink>,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a MetaMind server.
///
/// # Example
///
/// ```rust,ignore
/// let server = MetamindServer::builder()
///     .bind("0.0.0.0:8765")
///     .module("symbol_memory", "Remember the symbols", SymbolMemory::from_params)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct MetamindServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    sync_config: SyncConfig,
    registry: ModuleRegistry,
}

impl MetamindServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            session_config: SessionConfig::default(),
            sync_config: SyncConfig::default(),
            registry: ModuleRegistry::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the update loop configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the delta/compression configuration.
    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Replaces the module registry.
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one training module.
    pub fn module<F>(
        mut self,
        id: &str,
        description: &str,
        factory: F,
    ) -> Self
    where
        F: Fn(&Snapshot) -> Result<Box<dyn TrainingModule>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register(id, description, factory);
        self
    }

    /// Binds the transport and assembles the server.
    pub async fn build(self) -> Result<MetamindServer, MetamindError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let context = init_sync_context(self.sync_config);
        let sink = Arc::new(ChannelSink::new());
        let manager = StateManager::new(
            self.session_config,
            Arc::clone(&context),
            sink.clone(),
        );

        let state = Arc::new(ServerState {
            sessions: SessionService::new(manager, self.registry),
            sink,
            codec: JsonCodec,
        });

        Ok(MetamindServer {
            transport,
            context,
            state,
        })
    }
}

impl Default for MetamindServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A MetaMind server bound to its address.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct MetamindServer {
    transport: WebSocketTransport,
    context: Arc<SyncContext>,
    state: Arc<ServerState>,
}

impl MetamindServer {
    /// Creates a new builder.
    pub fn builder() -> MetamindServerBuilder {
        MetamindServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The sync context, for statistics and shutdown.
    pub fn sync_context(&self) -> Arc<SyncContext> {
        Arc::clone(&self.context)
    }

    /// Runs the server accept loop.
    ///
    /// Spawns a handler task for each accepted connection. Runs until the
    /// process is terminated.
    pub async fn run(mut self) -> Result<(), MetamindError> {
        tracing::info!("MetaMind server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let client_id = ClientId(
                        NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
                    );
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(conn, client_id, state).await
                        {
                            tracing::debug!(
                                client_id = %client_id,
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
