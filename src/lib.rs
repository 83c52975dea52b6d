//! Request-mediation core for a zero-knowledge vault collaboration service.
//!
//! The server never sees passwords or plaintext vault contents. It
//! orchestrates SRP handshakes against stored verifiers, runs multi-factor
//! verification flows through pluggable providers, authenticates signed
//! requests against sessions, and authorizes reads and writes over accounts,
//! orgs, and vaults with role checks and optimistic revisions. Storage,
//! message delivery, SRP arithmetic, and provisioning are consumed behind
//! traits.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handlers::{Request, RequestAuth, Response};

use services::{
    AttachmentStorage, AuthProvider, AuthProviderRegistry, LegacyBridge, Messenger, Provisioner,
    Srp, Storage, WriteQueue,
};
use std::sync::Arc;

/// The mediation core. One instance serves all requests; handlers borrow it
/// immutably and all shared state lives behind the collaborator traits.
pub struct Server {
    pub config: ServerConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) srp: Arc<dyn Srp>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) attachments: Arc<dyn AttachmentStorage>,
    pub(crate) legacy: Option<Arc<dyn LegacyBridge>>,
    pub(crate) providers: AuthProviderRegistry,
    pub(crate) queue: WriteQueue,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        storage: Arc<dyn Storage>,
        srp: Arc<dyn Srp>,
        messenger: Arc<dyn Messenger>,
        provisioner: Arc<dyn Provisioner>,
        attachments: Arc<dyn AttachmentStorage>,
        providers: Vec<Arc<dyn AuthProvider>>,
    ) -> Self {
        Self {
            config,
            storage,
            srp,
            messenger,
            provisioner,
            attachments,
            legacy: None,
            providers: AuthProviderRegistry::new(providers),
            queue: WriteQueue::new(),
        }
    }

    /// Attach a bridge to a predecessor system holding pre-migration data.
    pub fn with_legacy_bridge(mut self, bridge: Arc<dyn LegacyBridge>) -> Self {
        self.legacy = Some(bridge);
        self
    }
}

/// Install the global tracing subscriber. Level comes from `RUST_LOG`,
/// falling back to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
