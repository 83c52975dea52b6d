pub mod context;
pub mod legacy;
pub mod messenger;
pub mod provider;
pub mod provisioning;
pub mod queue;
pub mod session_auth;
pub mod srp;
pub mod storage;

pub use context::Context;
pub use legacy::LegacyBridge;
pub use messenger::{LoggingMessenger, Message, Messenger};
pub use provider::{AuthProvider, AuthProviderRegistry, EmailAuthProvider};
pub use provisioning::{
    AccountProvisioning, AccountQuota, OrgProvisioning, OrgQuota, Provisioner, Provisioning,
    ProvisioningStatus, UnrestrictedProvisioner, VaultProvisioning, VaultQuota,
};
pub use queue::{WriteGuard, WriteQueue};
pub use srp::{HandshakeChallenge, HandshakeKeys, Srp};
pub use storage::{
    AttachmentStorage, Entity, EntityKind, MemoryAttachmentStorage, MemoryStorage, Storage,
};
