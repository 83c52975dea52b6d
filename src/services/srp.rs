//! Interface to the external SRP primitive.
//!
//! The core orchestrates the exchange - stores pending state, enforces
//! single-use, strips secrets from responses - but the zero-knowledge
//! arithmetic itself is a consumed collaborator behind this trait.

use crate::error::ServerError;

/// Output of starting an exchange against a stored verifier.
pub struct HandshakeChallenge {
    /// Server public value, returned to the client.
    pub server_public: Vec<u8>,

    /// Opaque state the primitive needs to finish the exchange. Persisted
    /// on the auth record until the exchange completes or is pruned.
    pub state: Vec<u8>,
}

/// Output of completing an exchange with the client's public value.
pub struct HandshakeKeys {
    /// Negotiated shared key; becomes the session signing key. Never
    /// returned to the caller.
    pub session_key: Vec<u8>,

    /// Proof the client must present. Compared in constant time.
    pub expected_proof: Vec<u8>,
}

pub trait Srp: Send + Sync {
    fn initiate(&self, verifier: &[u8]) -> Result<HandshakeChallenge, ServerError>;

    fn complete(&self, state: &[u8], client_public: &[u8])
        -> Result<HandshakeKeys, ServerError>;
}
