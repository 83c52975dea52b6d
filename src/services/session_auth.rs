//! Signed-request verification and context population.

use crate::error::ServerError;
use crate::handlers::Request;
use crate::services::context::Context;
use crate::services::storage::Entity;
use crate::utils::verify_request_signature;
use crate::Server;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;

impl Server {
    /// Resolve the identity behind a request.
    ///
    /// Requests without an auth header stay anonymous. For signed requests:
    /// a session lookup miss is reported as InvalidSession rather than
    /// NotFound so existence never leaks; an expired session fails as
    /// SessionExpired; a bad signature as InvalidRequest; and a timestamp
    /// outside the symmetric anti-replay window as MaxRequestAgeExceeded.
    ///
    /// On success the session's usage metadata is refreshed and persisted;
    /// that side effect is durable even if the operation itself later
    /// fails. Only the session entity is written here - this runs before
    /// the write locks are taken, and saving the account or auth record
    /// from a pre-lock snapshot could clobber a concurrent handler's write.
    /// The denormalized refresh on the auth record happens in
    /// [`persist_session_info`](Server::persist_session_info), under the
    /// locks.
    pub(crate) async fn authenticate(&self, request: &Request) -> Result<Context, ServerError> {
        let mut ctx = Context {
            device: request.device.clone(),
            ..Default::default()
        };
        let Some(header) = &request.auth else {
            return Ok(ctx);
        };

        let mut session = match self.fetch_session(&header.session_id).await {
            Ok(session) => session,
            Err(ServerError::NotFound) => return Err(ServerError::InvalidSession),
            Err(err) => return Err(err),
        };

        if session.is_expired() {
            return Err(ServerError::SessionExpired);
        }

        let key = BASE64
            .decode(&session.key)
            .map_err(|e| ServerError::Internal(anyhow::anyhow!("corrupt session key: {}", e)))?;
        if !verify_request_signature(&key, &session.id, header.time, &header.signature)? {
            return Err(ServerError::InvalidRequest(
                "request signature does not match session".to_string(),
            ));
        }

        if !within_request_age(
            Utc::now().timestamp_millis(),
            header.time,
            self.config.max_request_age,
        ) {
            return Err(ServerError::MaxRequestAgeExceeded);
        }

        let account = match self.fetch_account(&session.account_id).await {
            Ok(account) => account,
            Err(ServerError::NotFound) => return Err(ServerError::InvalidSession),
            Err(err) => return Err(err),
        };
        let auth = match self.fetch_auth(&account.email).await {
            Ok(auth) => auth,
            Err(ServerError::NotFound) => return Err(ServerError::InvalidSession),
            Err(err) => return Err(err),
        };

        session.last_used = Utc::now();
        if let Some(device) = &request.device {
            session.device = Some(device.clone());
        }

        self.storage.save(Entity::Session(session.clone())).await?;

        tracing::debug!(
            session_id = %session.id,
            account_id = %account.id,
            "request authenticated"
        );

        ctx.session = Some(session);
        ctx.account = Some(account);
        ctx.auth = Some(auth);
        Ok(ctx)
    }

    /// Make the session-info refresh on the auth record durable. Called
    /// after the write locks are taken so the read-modify-write cannot
    /// interleave with another handler; also leaves a lock-fresh auth copy
    /// in the context.
    pub(crate) async fn persist_session_info(&self, ctx: &mut Context) -> Result<(), ServerError> {
        let (Some(session), Some(account)) = (&ctx.session, &ctx.account) else {
            return Ok(());
        };
        let mut auth = self.fetch_auth(&account.email).await?;
        auth.upsert_session_info(session.info());
        auth.updated_at = Utc::now();
        self.storage.save(Entity::Auth(auth.clone())).await?;
        ctx.auth = Some(auth);
        Ok(())
    }
}

/// The anti-replay window is symmetric and inclusive at the bound in both
/// directions.
pub(crate) fn within_request_age(now_ms: i64, time_ms: i64, max_age_ms: i64) -> bool {
    (now_ms - time_ms).abs() <= max_age_ms
}

#[cfg(test)]
mod tests {
    use super::within_request_age;

    #[test]
    fn replay_window_bound_is_inclusive() {
        let now = 1_700_000_000_000;
        let max = 3_600_000;
        assert!(within_request_age(now, now - max, max));
        assert!(within_request_age(now, now + max, max));
        assert!(!within_request_age(now, now - max - 1, max));
        assert!(!within_request_age(now, now + max + 1, max));
    }
}
