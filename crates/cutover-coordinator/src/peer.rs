//! Peer control-plane calls with bounded retries.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use cutover_control::{ClientError, ControlClient, MigrateReply, PeerInfo};
use cutover_core::PeerCallConfig;

use crate::outcome::PeerMigrationOutcome;

/// The two control-plane calls the coordinator makes.
pub trait PeerClient: Send + Sync {
    fn info(&self, peer: &str) -> impl Future<Output = Result<PeerInfo, ClientError>> + Send;

    fn migrate(&self, peer: &str)
    -> impl Future<Output = Result<MigrateReply, ClientError>> + Send;
}

impl PeerClient for ControlClient {
    async fn info(&self, peer: &str) -> Result<PeerInfo, ClientError> {
        ControlClient::info(self, peer).await
    }

    async fn migrate(&self, peer: &str) -> Result<MigrateReply, ClientError> {
        ControlClient::migrate(self, peer).await
    }
}

/// Fixed-count, fixed-delay retry policy for peer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&PeerCallConfig> for RetryPolicy {
    fn from(config: &PeerCallConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: config.delay(),
        }
    }
}

/// Transport failures and `5xx` answers may succeed on a later attempt.
fn retryable(err: &ClientError) -> bool {
    match err {
        ClientError::UnexpectedStatus(status) => status.is_server_error(),
        other => other.is_transport(),
    }
}

/// Failures that may have happened after the peer's handler already took
/// the migration gate.
fn may_have_reached_handler(err: &ClientError) -> bool {
    matches!(err, ClientError::Timeout { .. } | ClientError::Http(_))
}

/// Result of `/info` discovery against one peer.
#[derive(Debug)]
pub(crate) enum Discovery {
    Answered(PeerInfo),
    /// Never answered within the retry budget.
    Unreachable(ClientError),
    /// Answered with something that is not a valid `/info` response.
    Invalid(ClientError),
}

pub(crate) async fn discover<C: PeerClient>(
    client: &C,
    peer: &str,
    policy: RetryPolicy,
) -> Discovery {
    let mut attempt = 1;
    loop {
        match client.info(peer).await {
            Ok(info) => return Discovery::Answered(info),
            Err(e) if !retryable(&e) => return Discovery::Invalid(e),
            Err(e) if attempt >= policy.attempts => return Discovery::Unreachable(e),
            Err(e) => {
                debug!(%peer, attempt, error = %e, "/info failed, retrying");
            }
        }
        attempt += 1;
        tokio::time::sleep(policy.delay).await;
    }
}

/// Drive `/migrate` on one peer until it answers definitively or the
/// attempts run out.
///
/// A `409` normally means another actor already triggered the peer. After
/// a `500`, a timeout or a broken response in the same sequence, though,
/// the `409` may only reflect our own earlier attempt and is reported as a
/// failure. Connect and TLS errors never reach the handler.
pub(crate) async fn migrate_peer<C: PeerClient>(
    client: &C,
    peer: &str,
    policy: RetryPolicy,
) -> PeerMigrationOutcome {
    let mut attempt = 1;
    let mut ambiguous: Option<String> = None;
    loop {
        let last_error = match client.migrate(peer).await {
            Ok(MigrateReply::Migrated) => return PeerMigrationOutcome::migrated(peer),
            Ok(MigrateReply::Conflict) => {
                return match ambiguous {
                    Some(reason) => PeerMigrationOutcome::failed(
                        peer,
                        format!("{reason}, then conflict on retry"),
                    ),
                    None => PeerMigrationOutcome::already_migrated(peer),
                };
            }
            Ok(MigrateReply::Rejected(status)) if status.is_server_error() => {
                let reason = format!("peer answered {status}");
                ambiguous = Some(reason.clone());
                reason
            }
            Ok(MigrateReply::Rejected(status)) => {
                return PeerMigrationOutcome::failed(peer, format!("peer answered {status}"));
            }
            Err(e) if retryable(&e) => {
                let reason = e.to_string();
                if may_have_reached_handler(&e) {
                    ambiguous = Some(reason.clone());
                }
                reason
            }
            Err(e) => return PeerMigrationOutcome::failed(peer, e.to_string()),
        };

        if attempt >= policy.attempts {
            warn!(%peer, attempts = attempt, error = %last_error, "/migrate retries exhausted");
            return PeerMigrationOutcome::failed(peer, last_error);
        }
        debug!(%peer, attempt, error = %last_error, "/migrate failed, retrying");
        attempt += 1;
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use http::StatusCode;

    use crate::outcome::PeerStatus;

    /// Replays a scripted sequence of `/migrate` answers.
    struct Scripted {
        replies: Mutex<VecDeque<Result<MigrateReply, ClientError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<MigrateReply, ClientError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl PeerClient for Scripted {
        async fn info(&self, _peer: &str) -> Result<PeerInfo, ClientError> {
            *self.calls.lock().unwrap() += 1;
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(_)) => Ok(PeerInfo { bootstrap: true }),
                Some(Err(e)) => Err(e),
                None => Err(refused()),
            }
        }

        async fn migrate(&self, _peer: &str) -> Result<MigrateReply, ClientError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(refused()))
        }
    }

    fn refused() -> ClientError {
        ClientError::Connect {
            peer: "p:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let client = Scripted::new(vec![Err(refused()), Ok(MigrateReply::Migrated)]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert_eq!(outcome.status, PeerStatus::Migrated);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn retries_are_capped() {
        let client = Scripted::new(vec![]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert!(outcome.is_failure());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn conflict_is_already_migrated() {
        let client = Scripted::new(vec![Ok(MigrateReply::Conflict)]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert_eq!(outcome.status, PeerStatus::AlreadyMigrated);
    }

    #[tokio::test]
    async fn conflict_after_server_error_is_failure() {
        let client = Scripted::new(vec![
            Ok(MigrateReply::Rejected(StatusCode::INTERNAL_SERVER_ERROR)),
            Ok(MigrateReply::Conflict),
        ]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert!(outcome.is_failure());
        assert!(outcome.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn conflict_after_timeout_is_failure() {
        let client = Scripted::new(vec![
            Err(ClientError::Timeout {
                peer: "p:1".into(),
                timeout: Duration::from_secs(10),
            }),
            Ok(MigrateReply::Conflict),
        ]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert!(outcome.is_failure());
        assert!(outcome.error.unwrap().contains("conflict on retry"));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn conflict_after_refused_connection_is_already_migrated() {
        let client = Scripted::new(vec![Err(refused()), Ok(MigrateReply::Conflict)]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert_eq!(outcome.status, PeerStatus::AlreadyMigrated);
    }

    #[tokio::test]
    async fn client_error_status_is_final() {
        let client = Scripted::new(vec![
            Ok(MigrateReply::Rejected(StatusCode::NOT_FOUND)),
            Ok(MigrateReply::Migrated),
        ]);
        let outcome = migrate_peer(&client, "p:1", fast(3)).await;
        assert!(outcome.is_failure());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn discovery_gives_up_softly() {
        let client = Scripted::new(vec![]);
        assert!(matches!(
            discover(&client, "p:1", fast(2)).await,
            Discovery::Unreachable(_)
        ));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn discovery_rejects_bad_status() {
        let client = Scripted::new(vec![Err(ClientError::UnexpectedStatus(StatusCode::NOT_FOUND))]);
        assert!(matches!(
            discover(&client, "p:1", fast(3)).await,
            Discovery::Invalid(_)
        ));
        assert_eq!(client.calls(), 1);
    }
}
