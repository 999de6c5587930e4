//! Per-link circuit breaker
//!
//! Failed fetch attempts are counted per link. At the configured limit the
//! link breaks and is not retried until reset. The primary persists every
//! change and broadcasts the whole book so every shard agrees.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{AlertDispatcher, SyncContext};
use crate::db::schemas::FailedLinkDoc;
use crate::fabric::{Command, Event};
use crate::store::WriteMode;
use crate::types::{FailureBook, FailureState, Outcome, Result, Transition};

pub struct FailureTracker {
    ctx: Arc<SyncContext>,
    alerts: Arc<AlertDispatcher>,
}

impl FailureTracker {
    pub fn new(ctx: Arc<SyncContext>, alerts: Arc<AlertDispatcher>) -> Self {
        Self { ctx, alerts }
    }

    /// Load every failure record from the store
    pub async fn initialize(&self) -> Result<()> {
        let docs = self.ctx.stores.failures.find_all().await?;
        let book = FailureBook::from_docs(&docs);
        info!("Loaded {} failure record(s)", book.len());
        self.ctx.cache.replace_failures(book).await;
        if self.ctx.identity.is_authoritative() {
            self.uniformize().await;
        }
        Ok(())
    }

    /// Record one failed attempt
    pub async fn increment(&self, link: &str) -> Result<Outcome<Transition>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::FailureIncrement {
                    link: link.to_string(),
                })
                .await);
        }
        self.apply_increment(link).await.map(Outcome::Applied)
    }

    pub async fn apply_increment(&self, link: &str) -> Result<Transition> {
        let limit = self.ctx.settings.fail_limit;
        let (previous, transition) = self
            .ctx
            .cache
            .with_failures(|book| {
                let previous = book.get(link);
                (previous, book.increment(link, limit, Utc::now()))
            })
            .await;

        match transition {
            Transition::Disabled => return Ok(transition),
            Transition::AlreadyBroken { .. } => {
                warn!("Cannot increment failed link {} since it has already failed", link);
                return Ok(transition);
            }
            Transition::Counted { count } => {
                let doc = FailedLinkDoc::counting(link, count);
                if let Err(e) = self.ctx.stores.failures.upsert(&doc, WriteMode::Replace).await {
                    error!("Unable to increment failure record for {}: {}", link, e);
                }
            }
            Transition::Broke { since } => {
                let doc = FailureState::Broken { since }.to_doc(link);
                if let Err(e) = self.ctx.stores.failures.upsert(&doc, WriteMode::Replace).await {
                    self.ctx
                        .cache
                        .with_failures(|book| book.restore(link, previous))
                        .await;
                    warn!("Unable to mark failed link {}: {}", link, e);
                    return Err(e);
                }
                error!("{} has passed the fail limit ({}). Will no longer retrieve.", link, limit);
                if self.ctx.settings.notify_fail {
                    let message = self.alerts.limit_message(link);
                    self.alerts.alert_fleet(link, message).await;
                }
            }
        }

        self.uniformize().await;
        Ok(transition)
    }

    /// Break a link immediately, bypassing the counter
    pub async fn fail(&self, link: &str) -> Result<Outcome<()>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::FailureFail {
                    link: link.to_string(),
                })
                .await);
        }
        self.apply_fail(link).await.map(Outcome::Applied)
    }

    pub async fn apply_fail(&self, link: &str) -> Result<()> {
        let since = Utc::now();
        let doc = FailureState::Broken { since }.to_doc(link);
        self.ctx.stores.failures.upsert(&doc, WriteMode::Replace).await?;
        self.ctx.cache.with_failures(|book| book.fail(link, since)).await;
        self.uniformize().await;
        Ok(())
    }

    /// Return a link to absent. Returns whether it was tracked.
    pub async fn reset(&self, link: &str) -> Result<Outcome<bool>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::FailureReset {
                    link: link.to_string(),
                })
                .await);
        }
        self.apply_reset(link).await.map(Outcome::Applied)
    }

    pub async fn apply_reset(&self, link: &str) -> Result<bool> {
        if self.ctx.cache.failure(link).await.is_none() {
            return Ok(false);
        }
        self.ctx.stores.failures.remove(link).await?;
        self.ctx.cache.with_failures(|book| book.reset(link)).await;
        info!("Reset failure status for {}", link);
        self.uniformize().await;
        Ok(true)
    }

    /// A fetch succeeded. Clears a running count; a broken link stays broken
    /// until reset explicitly.
    pub async fn record_success(&self, link: &str) -> Result<()> {
        match self.ctx.cache.failure(link).await {
            Some(FailureState::Counting { .. }) => self.reset(link).await.map(|_| ()),
            _ => Ok(()),
        }
    }

    /// A fetch failed
    pub async fn record_failure(&self, link: &str) -> Result<Outcome<Transition>> {
        self.increment(link).await
    }

    pub async fn is_circuit_broken(&self, link: &str) -> bool {
        self.ctx.cache.is_broken(link).await
    }

    /// One-line status for display next to a feed
    pub async fn status_line(&self, link: &str) -> String {
        let limit = self.ctx.settings.fail_limit;
        match self.ctx.cache.failure(link).await {
            Some(FailureState::Broken { .. }) => "Status: FAILED".to_string(),
            Some(FailureState::Counting { count }) if count > limit.div_ceil(10) => {
                format!("Status: OK ({}/{})", count, limit)
            }
            _ => "Status: OK".to_string(),
        }
    }

    /// Replace the local book with one broadcast by the primary
    pub async fn apply_uniformized(&self, book: FailureBook) {
        self.ctx.cache.replace_failures(book).await;
    }

    async fn uniformize(&self) {
        let book = self.ctx.cache.failures().await;
        self.ctx.broadcast(Event::FailuresUniformized { book }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{FeedSource, GuildConfig};
    use crate::store::RecordStore;
    use crate::sync::testing::{breaker, Harness};

    const LINK: &str = "https://example.com/feed";

    fn tracker(harness: &Harness) -> FailureTracker {
        let alerts = Arc::new(AlertDispatcher::new(harness.ctx.clone()));
        FailureTracker::new(harness.ctx.clone(), alerts)
    }

    #[tokio::test]
    async fn test_breaks_at_limit_and_stays_broken() {
        let harness = Harness::unsharded(breaker(5));
        let tracker = tracker(&harness);

        for expected in 1..5 {
            let transition = tracker.increment(LINK).await.unwrap().applied().unwrap();
            assert_eq!(transition, Transition::Counted { count: expected });
        }
        let since = match tracker.increment(LINK).await.unwrap().applied().unwrap() {
            Transition::Broke { since } => since,
            other => panic!("expected a break, got {:?}", other),
        };
        assert!(tracker.is_circuit_broken(LINK).await);

        let stored = harness.stores.failures.get(LINK).await.unwrap();
        assert_eq!(stored.failed, Some(since.to_rfc3339()));

        let sixth = tracker.increment(LINK).await.unwrap().applied().unwrap();
        assert_eq!(sixth, Transition::AlreadyBroken { since });
        assert_eq!(harness.stores.failures.get(LINK).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_zero_limit_disables_breaker() {
        let harness = Harness::unsharded(breaker(0));
        let tracker = tracker(&harness);

        let transition = tracker.increment(LINK).await.unwrap().applied().unwrap();
        assert_eq!(transition, Transition::Disabled);
        assert!(harness.ctx.cache.failure(LINK).await.is_none());
        assert!(harness.stores.failures.is_empty().await);
    }

    #[tokio::test]
    async fn test_reset_from_counting_and_broken() {
        let harness = Harness::unsharded(breaker(3));
        let tracker = tracker(&harness);

        tracker.increment(LINK).await.unwrap();
        assert_eq!(tracker.reset(LINK).await.unwrap(), Outcome::Applied(true));
        assert!(harness.ctx.cache.failure(LINK).await.is_none());
        assert!(harness.stores.failures.is_empty().await);

        tracker.fail(LINK).await.unwrap();
        assert!(tracker.is_circuit_broken(LINK).await);
        assert_eq!(tracker.reset(LINK).await.unwrap(), Outcome::Applied(true));
        assert!(!tracker.is_circuit_broken(LINK).await);

        assert_eq!(tracker.reset(LINK).await.unwrap(), Outcome::Applied(false));
    }

    #[tokio::test]
    async fn test_break_alerts_subscribed_guilds() {
        let harness = Harness::unsharded(breaker(1));
        harness.directory.add_channel("c1", false);
        harness
            .ctx
            .cache
            .insert_guild(GuildConfig::new("42").with_source("a", FeedSource::new(LINK, "c1", "A")));
        let tracker = tracker(&harness);

        tracker.increment(LINK).await.unwrap();

        let alerts = harness.notifier.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("has reached the connection failure limit"));
    }

    #[tokio::test]
    async fn test_rejected_break_rolls_back() {
        let harness = Harness::unsharded(breaker(2));
        let tracker = tracker(&harness);
        tracker.increment(LINK).await.unwrap();
        harness.stores.failures.fail_writes_for(LINK).await;

        assert!(tracker.increment(LINK).await.is_err());
        assert_eq!(
            harness.ctx.cache.failure(LINK).await,
            Some(FailureState::Counting { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_record_success_clears_only_counting() {
        let harness = Harness::unsharded(breaker(5));
        let tracker = tracker(&harness);

        tracker.record_failure(LINK).await.unwrap();
        tracker.record_success(LINK).await.unwrap();
        assert!(harness.ctx.cache.failure(LINK).await.is_none());

        tracker.fail(LINK).await.unwrap();
        tracker.record_success(LINK).await.unwrap();
        assert!(tracker.is_circuit_broken(LINK).await);
    }

    #[tokio::test]
    async fn test_status_line() {
        let harness = Harness::unsharded(breaker(20));
        let tracker = tracker(&harness);

        assert_eq!(tracker.status_line(LINK).await, "Status: OK");
        tracker.increment(LINK).await.unwrap();
        tracker.increment(LINK).await.unwrap();
        assert_eq!(tracker.status_line(LINK).await, "Status: OK");
        tracker.increment(LINK).await.unwrap();
        assert_eq!(tracker.status_line(LINK).await, "Status: OK (3/20)");
        tracker.fail(LINK).await.unwrap();
        assert_eq!(tracker.status_line(LINK).await, "Status: FAILED");
    }

    #[tokio::test]
    async fn test_replica_forwards_and_primary_uniformizes() {
        let replica = Harness::replica(breaker(5));
        let outcome = tracker(&replica).increment(LINK).await.unwrap();
        assert!(outcome.is_forwarded());
        assert!(replica.ctx.cache.failure(LINK).await.is_none());
        let commands = replica.transport.take_commands().await;
        assert_eq!(commands[0].body, Command::FailureIncrement { link: LINK.into() });

        let primary = Harness::primary(breaker(5));
        tracker(&primary).apply_increment(LINK).await.unwrap();
        let events = primary.transport.take_events().await;
        let Event::FailuresUniformized { book } = &events[0].body else {
            panic!("expected a uniformize event");
        };
        assert_eq!(book.get(LINK), Some(FailureState::Counting { count: 1 }));

        tracker(&replica).apply_uniformized(book.clone()).await;
        assert_eq!(
            replica.ctx.cache.failure(LINK).await,
            Some(FailureState::Counting { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_initialize_loads_store() {
        let harness = Harness::unsharded(breaker(5));
        harness
            .stores
            .failures
            .upsert(&FailedLinkDoc::counting(LINK, 2), WriteMode::Replace)
            .await
            .unwrap();

        tracker(&harness).initialize().await.unwrap();
        assert_eq!(
            harness.ctx.cache.failure(LINK).await,
            Some(FailureState::Counting { count: 2 })
        );
    }
}
