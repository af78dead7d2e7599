//! Inbox poller: the fetch → classify → act → record cycle.
//!
//! Per message, in this order:
//! 1. `has_entry` guard (the ledger wins over mailbox state)
//! 2. classify
//! 3. act: compose + send for `Personal`, nothing for the rest
//! 4. `record` the ledger entry
//! 5. apply the mailbox tag (best effort)
//!
//! A ledger entry is only written after a successful send, and a tag is only
//! written after the ledger entry. Compose failures and exhausted transient
//! send failures leave the message untouched for the next cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::channels::{Message, Tag};
use crate::context::AppContext;
use crate::error::PipelineError;
use crate::pipeline::classifier::MessageClassifier;
use crate::pipeline::composer::{ReplyStyle, ResponseComposer};
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{BatchReport, Category, MessageOutcome};

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Period between batches.
    pub interval: Duration,
    /// Messages processed at once within a batch. 1 = sequential.
    pub max_concurrent: usize,
    /// Backoff for mailbox, generator and ledger calls.
    pub retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_concurrent: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative stop signal for `run_forever`.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Ask the loop to stop after the in-flight batch.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InboxPoller {
    ctx: AppContext,
    classifier: MessageClassifier,
    composer: ResponseComposer,
    config: PollerConfig,
}

impl InboxPoller {
    pub fn new(ctx: AppContext, rules: RulesEngine, style: ReplyStyle, config: PollerConfig) -> Self {
        let classifier = MessageClassifier::new(Arc::clone(&ctx.generator), rules, config.retry);
        let composer = ResponseComposer::new(Arc::clone(&ctx.generator), style, config.retry);
        Self {
            ctx,
            classifier,
            composer,
            config,
        }
    }

    /// Run one fetch–classify–act cycle.
    ///
    /// Only a failed fetch fails the batch. Per-message problems become
    /// `MessageOutcome`s and are counted in the report.
    pub async fn process_batch(&self) -> Result<BatchReport, PipelineError> {
        let mailbox = &self.ctx.mailbox;
        let fetched = with_retry(&self.config.retry, "fetch_new", || mailbox.fetch_new())
            .await
            .map_err(|e| {
                error!(mailbox = mailbox.name(), kind = e.kind(), error = %e, "Fetch failed, skipping cycle");
                PipelineError::Fetch(e)
            })?;

        let mut report = BatchReport {
            fetched: fetched.len(),
            ..Default::default()
        };
        let messages = prepare_batch(fetched);
        if messages.is_empty() {
            debug!("No new messages");
            return Ok(report);
        }

        let concurrency = self.config.max_concurrent.max(1);
        let outcomes: Vec<MessageOutcome> = futures::stream::iter(messages)
            .map(|message| async move {
                let outcome = self.process_message(&message).await;
                debug!(id = %message.id, outcome = outcome.label(), "Message done");
                outcome
            })
            .buffered(concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            report.tally(outcome);
        }

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            replied = report.replied,
            automated = report.automated,
            needs_review = report.needs_review,
            send_failed = report.send_failed,
            deferred = report.deferred,
            "Batch complete"
        );
        Ok(report)
    }

    /// Take one message through a full processing pass.
    pub async fn process_message(&self, message: &Message) -> MessageOutcome {
        let ledger = &self.ctx.ledger;
        let retry = &self.config.retry;

        match with_retry(retry, "has_entry", || ledger.has_entry(&message.id)).await {
            Ok(true) => {
                debug!(id = %message.id, "Already processed, skipping");
                return MessageOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(id = %message.id, error = %e, "Ledger lookup failed, deferring");
                return MessageOutcome::Deferred {
                    reason: format!("ledger lookup: {e}"),
                };
            }
        }

        let category = match self.classifier.classify(message).await {
            Ok(category) => category,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Classifier failed, marking for review");
                Category::Unknown
            }
        };
        info!(id = %message.id, sender = %message.sender, category = %category, "Classified");

        match category {
            Category::Personal => self.reply(message).await,
            Category::Automated => {
                self.finish(message, Category::Automated, Tag::Automated, MessageOutcome::Automated)
                    .await
            }
            Category::Unknown => {
                self.finish(message, Category::Unknown, Tag::NeedsReview, MessageOutcome::NeedsReview)
                    .await
            }
        }
    }

    async fn reply(&self, message: &Message) -> MessageOutcome {
        let reply = match self.composer.compose(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Compose failed, deferring to next cycle");
                return MessageOutcome::Deferred {
                    reason: e.to_string(),
                };
            }
        };

        let mailbox = &self.ctx.mailbox;
        let sent = with_retry(&self.config.retry, "send", || {
            mailbox.send(&reply.to, &reply.subject, &reply.body)
        })
        .await;

        match sent {
            Ok(()) => {
                info!(id = %message.id, to = %reply.to, "Reply sent");
                self.finish(message, Category::Personal, Tag::AutoReplied, MessageOutcome::Replied)
                    .await
            }
            Err(e) if e.is_transient() => {
                warn!(id = %message.id, kind = e.kind(), error = %e, "Send failed, deferring to next cycle");
                MessageOutcome::Deferred {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(id = %message.id, kind = e.kind(), error = %e, "Send failed permanently");
                self.finish(message, Category::Personal, Tag::SendFailed, MessageOutcome::SendFailed)
                    .await
            }
        }
    }

    /// Write the ledger entry, then tag. A failed ledger write defers the
    /// message and skips the tag.
    async fn finish(
        &self,
        message: &Message,
        category: Category,
        tag: Tag,
        outcome: MessageOutcome,
    ) -> MessageOutcome {
        let ledger = &self.ctx.ledger;
        let retry = &self.config.retry;

        match with_retry(retry, "record", || ledger.record(&message.id, category)).await {
            Ok(true) => {}
            Ok(false) => debug!(id = %message.id, "Ledger entry already present"),
            Err(e) => {
                error!(id = %message.id, category = %category, error = %e, "Ledger write failed");
                return MessageOutcome::Deferred {
                    reason: format!("ledger write: {e}"),
                };
            }
        }

        let mailbox = &self.ctx.mailbox;
        if let Err(e) = with_retry(retry, "apply_tag", || mailbox.apply_tag(&message.id, tag)).await {
            warn!(id = %message.id, tag = %tag, kind = e.kind(), error = %e, "Tag write failed (ledger entry kept)");
        }

        outcome
    }

    /// Run `process_batch` every `interval` until `shutdown` fires.
    ///
    /// The first batch runs immediately. A shutdown during a batch lets it
    /// finish, then returns without sleeping again.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            mailbox = self.ctx.mailbox.name(),
            model = self.ctx.generator.model_name(),
            "Inbox poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let span = info_span!("batch", batch_id = %Uuid::new_v4());
            if let Err(e) = self.process_batch().instrument(span).await {
                warn!(error = %e, "Batch postponed to next cycle");
            }
        }

        info!("Inbox poller stopped");
    }
}

/// Sort by receipt time and drop repeated ids within one batch.
fn prepare_batch(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.received_at);
    let mut seen = HashSet::new();
    messages.retain(|m| {
        let fresh = seen.insert(m.id.clone());
        if !fresh {
            debug!(id = %m.id, "Duplicate id within batch dropped");
        }
        fresh
    });
    messages
}

/// Spawn the poll loop. Returns the task handle and a shutdown handle.
pub fn spawn_inbox_poller(poller: Arc<InboxPoller>) -> (JoinHandle<()>, ShutdownHandle) {
    let shutdown = ShutdownHandle::new();
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        poller.run_forever(rx).await;
    });
    (handle, shutdown)
}
