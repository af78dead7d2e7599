//! Inbound message processing pipeline.
//!
//! Every fetched message flows through:
//! 1. `ProcessingLedger::has_entry()`: already handled messages are skipped
//! 2. `RulesEngine::evaluate()`: fast pattern matching (no generator call)
//! 3. `MessageClassifier::classify()`: personal / automated / unknown
//! 4. `ResponseComposer::compose()` + `MailboxClient::send()` for personal mail
//! 5. Ledger write, then mailbox tag
//!
//! `InboxPoller` drives the cycle on a timer.

pub mod classifier;
pub mod composer;
pub mod poller;
pub mod retry;
pub mod rules;
pub mod types;

pub use classifier::MessageClassifier;
pub use composer::{ComposedReply, ReplyStyle, ResponseComposer};
pub use poller::{InboxPoller, PollerConfig, ShutdownHandle, spawn_inbox_poller};
pub use retry::RetryPolicy;
pub use rules::RulesEngine;
pub use types::{BatchReport, Category, MessageOutcome};
