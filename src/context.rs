//! Explicit collaborator bundle passed into the poller.
//!
//! Created once at process start and dropped at shutdown. Nothing in the
//! crate reaches for a mailbox, generator or ledger any other way.

use std::sync::Arc;

use crate::channels::MailboxClient;
use crate::llm::TextGenerator;
use crate::store::ProcessingLedger;

#[derive(Clone)]
pub struct AppContext {
    pub mailbox: Arc<dyn MailboxClient>,
    pub generator: Arc<dyn TextGenerator>,
    pub ledger: Arc<dyn ProcessingLedger>,
}

impl AppContext {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        generator: Arc<dyn TextGenerator>,
        ledger: Arc<dyn ProcessingLedger>,
    ) -> Self {
        Self {
            mailbox,
            generator,
            ledger,
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("mailbox", &self.mailbox.name())
            .field("generator", &self.generator.model_name())
            .finish_non_exhaustive()
    }
}
