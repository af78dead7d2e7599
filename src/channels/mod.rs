//! Mailbox access: the `MailboxClient` seam and its IMAP/SMTP implementation.

pub mod email;
pub mod email_types;
pub mod mailbox;

pub use email::{EmailConfig, ImapSmtpMailbox};
pub use mailbox::{MailboxClient, Message, Tag};
