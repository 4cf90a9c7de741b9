//! posse - Publish on your Own Site, Syndicate Elsewhere
//!
//! This library holds the pieces shared by the posse tools: feed items and
//! the syndication ledger, candidate selection, the remote duplicate check,
//! attachment staging and the network publishers. Each binary wires them
//! into a one-shot run through [`runner::Syndicator`].

pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod logging;
pub mod platforms;
pub mod remote;
pub mod runner;
pub mod selector;
pub mod stager;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{PosseError, Result};
pub use ledger::{Ledger, LedgerEntry, RunTimestamp};
pub use runner::{RunReport, StatusLine, Syndicator};
pub use types::{Feed, FeedAttachment, FeedItem};
