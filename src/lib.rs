pub mod campaign;
pub mod certificate_index;
pub mod config;
pub mod delivery;
pub mod input;
pub mod ledger;
pub mod mailer;
pub mod normalization;
pub mod pacing;
pub mod template;

pub use campaign::CampaignKey;
pub use certificate_index::{CertificateIndex, Lookup};
pub use config::Config;
pub use delivery::{DeliveryError, DeliveryOrchestrator, RunSummary, StopReason};
pub use ledger::SentLedger;
pub use mailer::{Mailer, SmtpMailer, TransportError};
pub use normalization::NameNormalizer;
