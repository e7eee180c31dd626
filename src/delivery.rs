//! The delivery loop.
//!
//! Rows are processed strictly one at a time: the ledger is checked, the
//! certificate resolved, the mail sent and the ledger rewritten before the
//! next row starts. A crash therefore loses at most the send in flight, and
//! re-running over the same input resumes where the previous run stopped.

use crate::campaign::CampaignKey;
use crate::certificate_index::{CertificateIndex, IndexError, Lookup};
use crate::config::{CampaignConfig, PacingConfig};
use crate::input::{Recipient, RowError, RowResult};
use crate::ledger::{LedgerError, SentLedger};
use crate::mailer::{Attachment, Mailer, OutgoingMessage, TransportError};
use crate::pacing::{Pacer, StopSignal};
use crate::template::EmailTemplate;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Run-fatal failures. Everything else is reported per row.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("pre-flight check failed, nothing was sent: {0}")]
    Preflight(TransportError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Terminal state of one input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Sent { certificate: PathBuf, approximate: bool },
    /// Dry run: would have been sent.
    Planned { certificate: PathBuf, approximate: bool },
    AlreadySent,
    NoEmail,
    NotFound,
    Malformed(RowError),
    Errored(String),
    /// Provider limit reached; the run stops at this row.
    RateLimited(String),
    /// Sent, but the ledger write failed; the run stops after this row.
    Unrecorded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    RateLimited(String),
    Interrupted,
    /// A delivered certificate is missing from the ledger and must be
    /// added by hand before the next run.
    Unrecorded {
        key: String,
        email: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub name: String,
    pub email: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproximateMatch {
    pub name: String,
    pub certificate: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: usize,
    pub planned: usize,
    pub skipped_already_sent: usize,
    pub skipped_no_email: usize,
    pub malformed: usize,
    pub not_found: usize,
    pub errored: usize,
    pub not_found_identities: Vec<String>,
    pub approximate_matches: Vec<ApproximateMatch>,
    pub failures: Vec<FailedDelivery>,
    pub malformed_rows: Vec<RowError>,
    /// Rows never processed because the run stopped early.
    pub remaining: usize,
    pub stop: Option<StopReason>,
    /// Ledger size at the end of the run.
    pub ledger_total: usize,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.stop.is_none()
    }

    /// The ledger no longer matches what was delivered.
    pub fn ledger_out_of_sync(&self) -> bool {
        matches!(self.stop, Some(StopReason::Unrecorded { .. }))
    }

    fn record(&mut self, row: &RowResult, outcome: &RowOutcome) {
        let (name, email) = match row {
            Ok(recipient) => (
                recipient.name.clone(),
                recipient.email.clone().unwrap_or_default(),
            ),
            Err(_) => (String::new(), String::new()),
        };

        match outcome {
            RowOutcome::Sent {
                certificate,
                approximate,
            }
            | RowOutcome::Planned {
                certificate,
                approximate,
            } => {
                if matches!(outcome, RowOutcome::Sent { .. }) {
                    self.sent += 1;
                } else {
                    self.planned += 1;
                }
                if *approximate {
                    self.approximate_matches.push(ApproximateMatch {
                        name,
                        certificate: certificate.clone(),
                    });
                }
            }
            RowOutcome::AlreadySent => self.skipped_already_sent += 1,
            RowOutcome::NoEmail => self.skipped_no_email += 1,
            RowOutcome::NotFound => {
                self.not_found += 1;
                self.not_found_identities.push(name);
            }
            RowOutcome::Malformed(error) => {
                self.malformed += 1;
                self.malformed_rows.push(error.clone());
            }
            RowOutcome::Errored(reason) => {
                self.errored += 1;
                self.failures.push(FailedDelivery {
                    name,
                    email,
                    reason: reason.clone(),
                });
            }
            RowOutcome::RateLimited(reason) => {
                self.stop = Some(StopReason::RateLimited(reason.clone()));
            }
            RowOutcome::Unrecorded(reason) => {
                // The mail left even though the ledger missed it.
                self.sent += 1;
                let key = row
                    .as_ref()
                    .map(|recipient| recipient.campaign_key().to_string())
                    .unwrap_or_default();
                self.stop = Some(StopReason::Unrecorded {
                    key,
                    email,
                    reason: reason.clone(),
                });
            }
        }
    }
}

/// Drives one campaign: pre-flight, ledger, index, then the row loop.
pub struct DeliveryOrchestrator<M, P> {
    campaign: CampaignConfig,
    pacing: PacingConfig,
    template: EmailTemplate,
    mailer: M,
    pacer: P,
    stop: StopSignal,
    dry_run: bool,
}

/// State owned by a single run.
struct RunState {
    ledger: SentLedger,
    index: CertificateIndex,
    planned: HashSet<CampaignKey>,
}

impl<M: Mailer, P: Pacer> DeliveryOrchestrator<M, P> {
    pub fn new(
        campaign: CampaignConfig,
        pacing: PacingConfig,
        template: EmailTemplate,
        mailer: M,
        pacer: P,
    ) -> Self {
        Self {
            campaign,
            pacing,
            template,
            mailer,
            pacer,
            stop: StopSignal::new(),
            dry_run: false,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Walk the rows without pre-flight, sending or ledger writes.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub async fn run(&self, rows: &[RowResult]) -> Result<RunSummary, DeliveryError> {
        if self.dry_run {
            log::info!("Dry run: no pre-flight, nothing will be sent or recorded");
        } else {
            self.mailer.verify().await.map_err(DeliveryError::Preflight)?;
        }

        // Reloaded and rebuilt on every run; never cached across runs.
        let ledger = SentLedger::load(&self.campaign.ledger_path)?;
        log::info!("Found {} previously sent certificates", ledger.len());
        if !self.dry_run {
            ledger.check_writable()?;
        }
        let index = CertificateIndex::build(&self.campaign.certificates_dir, &self.campaign.naming())?
            .with_strict_matching(self.campaign.strict_matching);

        let mut state = RunState {
            ledger,
            index,
            planned: HashSet::new(),
        };
        let mut summary = RunSummary::default();

        for (position, row) in rows.iter().enumerate() {
            if self.stop.is_requested() {
                log::warn!("Interrupted, stopping before row {}", position + 1);
                summary.stop = Some(StopReason::Interrupted);
                summary.remaining = rows.len() - position;
                break;
            }

            let outcome = self.process_row(row, &mut state).await;
            summary.record(row, &outcome);

            match outcome {
                RowOutcome::RateLimited(reason) => {
                    summary.remaining = rows.len() - position;
                    log::error!(
                        "Sending limit reached ({reason}); progress is saved, {} rows left for the next run",
                        summary.remaining
                    );
                    break;
                }
                RowOutcome::Unrecorded(_) => {
                    summary.remaining = rows.len() - position - 1;
                    break;
                }
                RowOutcome::Sent { .. } if position + 1 < rows.len() => {
                    self.pacer
                        .pause(self.pacing.delay_after(summary.sent))
                        .await;
                }
                _ => {}
            }
        }

        summary.ledger_total = state.ledger.len();
        Ok(summary)
    }

    async fn process_row(&self, row: &RowResult, state: &mut RunState) -> RowOutcome {
        let recipient = match row {
            Ok(recipient) => recipient,
            Err(e) => {
                log::warn!("Skipping malformed row: {e}");
                return RowOutcome::Malformed(e.clone());
            }
        };

        let Some(email) = recipient.email.as_deref() else {
            log::warn!("No email found for {}. Skipping.", recipient.name);
            return RowOutcome::NoEmail;
        };

        let key = recipient.campaign_key();
        if state.ledger.contains(&key) || state.planned.contains(&key) {
            log::info!("Already sent to {} ({key}). Skipping.", recipient.name);
            return RowOutcome::AlreadySent;
        }

        log::info!("Processing: {} <{email}>", recipient.name);
        let (certificate, approximate) = match state.index.find(&recipient.name) {
            Lookup::Exact(path) => (path, false),
            Lookup::Approximate(path) => {
                log::info!(
                    "Approximate certificate match for {}: {}",
                    recipient.name,
                    path.display()
                );
                (path, true)
            }
            Lookup::Ambiguous(_) | Lookup::NotFound => {
                log::warn!("Certificate not found for {}", recipient.name);
                return RowOutcome::NotFound;
            }
        };

        if self.dry_run {
            state.planned.insert(key);
            return RowOutcome::Planned {
                certificate,
                approximate,
            };
        }

        let message = match self.compose(recipient, email, &certificate) {
            Ok(message) => message,
            Err(reason) => {
                log::error!("{reason}");
                return RowOutcome::Errored(reason);
            }
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                if let Err(e) = state.ledger.append(&key) {
                    log::error!(
                        "Certificate sent to {} ({email}) but '{key}' could not be recorded: {e}",
                        recipient.name
                    );
                    return RowOutcome::Unrecorded(e.to_string());
                }
                log::info!("Certificate sent to {} ({email})", recipient.name);
                RowOutcome::Sent {
                    certificate,
                    approximate,
                }
            }
            Err(TransportError::RateLimitExceeded(reason)) => RowOutcome::RateLimited(reason),
            Err(e) => {
                log::error!("Failed to send to {} ({email}): {e}", recipient.name);
                RowOutcome::Errored(e.to_string())
            }
        }
    }

    fn compose(
        &self,
        recipient: &Recipient,
        email: &str,
        certificate: &Path,
    ) -> Result<OutgoingMessage, String> {
        let attachment = Attachment::from_path(certificate)
            .map_err(|e| format!("cannot read certificate {}: {e}", certificate.display()))?;
        let rendered = self.template.render(recipient);
        Ok(OutgoingMessage {
            to: email.to_string(),
            subject: rendered.subject,
            html_body: rendered.body,
            attachment: Some(attachment),
        })
    }
}
