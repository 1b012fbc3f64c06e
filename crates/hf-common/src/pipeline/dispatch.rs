//! Candidate notifications after a transition has been committed.
//!
//! Nothing here fails the caller: delivery problems are logged and reported
//! through `email_status`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::model::{EmailStatus, EventDraft, NewInvitation, RecordContext, Stage};
use crate::notify::{EmailMessage, MailError, Mailer, templates};
use crate::store::PipelineStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub invitation_id: Option<i64>,
    pub email_status: EmailStatus,
}

pub struct Dispatcher {
    store: Arc<dyn PipelineStore>,
    mailer: Arc<dyn Mailer>,
    invitation_ttl: chrono::Duration,
    app_base_url: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        mailer: Arc<dyn Mailer>,
        invitation_ttl: chrono::Duration,
        app_base_url: String,
    ) -> Self {
        Self {
            store,
            mailer,
            invitation_ttl,
            app_base_url,
        }
    }

    /// The candidate reached `stage`. AI stages get a scheduled event and a
    /// single-use invitation link; manual stages get a plain notice.
    #[instrument(skip(self, ctx, stage), fields(record_id = ctx.record.id, stage = %stage.name))]
    pub async fn stage_reached(&self, ctx: &RecordContext, stage: &Stage) -> DispatchReport {
        if !stage.is_ai_automated {
            let status = match &ctx.candidate_email {
                Some(to) => {
                    self.deliver(templates::stage_update(
                        to,
                        &ctx.candidate_name,
                        &ctx.job_title,
                        &stage.name,
                    ))
                    .await
                }
                None => EmailStatus::Skipped,
            };
            return DispatchReport {
                invitation_id: None,
                email_status: status,
            };
        }

        let invitation = match self.mint(ctx.record.id, stage.id).await {
            Ok(invitation) => invitation,
            Err(err) => {
                warn!(error = %err, "failed to mint interview invitation");
                return DispatchReport {
                    invitation_id: None,
                    email_status: EmailStatus::Failed,
                };
            }
        };

        let status = match &ctx.candidate_email {
            Some(to) => {
                let link = templates::interview_link(&self.app_base_url, &invitation.token);
                self.deliver(templates::invitation(
                    to,
                    &ctx.candidate_name,
                    &ctx.job_title,
                    &stage.name,
                    &link,
                    invitation.expires_at,
                ))
                .await
            }
            None => EmailStatus::Skipped,
        };

        if let Err(err) = self.store.set_email_status(invitation.id, status).await {
            warn!(error = %err, invitation_id = invitation.id, "failed to record email status");
        }
        info!(invitation_id = invitation.id, email_status = status.as_str(), "invitation issued");

        DispatchReport {
            invitation_id: Some(invitation.id),
            email_status: status,
        }
    }

    /// Final hired or rejected notice.
    pub async fn decision(&self, ctx: &RecordContext, hired: bool) -> DispatchReport {
        let status = match &ctx.candidate_email {
            Some(to) if hired => {
                self.deliver(templates::hired(to, &ctx.candidate_name, &ctx.job_title))
                    .await
            }
            Some(to) => {
                self.deliver(templates::rejected(to, &ctx.candidate_name, &ctx.job_title))
                    .await
            }
            None => EmailStatus::Skipped,
        };
        DispatchReport {
            invitation_id: None,
            email_status: status,
        }
    }

    async fn mint(
        &self,
        record_id: i64,
        stage_id: i64,
    ) -> Result<crate::model::Invitation, crate::store::StoreError> {
        let event = self
            .store
            .upsert_event(&EventDraft::scheduled(record_id, stage_id))
            .await?;
        let invitation = NewInvitation::mint(event.id, self.invitation_ttl, Utc::now());
        self.store.create_invitation(&invitation).await
    }

    async fn deliver(&self, message: EmailMessage) -> EmailStatus {
        match self.mailer.send(&message).await {
            Ok(()) => {
                metrics::counter!("hf_emails_total", "result" => "sent").increment(1);
                EmailStatus::Sent
            }
            Err(MailError::Disabled | MailError::NoRecipient) => {
                metrics::counter!("hf_emails_total", "result" => "skipped").increment(1);
                EmailStatus::Skipped
            }
            Err(err) => {
                metrics::counter!("hf_emails_total", "result" => "failed").increment(1);
                warn!(error = %err, subject = %message.subject, "email delivery failed");
                EmailStatus::Failed
            }
        }
    }
}
