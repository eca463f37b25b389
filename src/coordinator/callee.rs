use super::state::CallState;
use super::{Action, Coordinator};
use crate::error::{Result, SignalingError};
use crate::mailbox::{MailboxStore, SubscriptionTarget};
use crate::peer::engine::{EngineFactory, NegotiationEngine};
use crate::session::{Role, SdpType, SessionId, SessionPaths, SessionRecord, ANSWER_FIELD};
use tracing::{info, warn};

impl<M: MailboxStore, F: EngineFactory> Coordinator<M, F> {
    pub(super) async fn join(&mut self, id: SessionId) -> Result<()> {
        self.machine.begin(Role::Callee, "join a call")?;
        let cancel = self.cancel.clone();
        let result = Self::unless_cancelled(&cancel, self.answer_call(id)).await;
        if let Err(e) = &result {
            warn!("Joining call failed: {}", e);
            self.abandon().await;
        }
        result
    }

    async fn answer_call(&mut self, id: SessionId) -> Result<()> {
        let paths = SessionPaths::new(&self.calls, id);
        let data = self
            .mailbox
            .get_record(&paths.record)
            .await?
            .ok_or_else(|| SignalingError::SessionNotFound(paths.id.clone()))?;
        let record = SessionRecord::from_value(&paths.record, &data)?;

        // Read-then-write only; two callees racing on one session can still both answer.
        if record.answer.is_some() {
            return Err(SignalingError::AnswerAlreadyWritten(paths.id));
        }
        let offer = match record.offer {
            Some(offer) if offer.kind == SdpType::Offer => offer,
            Some(_) => {
                return Err(SignalingError::malformed(
                    &paths.record,
                    "offer field holds an answer",
                ))
            }
            None => return Err(SignalingError::malformed(&paths.record, "session has no offer")),
        };
        self.advance(CallState::JoinRequested, "join a call")?;
        info!("Joining session {}", paths.id);

        self.start_call(paths.clone(), Role::Callee).await?;
        self.remote_applied = true;
        self.engine()?.set_remote_description(offer).await?;

        let answer = self.engine()?.create_answer().await?;
        self.engine()?.set_local_description(answer.clone()).await?;
        self.mailbox
            .set_field(&paths.record, ANSWER_FIELD, serde_json::to_value(&answer)?)
            .await?;
        self.advance(CallState::Answered, "publish the answer")?;

        let candidates = self
            .mailbox
            .subscribe(SubscriptionTarget::Collection(
                paths.remote_candidates(Role::Callee).clone(),
            ))
            .await?;
        self.watch(candidates, Action::RemoteCandidate);
        Ok(())
    }
}
