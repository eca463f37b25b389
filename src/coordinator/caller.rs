use super::state::CallState;
use super::translator::answer_from_change;
use super::{Action, CallEvent, Coordinator};
use crate::error::Result;
use crate::mailbox::{ChangeEvent, MailboxStore, SubscriptionTarget};
use crate::peer::engine::{EngineFactory, NegotiationEngine};
use crate::session::{Role, SessionId, SessionPaths, OFFER_FIELD};
use tracing::{debug, info, trace, warn};

impl<M: MailboxStore, F: EngineFactory> Coordinator<M, F> {
    pub(super) async fn initiate(&mut self) -> Result<SessionId> {
        self.machine.begin(Role::Caller, "initiate a call")?;
        let cancel = self.cancel.clone();
        let result = Self::unless_cancelled(&cancel, self.offer_call()).await;
        if let Err(e) = &result {
            warn!("Initiating call failed: {}", e);
            self.abandon().await;
        }
        result
    }

    async fn offer_call(&mut self) -> Result<SessionId> {
        let record = self.mailbox.create_record(&self.calls).await?;
        let paths = SessionPaths::from_record(record);
        info!("Created session {}", paths.id);
        self.emit(CallEvent::SessionCreated(paths.id.clone()));

        self.start_call(paths.clone(), Role::Caller).await?;
        let offer = self.engine()?.create_offer().await?;
        self.engine()?.set_local_description(offer.clone()).await?;
        self.advance(CallState::OfferCreated, "create an offer")?;

        self.mailbox
            .set_field(&paths.record, OFFER_FIELD, serde_json::to_value(&offer)?)
            .await?;
        self.advance(CallState::Offered, "publish the offer")?;

        let answers = self
            .mailbox
            .subscribe(SubscriptionTarget::Record(paths.record.clone()))
            .await?;
        self.watch(answers, Action::SessionChanged);
        self.advance(CallState::AwaitingAnswer, "wait for an answer")?;

        let candidates = self
            .mailbox
            .subscribe(SubscriptionTarget::Collection(
                paths.remote_candidates(Role::Caller).clone(),
            ))
            .await?;
        self.watch(candidates, Action::RemoteCandidate);

        Ok(paths.id)
    }

    pub(super) async fn on_session_change(&mut self, ev: ChangeEvent) -> Result<()> {
        if self.machine.role() != Some(Role::Caller) || self.call.is_none() {
            trace!("Dropping session change while {}", self.machine.state());
            return Ok(());
        }
        let Some(answer) = answer_from_change(&ev)? else {
            trace!("Session {} has no answer yet", ev.path);
            return Ok(());
        };
        if self.remote_applied {
            debug!("Answer for {} already applied, ignoring redelivery", ev.path);
            return Ok(());
        }

        // Marked before the call: a rejected answer is not attempted again.
        self.remote_applied = true;
        self.engine()?.set_remote_description(answer).await?;
        self.advance(CallState::Connected, "apply the answer")?;
        Ok(())
    }
}
