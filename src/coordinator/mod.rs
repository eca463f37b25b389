//! Signaling coordinator
//!
//! One coordinator task runs per call. It owns the negotiation engine and a
//! [`Machine`], and consumes a single action queue fed by:
//!
//! - the user-facing [`CallHandle`](crate::signaling::CallHandle)
//! - a loop forwarding changes of the session record
//! - a loop forwarding changes of the peer's candidate collection
//! - a loop forwarding engine events (local candidates, tracks, state)
//!
//! The loops are independent and unordered relative to each other. Every
//! action is checked against the current state before it touches the
//! engine, so redelivered answers and late events after hang-up are inert.

mod callee;
mod caller;
pub mod state;
pub mod translator;

use crate::error::{Result, SignalingError};
use crate::mailbox::{ChangeEvent, CollectionPath, MailboxStore, Subscription};
use crate::peer::engine::{EngineFactory, NegotiationEngine};
use crate::peer::types::{CandidateDelivery, EngineEvent, PeerState, RemoteTrack};
use crate::session::{Role, SessionId, SessionPaths};
use state::{CallState, Machine};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, WeakSender};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use translator::candidate_from_change;

/// What observers of a call are told
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged(CallState),
    SessionCreated(SessionId),
    LocalCandidateSent,
    RemoteCandidateApplied,
    RemoteTrack(RemoteTrack),
    Connection(PeerState),
    Error(String),
    Closed,
}

pub(crate) enum Action {
    Initiate(oneshot::Sender<Result<SessionId>>),
    Join(SessionId, oneshot::Sender<Result<()>>),
    HangUp(oneshot::Sender<()>),
    State(oneshot::Sender<CallState>),
    SessionChanged(ChangeEvent),
    RemoteCandidate(ChangeEvent),
    Engine(EngineEvent),
}

/// Engine and consumer loops of the call in progress; released together
struct ActiveCall<E> {
    paths: SessionPaths,
    role: Role,
    engine: E,
    loops: Vec<JoinHandle<()>>,
}

impl<E: NegotiationEngine> ActiveCall<E> {
    async fn release(mut self) {
        for handle in self.loops.drain(..) {
            handle.abort();
        }
        if let Err(e) = self.engine.close().await {
            warn!("Failed to close engine for {}: {}", self.paths.id, e);
        }
        debug!("Released {} side of {}", self.role, self.paths.id);
    }
}

impl<E> Drop for ActiveCall<E> {
    fn drop(&mut self) {
        for handle in &self.loops {
            handle.abort();
        }
    }
}

pub(crate) struct Coordinator<M, F: EngineFactory> {
    mailbox: Arc<M>,
    factory: F,
    calls: CollectionPath,
    machine: Machine,
    call: Option<ActiveCall<F::Engine>>,
    /// Set once a remote description has been handed to the engine
    remote_applied: bool,
    actions: WeakSender<Action>,
    events: broadcast::Sender<CallEvent>,
    /// Fired by the handle on hang-up, ahead of the queued `HangUp`
    cancel: CancellationToken,
}

impl<M: MailboxStore, F: EngineFactory> Coordinator<M, F> {
    pub(crate) fn new(
        mailbox: Arc<M>,
        factory: F,
        calls: CollectionPath,
        actions: WeakSender<Action>,
        events: broadcast::Sender<CallEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mailbox,
            factory,
            calls,
            machine: Machine::default(),
            call: None,
            remote_applied: false,
            actions,
            events,
            cancel,
        }
    }

    /// Processes actions until every handle is gone, then releases the call
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Action>) {
        while let Some(action) = rx.recv().await {
            self.handle(action).await;
        }
        debug!("All call handles dropped");
        self.hang_up().await;
    }

    async fn handle(&mut self, action: Action) {
        match action {
            Action::Initiate(reply) => {
                let _ = reply.send(self.initiate().await);
            }
            Action::Join(id, reply) => {
                let _ = reply.send(self.join(id).await);
            }
            Action::HangUp(reply) => {
                self.hang_up().await;
                let _ = reply.send(());
            }
            Action::State(reply) => {
                let _ = reply.send(self.machine.state());
            }
            Action::SessionChanged(ev) => {
                if let Err(e) = self.on_session_change(ev).await {
                    self.report(e);
                }
            }
            Action::RemoteCandidate(ev) => {
                if let Err(e) = self.on_remote_candidate(ev).await {
                    self.report(e);
                }
            }
            Action::Engine(ev) => {
                if let Err(e) = self.on_engine_event(ev).await {
                    self.report(e);
                }
            }
        }
    }

    fn emit(&self, event: CallEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn report(&self, err: SignalingError) {
        warn!("{}", err);
        self.emit(CallEvent::Error(err.to_string()));
    }

    fn advance(&mut self, to: CallState, action: &'static str) -> Result<()> {
        self.machine.advance(to, action)?;
        info!("Call state -> {}", to);
        self.emit(CallEvent::StateChanged(to));
        Ok(())
    }

    fn engine(&mut self) -> Result<&mut F::Engine> {
        self.call
            .as_mut()
            .map(|call| &mut call.engine)
            .ok_or_else(|| SignalingError::EngineState("no active call".into()))
    }

    fn own_candidates(&self) -> Result<CollectionPath> {
        self.call
            .as_ref()
            .map(|call| call.paths.own_candidates(call.role).clone())
            .ok_or_else(|| SignalingError::EngineState("no active call".into()))
    }

    /// Acquires the engine for `paths` and starts forwarding its events
    async fn start_call(&mut self, paths: SessionPaths, role: Role) -> Result<()> {
        let mut engine = self.factory.create(role).await?;
        let mut loops = Vec::new();
        if let Some(events) = engine.take_events() {
            loops.push(spawn_engine_loop(events, self.actions.clone()));
        }
        self.call = Some(ActiveCall {
            paths,
            role,
            engine,
            loops,
        });
        Ok(())
    }

    /// Forwards `sub` into the action queue for as long as the call lives
    fn watch(&mut self, sub: Subscription, wrap: fn(ChangeEvent) -> Action) {
        let handle = spawn_subscription_loop(sub, self.actions.clone(), wrap);
        match self.call.as_mut() {
            Some(call) => call.loops.push(handle),
            None => handle.abort(),
        }
    }

    /// Runs a setup step unless hang-up is requested first
    async fn unless_cancelled<T>(
        cancel: &CancellationToken,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SignalingError::Cancelled),
            result = work => result,
        }
    }

    /// Undoes a failed `initiate`/`join` so the handle can try again
    async fn abandon(&mut self) {
        if let Some(call) = self.call.take() {
            call.release().await;
        }
        self.remote_applied = false;
        self.machine.reset();
        self.emit(CallEvent::StateChanged(self.machine.state()));
    }

    async fn hang_up(&mut self) {
        if let Some(call) = self.call.take() {
            info!("Hanging up {}", call.paths.id);
            call.release().await;
        }
        if self.machine.close() {
            self.emit(CallEvent::StateChanged(CallState::Closed));
            self.emit(CallEvent::Closed);
        }
    }

    async fn on_remote_candidate(&mut self, ev: ChangeEvent) -> Result<()> {
        if !self.machine.state().exchanges_candidates() {
            trace!("Dropping remote candidate event while {}", self.machine.state());
            return Ok(());
        }
        let Some(candidate) = candidate_from_change(&ev)? else {
            trace!("Ignoring {:?} on {}", ev.kind, ev.path);
            return Ok(());
        };
        // Redelivered `added` events reach the engine again; duplicates are not filtered.
        match self.engine()?.add_ice_candidate(candidate).await? {
            CandidateDelivery::Applied => self.emit(CallEvent::RemoteCandidateApplied),
            CandidateDelivery::Deferred => trace!("Remote candidate deferred"),
        }
        Ok(())
    }

    async fn on_engine_event(&mut self, ev: EngineEvent) -> Result<()> {
        if self.call.is_none() {
            trace!("Dropping engine event without a call: {:?}", ev);
            return Ok(());
        }
        match ev {
            EngineEvent::LocalCandidate(candidate) => {
                let collection = self.own_candidates()?;
                self.mailbox
                    .append(&collection, serde_json::to_value(&candidate)?)
                    .await?;
                self.emit(CallEvent::LocalCandidateSent);
            }
            EngineEvent::PendingCandidateApplied(candidate) => {
                trace!("Deferred candidate applied: {}", candidate.candidate);
                self.emit(CallEvent::RemoteCandidateApplied);
            }
            EngineEvent::PendingCandidateRejected { candidate, reason } => {
                return Err(SignalingError::CandidateRejected {
                    candidate: candidate.candidate,
                    reason,
                });
            }
            EngineEvent::GatheringComplete => {
                debug!("Local candidate gathering complete");
            }
            EngineEvent::RemoteTrack(track) => {
                self.emit(CallEvent::RemoteTrack(track));
            }
            EngineEvent::ConnectionState(state) => {
                self.emit(CallEvent::Connection(state));
                if state == PeerState::Connected
                    && self.machine.state() == CallState::Answered
                {
                    self.advance(CallState::Connected, "connect")?;
                }
            }
        }
        Ok(())
    }
}

fn spawn_subscription_loop(
    mut sub: Subscription,
    actions: WeakSender<Action>,
    wrap: fn(ChangeEvent) -> Action,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = sub.next().await {
            let Some(tx) = actions.upgrade() else { break };
            if tx.send(wrap(ev)).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_engine_loop(
    mut events: UnboundedReceiver<EngineEvent>,
    actions: WeakSender<Action>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            let Some(tx) = actions.upgrade() else { break };
            if tx.send(Action::Engine(ev)).await.is_err() {
                break;
            }
        }
    })
}
