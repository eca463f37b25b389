use crate::config::SignalingConfig;
use crate::coordinator::state::CallState;
use crate::coordinator::{Action, CallEvent, Coordinator};
use crate::error::{Result, SignalingError};
use crate::mailbox::{CollectionPath, MailboxStore};
use crate::media::LocalMedia;
use crate::peer::connection::WebrtcEngineFactory;
use crate::peer::engine::EngineFactory;
use crate::session::SessionId;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

const EVENT_CAPACITY: usize = 256;

/// User-facing side of one call.
///
/// Cloning is cheap; the call is hung up once every clone is dropped.
#[derive(Clone)]
pub struct CallHandle {
    actions: mpsc::Sender<Action>,
    events: broadcast::Sender<CallEvent>,
    cancel: CancellationToken,
    /// Interrupts setup still in flight once the last clone is gone
    _cancel_on_drop: Arc<DropGuard>,
}

impl CallHandle {
    /// Starts a coordinator task; must be called inside a Tokio runtime
    pub fn spawn<M, F>(mailbox: Arc<M>, factory: F, config: &SignalingConfig) -> Self
    where
        M: MailboxStore,
        F: EngineFactory,
    {
        let (tx, rx) = mpsc::channel(config.action_queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let coordinator = Coordinator::new(
            mailbox,
            factory,
            CollectionPath::new(config.calls_collection.clone()),
            tx.downgrade(),
            events.clone(),
            cancel.clone(),
        );
        tokio::spawn(coordinator.run(rx));
        Self {
            actions: tx,
            events,
            _cancel_on_drop: Arc::new(cancel.clone().drop_guard()),
            cancel,
        }
    }

    async fn request<T>(&self, action: impl FnOnce(oneshot::Sender<T>) -> Action) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.actions
            .send(action(reply))
            .await
            .map_err(|_| SignalingError::CoordinatorGone)?;
        rx.await.map_err(|_| SignalingError::CoordinatorGone)
    }

    /// Creates a session, publishes the offer and returns the id to share
    pub async fn initiate(&self) -> Result<SessionId> {
        self.request(Action::Initiate).await?
    }

    /// Answers the session the other side shared
    pub async fn join(&self, id: impl Into<SessionId>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Action::Join(id, reply)).await?
    }

    /// Stops both subscriptions and closes the engine.
    ///
    /// An `initiate` or `join` still in flight is interrupted and fails
    /// with `Cancelled`.
    pub async fn hang_up(&self) -> Result<()> {
        self.cancel.cancel();
        self.request(Action::HangUp).await
    }

    pub async fn state(&self) -> Result<CallState> {
        self.request(Action::State).await
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }
}

/// Acquires local media, then starts a WebRTC-backed call.
///
/// Media failures are returned before any coordinator exists.
pub async fn open_call<M: MailboxStore>(
    mailbox: Arc<M>,
    media: &dyn LocalMedia,
    config: &SignalingConfig,
) -> Result<CallHandle> {
    config.validate()?;
    let tracks = media.acquire().await?;
    info!("Acquired {} local track(s)", tracks.len());
    let factory = WebrtcEngineFactory::new(config, tracks);
    Ok(CallHandle::spawn(mailbox, factory, config))
}
