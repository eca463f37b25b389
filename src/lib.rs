//! Peer-to-peer call signaling over a shared document mailbox.
//!
//! Two sides that cannot reach each other yet exchange a session description
//! and network-path candidates through a mailbox both can read and write:
//!
//! 1. The caller creates a session record, writes its offer and shares the
//!    record id.
//! 2. The callee reads the offer, writes an answer into the same record.
//! 3. Each side appends its candidates to its own sub-collection and
//!    consumes the other's.
//!
//! [`CallHandle`] is the entry point; [`MemoryMailbox`] is an in-process
//! mailbox and [`WebrtcEngineFactory`] builds the WebRTC peers.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod mailbox;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SignalingConfig;
pub use coordinator::state::CallState;
pub use coordinator::CallEvent;
pub use error::{Result, SignalingError};
pub use mailbox::{MailboxStore, MemoryMailbox};
pub use peer::connection::WebrtcEngineFactory;
pub use session::SessionId;
pub use signaling::{open_call, CallHandle};

use media::NoMedia;
use peer::types::PeerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// How long the loopback demo waits for the peers to connect
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Loopback call: both sides in this process, signaling through a memory mailbox
pub async fn run() -> Result<()> {
    logger::init_logging();
    let config = SignalingConfig::from_env()?;
    let mailbox = Arc::new(MemoryMailbox::new());

    let caller = open_call(Arc::clone(&mailbox), &NoMedia, &config).await?;
    let callee = open_call(Arc::clone(&mailbox), &NoMedia, &config).await?;
    let mut caller_events = caller.events();

    let id = caller.initiate().await?;
    info!("Call id to share: {}", id);
    callee.join(id).await?;

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            match caller_events.recv().await {
                Ok(CallEvent::Connection(PeerState::Connected)) => return true,
                Ok(CallEvent::Connection(PeerState::Failed)) => return false,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if connected {
        info!("Peers connected");
    } else {
        warn!("Peers did not connect within {:?}", CONNECT_TIMEOUT);
    }

    caller.hang_up().await?;
    callee.hang_up().await?;
    Ok(())
}
