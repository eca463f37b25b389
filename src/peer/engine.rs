//! Negotiation engine contract
//!
//! The coordinator never talks to a WebRTC stack directly. It drives an
//! engine through this trait and reacts to the [`EngineEvent`]s the engine
//! emits. [`WebrtcEngine`](crate::peer::connection::WebrtcEngine) is the
//! production implementation; tests substitute recording engines.

use crate::error::Result;
use crate::peer::types::{CandidateDelivery, EngineEvent, IceCandidate};
use crate::session::{Role, SessionDescription};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait NegotiationEngine: Send + 'static {
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    async fn create_answer(&mut self) -> Result<SessionDescription>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()>;

    /// Fails with `EngineState` if a remote description is already applied
    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()>;

    /// Engines without a remote description may defer the candidate
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateDelivery>;

    /// Event stream of this engine. Only the first call returns `Some`.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<()>;
}

/// Builds a fresh engine for each call
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: NegotiationEngine;

    async fn create(&self, role: Role) -> Result<Self::Engine>;
}
