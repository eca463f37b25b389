pub mod connection;
pub mod engine;
pub mod ice;
pub mod types;

pub use engine::{EngineFactory, NegotiationEngine};
pub use types::{CandidateDelivery, EngineEvent, IceCandidate, PeerState, RemoteTrack, ServerConfig};
