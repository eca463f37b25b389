#![allow(dead_code)]

use async_trait::async_trait;
use piperchat_lib::error::{Result, SignalingError};
use piperchat_lib::peer::{
    CandidateDelivery, EngineEvent, EngineFactory, IceCandidate, NegotiationEngine,
};
use piperchat_lib::session::{Role, SessionDescription};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

/// Test-side view of one engine the factory built
#[derive(Clone)]
pub struct EngineProbe {
    pub role: Role,
    calls: Arc<Mutex<Vec<EngineCall>>>,
    events: UnboundedSender<EngineEvent>,
}

impl EngineProbe {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::SetRemote(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::AddCandidate(c) => Some(c.candidate),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&EngineCall::Close)
    }

    /// Pretend the engine emitted `event`; dropped once the call is released
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_candidate(&self, candidate: &str) {
        self.emit(EngineEvent::LocalCandidate(IceCandidate::new(candidate)));
    }
}

/// Engine that records every call and behaves like a peer connection
/// with respect to descriptions: candidates are deferred until the remote
/// description is set
pub struct RecordingEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    events: Option<UnboundedReceiver<EngineEvent>>,
    notify: UnboundedSender<EngineEvent>,
    deferred: Vec<IceCandidate>,
    tag: String,
    remote_set: bool,
    closed: bool,
}

impl RecordingEngine {
    fn record(&self, call: EngineCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.closed {
            return Err(SignalingError::EngineState("engine closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationEngine for RecordingEngine {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateOffer)?;
        Ok(SessionDescription::offer(format!("offer-from-{}", self.tag)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateAnswer)?;
        if !self.remote_set {
            return Err(SignalingError::EngineState("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("answer-from-{}", self.tag)))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetLocal(desc))
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetRemote(desc))?;
        if self.remote_set {
            return Err(SignalingError::EngineState(
                "remote description already set".into(),
            ));
        }
        self.remote_set = true;
        for candidate in self.deferred.drain(..) {
            let _ = self.notify.send(EngineEvent::PendingCandidateApplied(candidate));
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateDelivery> {
        self.record(EngineCall::AddCandidate(candidate.clone()))?;
        if !self.remote_set {
            self.deferred.push(candidate);
            return Ok(CandidateDelivery::Deferred);
        }
        Ok(CandidateDelivery::Applied)
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<EngineEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.record(EngineCall::Close)?;
        self.closed = true;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingFactory {
    probes: Arc<Mutex<Vec<EngineProbe>>>,
}

impl RecordingFactory {
    pub fn created(&self) -> usize {
        self.probes.lock().unwrap().len()
    }

    pub fn probe(&self, index: usize) -> EngineProbe {
        self.probes.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl EngineFactory for RecordingFactory {
    type Engine = RecordingEngine;

    async fn create(&self, role: Role) -> Result<RecordingEngine> {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut probes = self.probes.lock().unwrap();
        probes.push(EngineProbe {
            role,
            calls: Arc::clone(&calls),
            events: tx.clone(),
        });
        Ok(RecordingEngine {
            calls,
            events: Some(rx),
            notify: tx,
            deferred: Vec::new(),
            tag: format!("{}-{}", role, probes.len()),
            remote_set: false,
            closed: false,
        })
    }
}

/// Polls `cond` until it holds; panics after a few seconds
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Gives in-flight deliveries time to land
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
