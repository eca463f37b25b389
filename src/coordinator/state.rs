use crate::error::{Result, SignalingError};
use crate::session::Role;
use serde::Serialize;
use std::fmt;

/// Signaling progress of one call.
///
/// Caller: `Idle → OfferCreated → Offered → AwaitingAnswer → Connected`.
/// Callee: `Idle → JoinRequested → Answered → Connected`.
/// Either side may move to `Closed` from anywhere, and `Closed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    OfferCreated,
    Offered,
    AwaitingAnswer,
    JoinRequested,
    Answered,
    Connected,
    Closed,
}

impl CallState {
    pub fn can_advance(self, role: Role, to: CallState) -> bool {
        use CallState::*;
        match (role, self, to) {
            (Role::Caller, Idle, OfferCreated)
            | (Role::Caller, OfferCreated, Offered)
            | (Role::Caller, Offered, AwaitingAnswer)
            | (Role::Caller, AwaitingAnswer, Connected) => true,
            (Role::Callee, Idle, JoinRequested)
            | (Role::Callee, JoinRequested, Answered)
            | (Role::Callee, Answered, Connected) => true,
            _ => false,
        }
    }

    /// Candidates may flow in both directions
    pub fn exchanges_candidates(self) -> bool {
        !matches!(self, CallState::Idle | CallState::Closed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::OfferCreated => "offer created",
            CallState::Offered => "offered",
            CallState::AwaitingAnswer => "awaiting answer",
            CallState::JoinRequested => "join requested",
            CallState::Answered => "answered",
            CallState::Connected => "connected",
            CallState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current state plus the role fixed by the first action
#[derive(Debug, Clone)]
pub struct Machine {
    role: Option<Role>,
    state: CallState,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            role: None,
            state: CallState::Idle,
        }
    }
}

impl Machine {
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Claims `role` for a call; only legal from `Idle`
    pub fn begin(&mut self, role: Role, action: &'static str) -> Result<()> {
        if self.state != CallState::Idle {
            return Err(SignalingError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        self.role = Some(role);
        Ok(())
    }

    pub fn advance(&mut self, to: CallState, action: &'static str) -> Result<()> {
        let allowed = self
            .role
            .is_some_and(|role| self.state.can_advance(role, to));
        if !allowed {
            return Err(SignalingError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Back to `Idle` after a failed attempt
    pub fn reset(&mut self) {
        if self.state != CallState::Closed {
            self.role = None;
            self.state = CallState::Idle;
        }
    }

    /// Returns false if already closed
    pub fn close(&mut self) -> bool {
        let was_open = self.state != CallState::Closed;
        self.state = CallState::Closed;
        was_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_walks_its_states_in_order() {
        let mut m = Machine::default();
        m.begin(Role::Caller, "initiate").unwrap();
        for to in [
            CallState::OfferCreated,
            CallState::Offered,
            CallState::AwaitingAnswer,
            CallState::Connected,
        ] {
            m.advance(to, "step").unwrap();
        }
        assert_eq!(m.state(), CallState::Connected);
    }

    #[test]
    fn callee_cannot_take_caller_states() {
        let mut m = Machine::default();
        m.begin(Role::Callee, "join").unwrap();
        assert!(m.advance(CallState::OfferCreated, "offer").is_err());
        m.advance(CallState::JoinRequested, "join").unwrap();
        m.advance(CallState::Answered, "answer").unwrap();
        let err = m.advance(CallState::Answered, "answer").unwrap_err();
        assert!(matches!(
            err,
            SignalingError::InvalidTransition { state: CallState::Answered, .. }
        ));
    }

    #[test]
    fn second_begin_is_rejected() {
        let mut m = Machine::default();
        m.begin(Role::Caller, "initiate").unwrap();
        m.advance(CallState::OfferCreated, "offer").unwrap();
        assert!(m.begin(Role::Callee, "join").is_err());
    }

    #[test]
    fn nothing_advances_without_a_role() {
        let mut m = Machine::default();
        assert!(m.advance(CallState::OfferCreated, "offer").is_err());
    }

    #[test]
    fn closed_is_final() {
        let mut m = Machine::default();
        assert!(m.close());
        assert!(!m.close());
        m.reset();
        assert_eq!(m.state(), CallState::Closed);
        assert!(m.begin(Role::Caller, "initiate").is_err());
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut m = Machine::default();
        m.begin(Role::Callee, "join").unwrap();
        m.advance(CallState::JoinRequested, "join").unwrap();
        m.reset();
        assert_eq!(m.state(), CallState::Idle);
        assert_eq!(m.role(), None);
    }
}
