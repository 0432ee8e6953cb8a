//! Declarative FSM spec for the kiosk order flow.
//!
//! States, events and the transition table are defined here; the orchestrator
//! maps them to behavior. The raw transition triplets intentionally keep the
//! historical spellings from the first draft of the flow (spaces, missing
//! letters) and are normalized once at compile time, so legacy strings coming
//! in over the wire keep parsing.
//!
//! Flow: INIT -> AWAITING_PAYMENT -> AWAITING_PRINTING -> AWAITING_KDS -> terminals.
//! Fiscalization runs first, then payment, then receipt printing, then KDS.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Canonical FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "fsm_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Init,
    AwaitingPayment,
    AwaitingPrinting,
    AwaitingKds,

    // Terminal / failure / side branches
    CanceledByUser,
    CanceledByTimeout,
    UnsuccessfulPayment,
    PrintingFailed,
    SentToKds,
    SentToKdsFailed,
    UnsuccessfulFiscalization,
}

/// Canonical FSM trigger events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "fsm_event", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    FiscalizationSucceeded,
    FiscalizationFailed,

    PaymentSucceeded,
    UserCanceled,
    InactivityTimeout,
    PaymentFailed,

    PrintingSucceeded,
    PrintingFailedOrTimeout,

    KdsConfirmation,
    KdsErrorOrNoResponse,
}

/// Which runtime context bundle an event's payload folds into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextClass {
    Fiscal,
    Payment,
    Printing,
}

impl State {
    pub const ALL: [State; 11] = [
        State::Init,
        State::AwaitingPayment,
        State::AwaitingPrinting,
        State::AwaitingKds,
        State::CanceledByUser,
        State::CanceledByTimeout,
        State::UnsuccessfulPayment,
        State::PrintingFailed,
        State::SentToKds,
        State::SentToKdsFailed,
        State::UnsuccessfulFiscalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Init => "INIT",
            State::AwaitingPayment => "AWAITING_PAYMENT",
            State::AwaitingPrinting => "AWAITING_PRINTING",
            State::AwaitingKds => "AWAITING_KDS",
            State::CanceledByUser => "CANCELED_BY_USER",
            State::CanceledByTimeout => "CANCELED_BY_TIMEOUT",
            State::UnsuccessfulPayment => "UNSUCCESSFUL_PAYMENT",
            State::PrintingFailed => "PRINTING_FAILED",
            State::SentToKds => "SENT_TO_KDS",
            State::SentToKdsFailed => "SENT_TO_KDS_FAILED",
            State::UnsuccessfulFiscalization => "UNSUCCESSFUL_FISCALIZATION",
        }
    }
}

impl Event {
    pub const ALL: [Event; 10] = [
        Event::FiscalizationSucceeded,
        Event::FiscalizationFailed,
        Event::PaymentSucceeded,
        Event::UserCanceled,
        Event::InactivityTimeout,
        Event::PaymentFailed,
        Event::PrintingSucceeded,
        Event::PrintingFailedOrTimeout,
        Event::KdsConfirmation,
        Event::KdsErrorOrNoResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::FiscalizationSucceeded => "FISCALIZATION_SUCCEEDED",
            Event::FiscalizationFailed => "FISCALIZATION_FAILED",
            Event::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            Event::UserCanceled => "USER_CANCELED",
            Event::InactivityTimeout => "INACTIVITY_TIMEOUT",
            Event::PaymentFailed => "PAYMENT_FAILED",
            Event::PrintingSucceeded => "PRINTING_SUCCEEDED",
            Event::PrintingFailedOrTimeout => "PRINTING_FAILED_OR_TIMEOUT",
            Event::KdsConfirmation => "KDS_CONFIRMATION",
            Event::KdsErrorOrNoResponse => "KDS_ERROR_OR_NO_RESPONSE",
        }
    }

    /// Which runtime context bundle this event's payload belongs to, if any.
    pub fn context_class(&self) -> Option<ContextClass> {
        match self {
            Event::FiscalizationSucceeded | Event::FiscalizationFailed => {
                Some(ContextClass::Fiscal)
            }
            Event::PaymentSucceeded | Event::PaymentFailed => Some(ContextClass::Payment),
            Event::PrintingSucceeded | Event::PrintingFailedOrTimeout => {
                Some(ContextClass::Printing)
            }
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------- Normalization of legacy spellings --------------------------------

fn state_alias(name: &str) -> Option<State> {
    match name {
        "PRINTING_FAILD" => Some(State::PrintingFailed),
        "UNSUCCESSFULL_PAYMENT" => Some(State::UnsuccessfulPayment),
        _ => None,
    }
}

fn event_alias(name: &str) -> Option<Event> {
    match name {
        "PAYMENT_FAILD" => Some(Event::PaymentFailed),
        "PRINTING_FAILD_OR_TIMEOUT" => Some(Event::PrintingFailedOrTimeout),
        "PRINTING_SUCEEDED" => Some(Event::PrintingSucceeded),
        _ => None,
    }
}

impl FromStr for State {
    type Err = Error;

    /// Parse a state name, accepting legacy aliases and space-separated forms.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_uppercase().replace(' ', "_");
        if let Some(state) = state_alias(&name) {
            return Ok(state);
        }
        State::ALL
            .iter()
            .find(|state| state.as_str() == name)
            .copied()
            .ok_or_else(|| Error::validation(format!("Unknown state: {}", s)))
    }
}

impl FromStr for Event {
    type Err = Error;

    /// Parse an event name, accepting legacy aliases and space-separated forms.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_uppercase().replace(' ', "_");
        if let Some(event) = event_alias(&name) {
            return Ok(event);
        }
        Event::ALL
            .iter()
            .find(|event| event.as_str() == name)
            .copied()
            .ok_or_else(|| Error::validation(format!("Unknown event: {}", s)))
    }
}

// ---------- Transition table --------------------------------------------------

// Raw triplets (from | to | trigger) as originally drafted, legacy spellings
// included. Compiled through normalization below.
const RAW_TRIPLETS: &[(&str, &str, &str)] = &[
    ("INIT", "AWAITING PAYMENT", "FISCALIZATION_SUCCEEDED"),
    ("INIT", "UNSUCCESSFUL_FISCALIZATION", "FISCALIZATION_FAILED"),
    ("AWAITING_PAYMENT", "AWAITING_PRINTING", "PAYMENT_SUCCEEDED"),
    ("AWAITING_PAYMENT", "CANCELED_BY_USER", "USER_CANCELED"),
    ("AWAITING_PAYMENT", "CANCELED_BY_TIMEOUT", "INACTIVITY_TIMEOUT"),
    ("AWAITING_PAYMENT", "UNSUCCESSFULL_PAYMENT", "PAYMENT_FAILD"),
    ("AWAITING_PRINTING", "PRINTING_FAILD", "PRINTING_FAILD_OR_TIMEOUT"),
    ("AWAITING_PRINTING", "AWAITING_KDS", "PRINTING_SUCCEEDED"),
    ("AWAITING_KDS", "SENT_TO_KDS", "KDS_CONFIRMATION"),
    ("AWAITING_KDS", "SENT_TO_KDS_FAILED", "KDS_ERROR_OR_NO_RESPONSE"),
];

fn compile_transitions() -> Result<HashMap<(State, Event), State>> {
    let mut table = HashMap::new();
    for (raw_from, raw_to, raw_event) in RAW_TRIPLETS {
        let from = State::from_str(raw_from)?;
        let to = State::from_str(raw_to)?;
        let event = Event::from_str(raw_event)?;
        if table.insert((from, event), to).is_some() {
            return Err(Error::config(format!(
                "duplicate transition for ({}, {})",
                from, event
            )));
        }
    }
    Ok(table)
}

static TRANSITIONS: Lazy<HashMap<(State, Event), State>> =
    Lazy::new(|| compile_transitions().expect("FSM transition table is inconsistent"));

/// Return the next state for (current, event), or None if the transition is
/// not allowed.
pub fn next_state(current: State, event: Event) -> Option<State> {
    TRANSITIONS.get(&(current, event)).copied()
}

/// Check if a transition exists for (current, event).
pub fn can_transition(current: State, event: Event) -> bool {
    TRANSITIONS.contains_key(&(current, event))
}

/// List allowed events from the current state.
pub fn valid_events(current: State) -> Vec<Event> {
    Event::ALL
        .iter()
        .filter(|event| can_transition(current, **event))
        .copied()
        .collect()
}

/// Terminal states have no outgoing transitions.
pub fn is_terminal(state: State) -> bool {
    Event::ALL.iter().all(|event| !can_transition(state, *event))
}

/// Advisory timeout for a state, if any. The orchestrator arms a timer with
/// this duration on entry; the saga step deadline inside the handler is
/// independent.
pub fn state_timeout(state: State) -> Option<Duration> {
    match state {
        State::AwaitingPayment => Some(Duration::from_secs(180)),
        State::AwaitingPrinting => Some(Duration::from_secs(60)),
        State::AwaitingKds => Some(Duration::from_secs(20)),
        _ => None,
    }
}

/// Policy bit consumed by the command endpoint: whether a retry-style user
/// command is honored in this state. It does not define transitions.
pub fn is_retry_allowed(state: State) -> bool {
    matches!(state, State::AwaitingPayment | State::AwaitingPrinting)
}

/// Validate that every transition references a known state and event and that
/// no (from, event) pair is defined twice. Call once on startup, before the
/// compiled table is first used.
pub fn validate_spec() -> Result<()> {
    let table = compile_transitions()?;
    if table.len() != RAW_TRIPLETS.len() {
        return Err(Error::config(format!(
            "transition table compiled {} entries, expected {}",
            table.len(),
            RAW_TRIPLETS.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_exhaustive() {
        assert_eq!(
            next_state(State::Init, Event::FiscalizationSucceeded),
            Some(State::AwaitingPayment)
        );
        assert_eq!(
            next_state(State::Init, Event::FiscalizationFailed),
            Some(State::UnsuccessfulFiscalization)
        );
        assert_eq!(
            next_state(State::AwaitingPayment, Event::PaymentSucceeded),
            Some(State::AwaitingPrinting)
        );
        assert_eq!(
            next_state(State::AwaitingPayment, Event::UserCanceled),
            Some(State::CanceledByUser)
        );
        assert_eq!(
            next_state(State::AwaitingPayment, Event::InactivityTimeout),
            Some(State::CanceledByTimeout)
        );
        assert_eq!(
            next_state(State::AwaitingPayment, Event::PaymentFailed),
            Some(State::UnsuccessfulPayment)
        );
        assert_eq!(
            next_state(State::AwaitingPrinting, Event::PrintingSucceeded),
            Some(State::AwaitingKds)
        );
        assert_eq!(
            next_state(State::AwaitingPrinting, Event::PrintingFailedOrTimeout),
            Some(State::PrintingFailed)
        );
        assert_eq!(
            next_state(State::AwaitingKds, Event::KdsConfirmation),
            Some(State::SentToKds)
        );
        assert_eq!(
            next_state(State::AwaitingKds, Event::KdsErrorOrNoResponse),
            Some(State::SentToKdsFailed)
        );
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        assert_eq!(next_state(State::Init, Event::PaymentSucceeded), None);
        assert_eq!(next_state(State::AwaitingKds, Event::PaymentSucceeded), None);
        assert_eq!(next_state(State::SentToKds, Event::KdsConfirmation), None);
        assert!(!can_transition(State::CanceledByUser, Event::UserCanceled));
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            State::CanceledByUser,
            State::CanceledByTimeout,
            State::UnsuccessfulPayment,
            State::PrintingFailed,
            State::SentToKds,
            State::SentToKdsFailed,
            State::UnsuccessfulFiscalization,
        ] {
            assert!(is_terminal(state), "{} should be terminal", state);
        }
        for state in [
            State::Init,
            State::AwaitingPayment,
            State::AwaitingPrinting,
            State::AwaitingKds,
        ] {
            assert!(!is_terminal(state), "{} should not be terminal", state);
        }
    }

    #[test]
    fn test_alias_normalization() {
        assert_eq!("AWAITING PAYMENT".parse::<State>().unwrap(), State::AwaitingPayment);
        assert_eq!("AWAITING KDS".parse::<State>().unwrap(), State::AwaitingKds);
        assert_eq!("PRINTING_FAILD".parse::<State>().unwrap(), State::PrintingFailed);
        assert_eq!(
            "UNSUCCESSFULL_PAYMENT".parse::<State>().unwrap(),
            State::UnsuccessfulPayment
        );
        assert_eq!("PAYMENT_FAILD".parse::<Event>().unwrap(), Event::PaymentFailed);
        assert_eq!(
            "PRINTING_FAILD_OR_TIMEOUT".parse::<Event>().unwrap(),
            Event::PrintingFailedOrTimeout
        );
        assert_eq!("PRINTING_SUCEEDED".parse::<Event>().unwrap(), Event::PrintingSucceeded);
        assert_eq!("  init ".parse::<State>().unwrap(), State::Init);
        assert!("NO_SUCH_STATE".parse::<State>().is_err());
        assert!("NO_SUCH_EVENT".parse::<Event>().is_err());
    }

    #[test]
    fn test_state_timeouts() {
        assert_eq!(
            state_timeout(State::AwaitingPayment),
            Some(Duration::from_secs(180))
        );
        assert_eq!(
            state_timeout(State::AwaitingPrinting),
            Some(Duration::from_secs(60))
        );
        assert_eq!(state_timeout(State::AwaitingKds), Some(Duration::from_secs(20)));
        assert_eq!(state_timeout(State::Init), None);
        assert_eq!(state_timeout(State::SentToKds), None);
    }

    #[test]
    fn test_retry_policy() {
        assert!(is_retry_allowed(State::AwaitingPayment));
        assert!(is_retry_allowed(State::AwaitingPrinting));
        assert!(!is_retry_allowed(State::AwaitingKds));
        assert!(!is_retry_allowed(State::Init));
        assert!(!is_retry_allowed(State::UnsuccessfulPayment));
    }

    #[test]
    fn test_valid_events_from_awaiting_payment() {
        let events = valid_events(State::AwaitingPayment);
        assert_eq!(events.len(), 4);
        assert!(events.contains(&Event::PaymentSucceeded));
        assert!(events.contains(&Event::PaymentFailed));
        assert!(events.contains(&Event::UserCanceled));
        assert!(events.contains(&Event::InactivityTimeout));
    }

    #[test]
    fn test_spec_validates() {
        assert!(validate_spec().is_ok());
    }

    #[test]
    fn test_context_classes() {
        assert_eq!(
            Event::PaymentSucceeded.context_class(),
            Some(ContextClass::Payment)
        );
        assert_eq!(
            Event::FiscalizationFailed.context_class(),
            Some(ContextClass::Fiscal)
        );
        assert_eq!(
            Event::PrintingSucceeded.context_class(),
            Some(ContextClass::Printing)
        );
        assert_eq!(Event::KdsConfirmation.context_class(), None);
        assert_eq!(Event::UserCanceled.context_class(), None);
    }

    #[test]
    fn test_wire_serialization_round_trip() {
        let json = serde_json::to_string(&State::AwaitingPayment).unwrap();
        assert_eq!(json, "\"AWAITING_PAYMENT\"");
        let event: Event = serde_json::from_str("\"KDS_ERROR_OR_NO_RESPONSE\"").unwrap();
        assert_eq!(event, Event::KdsErrorOrNoResponse);
    }
}
