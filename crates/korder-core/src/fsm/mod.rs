//! Order FSM: declarative spec, orchestration engine, saga state handler and
//! startup recovery.

pub mod handler;
pub mod orchestrator;
pub mod recovery;
pub mod spec;

pub use handler::StateHandler;
pub use orchestrator::{EventSubmission, Orchestrator, TimerTable};
pub use recovery::recover_incomplete_orders;
pub use spec::{Event, State};
