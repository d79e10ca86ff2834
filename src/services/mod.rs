// src/services/mod.rs
pub mod call_dispatcher;
pub mod capacity_monitor;
pub mod inbound_call;
pub mod metrics_reporter;
pub mod registry;
pub mod session_controller;

pub use call_dispatcher::CallDispatcher;
pub use capacity_monitor::{CapacityMonitor, CapacitySource, CapacityStore, FreeSwitchStatusSource};
pub use inbound_call::{CallSession, InboundCallSession, SessionCall, SessionError};
pub use metrics_reporter::{init_metrics, GaugeSink, MetricsGauges, MetricsReporter};
pub use registry::{HangupOrigin, HangupSignal, RegistryError, SessionRegistry};
pub use session_controller::{SessionController, SessionHandle, TerminationCause};
