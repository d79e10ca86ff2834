// src/services/session_controller.rs
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Duration};
use tracing::{error, info, info_span, warn, Instrument};

use super::inbound_call::{CallSession, SessionCall, SessionError};
use super::registry::{HangupOrigin, HangupSignal, RegistryError, SessionRegistry};
use crate::models::{Session, SessionId, SessionState};
use crate::pipeline::RequestContext;
use crate::signaling::Responder;

/// How long a session gets to wind down after a hangup before it is aborted.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum TerminationCause {
    Completed,
    Hangup(HangupOrigin),
    Failed(String),
}

impl TerminationCause {
    fn from_join(joined: Result<Result<(), SessionError>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => TerminationCause::Completed,
            Ok(Err(e)) => TerminationCause::Failed(e.to_string()),
            Err(e) if e.is_panic() => TerminationCause::Failed("session panicked".to_string()),
            Err(e) => TerminationCause::Failed(e.to_string()),
        }
    }
}

pub struct SessionHandle {
    pub id: SessionId,
    pub call_id: String,
    hangup: HangupSignal,
    completion: JoinHandle<TerminationCause>,
}

impl SessionHandle {
    pub fn hangup(&self, origin: HangupOrigin) {
        self.hangup.trigger(origin);
    }

    /// Resolves once the session has been deregistered.
    pub async fn finished(self) -> TerminationCause {
        match self.completion.await {
            Ok(cause) => cause,
            Err(e) => TerminationCause::Failed(e.to_string()),
        }
    }
}

/// Turns admitted requests into registered, running sessions.
pub struct SessionController {
    registry: Arc<SessionRegistry>,
    runner: Arc<dyn CallSession>,
}

impl SessionController {
    pub fn new(registry: Arc<SessionRegistry>, runner: Arc<dyn CallSession>) -> Self {
        Self { registry, runner }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn admit(
        &self,
        ctx: RequestContext,
        responder: Arc<dyn Responder>,
        hangup: HangupSignal,
    ) -> Result<SessionHandle, RegistryError> {
        let application_sid = ctx.application.as_ref().map(|a| a.application_sid.clone());
        let session = Session::new(
            ctx.request().call_id.clone(),
            ctx.request().transport_id.clone(),
            application_sid,
        )
        .with_media_handle(ctx.call_sid.to_string());
        let id = session.id;
        let call_id = session.call_id.clone();
        let span = info_span!(parent: ctx.span(), "session", session_id = %id);

        // Registered before the session task exists, so nothing runs unaccounted.
        self.registry.register(session, hangup.clone()).await?;
        if let Err(e) = self.registry.transition(&id, SessionState::Active).await {
            let _ = self.registry.deregister(&id).await;
            return Err(e);
        }

        let call = SessionCall {
            session_id: id,
            call_sid: ctx.call_sid,
            call_id: call_id.clone(),
            application: ctx.application.clone(),
            instructions: ctx.instructions.clone(),
            request: ctx.into_request(),
            responder,
            hangup: hangup.clone(),
        };

        let completion = tokio::spawn(
            drive(self.registry.clone(), self.runner.clone(), call).instrument(span),
        );

        Ok(SessionHandle {
            id,
            call_id,
            hangup,
            completion,
        })
    }

    pub async fn hangup_session(&self, id: &SessionId) -> bool {
        self.registry.hangup_session(id, HangupOrigin::Local).await
    }

    pub async fn hangup_call(&self, call_id: &str) -> bool {
        self.registry.hangup_call(call_id, HangupOrigin::Remote).await
    }

    pub async fn hangup_transport(&self, transport_id: &str) -> usize {
        self.registry.hangup_transport(transport_id).await
    }
}

/// Runs the session and guarantees it leaves the registry exactly once,
/// whatever ended it.
async fn drive(
    registry: Arc<SessionRegistry>,
    runner: Arc<dyn CallSession>,
    call: SessionCall,
) -> TerminationCause {
    let id = call.session_id;
    let call_id = call.call_id.clone();
    let responder = call.responder.clone();
    let hangup = call.hangup.clone();

    info!(call_id = %call_id, "session started");
    let mut task = tokio::spawn(async move { runner.execute(call).await });

    let cause = tokio::select! {
        joined = &mut task => match hangup.origin() {
            Some(origin) => TerminationCause::Hangup(origin),
            None => TerminationCause::from_join(joined),
        },
        origin = hangup.triggered() => {
            if timeout(TEARDOWN_GRACE, &mut task).await.is_err() {
                warn!("session did not wind down after hangup, aborting");
                task.abort();
            }
            TerminationCause::Hangup(origin)
        }
    };

    if let Err(e) = registry.transition(&id, SessionState::Terminating).await {
        error!("❌ Session {} could not enter Terminating: {}", id, e);
    }

    // The far end already knows about remote hangups.
    if cause != TerminationCause::Hangup(HangupOrigin::Remote) {
        if let Err(e) = responder.hangup(&call_id).await {
            warn!("Failed to tear down dialog {}: {}", call_id, e);
        }
    }

    match registry.deregister(&id).await {
        Ok(mut session) => {
            let _ = session.advance(SessionState::Terminated);
            match &cause {
                TerminationCause::Failed(reason) => {
                    error!(call_id = %call_id, "❌ Session failed: {}", reason)
                }
                other => info!(call_id = %call_id, cause = ?other, "session terminated"),
            }
        }
        Err(e) => error!("❌ Session {} deregistration failed: {}", id, e),
    }

    cause
}
