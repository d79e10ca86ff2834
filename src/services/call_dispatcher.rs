// src/services/call_dispatcher.rs
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::HangupSignal;
use super::session_controller::SessionController;
use crate::error::AdmissionError;
use crate::models::{CallRequest, SipResponse};
use crate::pipeline::CallAdmission;
use crate::signaling::{Responder, SignalingEvent};

struct PendingAdmission {
    transport_id: String,
    cancel: CancellationToken,
}

/// Routes signaling requests: INVITEs through admission into sessions,
/// CANCEL and BYE to whatever currently owns the call.
pub struct CallDispatcher {
    admission: Arc<dyn CallAdmission>,
    controller: Arc<SessionController>,
    pending: Mutex<HashMap<String, PendingAdmission>>,
}

impl CallDispatcher {
    pub fn new(admission: Arc<dyn CallAdmission>, controller: Arc<SessionController>) -> Self {
        Self {
            admission,
            controller,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn dispatch(self: &Arc<Self>, event: SignalingEvent, responder: Arc<dyn Responder>) {
        match event {
            SignalingEvent::Invite(request) => self.on_invite(request, responder).await,
            SignalingEvent::Cancel { call_id } => self.on_cancel(&call_id).await,
            SignalingEvent::Bye { call_id } => {
                if !self.controller.hangup_call(&call_id).await {
                    debug!(call_id = %call_id, "BYE for unknown call");
                }
            }
            SignalingEvent::Ignored { method } => {
                debug!(method = %method, "ignoring signaling request");
            }
        }
    }

    /// Number of INVITEs still inside the admission pipeline.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Abandons admissions and hangs up sessions that arrived on a
    /// connection that has gone away.
    pub async fn transport_lost(&self, transport_id: &str) {
        let cancelled = {
            let pending = self.pending.lock().await;
            let mut count = 0;
            for p in pending.values().filter(|p| p.transport_id == transport_id) {
                p.cancel.cancel();
                count += 1;
            }
            count
        };
        let hung_up = self.controller.hangup_transport(transport_id).await;

        if cancelled > 0 || hung_up > 0 {
            warn!(
                transport_id = %transport_id,
                "⚠️  Transport lost: {} pending admissions cancelled, {} sessions hung up",
                cancelled, hung_up
            );
        }
    }

    async fn on_invite(self: &Arc<Self>, request: CallRequest, responder: Arc<dyn Responder>) {
        let cancel = CancellationToken::new();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&request.call_id)
                || self.controller.registry().has_call(&request.call_id).await
            {
                debug!(call_id = %request.call_id, "ignoring retransmitted INVITE");
                return;
            }
            pending.insert(
                request.call_id.clone(),
                PendingAdmission {
                    transport_id: request.transport_id.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(call_id = %request.call_id, "📞 INVITE {}", request.request_uri);

        let this = self.clone();
        tokio::spawn(async move {
            this.admit_call(request, responder, cancel).await;
        });
    }

    async fn admit_call(
        &self,
        request: CallRequest,
        responder: Arc<dyn Responder>,
        cancel: CancellationToken,
    ) {
        let call_id = request.call_id.clone();

        let evaluated = self.admission.evaluate(request, &cancel).await;

        // The pending entry stays locked until the session is registered, so
        // a CANCEL either lands here or finds the session afterwards.
        let rejection = {
            let mut pending = self.pending.lock().await;
            let rejection = match evaluated {
                Ok(_) if cancel.is_cancelled() => {
                    info!(call_id = %call_id, "INVITE cancelled as admission finished");
                    Some(AdmissionError::Cancelled.sip_response())
                }
                Ok(ctx) => {
                    let hangup = HangupSignal::from_token(cancel);
                    match self.controller.admit(ctx, responder.clone(), hangup).await {
                        Ok(handle) => {
                            debug!(call_id = %call_id, session_id = %handle.id, "session admitted");
                            None
                        }
                        Err(e) => {
                            error!("❌ Could not start session for {}: {}", call_id, e);
                            Some(SipResponse::new(500, "Server Internal Error"))
                        }
                    }
                }
                Err(e) => Some(e.sip_response()),
            };
            pending.remove(&call_id);
            rejection
        };

        if let Some(response) = rejection {
            if let Err(e) = responder.respond(&call_id, response).await {
                warn!("Failed to send rejection for {}: {}", call_id, e);
            }
        }
    }

    async fn on_cancel(&self, call_id: &str) {
        if let Some(pending) = self.pending.lock().await.get(call_id) {
            info!(call_id = %call_id, "CANCEL during admission");
            pending.cancel.cancel();
            return;
        }
        if !self.controller.hangup_call(call_id).await {
            debug!(call_id = %call_id, "CANCEL for unknown call");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RequestContext;
    use crate::services::inbound_call::InboundCallSession;
    use crate::services::registry::SessionRegistry;
    use crate::signaling::MockResponder;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Admits everything after `delay`, honouring cancellation.
    struct SlowAdmission {
        delay: Duration,
        outcome: Result<(), AdmissionError>,
    }

    #[async_trait]
    impl CallAdmission for SlowAdmission {
        async fn evaluate(
            &self,
            request: CallRequest,
            cancel: &CancellationToken,
        ) -> Result<RequestContext, AdmissionError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {
                    self.outcome.clone().map(|_| RequestContext::new(request))
                }
            }
        }
    }

    fn invite(call_id: &str, transport_id: &str) -> CallRequest {
        CallRequest {
            call_id: call_id.into(),
            request_uri: "sip:+15551234567@fs.example.com".into(),
            from: "<sip:+15550001111@carrier>".into(),
            to: "<sip:+15551234567@fs.example.com>".into(),
            source_address: None,
            headers: HashMap::new(),
            body: None,
            transport_id: transport_id.into(),
        }
    }

    /// Responder that forwards every final response status to a channel.
    fn recording_responder() -> (Arc<MockResponder>, mpsc::UnboundedReceiver<(String, u16)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut responder = MockResponder::new();
        responder.expect_respond().returning(move |call_id, response| {
            let _ = tx.send((call_id.to_string(), response.status));
            Ok(())
        });
        responder.expect_hangup().returning(|_| Ok(()));
        (Arc::new(responder), rx)
    }

    /// Sees the CANCEL only after its last stage has already succeeded.
    struct CancelledAtTheWire;

    #[async_trait]
    impl CallAdmission for CancelledAtTheWire {
        async fn evaluate(
            &self,
            request: CallRequest,
            cancel: &CancellationToken,
        ) -> Result<RequestContext, AdmissionError> {
            cancel.cancel();
            Ok(RequestContext::new(request))
        }
    }

    fn dispatcher(
        admission: impl CallAdmission + 'static,
    ) -> (Arc<CallDispatcher>, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let controller = Arc::new(SessionController::new(
            registry.clone(),
            Arc::new(InboundCallSession),
        ));
        (
            Arc::new(CallDispatcher::new(Arc::new(admission), controller)),
            registry,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_call_is_answered() {
        let (dispatcher, registry) = dispatcher(SlowAdmission {
            delay: Duration::from_millis(100),
            outcome: Ok(()),
        });
        let (responder, mut responses) = recording_responder();

        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder.clone())
            .await;
        assert_eq!(responses.recv().await, Some(("call-1".into(), 200)));
        assert_eq!(registry.count().await, 1);
        assert_eq!(dispatcher.pending_count().await, 0);

        dispatcher
            .dispatch(SignalingEvent::Bye { call_id: "call-1".into() }, responder)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_leaves_registry_untouched() {
        let (dispatcher, registry) = dispatcher(SlowAdmission {
            delay: Duration::from_millis(100),
            outcome: Err(AdmissionError::InvalidDestination("sip:%%%@fs".into())),
        });
        let (responder, mut responses) = recording_responder();

        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder)
            .await;

        assert_eq!(responses.recv().await, Some(("call-1".into(), 484)));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_admission_answers_487() {
        let (dispatcher, registry) = dispatcher(SlowAdmission {
            delay: Duration::from_secs(10),
            outcome: Ok(()),
        });
        let (responder, mut responses) = recording_responder();

        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder.clone())
            .await;
        assert_eq!(dispatcher.pending_count().await, 1);

        dispatcher
            .dispatch(SignalingEvent::Cancel { call_id: "call-1".into() }, responder)
            .await;

        assert_eq!(responses.recv().await, Some(("call-1".into(), 487)));
        assert_eq!(registry.count().await, 0);
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_racing_last_stage_creates_no_session() {
        let (dispatcher, registry) = dispatcher(CancelledAtTheWire);
        let (responder, mut responses) = recording_responder();

        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder)
            .await;

        assert_eq!(responses.recv().await, Some(("call-1".into(), 487)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(responses.try_recv().is_err());
        assert_eq!(registry.count().await, 0);
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmitted_invite_ignored() {
        let (dispatcher, registry) = dispatcher(SlowAdmission {
            delay: Duration::from_millis(100),
            outcome: Ok(()),
        });
        let (responder, mut responses) = recording_responder();

        for _ in 0..3 {
            dispatcher
                .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder.clone())
                .await;
        }

        assert_eq!(responses.recv().await, Some(("call-1".into(), 200)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(responses.try_recv().is_err());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_cleans_up_only_that_transport() {
        let (dispatcher, registry) = dispatcher(SlowAdmission {
            delay: Duration::from_millis(100),
            outcome: Ok(()),
        });
        let (responder, mut responses) = recording_responder();

        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-1", "t1")), responder.clone())
            .await;
        dispatcher
            .dispatch(SignalingEvent::Invite(invite("call-2", "t2")), responder.clone())
            .await;
        responses.recv().await;
        responses.recv().await;
        assert_eq!(registry.count().await, 2);

        dispatcher.transport_lost("t1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let remaining = registry.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].call_id, "call-2");
    }
}
