// src/pipeline/mod.rs
//! Ordered admission checks applied to every inbound INVITE before a
//! session exists.

pub mod normalize;
pub mod retrieve;
pub mod webhook;

pub use normalize::NormalizeNumbers;
pub use retrieve::{ApplicationLookup, ApplicationStore, PgApplicationStore, RetrieveApplication, StoreError};
pub use webhook::{CallHook, CallHookPayload, HookDecision, HookError, HttpCallHook, InvokeCallHook};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::error::AdmissionError;
use crate::models::{ApplicationConfig, CallRequest};

/// Derived attributes accumulated while a request moves through the stages.
#[derive(Debug)]
pub struct RequestContext {
    pub call_sid: Uuid,
    pub received_at: DateTime<Utc>,
    pub calling_number: Option<String>,
    pub called_number: Option<String>,
    pub application: Option<ApplicationConfig>,
    /// Whatever the call hook returned alongside its admit decision.
    pub instructions: Option<serde_json::Value>,
    request: CallRequest,
    span: Span,
}

impl RequestContext {
    /// Context Init: never fails.
    pub fn new(request: CallRequest) -> Self {
        let call_sid = Uuid::new_v4();
        let span = info_span!("admission", call_id = %request.call_id, call_sid = %call_sid);

        Self {
            call_sid,
            received_at: Utc::now(),
            calling_number: None,
            called_number: None,
            application: None,
            instructions: None,
            request,
            span,
        }
    }

    pub fn request(&self) -> &CallRequest {
        &self.request
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Releases the context, handing back the request it was built from.
    pub fn into_request(self) -> CallRequest {
        self.request
    }
}

/// Bounded wait for a stage that performs I/O.
#[derive(Debug, Clone)]
pub struct StageTimeout {
    pub after: Duration,
    pub error: AdmissionError,
}

#[async_trait]
pub trait AdmissionStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn timeout(&self) -> Option<StageTimeout> {
        None
    }

    async fn process(&self, ctx: &mut RequestContext) -> Result<(), AdmissionError>;
}

/// Something that turns an inbound INVITE into an admitted context or a
/// rejection.
#[async_trait]
pub trait CallAdmission: Send + Sync {
    async fn evaluate(
        &self,
        request: CallRequest,
        cancel: &CancellationToken,
    ) -> Result<RequestContext, AdmissionError>;
}

pub struct AdmissionPipeline<N, R, W> {
    normalize: N,
    retrieve: R,
    authorize: W,
}

impl<N, R, W> AdmissionPipeline<N, R, W>
where
    N: AdmissionStage,
    R: AdmissionStage,
    W: AdmissionStage,
{
    pub fn new(normalize: N, retrieve: R, authorize: W) -> Self {
        Self {
            normalize,
            retrieve,
            authorize,
        }
    }
}

#[async_trait]
impl<N, R, W> CallAdmission for AdmissionPipeline<N, R, W>
where
    N: AdmissionStage,
    R: AdmissionStage,
    W: AdmissionStage,
{
    async fn evaluate(
        &self,
        request: CallRequest,
        cancel: &CancellationToken,
    ) -> Result<RequestContext, AdmissionError> {
        let mut ctx = RequestContext::new(request);
        let span = ctx.span().clone();

        async move {
            run_stage(&self.normalize, &mut ctx, cancel).await?;
            run_stage(&self.retrieve, &mut ctx, cancel).await?;
            run_stage(&self.authorize, &mut ctx, cancel).await?;
            info!("call admitted");
            Ok(ctx)
        }
        .instrument(span)
        .await
    }
}

async fn run_stage<S: AdmissionStage>(
    stage: &S,
    ctx: &mut RequestContext,
    cancel: &CancellationToken,
) -> Result<(), AdmissionError> {
    if cancel.is_cancelled() {
        return Err(AdmissionError::Cancelled);
    }

    let limit = stage.timeout();
    let work = async {
        match limit {
            Some(limit) => match tokio::time::timeout(limit.after, stage.process(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(limit.error),
            },
            None => stage.process(ctx).await,
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
        result = work => result,
    };

    match &result {
        Ok(()) => debug!(stage = stage.name(), "stage passed"),
        Err(e) => info!(stage = stage.name(), reason = e.error_code(), "call rejected: {}", e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        outcome: Result<(), AdmissionError>,
        delay: Option<Duration>,
        limit: Option<StageTimeout>,
    }

    impl Probe {
        fn passing(name: &'static str) -> Self {
            Self {
                name,
                calls: Arc::new(AtomicUsize::new(0)),
                outcome: Ok(()),
                delay: None,
                limit: None,
            }
        }
    }

    #[async_trait]
    impl AdmissionStage for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn timeout(&self) -> Option<StageTimeout> {
            self.limit.clone()
        }

        async fn process(&self, _ctx: &mut RequestContext) -> Result<(), AdmissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone()
        }
    }

    fn invite() -> CallRequest {
        CallRequest {
            call_id: "abc@host".into(),
            request_uri: "sip:+15551234567@fs.example.com".into(),
            from: "<sip:+15550001111@carrier>".into(),
            to: "<sip:+15551234567@fs.example.com>".into(),
            source_address: None,
            headers: HashMap::new(),
            body: None,
            transport_id: "t1".into(),
        }
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order_on_success() {
        let (a, b, c) = (Probe::passing("a"), Probe::passing("b"), Probe::passing("c"));
        let counters = [a.calls.clone(), b.calls.clone(), c.calls.clone()];
        let pipeline = AdmissionPipeline::new(a, b, c);

        let ctx = pipeline
            .evaluate(invite(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ctx.request().call_id, "abc@host");
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let a = Probe::passing("a");
        let mut b = Probe::passing("b");
        b.outcome = Err(AdmissionError::ApplicationNotFound("+15551234567".into()));
        let c = Probe::passing("c");
        let c_calls = c.calls.clone();

        let pipeline = AdmissionPipeline::new(a, b, c);
        let err = pipeline
            .evaluate(invite(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::ApplicationNotFound(_)));
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_becomes_rejection() {
        let mut b = Probe::passing("b");
        b.delay = Some(Duration::from_secs(60));
        b.limit = Some(StageTimeout {
            after: Duration::from_secs(2),
            error: AdmissionError::RetrievalTimeout(Duration::from_secs(2)),
        });
        let c = Probe::passing("c");
        let c_calls = c.calls.clone();

        let pipeline = AdmissionPipeline::new(Probe::passing("a"), b, c);
        let err = pipeline
            .evaluate(invite(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, AdmissionError::RetrievalTimeout(Duration::from_secs(2)));
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_remaining_stages() {
        let mut b = Probe::passing("b");
        b.delay = Some(Duration::from_secs(10));
        let c = Probe::passing("c");
        let c_calls = c.calls.clone();
        let pipeline = AdmissionPipeline::new(Probe::passing("a"), b, c);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = pipeline.evaluate(invite(), &cancel).await.unwrap_err();
        assert_eq!(err, AdmissionError::Cancelled);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_nothing() {
        let a = Probe::passing("a");
        let a_calls = a.calls.clone();
        let pipeline = AdmissionPipeline::new(a, Probe::passing("b"), Probe::passing("c"));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.evaluate(invite(), &cancel).await.unwrap_err();
        assert_eq!(err, AdmissionError::Cancelled);
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }
}
