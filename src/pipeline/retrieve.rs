// src/pipeline/retrieve.rs
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::Row;
use tracing::{error, info};

use super::{AdmissionStage, RequestContext, StageTimeout};
use crate::database::DbPool;
use crate::error::AdmissionError;
use crate::models::{ApplicationConfig, HookMethod, Webhook};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationLookup {
    pub called_number: String,
    /// Request-URI host, matched against account SIP realms.
    pub sip_realm: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_application(
        &self,
        lookup: &ApplicationLookup,
    ) -> Result<Option<ApplicationConfig>, StoreError>;
}

const BY_PHONE_NUMBER: &str = "
    SELECT a.application_sid, a.account_sid, a.name,
           a.call_hook_url, a.call_hook_method, a.call_hook_username, a.call_hook_password,
           a.call_status_hook_url, a.call_status_hook_method,
           a.speech_synthesis_vendor, a.speech_recognizer_vendor
    FROM phone_numbers pn
    JOIN applications a ON a.application_sid = pn.application_sid
    WHERE (pn.number = $1 OR pn.number = $2)
    LIMIT 1";

const BY_SIP_REALM: &str = "
    SELECT a.application_sid, a.account_sid, a.name,
           a.call_hook_url, a.call_hook_method, a.call_hook_username, a.call_hook_password,
           a.call_status_hook_url, a.call_status_hook_method,
           a.speech_synthesis_vendor, a.speech_recognizer_vendor
    FROM accounts acc
    JOIN applications a ON a.application_sid = acc.device_calling_application_sid
    WHERE acc.sip_realm = $1
    LIMIT 1";

pub struct PgApplicationStore {
    db_pool: DbPool,
}

impl PgApplicationStore {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    fn from_row(row: &Row) -> Result<ApplicationConfig, tokio_postgres::Error> {
        let hook_method: Option<String> = row.try_get(4)?;
        let status_url: Option<String> = row.try_get(7)?;
        let status_method: Option<String> = row.try_get(8)?;

        Ok(ApplicationConfig {
            application_sid: row.try_get(0)?,
            account_sid: row.try_get(1)?,
            name: row.try_get(2)?,
            call_hook: Webhook {
                url: row.try_get(3)?,
                method: HookMethod::parse_lenient(hook_method.as_deref().unwrap_or("POST")),
                username: row.try_get(5)?,
                password: row.try_get(6)?,
            },
            call_status_hook: status_url.map(|url| Webhook {
                url,
                method: HookMethod::parse_lenient(status_method.as_deref().unwrap_or("POST")),
                username: None,
                password: None,
            }),
            speech_synthesis_vendor: row.try_get(9)?,
            speech_recognizer_vendor: row.try_get(10)?,
        })
    }
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn find_application(
        &self,
        lookup: &ApplicationLookup,
    ) -> Result<Option<ApplicationConfig>, StoreError> {
        let client = self
            .db_pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Numbers are provisioned both with and without the leading '+'.
        let bare = lookup.called_number.trim_start_matches('+').to_string();
        if let Some(row) = client
            .query_opt(BY_PHONE_NUMBER, &[&lookup.called_number, &bare])
            .await?
        {
            return Ok(Some(Self::from_row(&row)?));
        }

        if let Some(realm) = &lookup.sip_realm {
            if let Some(row) = client.query_opt(BY_SIP_REALM, &[realm]).await? {
                return Ok(Some(Self::from_row(&row)?));
            }
        }

        Ok(None)
    }
}

/// Resolves the application that owns the dialed number or realm.
pub struct RetrieveApplication<S> {
    store: S,
    timeout: Duration,
}

impl<S: ApplicationStore> RetrieveApplication<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl<S: ApplicationStore> AdmissionStage for RetrieveApplication<S> {
    fn name(&self) -> &'static str {
        "retrieve_application"
    }

    fn timeout(&self) -> Option<StageTimeout> {
        Some(StageTimeout {
            after: self.timeout,
            error: AdmissionError::RetrievalTimeout(self.timeout),
        })
    }

    async fn process(&self, ctx: &mut RequestContext) -> Result<(), AdmissionError> {
        let called_number = ctx.called_number.clone().ok_or_else(|| {
            AdmissionError::InvalidDestination(ctx.request().request_uri.clone())
        })?;
        let lookup = ApplicationLookup {
            called_number,
            sip_realm: ctx.request().request_host().map(str::to_string),
        };

        match self.store.find_application(&lookup).await {
            Ok(Some(application)) => {
                info!(
                    application_sid = %application.application_sid,
                    account_sid = %application.account_sid,
                    "resolved application {}", application.name
                );
                ctx.application = Some(application);
                Ok(())
            }
            Ok(None) => Err(AdmissionError::ApplicationNotFound(lookup.called_number)),
            Err(e) => {
                error!("❌ Application lookup failed: {}", e);
                Err(AdmissionError::RetrievalFailed(e.to_string()))
            }
        }
    }
}
