//! Ledger gateway client.
//!
//! JSON over HTTP with bearer auth:
//!
//! - `POST /leases` `{principal, entity, accessSpecifier, durationSeconds}`
//!   returns `{leaseId, txHash, expiresAt}`
//! - `POST /leases/{id}/revoke` returns `{txHash}`
//! - `GET /leases/{id}` returns `{active}` (404 means unknown)
//! - `POST /audits` `{principal, leaseId, entity, action, memoryIds}`
//!   returns `{txHash}` (nullable)
//!
//! No request is ever retried.

use super::{Ledger, LeaseReceipt};
use crate::http::{build_http_client, join_url, send_json, send_optional_json};
use crate::models::{AccessSpecifier, AuditAction, LeaseId, MemoryId, Principal};
use crate::storage::metrics::timed;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

const BACKEND: &str = "http_ledger";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLeaseRequest<'a> {
    principal: &'a str,
    entity: &'a str,
    access_specifier: &'a str,
    duration_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordAuditRequest<'a> {
    principal: &'a str,
    lease_id: &'a str,
    entity: &'a str,
    action: AuditAction,
    memory_ids: &'a [MemoryId],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    tx_hash: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    active: bool,
}

/// Remote ledger gateway.
pub struct HttpLedger {
    endpoint: String,
    api_key: Option<SecretString>,
    client: reqwest::blocking::Client,
}

impl HttpLedger {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// Creates a client for the gateway at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            client: build_http_client(Self::DEFAULT_TIMEOUT_MS),
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the request timeout (0 disables it).
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.client = build_http_client(timeout_ms);
        self
    }

    /// Returns the gateway endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

impl Ledger for HttpLedger {
    #[instrument(skip(self, principal, access), fields(operation = "ledger_create_lease", backend = BACKEND, principal = %principal, entity = %entity))]
    fn create_lease(
        &self,
        principal: &Principal,
        entity: &str,
        access: &AccessSpecifier,
        duration_secs: u64,
    ) -> Result<LeaseReceipt> {
        timed(BACKEND, "create_lease", || {
            let body = CreateLeaseRequest {
                principal: principal.as_str(),
                entity,
                access_specifier: access.as_str(),
                duration_seconds: duration_secs,
            };
            let receipt: LeaseReceipt = send_json(
                BACKEND,
                "ledger_create_lease",
                self.authorize(self.client.post(self.url("leases"))).json(&body),
            )?;
            if receipt.lease_id.as_str().is_empty() {
                return Err(Error::OperationFailed {
                    operation: "ledger_create_lease".to_string(),
                    cause: "ledger returned an empty lease id".to_string(),
                });
            }
            Ok(receipt)
        })
    }

    #[instrument(skip(self), fields(operation = "ledger_revoke_lease", backend = BACKEND, lease.id = %lease_id))]
    fn revoke_lease(&self, lease_id: &LeaseId) -> Result<String> {
        timed(BACKEND, "revoke_lease", || {
            let path = format!("leases/{lease_id}/revoke");
            let response: TxResponse = send_json(
                BACKEND,
                "ledger_revoke_lease",
                self.authorize(self.client.post(self.url(&path))),
            )?;
            response.tx_hash.ok_or_else(|| Error::OperationFailed {
                operation: "ledger_revoke_lease".to_string(),
                cause: "ledger returned no transaction hash".to_string(),
            })
        })
    }

    fn is_active(&self, lease_id: &LeaseId) -> Result<bool> {
        timed(BACKEND, "is_active", || {
            let path = format!("leases/{lease_id}");
            let status: Option<StatusResponse> = send_optional_json(
                BACKEND,
                "ledger_is_active",
                self.authorize(self.client.get(self.url(&path))),
            )?;
            Ok(status.is_some_and(|s| s.active))
        })
    }

    #[instrument(skip(self, principal, memory_ids), fields(operation = "ledger_record_audit", backend = BACKEND, lease.id = %lease_id, action = %action))]
    fn record_audit(
        &self,
        principal: &Principal,
        lease_id: &LeaseId,
        entity: &str,
        action: AuditAction,
        memory_ids: &[MemoryId],
    ) -> Result<Option<String>> {
        timed(BACKEND, "record_audit", || {
            let body = RecordAuditRequest {
                principal: principal.as_str(),
                lease_id: lease_id.as_str(),
                entity,
                action,
                memory_ids,
            };
            let response: TxResponse = send_json(
                BACKEND,
                "ledger_record_audit",
                self.authorize(self.client.post(self.url("audits"))).json(&body),
            )?;
            Ok(response.tx_hash)
        })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

impl std::fmt::Debug for HttpLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLedger")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
