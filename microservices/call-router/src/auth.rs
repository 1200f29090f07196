//! Webhook trust layer: tenant identification and bearer authentication
//!
//! Voice webhooks carry no tenant id of their own; the organization is
//! inferred from the numbers on the call. Once identified, the bearer token
//! is checked against the org's webhook secret with a constant-time compare.
//! Failure reasons stay internal (logs only); response bodies never say more
//! than "unauthorized" and never echo secret material.

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use pbx_core::{OrganizationId, PbxError};
use pbx_store::{Organization, RoutingStore, StoreError};
use uuid::Uuid;

use crate::number;

/// Internal failure taxonomy. Logged, never sent to the caller verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader,
    WrongScheme,
    BadToken,
    /// The org has no webhook secret provisioned. A tenant misconfiguration,
    /// not a caller error.
    NoSecretConfigured,
}

impl AuthFailure {
    pub fn into_error(self, org: OrganizationId) -> PbxError {
        match self {
            Self::NoSecretConfigured => {
                PbxError::Config(format!("organization {} has no webhook secret", org))
            }
            Self::MissingHeader | Self::WrongScheme | Self::BadToken => {
                PbxError::Auth("unauthorized".into())
            }
        }
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthFailure> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::WrongScheme)?;
    let token = value.strip_prefix("Bearer ").ok_or(AuthFailure::WrongScheme)?;
    if token.is_empty() {
        return Err(AuthFailure::WrongScheme);
    }
    Ok(token)
}

/// Constant-time byte comparison. XOR-folds every byte so the comparison
/// cost does not depend on where the first mismatch sits.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..a.len().min(b.len()) {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

pub struct TrustLayer {
    store: Arc<dyn RoutingStore>,
}

impl TrustLayer {
    pub fn new(store: Arc<dyn RoutingStore>) -> Self {
        Self { store }
    }

    /// Identify the tenant for a voice webhook: the dialed DID, then the
    /// calling DID, then a tenant-unique extension-number match. Inactive
    /// organizations read as unidentified.
    pub async fn identify_voice_org(
        &self,
        to: Option<&str>,
        from: Option<&str>,
    ) -> Result<Option<Organization>, StoreError> {
        for candidate in [to, from].into_iter().flatten() {
            if let Some(e164) = number::normalize(candidate) {
                if let Some(did) = self.store.did_by_number(&e164).await? {
                    return self.active_org(did.organization_id).await;
                }
            }
        }

        // A short dialed number identifies the tenant only when exactly one
        // organization has that extension
        if let Some(ext_number) = to.and_then(number::as_extension_number) {
            let orgs = self.store.organizations_with_extension(&ext_number).await?;
            if let [only] = orgs.as_slice() {
                return self.active_org(*only).await;
            }
            if orgs.len() > 1 {
                tracing::warn!(
                    extension = %ext_number,
                    candidates = orgs.len(),
                    "ambiguous extension number, refusing to guess tenant"
                );
            }
        }
        Ok(None)
    }

    /// Identify the tenant for a CDR webhook from `owner.domain.uuid`.
    pub async fn identify_cdr_org(
        &self,
        domain_uuid: Option<Uuid>,
    ) -> Result<Option<Organization>, StoreError> {
        let Some(domain_uuid) = domain_uuid else {
            return Ok(None);
        };
        match self.store.organization_by_domain(domain_uuid).await? {
            Some(org) if org.active => Ok(Some(org)),
            _ => Ok(None),
        }
    }

    async fn active_org(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .store
            .organization(id)
            .await?
            .filter(|org| org.active))
    }

    /// Check the bearer token against the org's webhook secret.
    pub fn authenticate(&self, org: &Organization, headers: &HeaderMap) -> Result<(), AuthFailure> {
        let Some(secret) = org.webhook_secret.as_deref() else {
            tracing::error!(org_id = %org.id, "webhook secret not provisioned");
            return Err(AuthFailure::NoSecretConfigured);
        };
        let token = extract_bearer(headers)?;
        if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(AuthFailure::BadToken)
        }
    }
}
