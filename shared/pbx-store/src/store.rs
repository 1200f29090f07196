//! Read-only routing lookups
//!
//! Every method that takes an `OrganizationId` must treat rows belonging to
//! any other organization exactly like "not found" — cross-tenant resolution
//! is never permitted.

use async_trait::async_trait;
use pbx_core::OrganizationId;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    BusinessHoursSchedule, ConferenceRoom, DidNumber, Extension, IvrMenu, Organization, RingGroup,
};

#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>>;

    /// CDR webhooks identify the tenant via the CPaaS domain UUID.
    async fn organization_by_domain(&self, domain_uuid: Uuid) -> Result<Option<Organization>>;

    /// Global lookup by canonical E.164; the owning organization is read off
    /// the returned row.
    async fn did_by_number(&self, phone_number: &str) -> Result<Option<DidNumber>>;

    async fn extension(&self, org: OrganizationId, id: Uuid) -> Result<Option<Extension>>;

    async fn extension_by_number(
        &self,
        org: OrganizationId,
        number: &str,
    ) -> Result<Option<Extension>>;

    /// All organizations owning an extension with this number. Used by the
    /// trust layer, which only accepts an unambiguous (single) match.
    async fn organizations_with_extension(&self, number: &str) -> Result<Vec<OrganizationId>>;

    async fn ring_group(&self, org: OrganizationId, id: Uuid) -> Result<Option<RingGroup>>;

    async fn business_hours(
        &self,
        org: OrganizationId,
        id: Uuid,
    ) -> Result<Option<BusinessHoursSchedule>>;

    async fn ivr_menu(&self, org: OrganizationId, id: Uuid) -> Result<Option<IvrMenu>>;

    async fn conference_room(
        &self,
        org: OrganizationId,
        id: Uuid,
    ) -> Result<Option<ConferenceRoom>>;
}
