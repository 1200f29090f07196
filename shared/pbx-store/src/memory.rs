//! In-memory routing store
//!
//! Used by tests and local development. Seed it with entities, then hand it
//! to the router as an `Arc<dyn RoutingStore>`.

use async_trait::async_trait;
use dashmap::DashMap;
use pbx_core::OrganizationId;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::store::RoutingStore;
use crate::types::{
    BusinessHoursSchedule, ConferenceRoom, DidNumber, Extension, IvrMenu, Organization, RingGroup,
};

/// JSON fixture for seeding a [`MemoryRoutingStore`] in local development.
#[derive(Debug, Default, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub dids: Vec<DidNumber>,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    #[serde(default)]
    pub ring_groups: Vec<RingGroup>,
    #[serde(default)]
    pub business_hours: Vec<BusinessHoursSchedule>,
    #[serde(default)]
    pub ivr_menus: Vec<IvrMenu>,
    #[serde(default)]
    pub conference_rooms: Vec<ConferenceRoom>,
}

#[derive(Default)]
pub struct MemoryRoutingStore {
    organizations: DashMap<OrganizationId, Organization>,
    dids: DashMap<String, DidNumber>,
    extensions: DashMap<Uuid, Extension>,
    ring_groups: DashMap<Uuid, RingGroup>,
    schedules: DashMap<Uuid, BusinessHoursSchedule>,
    ivr_menus: DashMap<Uuid, IvrMenu>,
    conference_rooms: DashMap<Uuid, ConferenceRoom>,
}

impl MemoryRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON fixture.
    pub fn from_json(json: &str) -> Result<Self> {
        let seed: StoreSeed = serde_json::from_str(json)?;
        let store = Self::new();
        for org in seed.organizations {
            store.add_organization(org);
        }
        for did in seed.dids {
            store.add_did(did);
        }
        for ext in seed.extensions {
            store.add_extension(ext);
        }
        for group in seed.ring_groups {
            store.add_ring_group(group);
        }
        for schedule in seed.business_hours {
            store.add_business_hours(schedule);
        }
        for menu in seed.ivr_menus {
            store.add_ivr_menu(menu);
        }
        for room in seed.conference_rooms {
            store.add_conference_room(room);
        }
        Ok(store)
    }

    pub fn add_organization(&self, org: Organization) {
        self.organizations.insert(org.id, org);
    }

    pub fn add_did(&self, did: DidNumber) {
        self.dids.insert(did.phone_number.clone(), did);
    }

    pub fn add_extension(&self, ext: Extension) {
        self.extensions.insert(ext.id, ext);
    }

    pub fn add_ring_group(&self, group: RingGroup) {
        self.ring_groups.insert(group.id, group);
    }

    pub fn add_business_hours(&self, schedule: BusinessHoursSchedule) {
        self.schedules.insert(schedule.id, schedule);
    }

    pub fn add_ivr_menu(&self, menu: IvrMenu) {
        self.ivr_menus.insert(menu.id, menu);
    }

    pub fn add_conference_room(&self, room: ConferenceRoom) {
        self.conference_rooms.insert(room.id, room);
    }
}

#[async_trait]
impl RoutingStore for MemoryRoutingStore {
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        Ok(self.organizations.get(&id).map(|o| o.clone()))
    }

    async fn organization_by_domain(&self, domain_uuid: Uuid) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .iter()
            .find(|o| o.domain_uuid == Some(domain_uuid))
            .map(|o| o.clone()))
    }

    async fn did_by_number(&self, phone_number: &str) -> Result<Option<DidNumber>> {
        Ok(self.dids.get(phone_number).map(|d| d.clone()))
    }

    async fn extension(&self, org: OrganizationId, id: Uuid) -> Result<Option<Extension>> {
        Ok(self
            .extensions
            .get(&id)
            .filter(|e| e.organization_id == org)
            .map(|e| e.clone()))
    }

    async fn extension_by_number(
        &self,
        org: OrganizationId,
        number: &str,
    ) -> Result<Option<Extension>> {
        Ok(self
            .extensions
            .iter()
            .find(|e| e.organization_id == org && e.extension_number == number)
            .map(|e| e.clone()))
    }

    async fn organizations_with_extension(&self, number: &str) -> Result<Vec<OrganizationId>> {
        let mut orgs: Vec<OrganizationId> = self
            .extensions
            .iter()
            .filter(|e| e.extension_number == number)
            .map(|e| e.organization_id)
            .collect();
        orgs.sort_by_key(|o| o.0);
        orgs.dedup();
        Ok(orgs)
    }

    async fn ring_group(&self, org: OrganizationId, id: Uuid) -> Result<Option<RingGroup>> {
        Ok(self
            .ring_groups
            .get(&id)
            .filter(|g| g.organization_id == org)
            .map(|g| g.clone()))
    }

    async fn business_hours(
        &self,
        org: OrganizationId,
        id: Uuid,
    ) -> Result<Option<BusinessHoursSchedule>> {
        Ok(self
            .schedules
            .get(&id)
            .filter(|s| s.organization_id == org)
            .map(|s| s.clone()))
    }

    async fn ivr_menu(&self, org: OrganizationId, id: Uuid) -> Result<Option<IvrMenu>> {
        Ok(self
            .ivr_menus
            .get(&id)
            .filter(|m| m.organization_id == org)
            .map(|m| m.clone()))
    }

    async fn conference_room(
        &self,
        org: OrganizationId,
        id: Uuid,
    ) -> Result<Option<ConferenceRoom>> {
        Ok(self
            .conference_rooms
            .get(&id)
            .filter(|r| r.organization_id == org)
            .map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityStatus, ExtensionConfig, RoutingTarget};

    fn org() -> Organization {
        Organization {
            id: OrganizationId::generate(),
            name: "acme".into(),
            active: true,
            webhook_secret: Some("secret".into()),
            domain_uuid: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn lookups_are_scoped_to_the_organization() {
        let store = MemoryRoutingStore::new();
        let org_a = org();
        let org_b = org();
        store.add_organization(org_a.clone());
        store.add_organization(org_b.clone());

        let ext = Extension {
            id: Uuid::new_v4(),
            organization_id: org_a.id,
            extension_number: "3001".into(),
            display_name: None,
            status: EntityStatus::Active,
            config: ExtensionConfig::User {
                sip_uri: "sip:alice@pbx.acme.example".into(),
            },
        };
        store.add_extension(ext.clone());

        // Same id through the wrong tenant reads as not-found
        assert!(store.extension(org_a.id, ext.id).await.unwrap().is_some());
        assert!(store.extension(org_b.id, ext.id).await.unwrap().is_none());
        assert!(store
            .extension_by_number(org_b.id, "3001")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn did_lookup_is_global_and_exact() {
        let store = MemoryRoutingStore::new();
        let tenant = org();
        store.add_organization(tenant.clone());
        store.add_did(DidNumber {
            id: Uuid::new_v4(),
            organization_id: tenant.id,
            phone_number: "+15551234567".into(),
            friendly_name: Some("Main line".into()),
            routing: RoutingTarget::Hangup,
            status: EntityStatus::Active,
        });

        let hit = store.did_by_number("+15551234567").await.unwrap();
        assert_eq!(hit.unwrap().organization_id, tenant.id);
        assert!(store.did_by_number("+15550000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_fixture_seeds_the_store() {
        let org_id = OrganizationId::generate();
        let fixture = serde_json::json!({
            "organizations": [{
                "id": org_id,
                "name": "acme",
                "active": true,
                "webhook_secret": "s3cret",
                "domain_uuid": null
            }],
            "extensions": [{
                "id": Uuid::new_v4(),
                "organization_id": org_id,
                "extension_number": "3001",
                "display_name": "Alice",
                "status": "active",
                "config": {"type": "user", "sip_uri": "sip:alice@pbx.acme.example"}
            }]
        })
        .to_string();

        let store = MemoryRoutingStore::from_json(&fixture).unwrap();
        let org = store.organization(org_id).await.unwrap().unwrap();
        assert_eq!(org.webhook_secret.as_deref(), Some("s3cret"));
        assert!(store
            .extension_by_number(org_id, "3001")
            .await
            .unwrap()
            .is_some());

        assert!(MemoryRoutingStore::from_json("{not json").is_err());
    }

    #[tokio::test]
    async fn domain_uuid_resolves_owning_organization() {
        let store = MemoryRoutingStore::new();
        let tenant = org();
        let domain = tenant.domain_uuid.unwrap();
        store.add_organization(tenant.clone());

        let found = store.organization_by_domain(domain).await.unwrap();
        assert_eq!(found.unwrap().id, tenant.id);
        assert!(store
            .organization_by_domain(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
