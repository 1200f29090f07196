//! Destination resolution
//!
//! Maps a routing target to a concrete dialable action, following extension
//! indirections, ring-group fallback chains and business-hours gates. Every
//! recursive step threads an explicit depth counter with a hard ceiling, so a
//! misconfigured fallback cycle (group A falls back to B, B back to A) fails
//! closed instead of recursing unboundedly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pbx_core::{Clock, OrganizationId};
use pbx_store::{
    Extension, ExtensionConfig, IvrMenu, RingGroup, RingStrategy, RoutingStore, RoutingTarget,
    StoreError,
};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::cxml::{ConferenceJoin, DialTarget, ServiceDial};
use crate::hours::{self, HoursError};

/// Hard ceiling on target indirection (extension -> ring group -> ...).
pub const MAX_RESOLVE_DEPTH: u8 = 8;

/// Dial timeout when the target itself does not configure one.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u32 = 30;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("extension not found: {0}")]
    ExtensionNotFound(Uuid),

    #[error("ring group not found: {0}")]
    RingGroupNotFound(Uuid),

    #[error("ivr menu not found: {0}")]
    IvrMenuNotFound(Uuid),

    #[error("conference room not found: {0}")]
    ConferenceNotFound(Uuid),

    #[error("business-hours schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("resolution depth exceeded")]
    DepthExceeded,

    #[error("bad routing configuration: {0}")]
    BadConfiguration(String),

    #[error("datastore error: {0}")]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Caller-facing spoken message for each failure class. Never leaks
    /// configuration detail to the calling party.
    pub fn spoken_message(&self) -> &'static str {
        match self {
            Self::ExtensionNotFound(_) => "The extension you have dialed is not available.",
            Self::RingGroupNotFound(_) => "That department is not available right now.",
            Self::IvrMenuNotFound(_) => "This menu is currently unavailable.",
            Self::ConferenceNotFound(_) => {
                "The conference you are trying to join is not available."
            }
            Self::ScheduleNotFound(_)
            | Self::DepthExceeded
            | Self::BadConfiguration(_)
            | Self::Store(_) => {
                "We are unable to connect your call at this time. Please try again later."
            }
        }
    }
}

impl From<HoursError> for ResolveError {
    fn from(err: HoursError) -> Self {
        Self::BadConfiguration(err.to_string())
    }
}

/// A concrete action the orchestrator can render as CXML.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    /// Ring one or many endpoints at once.
    DialUris {
        targets: Vec<DialTarget>,
        timeout_secs: u32,
    },
    /// One attempt of a sequential/round-robin ring group. The callback
    /// carries `member_index`/`attempt` so the next step is computed
    /// statelessly when the platform reports no-answer.
    StepDial {
        group_id: Uuid,
        member_index: usize,
        attempt: u32,
        target: DialTarget,
        timeout_secs: u32,
    },
    /// Play/say the menu prompt and gather digits.
    Menu { menu: IvrMenu, turn: u8 },
    JoinConference(ConferenceJoin),
    DialService(ServiceDial),
    Voicemail { mailbox: String },
    Hangup,
}

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<ResolvedAction, ResolveError>> + Send + 'a>>;

pub struct Resolver {
    store: Arc<dyn RoutingStore>,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    pub fn new(store: Arc<dyn RoutingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Resolve a routing target within one organization. `depth` starts at 0
    /// for the top-level call and increments on every indirection.
    pub fn resolve<'a>(
        &'a self,
        org: OrganizationId,
        target: &'a RoutingTarget,
        depth: u8,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            if depth >= MAX_RESOLVE_DEPTH {
                tracing::warn!(org_id = %org, depth, "resolution depth exceeded");
                return Err(ResolveError::DepthExceeded);
            }

            match target {
                RoutingTarget::Extension { id } => self.resolve_extension(org, *id, depth).await,
                RoutingTarget::RingGroup { id } => self.resolve_ring_group(org, *id, depth).await,
                RoutingTarget::IvrMenu { id } => {
                    let menu = self
                        .store
                        .ivr_menu(org, *id)
                        .await?
                        .ok_or(ResolveError::IvrMenuNotFound(*id))?;
                    Ok(ResolvedAction::Menu { menu, turn: 0 })
                }
                RoutingTarget::BusinessHours { id } => {
                    let schedule = self
                        .store
                        .business_hours(org, *id)
                        .await?
                        .ok_or(ResolveError::ScheduleNotFound(*id))?;
                    let decision = hours::evaluate(&schedule, self.clock.now())?;
                    tracing::debug!(
                        org_id = %org,
                        schedule_id = %id,
                        open = decision.open,
                        "business-hours gate"
                    );
                    self.resolve(org, &decision.action, depth + 1).await
                }
                RoutingTarget::ConferenceRoom { id } => {
                    let room = self
                        .store
                        .conference_room(org, *id)
                        .await?
                        .ok_or(ResolveError::ConferenceNotFound(*id))?;
                    let mut join = ConferenceJoin::new(room.name);
                    join.max_participants = Some(room.max_participants);
                    join.muted = room.mute_on_entry;
                    join.announce_join_leave = room.announce_join_leave;
                    join.record = room.record;
                    Ok(ResolvedAction::JoinConference(join))
                }
                RoutingTarget::AiAssistant { provider, number } => {
                    Ok(ResolvedAction::DialService(ServiceDial {
                        provider: provider.clone(),
                        destination: number.clone(),
                        token: None,
                        attributes: Vec::new(),
                    }))
                }
                RoutingTarget::Voicemail { extension_id } => {
                    let ext = self
                        .store
                        .extension(org, *extension_id)
                        .await?
                        .ok_or(ResolveError::ExtensionNotFound(*extension_id))?;
                    Ok(ResolvedAction::Voicemail {
                        mailbox: ext.extension_number,
                    })
                }
                RoutingTarget::Hangup => Ok(ResolvedAction::Hangup),
            }
        })
    }

    async fn resolve_extension(
        &self,
        org: OrganizationId,
        id: Uuid,
        depth: u8,
    ) -> Result<ResolvedAction, ResolveError> {
        let ext = self
            .store
            .extension(org, id)
            .await?
            .filter(|e| e.status.is_active())
            .ok_or(ResolveError::ExtensionNotFound(id))?;

        match &ext.config {
            ExtensionConfig::User { sip_uri } => Ok(ResolvedAction::DialUris {
                targets: vec![DialTarget::endpoint(sip_uri.clone())],
                timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
            }),
            ExtensionConfig::Virtual { destination } | ExtensionConfig::Forward { destination } => {
                Ok(ResolvedAction::DialUris {
                    targets: vec![DialTarget::endpoint(destination.clone())],
                    timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
                })
            }
            ExtensionConfig::RingGroup { ring_group_id } => {
                self.resolve(org, &RoutingTarget::RingGroup { id: *ring_group_id }, depth + 1)
                    .await
            }
            ExtensionConfig::Ivr { ivr_menu_id } => {
                self.resolve(org, &RoutingTarget::IvrMenu { id: *ivr_menu_id }, depth + 1)
                    .await
            }
            ExtensionConfig::Conference { conference_room_id } => {
                self.resolve(
                    org,
                    &RoutingTarget::ConferenceRoom { id: *conference_room_id },
                    depth + 1,
                )
                .await
            }
            ExtensionConfig::AiAssistant { provider, number } => {
                Ok(ResolvedAction::DialService(ServiceDial {
                    provider: provider.clone(),
                    destination: number.clone(),
                    token: None,
                    attributes: Vec::new(),
                }))
            }
        }
    }

    async fn resolve_ring_group(
        &self,
        org: OrganizationId,
        id: Uuid,
        depth: u8,
    ) -> Result<ResolvedAction, ResolveError> {
        let group = self
            .store
            .ring_group(org, id)
            .await?
            .ok_or(ResolveError::RingGroupNotFound(id))?;

        let members = self.dialable_members(org, &group).await?;
        if members.is_empty() {
            // Instantly exhausted; the fallback chain takes over
            tracing::warn!(org_id = %org, ring_group_id = %id, "ring group has no dialable members");
            return self.resolve(org, &group.fallback, depth + 1).await;
        }

        match group.strategy {
            RingStrategy::Simultaneous => Ok(ResolvedAction::DialUris {
                targets: members.into_iter().map(|(_, uri)| DialTarget::endpoint(uri)).collect(),
                timeout_secs: group.timeout_secs,
            }),
            RingStrategy::Sequential => {
                Ok(self.step_for(&group, &members, 0, 0))
            }
            RingStrategy::RoundRobin => {
                // Stateless rotation: random start, index carried in the callback
                let start = rand::thread_rng().gen_range(0..members.len());
                Ok(self.step_for(&group, &members, start, 0))
            }
        }
    }

    /// Advance a sequential/round-robin dial plan after a no-answer/busy
    /// callback. `member_index` and `attempt` come back from the callback
    /// URL; exhaustion of `ring_turns` full cycles resolves the fallback.
    pub async fn advance_ring_group(
        &self,
        org: OrganizationId,
        group_id: Uuid,
        member_index: usize,
        attempt: u32,
    ) -> Result<ResolvedAction, ResolveError> {
        let group = self
            .store
            .ring_group(org, group_id)
            .await?
            .ok_or(ResolveError::RingGroupNotFound(group_id))?;

        let members = self.dialable_members(org, &group).await?;
        let total_attempts = members.len() as u32 * u32::from(group.ring_turns.clamp(1, 9));

        if members.is_empty() || attempt + 1 >= total_attempts {
            tracing::info!(
                org_id = %org,
                ring_group_id = %group_id,
                attempt,
                "ring group exhausted, resolving fallback"
            );
            return self.resolve(org, &group.fallback, 1).await;
        }

        let next_index = (member_index + 1) % members.len();
        Ok(self.step_for(&group, &members, next_index, attempt + 1))
    }

    fn step_for(
        &self,
        group: &RingGroup,
        members: &[(Uuid, String)],
        member_index: usize,
        attempt: u32,
    ) -> ResolvedAction {
        let (_, uri) = &members[member_index % members.len()];
        ResolvedAction::StepDial {
            group_id: group.id,
            member_index: member_index % members.len(),
            attempt,
            target: DialTarget::endpoint(uri.clone()),
            timeout_secs: group.timeout_secs,
        }
    }

    /// Active members with a directly dialable endpoint, in ring order.
    async fn dialable_members(
        &self,
        org: OrganizationId,
        group: &RingGroup,
    ) -> Result<Vec<(Uuid, String)>, ResolveError> {
        let mut out = Vec::with_capacity(group.members.len());
        for member in group.ordered_members() {
            if let Some(ext) = self.store.extension(org, member.extension_id).await? {
                if let Some(uri) = dialable_uri(&ext) {
                    out.push((ext.id, uri));
                }
            }
        }
        Ok(out)
    }
}

fn dialable_uri(ext: &Extension) -> Option<String> {
    if !ext.status.is_active() {
        return None;
    }
    match &ext.config {
        ExtensionConfig::User { sip_uri } => Some(sip_uri.clone()),
        ExtensionConfig::Virtual { destination } | ExtensionConfig::Forward { destination } => {
            Some(destination.clone())
        }
        // Indirections are not directly dialable inside a ring group
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pbx_core::FixedClock;
    use pbx_store::{
        BusinessHoursSchedule, EntityStatus, MemoryRoutingStore, Organization, RingGroupMember,
        ScheduleDay, TimeRange,
    };

    fn setup() -> (Arc<MemoryRoutingStore>, OrganizationId) {
        let store = Arc::new(MemoryRoutingStore::new());
        let org = OrganizationId::generate();
        store.add_organization(Organization {
            id: org,
            name: "acme".into(),
            active: true,
            webhook_secret: Some("secret".into()),
            domain_uuid: None,
        });
        (store, org)
    }

    fn resolver(store: Arc<MemoryRoutingStore>) -> Resolver {
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
        ));
        Resolver::new(store, clock)
    }

    fn user_ext(org: OrganizationId, number: &str, uri: &str) -> Extension {
        Extension {
            id: Uuid::new_v4(),
            organization_id: org,
            extension_number: number.into(),
            display_name: None,
            status: EntityStatus::Active,
            config: ExtensionConfig::User { sip_uri: uri.into() },
        }
    }

    fn group_of(
        org: OrganizationId,
        strategy: RingStrategy,
        members: Vec<&Extension>,
        fallback: RoutingTarget,
    ) -> RingGroup {
        RingGroup {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "support".into(),
            strategy,
            timeout_secs: 20,
            ring_turns: 2,
            fallback,
            members: members
                .iter()
                .enumerate()
                .map(|(i, e)| RingGroupMember {
                    extension_id: e.id,
                    priority: i as i32 + 1,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn user_extension_resolves_to_sip_dial() {
        let (store, org) = setup();
        let ext = user_ext(org, "3001", "sip:alice@pbx.example.com");
        store.add_extension(ext.clone());
        let resolver = resolver(store);

        let action = resolver
            .resolve(org, &RoutingTarget::Extension { id: ext.id }, 0)
            .await
            .unwrap();

        assert_eq!(
            action,
            ResolvedAction::DialUris {
                targets: vec![DialTarget::Sip("sip:alice@pbx.example.com".into())],
                timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
            }
        );
    }

    #[tokio::test]
    async fn inactive_extension_reads_as_not_found() {
        let (store, org) = setup();
        let mut ext = user_ext(org, "3001", "sip:alice@pbx.example.com");
        ext.status = EntityStatus::Inactive;
        store.add_extension(ext.clone());
        let resolver = resolver(store);

        let err = resolver
            .resolve(org, &RoutingTarget::Extension { id: ext.id }, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ExtensionNotFound(_)));
    }

    #[tokio::test]
    async fn simultaneous_group_dials_all_active_members_with_group_timeout() {
        let (store, org) = setup();
        let a = user_ext(org, "3001", "sip:alice@pbx.example.com");
        let b = user_ext(org, "3002", "sip:bob@pbx.example.com");
        let mut c = user_ext(org, "3003", "sip:carol@pbx.example.com");
        c.status = EntityStatus::Inactive;
        store.add_extension(a.clone());
        store.add_extension(b.clone());
        store.add_extension(c.clone());

        let group = group_of(org, RingStrategy::Simultaneous, vec![&a, &b, &c], RoutingTarget::Hangup);
        store.add_ring_group(group.clone());
        let resolver = resolver(store);

        let action = resolver
            .resolve(org, &RoutingTarget::RingGroup { id: group.id }, 0)
            .await
            .unwrap();

        match action {
            ResolvedAction::DialUris { targets, timeout_secs } => {
                assert_eq!(timeout_secs, 20);
                assert_eq!(
                    targets,
                    vec![
                        DialTarget::Sip("sip:alice@pbx.example.com".into()),
                        DialTarget::Sip("sip:bob@pbx.example.com".into()),
                    ]
                );
            }
            other => panic!("expected DialUris, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sequential_group_rings_lowest_priority_first() {
        let (store, org) = setup();
        let a = user_ext(org, "3001", "sip:alice@pbx.example.com");
        let b = user_ext(org, "3002", "sip:bob@pbx.example.com");
        store.add_extension(a.clone());
        store.add_extension(b.clone());

        let group = group_of(org, RingStrategy::Sequential, vec![&a, &b], RoutingTarget::Hangup);
        store.add_ring_group(group.clone());
        let resolver = resolver(store);

        let action = resolver
            .resolve(org, &RoutingTarget::RingGroup { id: group.id }, 0)
            .await
            .unwrap();

        match action {
            ResolvedAction::StepDial { member_index, attempt, target, .. } => {
                assert_eq!(member_index, 0);
                assert_eq!(attempt, 0);
                assert_eq!(target, DialTarget::Sip("sip:alice@pbx.example.com".into()));
            }
            other => panic!("expected StepDial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn advancing_walks_members_then_turns_then_fallback() {
        let (store, org) = setup();
        let a = user_ext(org, "3001", "sip:alice@pbx.example.com");
        let b = user_ext(org, "3002", "sip:bob@pbx.example.com");
        store.add_extension(a.clone());
        store.add_extension(b.clone());

        // 2 members x 2 turns = 4 attempts before fallback
        let group = group_of(org, RingStrategy::Sequential, vec![&a, &b], RoutingTarget::Hangup);
        store.add_ring_group(group.clone());
        let resolver = resolver(store);

        let step = resolver
            .advance_ring_group(org, group.id, 0, 0)
            .await
            .unwrap();
        match step {
            ResolvedAction::StepDial { member_index, attempt, .. } => {
                assert_eq!((member_index, attempt), (1, 1));
            }
            other => panic!("expected StepDial, got {:?}", other),
        }

        // Second turn wraps back to the first member
        let step = resolver
            .advance_ring_group(org, group.id, 1, 1)
            .await
            .unwrap();
        match step {
            ResolvedAction::StepDial { member_index, attempt, .. } => {
                assert_eq!((member_index, attempt), (0, 2));
            }
            other => panic!("expected StepDial, got {:?}", other),
        }

        // Final attempt concluded: the hangup fallback is terminal
        let done = resolver
            .advance_ring_group(org, group.id, 1, 3)
            .await
            .unwrap();
        assert_eq!(done, ResolvedAction::Hangup);
    }

    #[tokio::test]
    async fn extension_indirection_reaches_ring_group() {
        let (store, org) = setup();
        let a = user_ext(org, "3001", "sip:alice@pbx.example.com");
        store.add_extension(a.clone());
        let group = group_of(org, RingStrategy::Simultaneous, vec![&a], RoutingTarget::Hangup);
        store.add_ring_group(group.clone());

        let indirect = Extension {
            id: Uuid::new_v4(),
            organization_id: org,
            extension_number: "4000".into(),
            display_name: None,
            status: EntityStatus::Active,
            config: ExtensionConfig::RingGroup { ring_group_id: group.id },
        };
        store.add_extension(indirect.clone());
        let resolver = resolver(store);

        let action = resolver
            .resolve(org, &RoutingTarget::Extension { id: indirect.id }, 0)
            .await
            .unwrap();
        assert!(matches!(action, ResolvedAction::DialUris { .. }));
    }

    #[tokio::test]
    async fn fallback_cycle_fails_closed_with_depth_exceeded() {
        let (store, org) = setup();
        // Two empty groups whose fallbacks point at each other
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        store.add_ring_group(RingGroup {
            id: a_id,
            organization_id: org,
            name: "a".into(),
            strategy: RingStrategy::Sequential,
            timeout_secs: 20,
            ring_turns: 1,
            fallback: RoutingTarget::RingGroup { id: b_id },
            members: vec![],
        });
        store.add_ring_group(RingGroup {
            id: b_id,
            organization_id: org,
            name: "b".into(),
            strategy: RingStrategy::Sequential,
            timeout_secs: 20,
            ring_turns: 1,
            fallback: RoutingTarget::RingGroup { id: a_id },
            members: vec![],
        });
        let resolver = resolver(store);

        let err = resolver
            .resolve(org, &RoutingTarget::RingGroup { id: a_id }, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::DepthExceeded));
    }

    #[tokio::test]
    async fn business_hours_gate_selects_action_by_clock() {
        let (store, org) = setup();
        let open_ext = user_ext(org, "3001", "sip:front-desk@pbx.example.com");
        store.add_extension(open_ext.clone());

        let mut days: [ScheduleDay; 7] = Default::default();
        // 2025-06-02 is a Monday; clock is pinned at 14:00 UTC
        days[0] = ScheduleDay {
            enabled: true,
            ranges: vec![TimeRange {
                start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            }],
        };
        let schedule = BusinessHoursSchedule {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "office".into(),
            status: EntityStatus::Active,
            timezone: chrono_tz::UTC,
            open_action: RoutingTarget::Extension { id: open_ext.id },
            closed_action: RoutingTarget::Hangup,
            days,
            exceptions: vec![],
        };
        store.add_business_hours(schedule.clone());
        let resolver = resolver(store.clone());

        let action = resolver
            .resolve(org, &RoutingTarget::BusinessHours { id: schedule.id }, 0)
            .await
            .unwrap();
        assert!(matches!(action, ResolvedAction::DialUris { .. }));

        // After hours the closed action wins
        let evening = Resolver::new(
            store,
            Arc::new(FixedClock::at(
                Utc.with_ymd_and_hms(2025, 6, 2, 22, 0, 0).unwrap(),
            )),
        );
        let action = evening
            .resolve(org, &RoutingTarget::BusinessHours { id: schedule.id }, 0)
            .await
            .unwrap();
        assert_eq!(action, ResolvedAction::Hangup);
    }

    #[tokio::test]
    async fn indirection_to_missing_group_surfaces_distinct_error() {
        let (store, org) = setup();
        let ghost = Uuid::new_v4();
        let ext = Extension {
            id: Uuid::new_v4(),
            organization_id: org,
            extension_number: "3001".into(),
            display_name: None,
            status: EntityStatus::Active,
            config: ExtensionConfig::RingGroup { ring_group_id: ghost },
        };
        store.add_extension(ext.clone());
        let resolver = resolver(store);

        let err = resolver
            .resolve(org, &RoutingTarget::Extension { id: ext.id }, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::RingGroupNotFound(id) if id == ghost));
    }

    #[tokio::test]
    async fn cross_organization_targets_read_as_not_found() {
        let (store, org_a) = setup();
        let org_b = OrganizationId::generate();
        store.add_organization(Organization {
            id: org_b,
            name: "other".into(),
            active: true,
            webhook_secret: None,
            domain_uuid: None,
        });
        let ext = user_ext(org_b, "3001", "sip:other@pbx.example.com");
        store.add_extension(ext.clone());
        let resolver = resolver(store);

        let err = resolver
            .resolve(org_a, &RoutingTarget::Extension { id: ext.id }, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ExtensionNotFound(_)));
    }

    #[tokio::test]
    async fn conference_target_carries_room_flags() {
        let (store, org) = setup();
        let room = pbx_store::ConferenceRoom {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "boardroom".into(),
            max_participants: 8,
            pin: None,
            mute_on_entry: true,
            announce_join_leave: true,
            record: false,
        };
        store.add_conference_room(room.clone());
        let resolver = resolver(store);

        let action = resolver
            .resolve(org, &RoutingTarget::ConferenceRoom { id: room.id }, 0)
            .await
            .unwrap();
        match action {
            ResolvedAction::JoinConference(join) => {
                assert_eq!(join.name, "boardroom");
                assert_eq!(join.max_participants, Some(8));
                assert!(join.muted);
                assert!(join.announce_join_leave);
            }
            other => panic!("expected JoinConference, got {:?}", other),
        }
    }
}
