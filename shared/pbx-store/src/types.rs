//! Routing entities
//!
//! Loosely-typed admin configuration (JSON blobs keyed by routing type) is
//! decoded once at this boundary into tagged enums; anything malformed is
//! rejected here with `StoreError::BadRoutingConfig` instead of leaking
//! stringly-typed ids into the routing engine.

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use pbx_core::OrganizationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Entity status shared by DIDs, extensions and schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
}

impl EntityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Tenant boundary. Carries the per-tenant webhook secret and the CPaaS
/// domain UUID used to identify CDR webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub active: bool,
    // Never serialized into API responses
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub domain_uuid: Option<Uuid>,
}

/// Where a call should go next. Decoded once from the stored routing
/// configuration; every id has already been validated as a UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingTarget {
    Extension { id: Uuid },
    RingGroup { id: Uuid },
    IvrMenu { id: Uuid },
    BusinessHours { id: Uuid },
    ConferenceRoom { id: Uuid },
    AiAssistant { provider: String, number: String },
    Voicemail { extension_id: Uuid },
    Hangup,
}

impl RoutingTarget {
    /// Decode a stored routing-config blob. This is the single point where
    /// malformed admin configuration is rejected.
    pub fn from_config(value: &serde_json::Value) -> Result<Self, StoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| StoreError::BadRoutingConfig(format!("{}: {}", e, value)))
    }
}

/// A purchased external phone number and its configured destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidNumber {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    /// Canonical E.164 (`+15551234567`)
    pub phone_number: String,
    pub friendly_name: Option<String>,
    pub routing: RoutingTarget,
    pub status: EntityStatus,
}

/// Type-specific extension payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtensionConfig {
    User { sip_uri: String },
    Virtual { destination: String },
    Forward { destination: String },
    RingGroup { ring_group_id: Uuid },
    Ivr { ivr_menu_id: Uuid },
    Conference { conference_room_id: Uuid },
    AiAssistant { provider: String, number: String },
}

/// An internal dialable destination. Extensions of ring-group / IVR /
/// conference / AI kinds are indirections the resolver follows one level
/// further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub extension_number: String,
    pub display_name: Option<String>,
    pub status: EntityStatus,
    pub config: ExtensionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingStrategy {
    Simultaneous,
    RoundRobin,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingGroupMember {
    pub extension_id: Uuid,
    /// Ascending priority defines ring order for round-robin/sequential.
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingGroup {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub strategy: RingStrategy,
    pub timeout_secs: u32,
    /// Full cycles through the member list before the fallback fires (1-9).
    pub ring_turns: u8,
    pub fallback: RoutingTarget,
    pub members: Vec<RingGroupMember>,
}

impl RingGroup {
    /// Members in ring order: ascending priority, ties broken by id so
    /// sequential ringing has a total order.
    pub fn ordered_members(&self) -> Vec<&RingGroupMember> {
        let mut ordered: Vec<&RingGroupMember> = self.members.iter().collect();
        ordered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.extension_id.cmp(&b.extension_id))
        });
        ordered
    }
}

/// Half-open time range `[start, end)` within one day. Midnight wrap is not
/// allowed; overnight coverage is configured as two ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub enabled: bool,
    pub ranges: Vec<TimeRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Closed all day regardless of the weekly schedule.
    Closed,
    /// Open only during these ranges, regardless of the weekly schedule.
    SpecialHours { ranges: Vec<TimeRange> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: ExceptionKind,
}

/// Weekly open/closed schedule with calendar-date exceptions. All times are
/// interpreted in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursSchedule {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub status: EntityStatus,
    pub timezone: Tz,
    pub open_action: RoutingTarget,
    pub closed_action: RoutingTarget,
    /// Monday first, matching `chrono::Weekday::num_days_from_monday`.
    pub days: [ScheduleDay; 7],
    pub exceptions: Vec<ScheduleException>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IvrPrompt {
    Tts {
        text: String,
        voice: Option<String>,
        language: Option<String>,
    },
    Recording {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvrMenuOption {
    /// Exact DTMF string to match ("1", "42"). Unique per menu.
    pub digits: String,
    pub target: RoutingTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvrMenu {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub prompt: IvrPrompt,
    /// Bound on repeated invalid/missing input before the failover fires.
    pub max_turns: u8,
    pub failover: RoutingTarget,
    pub options: Vec<IvrMenuOption>,
}

impl IvrMenu {
    /// Exact match against configured digits; no prefix matching.
    pub fn option_for(&self, digits: &str) -> Option<&IvrMenuOption> {
        self.options.iter().find(|o| o.digits == digits)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceRoom {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub max_participants: u32,
    #[serde(skip_serializing)]
    pub pin: Option<String>,
    pub mute_on_entry: bool,
    pub announce_join_leave: bool,
    pub record: bool,
}
