//! Call routing orchestration
//!
//! Every entry point here is total: whatever goes wrong (unknown number,
//! dangling reference, store failure, depth blowout), the caller hears a
//! spoken apology and a hangup rather than dead air. HTTP status handling
//! lives in the handlers; this module only ever produces CXML.

use std::sync::Arc;

use pbx_core::{Clock, OrganizationId};
use pbx_store::{IvrMenu, IvrPrompt, RoutingStore, RoutingTarget};
use uuid::Uuid;

use crate::cxml::{CxmlResponse, Dial, DialTarget};
use crate::number;
use crate::resolver::{ResolvedAction, Resolver};
use crate::webhook::DialStatus;

const GATHER_TIMEOUT_SECS: u32 = 5;
const INVALID_OPTION_PROMPT: &str = "Sorry, that is not a valid option.";
const OUT_OF_SERVICE_PROMPT: &str =
    "The number you have dialed is not in service. Please check the number and try again.";

pub struct RoutingEngine {
    store: Arc<dyn RoutingStore>,
    resolver: Resolver,
}

impl RoutingEngine {
    pub fn new(store: Arc<dyn RoutingStore>, clock: Arc<dyn Clock>) -> Self {
        let resolver = Resolver::new(store.clone(), clock);
        Self { store, resolver }
    }

    /// Route a fresh inbound call. The dialed number is tried as an external
    /// DID first, then as an internal extension number.
    pub async fn route_inbound(&self, org: OrganizationId, call_id: &str, to: &str) -> CxmlResponse {
        match self.inbound_target(org, to).await {
            Ok(Some(target)) => {
                tracing::info!(org_id = %org, call_id, to, "routing inbound call");
                self.resolve_and_render(org, &target).await
            }
            Ok(None) => {
                tracing::info!(org_id = %org, call_id, to, "dialed number is not provisioned");
                CxmlResponse::say_with_hangup(OUT_OF_SERVICE_PROMPT)
            }
            Err(err) => {
                tracing::error!(org_id = %org, call_id, to, error = %err, "inbound lookup failed");
                CxmlResponse::say_with_hangup(
                    "We are unable to connect your call at this time. Please try again later.",
                )
            }
        }
    }

    async fn inbound_target(
        &self,
        org: OrganizationId,
        to: &str,
    ) -> Result<Option<RoutingTarget>, pbx_store::StoreError> {
        if let Some(e164) = number::normalize(to) {
            if let Some(did) = self.store.did_by_number(&e164).await? {
                if did.organization_id == org && did.status.is_active() {
                    return Ok(Some(did.routing));
                }
                // A DID owned by another tenant is indistinguishable from an
                // unprovisioned number to this caller
                return Ok(None);
            }
        }
        if let Some(ext_number) = number::as_extension_number(to) {
            if let Some(ext) = self.store.extension_by_number(org, &ext_number).await? {
                return Ok(Some(RoutingTarget::Extension { id: ext.id }));
            }
        }
        Ok(None)
    }

    /// IVR digit callback. `turn` counts failed attempts so far; it comes
    /// back from the gather action URL, so repeated invalid input is bounded
    /// without any server-side session state.
    pub async fn handle_ivr_input(
        &self,
        org: OrganizationId,
        call_id: &str,
        menu_id: Uuid,
        digits: Option<&str>,
        turn: u8,
    ) -> CxmlResponse {
        let menu = match self.store.ivr_menu(org, menu_id).await {
            Ok(Some(menu)) => menu,
            Ok(None) => {
                tracing::warn!(org_id = %org, call_id, menu_id = %menu_id, "ivr menu not found");
                return CxmlResponse::say_with_hangup("This menu is currently unavailable.");
            }
            Err(err) => {
                tracing::error!(org_id = %org, call_id, error = %err, "ivr menu lookup failed");
                return CxmlResponse::say_with_hangup(
                    "We are unable to connect your call at this time. Please try again later.",
                );
            }
        };

        if let Some(digits) = digits.filter(|d| !d.is_empty()) {
            if let Some(option) = menu.option_for(digits) {
                tracing::info!(org_id = %org, call_id, menu_id = %menu_id, digits, "ivr option selected");
                let target = option.target.clone();
                return self.resolve_and_render(org, &target).await;
            }
            tracing::debug!(org_id = %org, call_id, menu_id = %menu_id, digits, "invalid ivr input");
        }

        // Invalid or missing input burns one turn
        let next_turn = turn.saturating_add(1);
        if next_turn >= menu.max_turns {
            tracing::info!(org_id = %org, call_id, menu_id = %menu_id, "ivr turns exhausted, failing over");
            let failover = menu.failover.clone();
            return self.resolve_and_render(org, &failover).await;
        }
        self.render_menu(&menu, next_turn, true)
    }

    /// Ring-group dial-status callback. A connected bridge ends the call;
    /// anything else advances the dial plan.
    pub async fn handle_ring_group_callback(
        &self,
        org: OrganizationId,
        call_id: &str,
        group_id: Uuid,
        member_index: usize,
        attempt: u32,
        status: Option<DialStatus>,
    ) -> CxmlResponse {
        if status.is_some_and(|s| s.is_connected()) {
            return CxmlResponse::simple_hangup();
        }

        tracing::info!(
            org_id = %org,
            call_id,
            ring_group_id = %group_id,
            member_index,
            attempt,
            ?status,
            "advancing ring group"
        );
        match self
            .resolver
            .advance_ring_group(org, group_id, member_index, attempt)
            .await
        {
            Ok(action) => self.render(org, action),
            Err(err) => {
                tracing::warn!(org_id = %org, call_id, ring_group_id = %group_id, error = %err, "ring group advance failed");
                CxmlResponse::say_with_hangup(err.spoken_message())
            }
        }
    }

    async fn resolve_and_render(&self, org: OrganizationId, target: &RoutingTarget) -> CxmlResponse {
        match self.resolver.resolve(org, target, 0).await {
            Ok(action) => self.render(org, action),
            Err(err) => {
                tracing::warn!(org_id = %org, error = %err, "resolution failed");
                CxmlResponse::say_with_hangup(err.spoken_message())
            }
        }
    }

    fn render(&self, _org: OrganizationId, action: ResolvedAction) -> CxmlResponse {
        match action {
            ResolvedAction::DialUris { targets, timeout_secs } => {
                CxmlResponse::new().dial(Dial::to_targets(targets).with_timeout(timeout_secs))
            }
            ResolvedAction::StepDial {
                group_id,
                member_index,
                attempt,
                target,
                timeout_secs,
            } => {
                // Relative action URL; the platform resolves it against the
                // webhook base and posts the dial outcome there
                let action_url = format!(
                    "/webhooks/voice/ring-group/{}?member={}&attempt={}",
                    group_id, member_index, attempt
                );
                CxmlResponse::new().dial(
                    Dial::to_targets(vec![target])
                        .with_timeout(timeout_secs)
                        .with_action(action_url),
                )
            }
            ResolvedAction::Menu { menu, turn } => self.render_menu(&menu, turn, false),
            ResolvedAction::JoinConference(join) => CxmlResponse::new()
                .dial(Dial::to_targets(vec![DialTarget::Conference(join)])),
            ResolvedAction::DialService(service) => CxmlResponse::new()
                .dial(Dial::to_targets(vec![DialTarget::Service(service)])),
            ResolvedAction::Voicemail { mailbox } => CxmlResponse::send_to_voicemail(mailbox),
            ResolvedAction::Hangup => CxmlResponse::simple_hangup(),
        }
    }

    /// Prompt plus gather, with a redirect so silence also burns a turn.
    fn render_menu(&self, menu: &IvrMenu, turn: u8, after_invalid: bool) -> CxmlResponse {
        let action_url = format!("/webhooks/voice/ivr/{}?turn={}", menu.id, turn);
        let max_digits = menu
            .options
            .iter()
            .map(|o| o.digits.len() as u32)
            .max()
            .unwrap_or(1);

        let mut prompt = CxmlResponse::new();
        if after_invalid {
            prompt = prompt.say(INVALID_OPTION_PROMPT);
        }
        prompt = match &menu.prompt {
            IvrPrompt::Tts { text, voice, language } => {
                prompt.say_voice(text.clone(), voice.clone(), language.clone())
            }
            IvrPrompt::Recording { url } => prompt.play(url.clone()),
        };

        CxmlResponse::new()
            .gather(
                action_url.clone(),
                Some(GATHER_TIMEOUT_SECS),
                Some(1),
                Some(max_digits),
                prompt,
            )
            .redirect(action_url)
    }
}
