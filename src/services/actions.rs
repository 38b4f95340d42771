//! Location action execution
//!
//! Turns the symbolic action tokens configured on a location into device
//! commands. Devices are discovered by tag among the location's point items
//! (direct members plus points of member equipment).

use crate::domain::action::ActionToken;
use crate::domain::types::ItemDef;
use crate::infra::metrics::Metrics;
use crate::infra::registry::ItemRegistry;
use crate::io::EgressSender;
use tracing::{debug, info, warn};

const LIGHT_TAGS: [&str; 2] = ["Light", "Lighting"];
const SCENE_TAG: &str = "Scene";
const AV_EQUIPMENT_TAGS: [&str; 2] = ["Receiver", "Speaker"];
const POWER_TAG: &str = "Power";
const EXHAUST_FAN_TAG: &str = "ExhaustFan";

/// Resolves and issues device commands for location actions
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    daylight_item: String,
}

impl ActionExecutor {
    pub fn new(daylight_item: &str) -> Self {
        Self { daylight_item: daylight_item.to_string() }
    }

    /// `Some(true)` when the daylight indicator is OFF, `None` when it is missing
    pub fn is_dark(&self, registry: &ItemRegistry) -> Option<bool> {
        registry.state(&self.daylight_item).map(|state| state == "OFF")
    }

    /// Names of the devices a token acts on, sorted
    pub fn targets(&self, registry: &ItemRegistry, location: &str, token: ActionToken) -> Vec<String> {
        let is_av = |point: &ItemDef| {
            AV_EQUIPMENT_TAGS.iter().any(|t| point.has_tag(t))
                || registry
                    .equipment_of(&point.name)
                    .iter()
                    .any(|e| AV_EQUIPMENT_TAGS.iter().any(|t| e.has_tag(t)))
        };
        let is_fan = |point: &ItemDef| {
            point.has_tag(EXHAUST_FAN_TAG)
                || registry.equipment_of(&point.name).iter().any(|e| e.has_tag(EXHAUST_FAN_TAG))
        };

        match token {
            ActionToken::SceneOn | ActionToken::SceneOnIfDark | ActionToken::SceneOff => {
                names(registry.find_by_tag(location, SCENE_TAG))
            }
            ActionToken::LightsOn | ActionToken::LightsOnIfDark | ActionToken::LightsOff => names(
                registry.point_items(location).into_iter().filter(|p| LIGHT_TAGS.iter().any(|t| p.has_tag(t))),
            ),
            ActionToken::AvOn | ActionToken::AvOff => {
                names(registry.find_by_tag(location, POWER_TAG).into_iter().filter(|&p| is_av(p)))
            }
            ActionToken::ExhaustFansOn | ActionToken::ExhaustFansOff => {
                names(registry.point_items(location).into_iter().filter(|&p| is_fan(p)))
            }
        }
    }

    /// Run an action list for a location, returning the number of commands issued
    pub fn execute(
        &self,
        registry: &ItemRegistry,
        egress: &EgressSender,
        metrics: &Metrics,
        location: &str,
        actions: &[ActionToken],
    ) -> usize {
        let mut issued = 0;
        for &token in actions {
            if token.requires_darkness() {
                match self.is_dark(registry) {
                    Some(true) => {}
                    Some(false) => {
                        debug!(location = %location, action = %token, "action_skipped_daylight");
                        continue;
                    }
                    None => {
                        warn!(location = %location, action = %token, daylight_item = %self.daylight_item, "daylight_item_missing");
                        continue;
                    }
                }
            }

            let targets = self.targets(registry, location, token);
            if targets.is_empty() {
                debug!(location = %location, action = %token, "action_no_devices");
                continue;
            }
            for target in &targets {
                egress.send_command(target, token.command());
                metrics.record_action_command();
                issued += 1;
            }
            info!(location = %location, action = %token, devices = ?targets, "action_executed");
        }
        issued
    }
}

fn names<'a>(items: impl IntoIterator<Item = &'a ItemDef>) -> Vec<String> {
    items.into_iter().map(|item| item.name.clone()).collect()
}
