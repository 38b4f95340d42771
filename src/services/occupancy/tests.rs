//! Tests for the occupancy engine

use super::*;
use crate::domain::types::{ItemDef, ItemKind, Metadata, StatusItem, EVENT_NAMESPACE, SETTINGS_NAMESPACE};
use crate::io::{create_egress_channel, EgressMessage};
use std::time::Duration;
use tokio::time::advance;

/// Test harness that keeps the egress receiver alive so `try_send` succeeds
struct TestGraph {
    graph: LocationGraph,
    egress_rx: mpsc::Receiver<EgressMessage>,
}

impl std::ops::Deref for TestGraph {
    type Target = LocationGraph;
    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl std::ops::DerefMut for TestGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

impl TestGraph {
    fn sensor(&mut self, item: &str, state: &str) {
        self.graph.process_event(ItemEvent::state_changed(item, state));
    }

    fn command(&mut self, item: &str, command: &str) {
        self.graph.process_event(ItemEvent::command(item, command));
    }

    async fn advance_secs(&mut self, secs: u64) {
        advance(Duration::from_secs(secs)).await;
        self.graph.fire_due_timers(Instant::now());
    }

    fn drain(&mut self) -> Vec<EgressMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.egress_rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Device commands issued since the last drain
    fn device_commands(&mut self) -> Vec<(String, String)> {
        self.drain()
            .into_iter()
            .filter_map(|msg| match msg {
                EgressMessage::Command { item, command } => Some((item, command)),
                EgressMessage::StateUpdate { .. } => None,
            })
            .collect()
    }

    fn remaining_secs(&self, location: &str) -> Option<u64> {
        self.graph.nodes.get(location)?.timer.remaining(Instant::now()).map(|d| d.as_secs())
    }

    fn status(&self, location: &str, status: StatusItem) -> Option<String> {
        self.graph.registry.state(&status.item_name(location)).map(str::to_string)
    }

    /// Nodes that are vacant must not report an expiry
    fn assert_vacant_invariant(&self) {
        for node in self.graph.nodes.values() {
            if !node.is_occupied() {
                assert!(node.occupied_until().is_none(), "{} vacant with an expiry", node.name());
            }
        }
    }
}

fn settings(minutes: u64) -> Metadata {
    Metadata::new("").with("Time", &minutes.to_string())
}

fn sensor(group: &str, name: &str, item_type: &str, metadata: Metadata) -> ItemDef {
    ItemDef::new(name, ItemKind::Point)
        .with_type(item_type)
        .in_group(group)
        .with_metadata(EVENT_NAMESPACE, metadata)
}

/// gHouse(30) > gGround(20) > { gLounge(10), gKitchen(5) > gPantry(2) }
fn model_items() -> Vec<ItemDef> {
    vec![
        ItemDef::new("gHouse", ItemKind::Location).with_metadata(SETTINGS_NAMESPACE, settings(30)),
        ItemDef::new("gGround", ItemKind::Location)
            .in_group("gHouse")
            .with_metadata(SETTINGS_NAMESPACE, settings(20)),
        ItemDef::new("gLounge", ItemKind::Location).in_group("gGround").with_metadata(
            SETTINGS_NAMESPACE,
            settings(10).with("OccupiedActions", "LightsOn").with("VacantActions", "LightsOff"),
        ),
        ItemDef::new("gKitchen", ItemKind::Location)
            .in_group("gGround")
            .with_metadata(SETTINGS_NAMESPACE, settings(5)),
        ItemDef::new("gPantry", ItemKind::Location)
            .in_group("gKitchen")
            .with_metadata(SETTINGS_NAMESPACE, settings(2)),
        ItemDef::new("Lounge_Lamp", ItemKind::Point).in_group("gLounge").tagged("Light"),
        sensor("gLounge", "Lounge_Switch", "Switch", Metadata::new("OnOff")),
        sensor("gLounge", "Lounge_Dimmer", "Dimmer", Metadata::new("Switch")),
        sensor(
            "gLounge",
            "Lounge_TV",
            "String",
            Metadata::new("AnyChange").with("ModifyBehavior", "OnlyIfLocationVacant"),
        ),
        sensor("gLounge", "Lounge_Window", "Contact", Metadata::new("Contact")),
        sensor("gKitchen", "Kitchen_Presence", "Contact", Metadata::new("ContactPresence")),
        sensor("gKitchen", "Kitchen_Door", "Contact", Metadata::new("ContactDoor").with("EndOccupiedTime", "0")),
        sensor(
            "gKitchen",
            "Kitchen_Stove",
            "Switch",
            Metadata::new("OnOff").with("ModifyBehavior", "OccupiedUntilEnded"),
        ),
        sensor(
            "gPantry",
            "Pantry_Motion",
            "Contact",
            Metadata::new("ContactMotion")
                .with("ModifyBehavior", "OverrideTimesIfVacant")
                .with("BeginOccupiedTime", "1")
                .with("EndOccupiedTime", "3"),
        ),
        ItemDef::new("Pantry_Plug", ItemKind::Point).with_type("Switch").in_group("gPantry"),
        ItemDef::new("DayLight_Switch", ItemKind::Point).with_type("Switch").with_state("OFF"),
    ]
}

fn create_test_graph() -> TestGraph {
    create_test_graph_with(Config::default(), model_items())
}

fn create_test_graph_with(config: Config, items: Vec<ItemDef>) -> TestGraph {
    let metrics = Arc::new(Metrics::new());
    let (egress, egress_rx) = create_egress_channel(4096, metrics.clone());
    let registry = ItemRegistry::from_items(items).unwrap();
    let mut graph = LocationGraph::new(&config, registry, egress, metrics);
    graph.load_locations();
    let mut harness = TestGraph { graph, egress_rx };
    harness.drain();
    harness
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_locations_linked_from_registry_groups() {
    let graph = create_test_graph();

    assert_eq!(graph.location_count(), 5);
    assert_eq!(graph.location("gHouse").unwrap().parent(), None);
    assert_eq!(graph.location("gPantry").unwrap().parent(), Some("gKitchen"));
    let children: Vec<&str> = graph.location("gGround").unwrap().children().collect();
    assert_eq!(children, vec!["gKitchen", "gLounge"]);

    for status in StatusItem::ALL {
        let item = graph.registry().get(&status.item_name("gLounge")).unwrap();
        assert!(item.has_tag(status.tag()));
        assert_eq!(graph.registry().parent_location(&item.name), Some("gLounge"));
    }
    assert_eq!(graph.metrics.report().locations, 5);
}

#[tokio::test(start_paused = true)]
async fn test_initial_occupied_flag_read_from_state_item() {
    let mut items = model_items();
    items.push(StatusItem::State.definition("gKitchen").with_state("ON"));
    let graph = create_test_graph_with(Config::default(), items);

    assert!(graph.is_occupied("gKitchen"));
    assert!(!graph.is_occupied("gLounge"));
    // no countdown is recovered
    assert!(graph.location("gKitchen").unwrap().occupied_until().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_location_added_and_removed_at_runtime() {
    let mut graph = create_test_graph();

    graph.process_event(ItemEvent::Added(
        ItemDef::new("gCellar", ItemKind::Location)
            .in_group("gHouse")
            .with_metadata(SETTINGS_NAMESPACE, settings(1)),
    ));
    assert!(graph.location("gHouse").unwrap().children().any(|c| c == "gCellar"));
    assert!(graph.registry().contains("gCellar_Occupancy_Control"));

    graph.command("gCellar_Occupancy_State", "ON");
    assert!(graph.is_occupied("gCellar"));
    assert!(graph.is_occupied("gHouse"));

    graph.process_event(ItemEvent::Removed { name: "gCellar".to_string() });
    assert!(graph.location("gCellar").is_none());
    assert!(!graph.registry().contains("gCellar_Occupancy_Control"));
    assert!(!graph.location("gHouse").unwrap().children().any(|c| c == "gCellar"));

    // the removed location's countdown is stale
    graph.advance_secs(61).await;
    assert_eq!(graph.metrics.stale_timers_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_location_cycle_is_cut() {
    let items = vec![
        ItemDef::new("gA", ItemKind::Location).in_group("gB").with_metadata(SETTINGS_NAMESPACE, settings(1)),
        ItemDef::new("gB", ItemKind::Location).in_group("gA").with_metadata(SETTINGS_NAMESPACE, settings(1)),
    ];
    let mut graph = create_test_graph_with(Config::default(), items);

    // gA is processed first and loses its parent link
    assert_eq!(graph.location("gA").unwrap().parent(), None);
    assert_eq!(graph.location("gB").unwrap().parent(), Some("gA"));
    assert!(graph.render_tree().starts_with("gA [vacant]"));

    graph.set_occupied("gB", "test", None);
    assert!(graph.is_occupied("gA"));
}

#[tokio::test(start_paused = true)]
async fn test_location_settings_updated() {
    let mut graph = create_test_graph();

    let mut lounge = graph.registry().get("gLounge").unwrap().clone();
    lounge.metadata.insert(SETTINGS_NAMESPACE.to_string(), settings(45));
    graph.process_event(ItemEvent::Updated(lounge));

    assert_eq!(graph.location("gLounge").unwrap().settings().time_minutes, Some(45));
    assert!(graph.location("gLounge").unwrap().settings().occupied_actions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_metadata_created_when_enabled() {
    let config = Config::default().with_create_location_metadata(true).with_create_event_metadata(true);
    let items = vec![
        ItemDef::new("gAttic", ItemKind::Location),
        ItemDef::new("Attic_Motion", ItemKind::Point).with_type("Contact").in_group("gAttic"),
    ];
    let mut graph = create_test_graph_with(config, items);

    assert!(graph.registry().metadata("gAttic", SETTINGS_NAMESPACE).is_some());
    assert!(graph.registry().metadata("Attic_Motion", EVENT_NAMESPACE).is_none());

    graph.sensor("Attic_Motion", "OPEN");
    assert!(!graph.is_occupied("gAttic"));
    assert_eq!(graph.registry().metadata("Attic_Motion", EVENT_NAMESPACE), Some(&Metadata::default()));
}

// ============================================================================
// Occupied / vacant transitions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_switch_on_occupies_with_default_duration() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");

    assert!(graph.is_occupied("gLounge"));
    assert_eq!(graph.remaining_secs("gLounge"), Some(600));
    assert_eq!(graph.status("gLounge", StatusItem::State).as_deref(), Some("ON"));

    let expected = graph
        .location("gLounge")
        .unwrap()
        .occupied_until()
        .unwrap()
        .format(graph.time_format.as_str())
        .to_string();
    assert_eq!(graph.status("gLounge", StatusItem::Time), Some(expected));

    // parents resolve their own durations
    assert!(graph.is_occupied("gGround"));
    assert_eq!(graph.remaining_secs("gGround"), Some(1200));
    assert_eq!(graph.remaining_secs("gHouse"), Some(1800));
    assert!(!graph.is_occupied("gKitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_occupied_actions_fire_once() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");
    graph.sensor("Lounge_Dimmer", "40");

    let commands = graph.device_commands();
    assert_eq!(commands, vec![("Lounge_Lamp".to_string(), "ON".to_string())]);
    assert_eq!(graph.metrics.occupied_transitions_total(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_only_if_vacant_sensor_ignored_when_occupied() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");
    graph.advance_secs(60).await;
    graph.sensor("Lounge_TV", "Playing");

    assert_eq!(graph.remaining_secs("gLounge"), Some(540));
}

#[tokio::test(start_paused = true)]
async fn test_any_change_occupies_vacant_location() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_TV", "Playing");
    assert!(graph.is_occupied("gLounge"));
    assert_eq!(graph.remaining_secs("gLounge"), Some(600));
}

#[tokio::test(start_paused = true)]
async fn test_timer_expiry_vacates_and_runs_vacant_actions() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");
    graph.drain();

    graph.advance_secs(599).await;
    assert!(graph.is_occupied("gLounge"));

    graph.advance_secs(1).await;
    assert!(!graph.is_occupied("gLounge"));
    assert_eq!(graph.status("gLounge", StatusItem::Time).as_deref(), Some("Vacant"));
    assert_eq!(graph.status("gLounge", StatusItem::State).as_deref(), Some("OFF"));
    assert_eq!(graph.device_commands(), vec![("Lounge_Lamp".to_string(), "OFF".to_string())]);
    assert!(graph.is_occupied("gGround"));
    assert_eq!(graph.metrics.report().timer_expiries_total, 1);
    graph.assert_vacant_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_retrigger_supersedes_previous_timer() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");
    graph.advance_secs(300).await;
    graph.sensor("Lounge_Switch", "OFF");
    graph.sensor("Lounge_Switch", "ON");
    assert_eq!(graph.remaining_secs("gLounge"), Some(600));

    graph.advance_secs(400).await;
    assert!(graph.is_occupied("gLounge"), "superseded expiry must not fire");
    assert_eq!(graph.metrics.stale_timers_total(), 1);

    graph.advance_secs(200).await;
    assert!(!graph.is_occupied("gLounge"));
}

#[tokio::test(start_paused = true)]
async fn test_chatty_sensor_keeps_timer_heap_bounded() {
    let mut graph = create_test_graph();

    for _ in 0..500 {
        graph.sensor("Lounge_Switch", "ON");
        assert!(graph.timers.len() <= MIN_COMPACT_LEN + 1);
    }
    assert!(graph.metrics.stale_timers_total() > 0);
    assert_eq!(graph.remaining_secs("gLounge"), Some(600));

    graph.advance_secs(600).await;
    assert!(!graph.is_occupied("gLounge"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_start_cancel_start() {
    let mut graph = create_test_graph();
    graph.set_occupied("gPantry", "test", None);

    graph.cancel_timer("gPantry");
    assert!(graph.location("gPantry").unwrap().occupied_until().is_none());

    graph.start_timer("gPantry", Duration::from_secs(300));
    assert_eq!(graph.remaining_secs("gPantry"), Some(300));

    graph.advance_secs(120).await;
    assert!(graph.is_occupied("gPantry"), "cancelled expiry must not fire");
    graph.advance_secs(180).await;
    assert!(!graph.is_occupied("gPantry"));
}

#[tokio::test(start_paused = true)]
async fn test_vacant_cascades_to_subtree() {
    let mut graph = create_test_graph();

    graph.sensor("Pantry_Motion", "OPEN");
    graph.sensor("Lounge_Switch", "ON");
    assert!(graph.is_occupied("gPantry"));

    graph.command("gGround_Occupancy_State", "OFF");

    for location in ["gGround", "gLounge", "gKitchen", "gPantry"] {
        assert!(!graph.is_occupied(location), "{location} still occupied");
    }
    assert!(graph.is_occupied("gHouse"));
    graph.assert_vacant_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_vacant_actions_repeat_on_every_vacate() {
    let mut graph = create_test_graph();

    graph.set_vacant("gLounge", "test");
    graph.set_vacant("gLounge", "test");

    let offs = graph.device_commands().into_iter().filter(|(_, c)| c == "OFF").count();
    assert_eq!(offs, 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_duration_vacates_immediately() {
    let mut graph = create_test_graph();

    graph.set_occupied("gLounge", "test", Some(Duration::ZERO));

    assert!(!graph.is_occupied("gLounge"));
    assert!(!graph.is_occupied("gGround"), "zero duration does not propagate");
}

#[tokio::test(start_paused = true)]
async fn test_location_without_time_stays_occupied() {
    let items = vec![ItemDef::new("gGarage", ItemKind::Location)];
    let mut graph = create_test_graph_with(Config::default(), items);

    graph.command("gGarage_Occupancy_State", "ON");
    assert!(graph.is_occupied("gGarage"));
    assert!(graph.location("gGarage").unwrap().occupied_until().is_none());
    assert!(graph.timers.is_empty());
}

// ============================================================================
// Locking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_lock_pauses_and_unlock_resumes_countdown() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Switch", "ON");
    graph.advance_secs(120).await;

    graph.lock("gLounge", None);
    let snapshot = graph.snapshot("gLounge").unwrap();
    assert_eq!(snapshot.frozen_remaining_secs, Some(480));
    assert!(snapshot.occupied_until.is_none());
    assert_eq!(graph.status("gLounge", StatusItem::Lock).as_deref(), Some("ON"));
    assert_eq!(graph.status("gLounge", StatusItem::Time).as_deref(), Some("Locked"));

    graph.advance_secs(1000).await;
    assert!(graph.is_occupied("gLounge"));

    graph.unlock("gLounge");
    assert_eq!(graph.remaining_secs("gLounge"), Some(480));
    assert_eq!(graph.status("gLounge", StatusItem::Lock).as_deref(), Some("OFF"));
    assert!(graph.snapshot("gLounge").unwrap().frozen_remaining_secs.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lock_cascades_to_all_descendants() {
    let mut graph = create_test_graph();

    graph.command("gGround_Occupancy_Control", "LOCK");

    for location in ["gGround", "gLounge", "gKitchen", "gPantry"] {
        assert!(graph.is_locked(location), "{location} not locked");
    }
    assert!(!graph.is_locked("gHouse"));
    assert_eq!(graph.metrics.report().locations_locked, 4);

    graph.unlock("gGround");
    for location in ["gGround", "gLounge", "gKitchen", "gPantry"] {
        assert!(!graph.is_locked(location), "{location} still locked");
    }
}

#[tokio::test(start_paused = true)]
async fn test_clear_lock_releases_all_levels() {
    let mut graph = create_test_graph();

    for _ in 0..5 {
        graph.lock("gPantry", None);
    }
    assert_eq!(graph.lock_depth("gPantry"), Some(5));

    graph.command("gPantry_Occupancy_Control", "CLEARLOCKS");
    assert_eq!(graph.lock_depth("gPantry"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_unlock_clamped_at_zero() {
    let mut graph = create_test_graph();
    graph.set_occupied("gPantry", "test", None);
    graph.advance_secs(30).await;

    graph.unlock("gPantry");

    assert_eq!(graph.lock_depth("gPantry"), Some(0));
    assert_eq!(graph.remaining_secs("gPantry"), Some(90), "clamped unlock restarts nothing");
    assert_eq!(graph.metrics.guard_rejections_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vacate_rejected_with_locked_child() {
    let mut graph = create_test_graph();

    graph.set_occupied("gPantry", "test", None);
    graph.lock("gPantry", None);

    graph.set_vacant("gKitchen", "test");

    assert!(graph.is_occupied("gKitchen"));
    assert!(graph.is_occupied("gPantry"));
    assert_eq!(graph.lock_depth("gPantry"), Some(1));
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_locked_location_ignores_sensors() {
    let mut graph = create_test_graph();

    graph.lock("gLounge", None);
    graph.sensor("Lounge_Switch", "ON");

    assert!(!graph.is_occupied("gLounge"));
    assert!(!graph.is_occupied("gGround"));
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout_unlocks_location_and_cascade() {
    let mut graph = create_test_graph();

    graph.command("gKitchen_Occupancy_Control", "LOCK,60");
    assert!(graph.is_locked("gKitchen"));
    assert!(graph.is_locked("gPantry"));

    graph.advance_secs(59).await;
    assert!(graph.is_locked("gKitchen"));

    graph.advance_secs(1).await;
    assert!(!graph.is_locked("gKitchen"));
    assert!(!graph.is_locked("gPantry"));
    assert_eq!(graph.status("gKitchen", StatusItem::Time).as_deref(), Some("Vacant"));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_unlock_makes_lock_timer_stale() {
    let mut graph = create_test_graph();

    graph.command("gKitchen_Occupancy_Control", "LOCK,60");
    graph.command("gKitchen_Occupancy_Control", "UNLOCK");
    graph.command("gKitchen_Occupancy_Control", "LOCK");

    graph.advance_secs(120).await;
    assert!(graph.is_locked("gKitchen"), "old lock timer must not release the new lock");
    assert_eq!(graph.metrics.stale_timers_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_control_commands_ignored() {
    let mut graph = create_test_graph();

    graph.command("gKitchen_Occupancy_Control", "LOCK,soon");
    graph.command("gKitchen_Occupancy_Control", "FREEZE");
    graph.command("gKitchen_Occupancy_State", "MAYBE");

    assert!(!graph.is_locked("gKitchen"));
    assert!(!graph.is_occupied("gKitchen"));
    assert_eq!(graph.metrics.report().command_events_total, 0);
}

// ============================================================================
// Sensor roles and behaviors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_presence_holds_lock_while_open() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Presence", "OPEN");
    assert!(graph.is_occupied("gKitchen"));
    assert!(graph.is_locked("gKitchen"));

    // would vacate immediately if the location were not locked
    graph.sensor("Kitchen_Door", "CLOSED");
    assert!(graph.is_occupied("gKitchen"));

    graph.advance_secs(3600).await;
    assert!(graph.is_occupied("gKitchen"));

    graph.sensor("Kitchen_Presence", "CLOSED");
    assert!(!graph.is_locked("gKitchen"));
    assert_eq!(graph.remaining_secs("gKitchen"), Some(300));

    graph.advance_secs(300).await;
    assert!(!graph.is_occupied("gKitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_presence_events_keep_single_lock() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Presence", "OPEN");
    graph.sensor("Kitchen_Presence", "OPEN");
    assert_eq!(graph.lock_depth("gKitchen"), Some(1));

    graph.sensor("Kitchen_Presence", "CLOSED");
    graph.sensor("Kitchen_Presence", "CLOSED");
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
    assert_eq!(graph.metrics.guard_rejections_total(), 1, "only the ignored second begin");
}

#[tokio::test(start_paused = true)]
async fn test_occupied_until_ended_holds_until_end_event() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Stove", "ON");
    assert!(graph.is_locked("gKitchen"));

    graph.advance_secs(900).await;
    assert!(graph.is_occupied("gKitchen"));

    graph.sensor("Kitchen_Stove", "OFF");
    assert!(!graph.is_locked("gKitchen"));
    assert_eq!(graph.remaining_secs("gKitchen"), Some(300));

    graph.sensor("Kitchen_Stove", "OFF");
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_end_override_zero_vacates() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Door", "OPEN");
    assert!(graph.is_occupied("gKitchen"));

    graph.sensor("Kitchen_Door", "CLOSED");
    assert!(!graph.is_occupied("gKitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_override_times_if_vacant() {
    let mut graph = create_test_graph();

    // vacant: the sensor's begin override is discarded for the location default
    graph.sensor("Pantry_Motion", "OPEN");
    assert_eq!(graph.remaining_secs("gPantry"), Some(120));

    graph.sensor("Pantry_Motion", "OPEN");
    assert_eq!(graph.remaining_secs("gPantry"), Some(60));

    // end override refreshes without running actions
    graph.drain();
    graph.sensor("Pantry_Motion", "CLOSED");
    assert_eq!(graph.remaining_secs("gPantry"), Some(180));
    assert!(graph.device_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_refresh_skipped_when_vacant() {
    let mut graph = create_test_graph();

    graph.sensor("Pantry_Motion", "CLOSED");
    assert!(!graph.is_occupied("gPantry"));
    assert!(graph.location("gPantry").unwrap().occupied_until().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_end_without_override_changes_nothing() {
    let mut graph = create_test_graph();

    graph.sensor("Lounge_Window", "OPEN");
    graph.advance_secs(100).await;
    graph.sensor("Lounge_Window", "CLOSED");

    assert!(graph.is_occupied("gLounge"));
    assert_eq!(graph.remaining_secs("gLounge"), Some(500));
}

#[tokio::test(start_paused = true)]
async fn test_unconfigured_and_status_items_are_not_sensors() {
    let mut graph = create_test_graph();

    graph.sensor("Pantry_Plug", "ON");
    graph.sensor("gPantry_Occupancy_Lock", "ON");
    graph.sensor("Lounge_Lamp", "ON");

    for location in ["gPantry", "gLounge"] {
        assert!(!graph.is_occupied(location));
    }
    assert!(matches!(
        graph.location("gPantry").unwrap().bindings.get("Pantry_Plug").map(|b| b.handler),
        Some(SensorHandler::Ignored)
    ));
    assert!(!graph.location("gPantry").unwrap().bindings.contains_key("gPantry_Occupancy_Lock"));
}

#[tokio::test(start_paused = true)]
async fn test_sensor_binding_refreshed_on_update() {
    let mut graph = create_test_graph();

    graph.sensor("Pantry_Plug", "ON");
    assert!(!graph.is_occupied("gPantry"));

    let plug = graph
        .registry()
        .get("Pantry_Plug")
        .unwrap()
        .clone()
        .with_metadata(EVENT_NAMESPACE, Metadata::new("OnOff"));
    graph.process_event(ItemEvent::Updated(plug));

    graph.sensor("Pantry_Plug", "ON");
    assert!(graph.is_occupied("gPantry"));
}

#[tokio::test(start_paused = true)]
async fn test_presence_lock_survives_sensor_update() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Presence", "OPEN");
    assert_eq!(graph.lock_depth("gKitchen"), Some(1));

    let presence = graph.registry().get("Kitchen_Presence").unwrap().clone();
    graph.process_event(ItemEvent::Updated(presence));
    assert_eq!(graph.lock_depth("gKitchen"), Some(1));

    graph.sensor("Kitchen_Presence", "CLOSED");
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
    assert_eq!(graph.remaining_secs("gKitchen"), Some(300));
}

#[tokio::test(start_paused = true)]
async fn test_role_change_releases_presence_lock() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Presence", "OPEN");
    let contact = graph
        .registry()
        .get("Kitchen_Presence")
        .unwrap()
        .clone()
        .with_metadata(EVENT_NAMESPACE, Metadata::new("Contact"));
    graph.process_event(ItemEvent::Updated(contact));

    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
    graph.sensor("Kitchen_Presence", "CLOSED");
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
    assert_eq!(graph.metrics.guard_rejections_total(), 0, "no unlock below zero");
}

#[tokio::test(start_paused = true)]
async fn test_removed_sensor_releases_its_lock() {
    let mut graph = create_test_graph();

    graph.sensor("Kitchen_Stove", "ON");
    assert!(graph.is_locked("gKitchen"));

    graph.process_event(ItemEvent::Removed { name: "Kitchen_Stove".to_string() });
    assert_eq!(graph.lock_depth("gKitchen"), Some(0));
    assert_eq!(graph.remaining_secs("gKitchen"), Some(300));

    graph.advance_secs(300).await;
    assert!(!graph.is_occupied("gKitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_bus_update_without_metadata_keeps_settings() {
    let mut graph = create_test_graph();

    let location = crate::io::mqtt::parse_item_event(
        "openhab",
        "openhab/items/gKitchen/updated",
        r#"[{"name":"gKitchen","label":"Kitchen area","type":"Group","tags":["Location"],"groupNames":["gGround"]},
            {"name":"gKitchen","label":"Kitchen","type":"Group","tags":["Location"],"groupNames":["gGround"]}]"#,
    )
    .unwrap();
    graph.process_event(location);
    assert_eq!(graph.location("gKitchen").unwrap().settings().time_minutes, Some(5));
    assert_eq!(graph.location("gKitchen").unwrap().parent(), Some("gGround"));

    let sensor = crate::io::mqtt::parse_item_event(
        "openhab",
        "openhab/items/Kitchen_Door/updated",
        r#"[{"name":"Kitchen_Door","label":"Back door","type":"Contact","groupNames":["gKitchen"]},
            {"name":"Kitchen_Door","label":"Door","type":"Contact","groupNames":["gKitchen"]}]"#,
    )
    .unwrap();
    graph.process_event(sensor);

    graph.sensor("Kitchen_Door", "OPEN");
    assert_eq!(graph.remaining_secs("gKitchen"), Some(300));
    graph.sensor("Kitchen_Door", "CLOSED");
    assert!(!graph.is_occupied("gKitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_sensor_in_equipment_routes_to_location() {
    let mut items = model_items();
    items.push(ItemDef::new("Lounge_Camera", ItemKind::Equipment).in_group("gLounge"));
    items.push(sensor("Lounge_Camera", "Lounge_Camera_Motion", "Switch", Metadata::new("OnOff")));
    let mut graph = create_test_graph_with(Config::default(), items);

    graph.sensor("Lounge_Camera_Motion", "ON");
    assert!(graph.is_occupied("gLounge"));
}

#[tokio::test(start_paused = true)]
async fn test_if_dark_action_follows_daylight_state() {
    let mut items = model_items();
    items.push(ItemDef::new("gStudy", ItemKind::Location).with_metadata(
        SETTINGS_NAMESPACE,
        settings(10).with("OccupiedActions", "LightsOnIfDark"),
    ));
    items.push(ItemDef::new("Study_Lamp", ItemKind::Point).in_group("gStudy").tagged("Lighting"));
    let mut graph = create_test_graph_with(Config::default(), items);

    graph.process_event(ItemEvent::state_changed("DayLight_Switch", "ON"));
    graph.command("gStudy_Occupancy_State", "ON");
    assert!(graph.device_commands().is_empty());

    graph.command("gStudy_Occupancy_State", "OFF");
    graph.process_event(ItemEvent::state_changed("DayLight_Switch", "OFF"));
    graph.command("gStudy_Occupancy_State", "ON");
    assert_eq!(graph.device_commands(), vec![("Study_Lamp".to_string(), "ON".to_string())]);
}

// ============================================================================
// Event loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_loop_serialises_events_and_timers() {
    let TestGraph { mut graph, egress_rx: _egress_rx } = create_test_graph();
    let (event_tx, event_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    event_tx.send(ItemEvent::state_changed("Pantry_Motion", "OPEN")).await.unwrap();
    let handle = tokio::spawn(async move {
        graph.run(event_rx, shutdown_rx).await;
        graph
    });

    // paused time auto-advances to the pantry expiry once the loop is idle
    tokio::time::sleep(Duration::from_secs(121)).await;
    shutdown_tx.send(true).unwrap();
    let graph = handle.await.unwrap();

    assert!(!graph.is_occupied("gPantry"));
    assert!(graph.is_occupied("gKitchen"));
    assert_eq!(graph.metrics.events_total(), 1);
}
