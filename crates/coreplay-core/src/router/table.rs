//! The CorePlay subscription table

use serde_json::{json, Value};

use super::matcher::{PathPattern, Segment::*};
use super::{EffectContext, EffectError, EffectOutcome, FeedbackId, Subscription};
use crate::models::Playback;
use crate::pointer::Pointer;
use crate::queue::VariableUpdates;

/// Variables the update queue knows about up front: `(id, name)`
pub const VARIABLE_DEFINITIONS: &[(&str, &str)] = &[
    ("preview1_elapsed", "Elapsed time of running media in milliseconds"),
    ("preview1_remain", "Remaining time of running media in milliseconds"),
    ("program1_elapsed", "Elapsed time of running media in milliseconds"),
    ("program1_remain", "Remaining time of running media in milliseconds"),
    ("take1_transitionDuration", "Player 1 Take duration in seconds"),
    ("take1_transitionType", "Player 1 Take transition type"),
    ("take1_startPoint", "Player 1 Take from position"),
    ("take1_presetToggle", "Player 1 Preset Toggle"),
    ("collections", "JSON object holding all slots of all collections"),
    ("playlists", "JSON object holding all playlists"),
    ("serialnumber", "Serial number of the device"),
    ("hostname", "Hostname of the device"),
];

const TRANSITION_TYPES: &[(&str, &str)] = &[
    ("directCut", "Direct Cut"),
    ("crossfade", "Crossfade"),
    ("dipToColor", "Dip to Color"),
];

const MODES: &[(&str, &str)] = &[("swap", "Swap"), ("copy", "Copy")];

const START_POINTS: &[(&str, &str)] = &[
    ("inpoint", "From inpoint"),
    ("position", "From current position in preview"),
];

const PLAYBACKS: &[&str] = &["preview", "program"];

/// Display label for `id`, empty when unknown
pub fn label(choices: &[(&str, &'static str)], id: &str) -> &'static str {
    choices
        .iter()
        .find(|(choice, _)| *choice == id)
        .map(|(_, label)| *label)
        .unwrap_or("")
}

/// Every subscription, in registration order
pub fn coreplay_subscriptions() -> Vec<Subscription> {
    vec![
        Subscription {
            name: "take-progress",
            matcher: PathPattern::Prefix(&[Literal("players"), Number, Literal("takeProgress")]),
            init_paths: &["/players/1/takeProgress"],
            effect: None,
            feedbacks: &[FeedbackId::TakeRunning],
        },
        Subscription {
            name: "take-configuration",
            matcher: PathPattern::Prefix(&[
                Literal("players"),
                Number,
                Literal("takeConfiguration"),
            ]),
            init_paths: &["/players/1/takeConfiguration"],
            effect: Some(take_configuration),
            feedbacks: &[
                FeedbackId::TransitionType,
                FeedbackId::StartPoint,
                FeedbackId::Mode,
            ],
        },
        Subscription {
            name: "playhead-state",
            matcher: PathPattern::Prefix(&[
                Literal("players"),
                Number,
                OneOf(PLAYBACKS),
                Literal("state"),
            ]),
            init_paths: &["/players/1/preview/state", "/players/1/program/state"],
            effect: None,
            feedbacks: &[FeedbackId::PlayerState, FeedbackId::TallyBool],
        },
        Subscription {
            name: "playhead-media",
            matcher: PathPattern::Prefix(&[
                Literal("players"),
                Number,
                OneOf(PLAYBACKS),
                Literal("mediaUrl"),
            ]),
            init_paths: &["/players/1/preview/mediaUrl", "/players/1/program/mediaUrl"],
            effect: None,
            feedbacks: &[FeedbackId::TallyBool],
        },
        Subscription {
            name: "playhead-position",
            matcher: PathPattern::Prefix(&[
                Literal("players"),
                Number,
                OneOf(PLAYBACKS),
                Literal("position"),
            ]),
            init_paths: &["/players/1/preview/position", "/players/1/program/position"],
            effect: Some(playhead_position),
            feedbacks: &[],
        },
        Subscription {
            name: "collection-slot",
            matcher: PathPattern::Exact(&[Literal("collections"), Number, Literal("slots"), Number]),
            init_paths: &[],
            effect: Some(collections_changed),
            feedbacks: &[],
        },
        Subscription {
            name: "collection",
            matcher: PathPattern::Exact(&[Literal("collections"), Number]),
            init_paths: &["/collections/1"],
            effect: Some(collections_changed),
            feedbacks: &[],
        },
        Subscription {
            name: "slot-thumbnail",
            matcher: PathPattern::Prefix(&[
                Literal("collections"),
                Number,
                Literal("slots"),
                Number,
                Literal("metadata"),
                Literal("thumbnails"),
            ]),
            init_paths: &[],
            effect: None,
            feedbacks: &[FeedbackId::PreviewImage],
        },
        Subscription {
            name: "playlists",
            matcher: PathPattern::Prefix(&[Literal("playlists"), Any]),
            init_paths: &["/playlists/"],
            effect: Some(playlists_changed),
            feedbacks: &[],
        },
    ]
}

fn take_configuration(
    ctx: &EffectContext<'_>,
    out: &mut VariableUpdates,
) -> Result<EffectOutcome, EffectError> {
    let player_id = ctx.capture(0)?;
    let config = ctx.store.player(player_id)?.take_configuration;
    let prefix = format!("take{}", player_id);

    out.insert(
        format!("{}_transitionDuration", prefix),
        json!(config.transition_duration),
    );
    out.insert(
        format!("{}_transitionType", prefix),
        json!(label(TRANSITION_TYPES, &config.transition_type)),
    );
    out.insert(
        format!("{}_startPoint", prefix),
        json!(label(START_POINTS, &config.start_point)),
    );
    out.insert(
        format!("{}_presetToggle", prefix),
        json!(label(MODES, &config.mode)),
    );
    Ok(EffectOutcome::applied())
}

fn playhead_position(
    ctx: &EffectContext<'_>,
    out: &mut VariableUpdates,
) -> Result<EffectOutcome, EffectError> {
    let player_id = ctx.capture(0)?;
    let playback: Playback = ctx
        .capture(1)?
        .parse()
        .map_err(|reason| EffectError::Malformed {
            path: ctx.path.clone(),
            reason,
        })?;

    let player = ctx.store.player(player_id)?;
    let playhead = player.playhead(playback);
    let Some(media) = playhead.media() else {
        return Ok(EffectOutcome::none());
    };
    let slot = ctx.store.slot(&media.collection, &media.slot)?;

    let position = playhead.position;
    let remain = match slot.duration {
        Some(duration) => json!(((duration - position) * 1000.0).floor() as i64),
        None => Value::Null,
    };

    let prefix = format!("{}{}", playback, player_id);
    out.insert(
        format!("{}_elapsed", prefix),
        json!((position * 1000.0).floor() as i64),
    );
    out.insert(format!("{}_remain", prefix), remain);
    Ok(EffectOutcome::applied())
}

fn collections_changed(
    ctx: &EffectContext<'_>,
    out: &mut VariableUpdates,
) -> Result<EffectOutcome, EffectError> {
    let collections = ctx.store.read(&Pointer::from_segments(["collections"]))?;
    out.insert("collections".to_string(), collections.clone());
    Ok(EffectOutcome::redefine())
}

fn playlists_changed(
    ctx: &EffectContext<'_>,
    out: &mut VariableUpdates,
) -> Result<EffectOutcome, EffectError> {
    let playlists = ctx.store.read(&Pointer::from_segments(["playlists"]))?;
    out.insert("playlists".to_string(), playlists.clone());
    Ok(EffectOutcome::redefine())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;
    use crate::patch::PatchOp;
    use crate::router::{Consumers, SubscriptionRouter};
    use crate::queue::{UpdateQueue, VariableDefinition};
    use crate::store::{Snapshot, StateStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<VariableUpdates>>,
        checks: Mutex<Vec<FeedbackId>>,
    }

    impl Recorder {
        fn merged(&self) -> VariableUpdates {
            let mut merged = VariableUpdates::new();
            for batch in self.batches.lock().unwrap().iter() {
                merged.extend(batch.clone());
            }
            merged
        }
    }

    impl UpdateQueue for Recorder {
        fn enqueue(&self, updates: VariableUpdates) {
            self.batches.lock().unwrap().push(updates);
        }
    }

    impl Consumers for Recorder {
        fn check_feedbacks(&self, ids: &[FeedbackId]) {
            self.checks.lock().unwrap().extend_from_slice(ids);
        }
        fn check_all_feedbacks(&self) {}
        fn redefine(&self, _store: &StateStore, _variables: &[VariableDefinition]) {}
    }

    fn store() -> StateStore {
        let mut store = StateStore::new();
        store.begin_sync();
        store
            .initialize(
                Snapshot::from_sections([
                    (Section::System, json!({ "uptime": 10 })),
                    (
                        Section::Players,
                        json!({
                            "preview": { "state": "paused", "position": 1.2345, "mediaUrl": "core://collection/1/slot/2" },
                            "program": { "state": "playing", "position": 3.0, "mediaUrl": "core://collection/1/slot/1" },
                            "takeProgress": null,
                            "takeConfiguration": { "transitionDuration": 1.5, "transitionType": "dipToColor", "startPoint": "inpoint", "mode": "bogus" }
                        }),
                    ),
                    (
                        Section::Collections,
                        json!({ "1": { "name": "A", "slots": {
                            "1": { "duration": 10.0 },
                            "2": { "name": "endless" }
                        } } }),
                    ),
                    (Section::Playlists, json!({})),
                    (Section::Storages, json!({})),
                    (Section::Jobs, json!({})),
                ])
                .unwrap(),
            )
            .unwrap();
        store.begin_streaming();
        store
    }

    fn p(raw: &str) -> Pointer {
        Pointer::parse(raw).unwrap()
    }

    #[test]
    fn test_labels() {
        assert_eq!(label(TRANSITION_TYPES, "directCut"), "Direct Cut");
        assert_eq!(label(START_POINTS, "position"), "From current position in preview");
        assert_eq!(label(MODES, "copy"), "Copy");
        assert_eq!(label(MODES, "nope"), "");
    }

    #[test]
    fn test_position_with_duration() {
        let store = store();
        let recorder = Recorder::default();
        let report = SubscriptionRouter::default().dispatch(
            &p("/players/1/program/position"),
            &store,
            &recorder,
            &recorder,
        );
        assert_eq!(report.effects_applied, 1);
        assert!(!report.requires_redefinition);

        let merged = recorder.merged();
        assert_eq!(merged["program1_elapsed"], json!(3000));
        assert_eq!(merged["program1_remain"], json!(7000));
    }

    #[test]
    fn test_position_without_duration() {
        let store = store();
        let recorder = Recorder::default();
        SubscriptionRouter::default().dispatch(
            &p("/players/1/preview/position"),
            &store,
            &recorder,
            &recorder,
        );
        let merged = recorder.merged();
        assert_eq!(merged["preview1_elapsed"], json!(1234));
        assert_eq!(merged["preview1_remain"], Value::Null);
    }

    #[test]
    fn test_position_without_collection_media_is_noop() {
        let mut store = store();
        store
            .mutate(&[PatchOp::Replace {
                path: p("/players/1/program/mediaUrl"),
                value: json!("live://input/1"),
            }])
            .unwrap();
        let recorder = Recorder::default();
        let report = SubscriptionRouter::default().dispatch(
            &p("/players/1/program/position"),
            &store,
            &recorder,
            &recorder,
        );
        assert_eq!(report.matched, 1);
        assert_eq!(report.effects_applied, 0);
        assert_eq!(report.failures, 0);
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_position_tolerates_nulled_slot_fields() {
        let mut store = store();
        store
            .mutate(&[
                PatchOp::Add {
                    path: p("/collections/1/slots/1/name"),
                    value: Value::Null,
                },
                PatchOp::Add {
                    path: p("/collections/1/slots/1/isPlayable"),
                    value: Value::Null,
                },
            ])
            .unwrap();
        let recorder = Recorder::default();
        let report = SubscriptionRouter::default().dispatch(
            &p("/players/1/program/position"),
            &store,
            &recorder,
            &recorder,
        );
        assert_eq!(report.failures, 0);
        assert_eq!(recorder.merged()["program1_remain"], json!(7000));
    }

    #[test]
    fn test_position_with_missing_slot_fails_entry_only() {
        let mut store = store();
        store
            .mutate(&[PatchOp::Replace {
                path: p("/players/1/program/mediaUrl"),
                value: json!("core://collection/9/slot/9"),
            }])
            .unwrap();
        let recorder = Recorder::default();
        let report = SubscriptionRouter::default().dispatch(
            &p("/players/1/program/position"),
            &store,
            &recorder,
            &recorder,
        );
        assert_eq!(report.failures, 1);
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_take_configuration() {
        let store = store();
        let recorder = Recorder::default();
        SubscriptionRouter::default().dispatch(
            &p("/players/1/takeConfiguration/mode"),
            &store,
            &recorder,
            &recorder,
        );
        let merged = recorder.merged();
        assert_eq!(merged["take1_transitionDuration"], json!(1.5));
        assert_eq!(merged["take1_transitionType"], json!("Dip to Color"));
        assert_eq!(merged["take1_startPoint"], json!("From inpoint"));
        assert_eq!(merged["take1_presetToggle"], json!(""));
        assert_eq!(
            *recorder.checks.lock().unwrap(),
            vec![FeedbackId::TransitionType, FeedbackId::StartPoint, FeedbackId::Mode]
        );
    }

    #[test]
    fn test_collection_changes_require_redefinition() {
        let store = store();
        let router = SubscriptionRouter::default();
        for path in ["/collections/1", "/collections/1/slots/2"] {
            let recorder = Recorder::default();
            let report = router.dispatch(&p(path), &store, &recorder, &recorder);
            assert!(report.requires_redefinition, "{}", path);
            assert!(recorder.merged()["collections"]["1"].is_object());
        }

        let recorder = Recorder::default();
        let report = router.dispatch(&p("/collections/1/name"), &store, &recorder, &recorder);
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_thumbnail_and_state_feedbacks() {
        let store = store();
        let router = SubscriptionRouter::default();
        let recorder = Recorder::default();
        router.dispatch(
            &p("/collections/1/slots/2/metadata/thumbnails/0"),
            &store,
            &recorder,
            &recorder,
        );
        router.dispatch(&p("/players/1/preview/state"), &store, &recorder, &recorder);
        assert_eq!(
            *recorder.checks.lock().unwrap(),
            vec![
                FeedbackId::PreviewImage,
                FeedbackId::PlayerState,
                FeedbackId::TallyBool
            ]
        );
    }

    #[test]
    fn test_playlists() {
        let store = store();
        let recorder = Recorder::default();
        let report = SubscriptionRouter::default().dispatch(
            &p("/playlists/4/entries/1"),
            &store,
            &recorder,
            &recorder,
        );
        assert!(report.requires_redefinition);
        assert_eq!(recorder.merged()["playlists"], json!({}));
    }
}
