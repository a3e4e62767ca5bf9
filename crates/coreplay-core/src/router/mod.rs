//! Subscription routing
//!
//! Maps changed document paths to side effects. Each [`Subscription`] pairs a
//! path pattern with an optional effect (which reads the store and pushes
//! variable updates) and a list of feedbacks to re-check. Every matching
//! entry fires, in registration order; a failing effect is logged and does
//! not stop the others.

mod matcher;
mod table;

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::queue::{UpdateQueue, VariableDefinition, VariableUpdates};
use crate::pointer::Pointer;
use crate::store::StateStore;

pub use matcher::{Captures, PathPattern, Segment};
pub use table::{coreplay_subscriptions, VARIABLE_DEFINITIONS};

/// Feedbacks (consumer-side state checks) a subscription can invalidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackId {
    TakeRunning,
    TransitionType,
    StartPoint,
    Mode,
    PlayerState,
    TallyBool,
    PreviewImage,
}

impl FeedbackId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackId::TakeRunning => "takeRunning",
            FeedbackId::TransitionType => "transitionType",
            FeedbackId::StartPoint => "startPoint",
            FeedbackId::Mode => "mode",
            FeedbackId::PlayerState => "playerstate",
            FeedbackId::TallyBool => "tallyBool",
            FeedbackId::PreviewImage => "previewImage",
        }
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream consumers derived from the mirror
pub trait Consumers: Send + Sync {
    /// Re-evaluate the listed feedbacks
    fn check_feedbacks(&self, ids: &[FeedbackId]);

    /// Re-evaluate every feedback
    fn check_all_feedbacks(&self);

    /// Rebuild consumer-facing definitions from the settled state
    fn redefine(&self, store: &StateStore, variables: &[VariableDefinition]);
}

/// Errors raised inside a subscription effect
#[derive(Error, Debug)]
pub enum EffectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Path '{path}' has no capture {index}")]
    MissingCapture { path: Pointer, index: usize },

    #[error("Malformed value at '{path}': {reason}")]
    Malformed { path: Pointer, reason: String },
}

/// What an effect did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectOutcome {
    pub side_effects_applied: bool,
    pub requires_redefinition: bool,
}

impl EffectOutcome {
    /// Nothing to do for this path
    pub fn none() -> Self {
        Self::default()
    }

    /// Variables were updated
    pub fn applied() -> Self {
        Self {
            side_effects_applied: true,
            requires_redefinition: false,
        }
    }

    /// Variables were updated and consumer definitions are stale
    pub fn redefine() -> Self {
        Self {
            side_effects_applied: true,
            requires_redefinition: true,
        }
    }
}

/// Everything an effect may look at
pub struct EffectContext<'a> {
    pub store: &'a StateStore,
    pub path: &'a Pointer,
    pub captures: &'a Captures,
}

impl EffectContext<'_> {
    /// Captured segment `index`, or an error naming the path
    pub fn capture(&self, index: usize) -> Result<&str, EffectError> {
        self.captures
            .get(index)
            .ok_or_else(|| EffectError::MissingCapture {
                path: self.path.clone(),
                index,
            })
    }
}

/// Effect callback; writes variable updates into the accumulator
pub type Effect = fn(&EffectContext<'_>, &mut VariableUpdates) -> Result<EffectOutcome, EffectError>;

/// One static routing rule
#[derive(Clone)]
pub struct Subscription {
    /// Short label used in logs
    pub name: &'static str,
    pub matcher: PathPattern,
    /// Paths replayed by [`SubscriptionRouter::initialize`]
    pub init_paths: &'static [&'static str],
    pub effect: Option<Effect>,
    pub feedbacks: &'static [FeedbackId],
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("init_paths", &self.init_paths)
            .field("has_effect", &self.effect.is_some())
            .field("feedbacks", &self.feedbacks)
            .finish()
    }
}

/// Outcome of routing one or more paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entries that matched
    pub matched: usize,
    /// Effects that ran and applied side effects
    pub effects_applied: usize,
    /// Effects that failed
    pub failures: usize,
    pub requires_redefinition: bool,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.matched += other.matched;
        self.effects_applied += other.effects_applied;
        self.failures += other.failures;
        self.requires_redefinition |= other.requires_redefinition;
    }
}

/// Static table of subscriptions
#[derive(Debug, Clone)]
pub struct SubscriptionRouter {
    entries: Vec<Subscription>,
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::new(coreplay_subscriptions())
    }
}

impl SubscriptionRouter {
    pub fn new(entries: Vec<Subscription>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Subscription] {
        &self.entries
    }

    /// Route one changed path to every matching entry
    pub fn dispatch(
        &self,
        path: &Pointer,
        store: &StateStore,
        queue: &dyn UpdateQueue,
        consumers: &dyn Consumers,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for entry in &self.entries {
            if let Some(captures) = entry.matcher.matches(path) {
                report.merge(run_entry(entry, path, &captures, store, queue, consumers));
            }
        }
        report
    }

    /// Replay every entry's init paths against the freshly synced store
    ///
    /// Runs entries in registration order, each only for its own paths.
    pub fn initialize(
        &self,
        store: &StateStore,
        queue: &dyn UpdateQueue,
        consumers: &dyn Consumers,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for entry in &self.entries {
            for raw in entry.init_paths {
                let path = match Pointer::parse(raw) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(subscription = entry.name, error = %e, "Skipping bad init path");
                        continue;
                    }
                };
                let captures = entry.matcher.matches(&path).unwrap_or_default();
                report.merge(run_entry(entry, &path, &captures, store, queue, consumers));
            }
        }
        report
    }
}

fn run_entry(
    entry: &Subscription,
    path: &Pointer,
    captures: &Captures,
    store: &StateStore,
    queue: &dyn UpdateQueue,
    consumers: &dyn Consumers,
) -> DispatchReport {
    let mut report = DispatchReport {
        matched: 1,
        ..Default::default()
    };

    if let Some(effect) = entry.effect {
        let ctx = EffectContext {
            store,
            path,
            captures,
        };
        let mut updates = VariableUpdates::new();
        match effect(&ctx, &mut updates) {
            Ok(outcome) => {
                if !updates.is_empty() {
                    queue.enqueue(updates);
                }
                if outcome.side_effects_applied {
                    report.effects_applied += 1;
                }
                report.requires_redefinition = outcome.requires_redefinition;
            }
            Err(e) => {
                warn!(
                    subscription = entry.name,
                    path = %path,
                    error = %e,
                    "Subscription effect failed"
                );
                report.failures += 1;
            }
        }
    }

    if !entry.feedbacks.is_empty() {
        debug!(subscription = entry.name, path = %path, "Re-checking feedbacks");
        consumers.check_feedbacks(entry.feedbacks);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;
    use crate::store::Snapshot;
    use serde_json::json;
    use std::sync::Mutex;
    use Segment::*;

    #[derive(Default)]
    struct RecordingQueue {
        batches: Mutex<Vec<VariableUpdates>>,
    }

    impl UpdateQueue for RecordingQueue {
        fn enqueue(&self, updates: VariableUpdates) {
            self.batches.lock().unwrap().push(updates);
        }
    }

    #[derive(Default)]
    struct RecordingConsumers {
        checks: Mutex<Vec<FeedbackId>>,
    }

    impl Consumers for RecordingConsumers {
        fn check_feedbacks(&self, ids: &[FeedbackId]) {
            self.checks.lock().unwrap().extend_from_slice(ids);
        }
        fn check_all_feedbacks(&self) {}
        fn redefine(&self, _store: &StateStore, _variables: &[VariableDefinition]) {}
    }

    fn first(_ctx: &EffectContext<'_>, out: &mut VariableUpdates) -> Result<EffectOutcome, EffectError> {
        out.insert("first".to_string(), json!(1));
        Ok(EffectOutcome::applied())
    }

    fn second(_ctx: &EffectContext<'_>, out: &mut VariableUpdates) -> Result<EffectOutcome, EffectError> {
        out.insert("second".to_string(), json!(2));
        Ok(EffectOutcome::redefine())
    }

    fn failing(ctx: &EffectContext<'_>, _out: &mut VariableUpdates) -> Result<EffectOutcome, EffectError> {
        Err(EffectError::Malformed {
            path: ctx.path.clone(),
            reason: "boom".to_string(),
        })
    }

    fn entry(name: &'static str, matcher: PathPattern, effect: Option<Effect>) -> Subscription {
        Subscription {
            name,
            matcher,
            init_paths: &[],
            effect,
            feedbacks: &[],
        }
    }

    const A_PREFIX: PathPattern = PathPattern::Prefix(&[Literal("a")]);
    const A_B_EXACT: PathPattern = PathPattern::Exact(&[Literal("a"), Any]);

    fn p(raw: &str) -> Pointer {
        Pointer::parse(raw).unwrap()
    }

    #[test]
    fn test_all_matching_entries_fire_once() {
        let orders: [[(&'static str, Effect); 2]; 2] = [
            [("first", first), ("second", second)],
            [("second", second), ("first", first)],
        ];
        for order in orders {
            let matchers = [A_PREFIX, A_B_EXACT];
            let entries = order
                .into_iter()
                .zip(matchers)
                .map(|((name, effect), matcher)| entry(name, matcher, Some(effect)))
                .collect();
            let router = SubscriptionRouter::new(entries);
            let queue = RecordingQueue::default();
            let consumers = RecordingConsumers::default();

            let report = router.dispatch(&p("/a/b"), &StateStore::new(), &queue, &consumers);
            assert_eq!(report.matched, 2);
            assert_eq!(report.effects_applied, 2);
            assert!(report.requires_redefinition);

            let batches = queue.batches.lock().unwrap();
            assert_eq!(batches.len(), 2);
            assert_eq!(batches.iter().filter(|b| b.contains_key("first")).count(), 1);
            assert_eq!(batches.iter().filter(|b| b.contains_key("second")).count(), 1);
        }
    }

    #[test]
    fn test_failure_is_isolated_per_entry() {
        let router = SubscriptionRouter::new(vec![
            entry("broken", A_PREFIX, Some(failing)),
            entry("ok", A_PREFIX, Some(first)),
        ]);
        let queue = RecordingQueue::default();
        let report = router.dispatch(
            &p("/a/x"),
            &StateStore::new(),
            &queue,
            &RecordingConsumers::default(),
        );
        assert_eq!(report.matched, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.effects_applied, 1);
        assert!(!report.requires_redefinition);
        assert_eq!(queue.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_no_match_does_nothing() {
        let router = SubscriptionRouter::new(vec![entry("a", A_B_EXACT, Some(first))]);
        let report = router.dispatch(
            &p("/a/b/c"),
            &StateStore::new(),
            &RecordingQueue::default(),
            &RecordingConsumers::default(),
        );
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn test_feedbacks_notified() {
        let router = SubscriptionRouter::new(vec![Subscription {
            name: "tally",
            matcher: A_PREFIX,
            init_paths: &["/a/1"],
            effect: None,
            feedbacks: &[FeedbackId::PlayerState, FeedbackId::TallyBool],
        }]);
        let consumers = RecordingConsumers::default();
        router.dispatch(&p("/a/1"), &StateStore::new(), &RecordingQueue::default(), &consumers);
        assert_eq!(
            *consumers.checks.lock().unwrap(),
            vec![FeedbackId::PlayerState, FeedbackId::TallyBool]
        );
    }

    fn synced_store() -> StateStore {
        let mut store = StateStore::new();
        store.begin_sync();
        store
            .initialize(
                Snapshot::from_sections([
                    (Section::System, json!({ "uptime": 1 })),
                    (
                        Section::Players,
                        json!({
                            "preview": { "state": "stopped", "position": 0.5, "mediaUrl": "core://collection/1/slot/1" },
                            "program": { "state": "playing", "position": 4.25, "mediaUrl": "core://collection/1/slot/2" },
                            "takeConfiguration": { "transitionDuration": 2, "startPoint": "position", "mode": "copy", "transitionType": "dipToColor" }
                        }),
                    ),
                    (
                        Section::Collections,
                        json!({ "1": { "name": "Show", "slots": { "1": { "duration": 10.0 }, "2": { "duration": null } } } }),
                    ),
                    (Section::Playlists, json!({ "1": { "name": "Main", "entries": {} } })),
                    (Section::Storages, json!({})),
                    (Section::Jobs, json!({})),
                ])
                .unwrap(),
            )
            .unwrap();
        store.begin_streaming();
        store
    }

    #[test]
    fn test_bootstrap_matches_dispatch_of_init_paths() {
        let store = synced_store();
        let router = SubscriptionRouter::default();

        let init_queue = RecordingQueue::default();
        let init_consumers = RecordingConsumers::default();
        let init_report = router.initialize(&store, &init_queue, &init_consumers);

        let patch_queue = RecordingQueue::default();
        let patch_consumers = RecordingConsumers::default();
        let mut patch_report = DispatchReport::default();
        for entry in router.entries() {
            for raw in entry.init_paths {
                patch_report.merge(router.dispatch(&p(raw), &store, &patch_queue, &patch_consumers));
            }
        }

        assert_eq!(init_report, patch_report);
        assert_eq!(*init_queue.batches.lock().unwrap(), *patch_queue.batches.lock().unwrap());
        assert_eq!(*init_consumers.checks.lock().unwrap(), *patch_consumers.checks.lock().unwrap());
        assert!(init_report.requires_redefinition);
    }
}
