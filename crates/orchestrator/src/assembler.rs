//! Merge batch results into the angle → hook → script graph.
//!
//! Items are grouped by the parent id encoded in their custom id. An item that
//! fails validation, or names a parent the campaign does not have, is skipped
//! with a reason; the rest of the batch still merges. The merge happens on a
//! copy of the current collection and is only persisted by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use hookline_core::{child_id, BatchKind, Campaign, Hook, Script};
use provider::{BatchItemOutcome, BatchResultItem};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::schema::{parse_hook_set, parse_script_set};
use crate::state_machine::MergedContent;

static CUSTOM_ID: OnceLock<Option<Regex>> = OnceLock::new();

/// Custom ids must match `^[A-Za-z0-9_-]{1,64}$`.
pub fn is_valid_custom_id(id: &str) -> bool {
    CUSTOM_ID
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(id))
}

/// Custom ids for every parent of `kind` in `campaign`, in campaign order.
pub fn expected_custom_ids(campaign: &Campaign, kind: BatchKind) -> Vec<String> {
    match kind {
        BatchKind::Hooks => campaign.angles.iter().map(|a| kind.custom_id(&a.id)).collect(),
        BatchKind::Scripts => campaign.hooks.iter().map(|h| kind.custom_id(&h.id)).collect(),
    }
}

/// Custom ids of parents that have no output yet.
pub fn missing_custom_ids(campaign: &Campaign, kind: BatchKind) -> Vec<String> {
    match kind {
        BatchKind::Hooks => {
            let covered: HashSet<&str> = campaign.hooks.iter().map(|h| h.angle_id.as_str()).collect();
            campaign
                .angles
                .iter()
                .filter(|a| !covered.contains(a.id.as_str()))
                .map(|a| kind.custom_id(&a.id))
                .collect()
        }
        BatchKind::Scripts => {
            let covered: HashSet<&str> = campaign.scripts.iter().map(|s| s.hook_id.as_str()).collect();
            campaign
                .hooks
                .iter()
                .filter(|h| !covered.contains(h.id.as_str()))
                .map(|h| kind.custom_id(&h.id))
                .collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SkippedItem {
    pub custom_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub content: MergedContent,
    pub added: usize,
    pub unchanged: usize,
    pub skipped_with_reason: Vec<SkippedItem>,
    pub succeeded_custom_ids: Vec<String>,
    /// Items that errored or were malformed. Ids absent from the results are
    /// not known here; the caller adds them.
    pub failed_custom_ids: Vec<String>,
    /// Parents with at least one child after the merge.
    pub covered_parents: usize,
    pub total_parents: usize,
    pub missing_custom_ids: Vec<String>,
}

impl Assembly {
    pub fn kind(&self) -> BatchKind {
        self.content.kind()
    }

    /// Share of parents that have output after the merge.
    pub fn coverage(&self) -> f64 {
        if self.total_parents == 0 {
            1.0
        } else {
            self.covered_parents as f64 / self.total_parents as f64
        }
    }
}

enum Merge {
    Added,
    Unchanged,
    Conflict,
}

/// Copy of an existing collection with an id index.
struct Merger<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
    same: fn(&T, &T) -> bool,
    id: fn(&T) -> &str,
}

impl<T: Clone> Merger<T> {
    fn new(existing: &[T], id: fn(&T) -> &str, same: fn(&T, &T) -> bool) -> Self {
        let items = existing.to_vec();
        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (id(item).to_string(), i))
            .collect();
        Self {
            items,
            index,
            same,
            id,
        }
    }

    fn merge(&mut self, item: T) -> Merge {
        let key = (self.id)(&item).to_string();
        match self.index.get(&key) {
            Some(&i) if (self.same)(&self.items[i], &item) => Merge::Unchanged,
            Some(_) => Merge::Conflict,
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(item);
                Merge::Added
            }
        }
    }
}

#[derive(Default)]
struct Tally {
    added: usize,
    unchanged: usize,
    skipped: Vec<SkippedItem>,
    succeeded: Vec<String>,
    failed: Vec<String>,
}

impl Tally {
    fn skip(&mut self, custom_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(custom_id = %custom_id, "Skipping batch item: {}", reason);
        self.skipped.push(SkippedItem {
            custom_id: custom_id.to_string(),
            reason,
        });
    }

    fn fail(&mut self, custom_id: &str, reason: impl Into<String>) {
        self.skip(custom_id, reason);
        self.failed.push(custom_id.to_string());
    }

    /// Record the merge results of one item's children.
    fn record(&mut self, custom_id: &str, outcomes: Vec<(String, Merge)>) {
        let mut usable = false;
        for (child, outcome) in outcomes {
            match outcome {
                Merge::Added => {
                    self.added += 1;
                    usable = true;
                }
                Merge::Unchanged => {
                    self.unchanged += 1;
                    usable = true;
                }
                Merge::Conflict => self.skip(
                    custom_id,
                    format!("{} already exists with different content", child),
                ),
            }
        }
        if usable {
            self.succeeded.push(custom_id.to_string());
        } else {
            self.failed.push(custom_id.to_string());
        }
    }
}

pub struct ResultAssembler;

impl ResultAssembler {
    /// Merge `items` from a batch of `kind` into the campaign's collection.
    /// `attempt` labels script versions.
    pub fn assemble(
        campaign: &Campaign,
        kind: BatchKind,
        items: &[BatchResultItem],
        attempt: u32,
    ) -> Assembly {
        let mut tally = Tally::default();
        let mut seen = HashSet::new();

        let mut hooks = Merger::new(&campaign.hooks, |h: &Hook| h.id.as_str(), |a, b| a == b);
        let mut scripts = Merger::new(
            &campaign.scripts,
            |s: &Script| s.id.as_str(),
            |a, b| a.hook_id == b.hook_id && a.content == b.content && a.cta == b.cta,
        );

        for item in items {
            let custom_id = item.custom_id.as_str();
            if !is_valid_custom_id(custom_id) {
                tally.skip(custom_id, "invalid custom id");
                continue;
            }
            if !seen.insert(custom_id) {
                tally.skip(custom_id, "duplicate result for custom id");
                continue;
            }
            let Some(parent) = kind.parent_id(custom_id) else {
                tally.skip(custom_id, format!("custom id does not belong to a {} batch", kind));
                continue;
            };

            let value = match &item.outcome {
                BatchItemOutcome::Succeeded(value) => value.clone(),
                BatchItemOutcome::Errored(message) => {
                    tally.fail(custom_id, format!("provider error: {}", message));
                    continue;
                }
            };

            match kind {
                BatchKind::Hooks => {
                    Self::merge_hooks(campaign, custom_id, parent, value, &mut hooks, &mut tally)
                }
                BatchKind::Scripts => Self::merge_scripts(
                    campaign,
                    custom_id,
                    parent,
                    value,
                    attempt,
                    &mut scripts,
                    &mut tally,
                ),
            }
        }

        let content = match kind {
            BatchKind::Hooks => MergedContent::Hooks(hooks.items),
            BatchKind::Scripts => MergedContent::Scripts(scripts.items),
        };

        let mut merged = campaign.clone();
        match &content {
            MergedContent::Hooks(h) => merged.hooks = h.clone(),
            MergedContent::Scripts(s) => merged.scripts = s.clone(),
        }
        let missing = missing_custom_ids(&merged, kind);
        let total_parents = match kind {
            BatchKind::Hooks => merged.angles.len(),
            BatchKind::Scripts => merged.hooks.len(),
        };

        Assembly {
            content,
            added: tally.added,
            unchanged: tally.unchanged,
            skipped_with_reason: tally.skipped,
            succeeded_custom_ids: tally.succeeded,
            failed_custom_ids: tally.failed,
            covered_parents: total_parents - missing.len(),
            total_parents,
            missing_custom_ids: missing,
        }
    }

    fn merge_hooks(
        campaign: &Campaign,
        custom_id: &str,
        angle_id: &str,
        value: Value,
        hooks: &mut Merger<Hook>,
        tally: &mut Tally,
    ) {
        if campaign.angle(angle_id).is_none() {
            tally.skip(custom_id, format!("unknown angle {}", angle_id));
            return;
        }

        match parse_hook_set(angle_id, value) {
            Ok(raw) => {
                let outcomes = raw
                    .into_iter()
                    .map(|r| {
                        let hook = Hook::new(angle_id, &r.raw_id, r.category, r.text);
                        (hook.id.clone(), hooks.merge(hook))
                    })
                    .collect();
                tally.record(custom_id, outcomes);
            }
            Err(e) => tally.fail(custom_id, e.to_string()),
        }
    }

    fn merge_scripts(
        campaign: &Campaign,
        custom_id: &str,
        hook_id: &str,
        value: Value,
        attempt: u32,
        scripts: &mut Merger<Script>,
        tally: &mut Tally,
    ) {
        let Some(hook) = campaign.hook(hook_id) else {
            tally.skip(custom_id, format!("unknown hook {}", hook_id));
            return;
        };

        let set = match parse_script_set(value) {
            Ok(set) => set,
            Err(e) => {
                tally.fail(custom_id, e.to_string());
                return;
            }
        };

        if let Some(claimed) = set.angle_id.as_deref() {
            if claimed != hook.angle_id {
                tally.fail(
                    custom_id,
                    format!("result for hook {} names angle {}", hook.id, claimed),
                );
                return;
            }
        }

        let raw: Vec<_> = set
            .hooks
            .into_iter()
            .filter(|(raw_hook, _)| {
                raw_hook == &hook.id || child_id(&hook.angle_id, raw_hook) == hook.id
            })
            .flat_map(|(_, scripts)| scripts)
            .collect();

        if raw.is_empty() {
            tally.fail(custom_id, format!("no scripts for hook {}", hook.id));
            return;
        }

        let outcomes = raw
            .into_iter()
            .map(|r| {
                let script = Script::new(&hook.id, &r.raw_id, r.content, r.cta, attempt);
                (script.id.clone(), scripts.merge(script))
            })
            .collect();
        tally.record(custom_id, outcomes);
    }
}
