use std::collections::{HashMap, HashSet};
use tracing::debug;

use ves_core::domain::ids::normalize_component;
use ves_core::domain::EventRecord;

/// Identity used for duplicate detection: normalized title, calendar date of
/// the start, and city. Venue-name formatting is deliberately excluded --
/// "FLEX" and "Flex " announce the same night.
pub fn dedup_signature(event: &EventRecord) -> String {
    format!(
        "{}|{}|{}",
        normalize_component(&event.title),
        event.event_date(),
        normalize_component(&event.city)
    )
}

/// What is left of a batch after duplicate removal.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub unique_events: Vec<EventRecord>,
    pub skipped: usize,
}

/// Detects duplicates within a batch and against already-persisted events.
#[derive(Debug, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    /// Collapse batch-internal duplicates, keeping the record with the most
    /// populated fields and folding the rest into it. Input order is
    /// preserved for the survivors.
    pub fn collapse_batch(&self, events: Vec<EventRecord>) -> (Vec<EventRecord>, usize) {
        let mut survivors: Vec<EventRecord> = Vec::with_capacity(events.len());
        let mut by_signature: HashMap<String, usize> = HashMap::new();
        let mut collapsed = 0;

        for event in events {
            let signature = dedup_signature(&event);
            match by_signature.get(&signature) {
                Some(&idx) => {
                    collapsed += 1;
                    let kept = &mut survivors[idx];
                    if event.populated_field_count() > kept.populated_field_count() {
                        // The newcomer is richer: it becomes the survivor and
                        // inherits whatever the previous one had to offer.
                        let mut richer = event;
                        richer.absorb(kept);
                        *kept = richer;
                    } else {
                        kept.absorb(&event);
                    }
                }
                None => {
                    by_signature.insert(signature, survivors.len());
                    survivors.push(event);
                }
            }
        }
        if collapsed > 0 {
            debug!(collapsed, "collapsed batch-internal duplicates");
        }
        (survivors, collapsed)
    }

    /// Partition a (already collapsed) batch against persisted candidates.
    /// Candidates are expected to have been fetched only for the dates that
    /// actually occur in the batch.
    pub fn partition(
        &self,
        batch: Vec<EventRecord>,
        persisted: &[EventRecord],
    ) -> DedupOutcome {
        let known: HashSet<String> = persisted.iter().map(dedup_signature).collect();
        let mut outcome = DedupOutcome::default();
        for event in batch {
            if known.contains(&dedup_signature(&event)) {
                outcome.skipped += 1;
            } else {
                outcome.unique_events.push(event);
            }
        }
        outcome
    }
}
