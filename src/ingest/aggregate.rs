//! Aggregation: apply one validated event to the in-memory document.
//!
//! Pure over its inputs; persistence and locking belong to the caller. Counters
//! are cumulative and never reduced when the raw log is trimmed.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::document::{FeedbackCounts, TelemetryDocument, format_timestamp};
use crate::model::event::{DownloadEvent, Event, FeedbackEvent, FeedbackLevel};

/// Apply `event` at the current time.
pub fn apply(document: &mut TelemetryDocument, event: &Event, raw: Value, max_retained: usize) {
    apply_at(document, event, raw, Utc::now(), max_retained);
}

/// Apply `event` as of `now`: update counters, stamp `last_updated`, append
/// `raw`, then trim the raw log to the newest `max_retained` entries.
pub fn apply_at(
    document: &mut TelemetryDocument,
    event: &Event,
    raw: Value,
    now: DateTime<Utc>,
    max_retained: usize,
) {
    match event {
        Event::Download(download) => count_download(document, download),
        Event::Feedback(feedback) => count_feedback(&mut document.counts.feedback_count, feedback),
        Event::FeedbackLogFollowup(_) => document.counts.feedback_count.with_logs += 1,
    }

    document.last_updated = Some(format_timestamp(now));
    document.events.push(raw);

    let overflow = document.events.len().saturating_sub(max_retained);
    if overflow > 0 {
        document.events.drain(..overflow);
    }
}

fn count_download(document: &mut TelemetryDocument, event: &DownloadEvent) {
    let counts = &mut document.counts;
    let dataset = counts.per_dataset.entry(event.dataset.clone()).or_default();
    if event.succeeded {
        counts.total_successful_runs += 1;
        dataset.success += 1;
    } else {
        counts.total_failed_runs += 1;
        dataset.fail += 1;
    }
}

fn count_feedback(counts: &mut FeedbackCounts, event: &FeedbackEvent) {
    match &event.level {
        FeedbackLevel::Quick => counts.quick += 1,
        FeedbackLevel::Detailed => counts.detailed += 1,
        FeedbackLevel::Short => counts.short += 1,
        FeedbackLevel::Comprehensive => counts.comprehensive += 1,
        FeedbackLevel::Unrecognized(_) => {}
    }
    *counts.by_rating.entry(event.rating.clone()).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::DEFAULT_MAX_RETAINED_EVENTS;
    use crate::model::event::EventKind;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event_of(raw: &Value) -> Event {
        Event::from_stored(raw).expect("test payload has a valid type")
    }

    fn ingest(doc: &mut TelemetryDocument, raw: Value, cap: usize) {
        let event = event_of(&raw);
        apply_at(doc, &event, raw, Utc::now(), cap);
    }

    fn fresh() -> TelemetryDocument {
        TelemetryDocument::bootstrap(Utc::now())
    }

    #[test]
    fn download_counts_totals_and_dataset() {
        let mut doc = fresh();
        for succeeded in [true, true, true, false] {
            ingest(
                &mut doc,
                json!({"type": "download", "dataset": "HBN", "succeeded": succeeded}),
                DEFAULT_MAX_RETAINED_EVENTS,
            );
        }
        assert_eq!(doc.counts.total_successful_runs, 3);
        assert_eq!(doc.counts.total_failed_runs, 1);
        let hbn = doc.counts.per_dataset["HBN"];
        assert_eq!((hbn.success, hbn.fail), (3, 1));
        assert_eq!(doc.total_events(), 4);
    }

    #[test]
    fn download_without_dataset_counts_under_unknown() {
        let mut doc = fresh();
        ingest(&mut doc, json!({"type": "download"}), 10);
        assert_eq!(doc.counts.total_failed_runs, 1);
        assert_eq!(doc.counts.per_dataset["unknown"].fail, 1);
    }

    #[test]
    fn legacy_and_current_levels_are_separate_namespaces() {
        let mut doc = fresh();
        ingest(&mut doc, json!({"type": "feedback", "feedback_level": "short"}), 10);
        let counts = &doc.counts.feedback_count;
        assert_eq!((counts.short, counts.quick), (1, 0));

        ingest(&mut doc, json!({"type": "feedback", "feedback_level": "quick"}), 10);
        let counts = &doc.counts.feedback_count;
        assert_eq!((counts.short, counts.quick), (1, 1));

        ingest(&mut doc, json!({"type": "feedback", "feedback_level": "comprehensive"}), 10);
        ingest(&mut doc, json!({"type": "feedback", "feedback_level": "detailed"}), 10);
        let counts = &doc.counts.feedback_count;
        assert_eq!((counts.comprehensive, counts.detailed), (1, 1));
    }

    #[test]
    fn unrecognized_level_is_logged_but_not_counted() {
        let mut doc = fresh();
        ingest(
            &mut doc,
            json!({"type": "feedback", "feedback_level": "verbose", "feedback_rating": "Good"}),
            10,
        );
        let counts = &doc.counts.feedback_count;
        assert_eq!(counts.quick + counts.detailed + counts.short + counts.comprehensive, 0);
        assert_eq!(counts.by_rating["Good"], 1);
        assert_eq!(doc.events[0]["feedback_level"], "verbose");
    }

    #[test]
    fn ratings_count_under_their_label_with_unknown_default() {
        let mut doc = fresh();
        ingest(&mut doc, json!({"type": "feedback", "feedback_rating": "Excellent"}), 10);
        ingest(&mut doc, json!({"type": "feedback", "feedback_rating": "Excellent"}), 10);
        ingest(&mut doc, json!({"type": "feedback"}), 10);
        let by_rating = &doc.counts.feedback_count.by_rating;
        assert_eq!(by_rating["Excellent"], 2);
        assert_eq!(by_rating["unknown"], 1);
        assert_eq!(doc.counts.feedback_count.quick, 3);
    }

    #[test]
    fn followup_touches_only_with_logs() {
        let mut doc = fresh();
        ingest(
            &mut doc,
            json!({"type": "feedback_log_followup", "original_rating": "Poor",
                   "log_analysis": {"errors": 2}}),
            10,
        );
        let counts = &doc.counts.feedback_count;
        assert_eq!(counts.with_logs, 1);
        assert!(counts.by_rating.is_empty());
        assert_eq!(counts.quick, 0);
        assert_eq!(doc.counts.total_runs(), 0);
    }

    #[test]
    fn every_event_stamps_last_updated() {
        let mut doc = fresh();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let raw = json!({"type": "feedback_log_followup"});
        let event = event_of(&raw);
        apply_at(&mut doc, &event, raw, at, 10);
        assert_eq!(doc.last_updated.as_deref(), Some("2026-03-01T12:00:00.000Z"));
    }

    #[test]
    fn eviction_keeps_newest_and_preserves_counters() {
        let mut doc = fresh();
        for i in 0..12 {
            ingest(
                &mut doc,
                json!({"type": "download", "dataset": "ds", "succeeded": true, "seq": i}),
                5,
            );
        }
        assert_eq!(doc.total_events(), 5);
        assert_eq!(doc.events[0]["seq"], 7);
        assert_eq!(doc.events[4]["seq"], 11);
        assert_eq!(doc.counts.total_successful_runs, 12);
        assert_eq!(doc.counts.per_dataset["ds"].success, 12);
    }

    #[test]
    fn default_capacity_retains_exactly_ten_thousand() {
        let mut doc = fresh();
        let total = DEFAULT_MAX_RETAINED_EVENTS + 5;
        for seq in 0..total {
            let succeeded = seq % 3 != 0;
            let raw = json!({"type": "download", "dataset": "HBN", "succeeded": succeeded, "seq": seq});
            ingest(&mut doc, raw, DEFAULT_MAX_RETAINED_EVENTS);
        }
        assert_eq!(doc.total_events(), DEFAULT_MAX_RETAINED_EVENTS);
        assert_eq!(doc.events[0]["seq"], 5);
        assert_eq!(doc.counts.total_runs(), total as u64);
        assert_eq!(doc.counts.per_dataset["HBN"].total(), total as u64);
    }

    fn download_strategy() -> impl Strategy<Value = (String, bool)> {
        (prop::sample::select(vec!["HBN", "ds000030", "ABIDE", ""]), any::<bool>())
            .prop_map(|(dataset, succeeded)| (dataset.to_string(), succeeded))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn download_counters_match_event_history(
            downloads in prop::collection::vec(download_strategy(), 0..60),
            cap in 1_usize..20,
        ) {
            let mut doc = fresh();
            let mut expected: BTreeMap<String, (u64, u64)> = BTreeMap::new();
            for (dataset, succeeded) in &downloads {
                ingest(
                    &mut doc,
                    json!({"type": "download", "dataset": dataset, "succeeded": succeeded}),
                    cap,
                );
                let key = if dataset.is_empty() { "unknown".to_string() } else { dataset.clone() };
                let entry = expected.entry(key).or_default();
                if *succeeded { entry.0 += 1 } else { entry.1 += 1 }
            }

            prop_assert_eq!(doc.counts.total_runs(), downloads.len() as u64);
            prop_assert_eq!(doc.counts.per_dataset.len(), expected.len());
            for (dataset, (success, fail)) in &expected {
                let counts = doc.counts.per_dataset[dataset];
                prop_assert_eq!((counts.success, counts.fail), (*success, *fail));
            }
            prop_assert_eq!(doc.total_events(), downloads.len().min(cap));
        }

        #[test]
        fn mixed_events_keep_log_bounded_and_newest(
            kinds in prop::collection::vec(prop::sample::select(EventKind::ALL.to_vec()), 1..80),
            cap in 1_usize..16,
        ) {
            let mut doc = fresh();
            for (seq, kind) in kinds.iter().enumerate() {
                ingest(&mut doc, json!({"type": kind.as_str(), "seq": seq}), cap);
                prop_assert!(doc.total_events() <= cap);
            }
            let newest = doc.events.last().map(|raw| raw["seq"].clone());
            prop_assert_eq!(newest, Some(json!(kinds.len() - 1)));

            let feedback = kinds.iter().filter(|k| **k == EventKind::Feedback).count() as u64;
            let followups = kinds
                .iter()
                .filter(|k| **k == EventKind::FeedbackLogFollowup)
                .count() as u64;
            prop_assert_eq!(doc.counts.feedback_count.quick, feedback);
            prop_assert_eq!(doc.counts.feedback_count.with_logs, followups);
        }
    }
}
