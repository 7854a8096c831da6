use crate::logging::append_run_log;
use crate::model::ReviewEvent;
use serde_json::json;
use std::collections::HashMap;

/// Collapses review events to one per (PR, reviewer), keeping the latest.
///
/// On equal timestamps the event appearing later in the input wins, so the
/// result depends only on input order. Retained events keep their relative
/// input order.
pub fn dedupe_reviews(events: &[ReviewEvent]) -> Vec<ReviewEvent> {
    let mut latest: HashMap<(u64, &str), usize> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        let key = (event.pr_number, event.reviewer.as_str());
        let replaces = latest
            .get(&key)
            .map_or(true, |&kept| events[kept].submitted_at <= event.submitted_at);
        if replaces {
            latest.insert(key, index);
        }
    }

    let mut retained = latest.into_values().collect::<Vec<_>>();
    retained.sort_unstable();
    let deduped = retained
        .into_iter()
        .map(|index| events[index].clone())
        .collect::<Vec<_>>();

    append_run_log(
        "debug",
        "dedup.reviews.completed",
        json!({
            "input_events": events.len(),
            "retained_events": deduped.len()
        }),
    );
    deduped
}
