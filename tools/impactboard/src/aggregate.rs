use crate::config::AppConfig;
use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::metrics::{compute_pr_metrics, review_points, CoreTouch};
use crate::model::{CoreDirectorySet, EngineerScore, PullRequest, ReviewEvent, TopPr};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const TOP_PRS_PER_ENGINEER: usize = 3;

/// Inclusive rolling window `[end - lookback_days, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScoringWindow {
    pub fn ending_at(end: DateTime<Utc>, lookback_days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(lookback_days)),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

pub fn core_multiplier(core_touch_ratio: f64, cfg: &AppConfig) -> f64 {
    1.0 + cfg.weights.core_boost * core_touch_ratio.clamp(0.0, 1.0)
}

pub fn consistency_bonus(active_weeks: u32, cfg: &AppConfig) -> f64 {
    let weeks = cfg.window.consistency_weeks;
    if weeks == 0 {
        return 1.0;
    }
    let capped = active_weeks.min(weeks);
    1.0 + cfg.weights.consistency_boost * (f64::from(capped) / f64::from(weeks))
}

pub fn base_impact(shipping_total: f64, review_total: f64, cfg: &AppConfig) -> f64 {
    cfg.weights.shipping * shipping_total + cfg.weights.review * review_total
}

#[derive(Default)]
struct EngineerTally {
    shipping_total: f64,
    review_total: f64,
    touch: CoreTouch,
    weeks: BTreeSet<(i32, u32)>,
    pr_count: usize,
    review_count: usize,
    top_prs: Vec<TopPr>,
}

impl EngineerTally {
    fn mark_active(&mut self, at: DateTime<Utc>, window: &ScoringWindow) {
        if window.contains(at) {
            let week = at.iso_week();
            self.weeks.insert((week.year(), week.week()));
        }
    }
}

/// Rolls per-PR and per-review metrics up to ranked engineer scores.
///
/// `reviews` must already be deduplicated. Reviews on PRs absent from `prs`
/// are ignored since their complexity is unknown.
pub fn score_engineers(
    prs: &[PullRequest],
    reviews: &[ReviewEvent],
    core: &CoreDirectorySet,
    cfg: &AppConfig,
    window: &ScoringWindow,
) -> Result<Vec<EngineerScore>, ImpactError> {
    let weights = &cfg.weights;
    let depth = cfg.classifier.directory_depth;
    let mut tallies: BTreeMap<String, EngineerTally> = BTreeMap::new();

    for pr in prs {
        let metrics = compute_pr_metrics(pr, core, weights, depth)?;
        let tally = tallies.entry(pr.author.clone()).or_default();
        tally.shipping_total += metrics.shipping;
        tally.touch = tally.touch.combine(metrics.core_touch);
        tally.pr_count += 1;
        tally.mark_active(pr.merged_at, window);
        tally.top_prs.push(TopPr {
            number: pr.number,
            title: pr.title.clone(),
            url: pr.url.clone(),
            shipping: metrics.shipping,
            complexity: metrics.complexity,
            discussion: metrics.discussion,
        });
    }

    let by_number: HashMap<u64, &PullRequest> = prs.iter().map(|pr| (pr.number, pr)).collect();
    let mut orphaned = 0usize;
    let mut self_reviews = 0usize;
    for review in reviews {
        let Some(pr) = by_number.get(&review.pr_number) else {
            orphaned += 1;
            continue;
        };
        if cfg.normalize.exclude_self_reviews && review.reviewer == pr.author {
            self_reviews += 1;
            continue;
        }
        let points = review_points(pr, review, weights)?;
        let tally = tallies.entry(review.reviewer.clone()).or_default();
        tally.review_total += points;
        tally.review_count += 1;
        tally.mark_active(review.submitted_at, window);
    }

    let mut scores = tallies
        .into_iter()
        .map(|(login, mut tally)| {
            let base = base_impact(tally.shipping_total, tally.review_total, cfg);
            let ratio = tally.touch.ratio();
            let multiplier = core_multiplier(ratio, cfg);
            let active_weeks = u32::try_from(tally.weeks.len()).unwrap_or(u32::MAX);
            let bonus = consistency_bonus(active_weeks, cfg);
            tally.top_prs.sort_by(|a, b| {
                b.shipping
                    .total_cmp(&a.shipping)
                    .then_with(|| a.number.cmp(&b.number))
            });
            tally.top_prs.truncate(TOP_PRS_PER_ENGINEER);
            EngineerScore {
                rank: 0,
                login,
                final_impact: base * multiplier * bonus,
                base_impact: base,
                core_multiplier: multiplier,
                consistency_bonus: bonus,
                shipping_total: tally.shipping_total,
                review_total: tally.review_total,
                active_weeks,
                core_touch_ratio: ratio,
                pr_count: tally.pr_count,
                review_count: tally.review_count,
                top_prs: tally.top_prs,
            }
        })
        .collect::<Vec<_>>();

    rank_scores(&mut scores);

    append_run_log(
        "info",
        "aggregate.completed",
        json!({
            "engineers": scores.len(),
            "pull_requests": prs.len(),
            "reviews": reviews.len(),
            "orphaned_reviews": orphaned,
            "self_reviews_excluded": self_reviews,
            "leader": scores.first().map(|s| s.login.as_str())
        }),
    );
    Ok(scores)
}

/// Descending by FinalImpact, ties by login; assigns 1-based ranks.
pub fn rank_scores(scores: &mut [EngineerScore]) {
    scores.sort_by(|a, b| {
        b.final_impact
            .total_cmp(&a.final_impact)
            .then_with(|| a.login.cmp(&b.login))
    });
    for (index, score) in scores.iter_mut().enumerate() {
        score.rank = index + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{consistency_bonus, core_multiplier, score_engineers, ScoringWindow};
    use crate::config::AppConfig;
    use crate::model::{CoreDirectorySet, PullRequest, ReviewEvent};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0)
            .single()
            .expect("timestamp")
    }

    fn window() -> ScoringWindow {
        ScoringWindow::ending_at(as_of(), 90)
    }

    fn pr(number: u64, author: &str, days_ago: i64, files: &[(&str, i64)]) -> PullRequest {
        let churn: i64 = files.iter().map(|(_, c)| *c).sum();
        PullRequest {
            number,
            node_id: format!("node_{number}"),
            title: format!("PR {number}"),
            url: String::new(),
            author: author.to_string(),
            merged_at: as_of() - Duration::days(days_ago),
            created_at: None,
            changed_files: files.len().max(1) as i64,
            additions: churn.max(10),
            deletions: 0,
            comment_count: 1,
            thread_count: 0,
            file_churn: files
                .iter()
                .map(|(p, c)| (p.to_string(), *c))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn review(pr_number: u64, reviewer: &str, days_ago: i64, comments: i64) -> ReviewEvent {
        ReviewEvent {
            pr_number,
            reviewer: reviewer.to_string(),
            state: "APPROVED".to_string(),
            submitted_at: as_of() - Duration::days(days_ago),
            review_comment_count: comments,
        }
    }

    #[test]
    fn multipliers_degenerate_to_one() {
        let cfg = AppConfig::default();
        assert_eq!(core_multiplier(0.0, &cfg), 1.0);
        assert_eq!(consistency_bonus(0, &cfg), 1.0);
        assert!((core_multiplier(1.0, &cfg) - 1.3).abs() < 1e-12);
        assert!((consistency_bonus(3, &cfg) - 1.05).abs() < 1e-12);
        assert!((consistency_bonus(40, &cfg) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn reviewers_without_prs_are_scored_and_self_reviews_excluded() {
        let cfg = AppConfig::default();
        let prs = vec![pr(1, "alice", 2, &[("src/a.rs", 100)])];
        let reviews = vec![review(1, "bob", 1, 3), review(1, "alice", 1, 1)];
        let scores = score_engineers(&prs, &reviews, &CoreDirectorySet::default(), &cfg, &window())
            .expect("scores");

        let alice = scores.iter().find(|s| s.login == "alice").expect("alice");
        assert_eq!(alice.review_count, 0);
        assert_eq!(alice.review_total, 0.0);
        let bob = scores.iter().find(|s| s.login == "bob").expect("bob");
        assert_eq!(bob.pr_count, 0);
        assert_eq!(bob.review_count, 1);
        assert!(bob.review_total > 0.0);
        assert_eq!(bob.core_touch_ratio, 0.0);
        assert_eq!(bob.core_multiplier, 1.0);
    }

    #[test]
    fn core_touch_ratio_is_churn_weighted_across_prs() {
        let cfg = AppConfig::default();
        let core: CoreDirectorySet = ["frontend".to_string()].into_iter().collect();
        let prs = vec![
            pr(1, "alice", 2, &[("frontend/a.tsx", 300)]),
            pr(2, "alice", 3, &[("docs/b.md", 100)]),
        ];
        let scores = score_engineers(&prs, &[], &core, &cfg, &window()).expect("scores");
        assert!((scores[0].core_touch_ratio - 0.75).abs() < 1e-12);
        assert!((scores[0].core_multiplier - (1.0 + 0.3 * 0.75)).abs() < 1e-12);
    }

    #[test]
    fn active_weeks_count_distinct_iso_weeks_inside_window() {
        let cfg = AppConfig::default();
        let prs = vec![
            pr(1, "alice", 0, &[]),
            pr(2, "alice", 0, &[]),
            pr(3, "alice", 7, &[]),
            pr(4, "alice", 200, &[]),
        ];
        let reviews = vec![review(1, "alice", 14, 0)];
        let mut cfg_with_self = cfg.clone();
        cfg_with_self.normalize.exclude_self_reviews = false;
        let scores =
            score_engineers(&prs, &reviews, &CoreDirectorySet::default(), &cfg_with_self, &window())
                .expect("scores");
        assert_eq!(scores[0].active_weeks, 3);

        let scores = score_engineers(&prs, &reviews, &CoreDirectorySet::default(), &cfg, &window())
            .expect("scores");
        assert_eq!(scores[0].active_weeks, 2);
    }

    #[test]
    fn ranking_is_descending_with_login_tiebreak() {
        let cfg = AppConfig::default();
        let prs = vec![
            pr(1, "zed", 1, &[("src/a.rs", 50)]),
            pr(2, "amy", 1, &[("src/a.rs", 50)]),
            pr(3, "max", 1, &[("src/a.rs", 5000)]),
        ];
        let scores = score_engineers(&prs, &[], &CoreDirectorySet::default(), &cfg, &window())
            .expect("scores");
        let order = scores.iter().map(|s| s.login.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["max", "amy", "zed"]);
        let ranks = scores.iter().map(|s| s.rank).collect::<Vec<_>>();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn orphaned_reviews_are_ignored() {
        let cfg = AppConfig::default();
        let prs = vec![pr(1, "alice", 1, &[])];
        let reviews = vec![review(99, "bob", 1, 2)];
        let scores = score_engineers(&prs, &reviews, &CoreDirectorySet::default(), &cfg, &window())
            .expect("scores");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].login, "alice");
    }

    #[test]
    fn top_prs_keep_three_highest_shipping() {
        let cfg = AppConfig::default();
        let prs = (1..=5)
            .map(|n| pr(n, "alice", 1, &[("src/a.rs", (n as i64) * 100)]))
            .collect::<Vec<_>>();
        let scores = score_engineers(&prs, &[], &CoreDirectorySet::default(), &cfg, &window())
            .expect("scores");
        let numbers = scores[0].top_prs.iter().map(|p| p.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![5, 4, 3]);
    }
}
