use crate::config::{FetchConfig, RepositoryConfig};
use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::runtime::{Clock, ProcessRequest, ProcessRunner};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;

/// GitHub search never returns more than this many results per query.
pub const SEARCH_RESULT_CAP: u32 = 1000;

const PR_DETAILS_QUERY: &str = "query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      id number title url author { login } mergedAt createdAt
      changedFiles additions deletions
      comments { totalCount } reviewThreads { totalCount }
      reviews(first: __REVIEWS__) {
        nodes { author { login } state submittedAt comments { totalCount } }
      }
    }
  }
}";

const PR_FILES_QUERY: &str = "query($nodeId: ID!, $cursor: String) {
  node(id: $nodeId) {
    ... on PullRequest {
      files(first: __FILES__, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes { path additions deletions }
      }
    }
  }
}";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

pub struct GhClient<'a> {
    runner: &'a dyn ProcessRunner,
    clock: &'a dyn Clock,
    repository: RepositoryConfig,
    fetch: FetchConfig,
}

impl<'a> GhClient<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        clock: &'a dyn Clock,
        repository: &RepositoryConfig,
        fetch: &FetchConfig,
    ) -> Self {
        Self {
            runner,
            clock,
            repository: repository.clone(),
            fetch: fetch.clone(),
        }
    }

    fn slug(&self) -> String {
        format!("{}/{}", self.repository.owner, self.repository.name)
    }

    /// Runs `gh <args>` and parses stdout as JSON, retrying failed calls with
    /// `retry_backoff_seconds ^ attempt` seconds between attempts.
    fn gh_json(&self, operation: &str, args: Vec<String>) -> Result<Value, ImpactError> {
        let attempts = self.fetch.retry_max.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let outcome = self
                .runner
                .run(ProcessRequest {
                    program: "gh".to_string(),
                    args: args.clone(),
                    cwd: None,
                })
                .and_then(|out| {
                    if out.exit_code != 0 {
                        return Err(ImpactError::Process(format!(
                            "exit {}: {}",
                            out.exit_code,
                            out.stderr.trim()
                        )));
                    }
                    serde_json::from_str::<Value>(&out.stdout)
                        .map_err(|e| ImpactError::Process(format!("invalid gh json: {e}")))
                });
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_error = err.to_string();
                    append_run_log(
                        "warn",
                        "gh.call.failed",
                        json!({
                            "operation": operation,
                            "attempt": attempt,
                            "attempts": attempts,
                            "error": last_error
                        }),
                    );
                    if attempt < attempts {
                        let wait = self.fetch.retry_backoff_seconds.saturating_pow(attempt);
                        self.clock.sleep(Duration::from_secs(wait))?;
                    }
                }
            }
        }
        Err(ImpactError::Fetch(format!(
            "{operation} failed after {attempts} attempts: {last_error}"
        )))
    }

    fn graphql(
        &self,
        operation: &str,
        query: &str,
        fields: &[(&str, String)],
    ) -> Result<Value, ImpactError> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={query}"),
        ];
        for (name, value) in fields {
            // -F lets gh coerce integers; strings go through -f
            let flag = if value.parse::<i64>().is_ok() { "-F" } else { "-f" };
            args.push(flag.to_string());
            args.push(format!("{name}={value}"));
        }
        let body = self.gh_json(operation, args)?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| e.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ImpactError::Fetch(format!(
                    "{operation}: graphql errors: {message}"
                )));
            }
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Merged PR numbers for one search window, capped at the search limit.
    pub fn search_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<u64>, ImpactError> {
        let since_str = since.format("%Y-%m-%d").to_string();
        let until_str = until.format("%Y-%m-%d").to_string();
        let query = format!(
            "repo:{} is:pr is:merged merged:{since_str}..{until_str}",
            self.slug()
        );
        let per_page = self.fetch.search_per_page.max(1);
        let mut numbers = Vec::new();
        let mut page = 1u32;
        loop {
            let body = self.gh_json(
                "search",
                vec![
                    "api".to_string(),
                    "-X".to_string(),
                    "GET".to_string(),
                    "search/issues".to_string(),
                    "-f".to_string(),
                    format!("q={query}"),
                    "-f".to_string(),
                    format!("per_page={per_page}"),
                    "-f".to_string(),
                    format!("page={page}"),
                ],
            )?;
            let parsed: SearchPage = serde_json::from_value(body)
                .map_err(|e| ImpactError::Fetch(format!("invalid search response: {e}")))?;
            if parsed.items.is_empty() {
                break;
            }
            numbers.extend(parsed.items.iter().filter_map(|item| item.number));

            let seen = u64::from(page) * u64::from(per_page);
            if seen >= parsed.total_count {
                break;
            }
            if seen >= u64::from(SEARCH_RESULT_CAP) {
                append_run_log(
                    "warn",
                    "gh.search.capped",
                    json!({
                        "since": since_str,
                        "until": until_str,
                        "total_count": parsed.total_count,
                        "cap": SEARCH_RESULT_CAP
                    }),
                );
                break;
            }
            page += 1;
        }
        Ok(numbers)
    }

    /// Splits `[since, until)` into search windows; returns sorted unique numbers.
    pub fn search_merged_pr_numbers(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<u64>, ImpactError> {
        let step = ChronoDuration::days(i64::from(self.fetch.search_window_days.max(1)));
        let mut all = BTreeSet::new();
        let mut window_start = since;
        let mut index = 0usize;
        while window_start < until {
            let window_end = (window_start + step).min(until);
            index += 1;
            let found = self.search_window(window_start, window_end)?;
            all.extend(found.iter().copied());
            append_run_log(
                "info",
                "gh.search.window",
                json!({
                    "window": index,
                    "since": window_start.to_rfc3339(),
                    "until": window_end.to_rfc3339(),
                    "found": found.len(),
                    "unique_total": all.len()
                }),
            );
            window_start = window_end;
        }
        Ok(all.into_iter().collect())
    }

    /// PR metadata and reviews; `None` when the PR is missing or inaccessible.
    pub fn fetch_pr_details(&self, number: u64) -> Result<Option<Value>, ImpactError> {
        let query =
            PR_DETAILS_QUERY.replace("__REVIEWS__", &self.fetch.review_page_size.to_string());
        let data = self.graphql(
            "pr_details",
            &query,
            &[
                ("owner", self.repository.owner.clone()),
                ("name", self.repository.name.clone()),
                ("number", number.to_string()),
            ],
        )?;
        let pr = data
            .pointer("/repository/pullRequest")
            .filter(|value| !value.is_null())
            .cloned();
        if pr.is_none() {
            append_run_log("warn", "gh.pr.missing", json!({ "pr_number": number }));
        }
        Ok(pr)
    }

    /// Every changed file of a PR, following the connection cursor.
    pub fn fetch_files(&self, node_id: &str) -> Result<Vec<Value>, ImpactError> {
        let query = PR_FILES_QUERY.replace("__FILES__", &self.fetch.file_page_size.to_string());
        let mut files = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut fields = vec![("nodeId", node_id.to_string())];
            if let Some(after) = &cursor {
                fields.push(("cursor", after.clone()));
            }
            let data = self.graphql("pr_files", &query, &fields)?;
            let Some(connection) = data.pointer("/node/files") else {
                break;
            };
            if let Some(nodes) = connection.get("nodes").and_then(Value::as_array) {
                files.extend(nodes.iter().cloned());
            }
            let page_info: PageInfo = connection
                .get("pageInfo")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| ImpactError::Fetch(format!("invalid pageInfo: {e}")))?
                .unwrap_or(PageInfo {
                    has_next_page: false,
                    end_cursor: None,
                });
            match (page_info.has_next_page, page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Search, details, then files; each PR payload carries its file list
    /// under `_files`.
    pub fn fetch_all(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Value>, ImpactError> {
        append_run_log(
            "info",
            "gh.fetch.started",
            json!({
                "repository": self.slug(),
                "since": since.to_rfc3339(),
                "until": until.to_rfc3339()
            }),
        );
        let numbers = self.search_merged_pr_numbers(since, until)?;
        let mut records = Vec::with_capacity(numbers.len());
        for number in &numbers {
            let Some(mut pr) = self.fetch_pr_details(*number)? else {
                continue;
            };
            let files = match pr.get("id").and_then(Value::as_str) {
                Some(node_id) => self.fetch_files(node_id)?,
                None => Vec::new(),
            };
            if let Some(object) = pr.as_object_mut() {
                object.insert("_files".to_string(), Value::Array(files));
            }
            records.push(pr);
        }
        append_run_log(
            "info",
            "gh.fetch.completed",
            json!({
                "repository": self.slug(),
                "searched": numbers.len(),
                "fetched": records.len()
            }),
        );
        Ok(records)
    }
}
