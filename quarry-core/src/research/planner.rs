//! Sub-query planning.
//!
//! A planner turns a question (plus, during expansion, the learnings gathered
//! so far) into narrower search queries. Planner failures never abort a run:
//! [`plan_sub_queries`] degrades them to an empty plan.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::query::{SubQuery, normalize_text};
use crate::brain::LlmProvider;
use crate::error::PlannerError;
use crate::types::CompletionRequest;

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// Propose up to `count` queries for `query`. `learnings` is empty for the
    /// root plan and holds the parent's new findings during expansion.
    async fn plan(
        &self,
        query: &str,
        learnings: &[String],
        count: usize,
    ) -> Result<Vec<String>, PlannerError>;

    fn name(&self) -> &str;

    /// Whether calls should be charged to the cost meter.
    fn is_metered(&self) -> bool {
        true
    }
}

/// Run the planner and shape its output into sub-queries.
///
/// Blank and duplicate entries are removed, the list is truncated to `count`,
/// and errors become an empty list.
pub async fn plan_sub_queries(
    planner: &dyn QueryPlanner,
    query: &str,
    learnings: &[String],
    count: usize,
    parent: Option<&SubQuery>,
) -> Vec<SubQuery> {
    if count == 0 {
        return Vec::new();
    }
    let raw = match planner.plan(query, learnings, count).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                planner = planner.name(),
                query,
                error = %e,
                "Planning failed, treating branch as exhausted"
            );
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let planned: Vec<SubQuery> = raw
        .into_iter()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .filter(|text| seen.insert(normalize_text(text)))
        .take(count)
        .map(|text| match parent {
            Some(parent) => SubQuery::child_of(parent, text),
            None => SubQuery::root(text),
        })
        .collect();

    debug!(
        planner = planner.name(),
        query,
        requested = count,
        planned = planned.len(),
        "Planned sub-queries"
    );
    planned
}

const PLANNER_SYSTEM_PROMPT: &str = "You are a research planner. Reply with a JSON array of strings and nothing else. \
Each string is a concise web search query that covers a distinct aspect of the question.";

/// Planner backed by an LLM provider.
pub struct LlmQueryPlanner {
    provider: Arc<dyn LlmProvider>,
}

impl LlmQueryPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn build_prompt(query: &str, learnings: &[String], count: usize) -> String {
        if learnings.is_empty() {
            format!("Write {count} search queries to research the following question:\n{query}")
        } else {
            let findings = learnings
                .iter()
                .map(|l| format!("- {l}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "We are researching: {query}\n\nFindings so far:\n{findings}\n\n\
                 Write up to {count} follow-up search queries that dig into what these findings leave open."
            )
        }
    }
}

#[async_trait]
impl QueryPlanner for LlmQueryPlanner {
    async fn plan(
        &self,
        query: &str,
        learnings: &[String],
        count: usize,
    ) -> Result<Vec<String>, PlannerError> {
        let request = CompletionRequest::prompt(
            PLANNER_SYSTEM_PROMPT,
            Self::build_prompt(query, learnings, count),
        );
        let response = self.provider.complete(request).await?;
        parse_string_list(&response.message.text)
    }

    fn name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Parse an LLM reply that should hold a JSON array of strings.
///
/// Looks for the outermost `[...]` first, then falls back to one entry per
/// non-empty line with list markers stripped.
pub(crate) fn parse_string_list(reply: &str) -> Result<Vec<String>, PlannerError> {
    if let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<String>>(&reply[start..=end]) {
                return Ok(items);
            }
        }
    }

    let lines: Vec<String> = reply
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.starts_with(']'))
        .map(str::to_string)
        .collect();

    if lines.is_empty() {
        Err(PlannerError::Parse {
            message: format!("no queries found in reply of {} chars", reply.len()),
        })
    } else {
        Ok(lines)
    }
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '\u{2022}']).trim_start();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let line = if digits > 0 && line[digits..].starts_with(['.', ')']) {
        line[digits + 1..].trim_start()
    } else {
        line
    };
    line.trim_matches('"').trim_end_matches(',').trim_matches('"').trim()
}

/// Offline planner built from structural rules.
///
/// Comparative questions are split into their sides, "how" questions gain a
/// procedural variant, and aspect templates fill the remaining slots. During
/// expansion each finding seeds one follow-up.
#[derive(Debug, Default, Clone)]
pub struct HeuristicPlanner;

const ASPECTS: &[&str] = &[
    "{q} overview",
    "{q} latest developments",
    "{q} challenges and limitations",
    "{q} real-world examples",
    "{q} expert analysis",
];

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self
    }

    fn decompose(&self, question: &str) -> Vec<String> {
        let mut queries = Vec::new();
        let parts = split_comparative(question);
        if parts.len() > 1 {
            queries.extend(parts);
        }
        if question.trim_start().to_lowercase().starts_with("how") {
            queries.push(format!("What are the practical steps for: {question}"));
        }
        let topic = question.trim().trim_end_matches('?');
        queries.extend(ASPECTS.iter().map(|aspect| aspect.replace("{q}", topic)));
        queries
    }

    fn follow_ups(&self, question: &str, learnings: &[String]) -> Vec<String> {
        let topic = question.trim().trim_end_matches('?');
        learnings
            .iter()
            .map(|learning| {
                let head: Vec<&str> = learning.split_whitespace().take(10).collect();
                let head = head.join(" ");
                let head = head.trim_end_matches(['.', ',', ';', ':']);
                format!("{topic}: {head}")
            })
            .collect()
    }
}

#[async_trait]
impl QueryPlanner for HeuristicPlanner {
    async fn plan(
        &self,
        query: &str,
        learnings: &[String],
        count: usize,
    ) -> Result<Vec<String>, PlannerError> {
        let mut planned = if learnings.is_empty() {
            self.decompose(query)
        } else {
            self.follow_ups(query, learnings)
        };
        planned.truncate(count);
        Ok(planned)
    }

    fn name(&self) -> &str {
        "heuristic"
    }

    fn is_metered(&self) -> bool {
        false
    }
}

/// Split a comparative question into its constituent parts.
fn split_comparative(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    // Byte offsets only carry over when lowercasing kept the length.
    let haystack = if lower.len() == question.len() {
        lower.as_str()
    } else {
        question
    };
    for sep in [" vs. ", " vs ", " versus ", " compared to "] {
        if let Some(idx) = haystack
            .find(sep)
            .filter(|idx| {
                question.is_char_boundary(*idx) && question.is_char_boundary(*idx + sep.len())
            })
        {
            let left = question[..idx].trim();
            let right = question[idx + sep.len()..].trim().trim_end_matches('?');
            if !left.is_empty() && !right.is_empty() {
                return vec![left.to_string(), right.to_string()];
            }
        }
    }
    vec![question.to_string()]
}
