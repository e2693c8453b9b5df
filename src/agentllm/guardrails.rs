//! Input/output guardrails and content filters.
//!
//! Guardrails are ordered named predicates over a piece of text; the first
//! failure stops evaluation and reports `"<name>: <reason>"`.  Content
//! filters are pure rewriters: each returns a replacement string, or `None`
//! to block the content outright.

use futures_util::future::BoxFuture;
use regex::Regex;
use std::sync::Arc;

use crate::agentllm::error::Result;

/// Verdict of one guardrail check.
#[derive(Debug, Clone)]
pub struct GuardrailResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl GuardrailResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

type GuardrailCheck = Arc<dyn Fn(String) -> BoxFuture<'static, GuardrailResult> + Send + Sync>;

/// A named predicate applied to agent input or output.
#[derive(Clone)]
pub struct Guardrail {
    pub name: String,
    check: GuardrailCheck,
}

impl Guardrail {
    /// Build from an async predicate.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = GuardrailResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(move |text| Box::pin(f(text))),
        }
    }

    /// Build from a synchronous predicate.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> GuardrailResult + Send + Sync + 'static,
    {
        Self::new(name, move |text: String| {
            let result = f(&text);
            async move { result }
        })
    }

    pub async fn check(&self, text: &str) -> GuardrailResult {
        (self.check)(text.to_string()).await
    }
}

impl std::fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrail").field("name", &self.name).finish()
    }
}

async fn run_guardrails(guardrails: &[Guardrail], text: &str) -> GuardrailResult {
    for guardrail in guardrails {
        let result = guardrail.check(text).await;
        if !result.passed {
            let reason = result.reason.unwrap_or_else(|| "failed".to_string());
            return GuardrailResult::fail(format!("{}: {}", guardrail.name, reason));
        }
    }
    GuardrailResult::pass()
}

/// Evaluate input guardrails in order; the first failure wins. An empty
/// list passes.
pub async fn run_input_guardrails(guardrails: &[Guardrail], input: &str) -> GuardrailResult {
    run_guardrails(guardrails, input).await
}

/// Evaluate output guardrails in order; the first failure wins. An empty
/// list passes.
pub async fn run_output_guardrails(guardrails: &[Guardrail], output: &str) -> GuardrailResult {
    run_guardrails(guardrails, output).await
}

type FilterFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A pure content rewriter. Returning `None` blocks the content.
#[derive(Clone)]
pub struct ContentFilter {
    pub name: String,
    apply: FilterFn,
}

impl ContentFilter {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(f),
        }
    }

    pub fn apply(&self, content: &str) -> Option<String> {
        (self.apply)(content)
    }
}

impl std::fmt::Debug for ContentFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFilter")
            .field("name", &self.name)
            .finish()
    }
}

/// Run filters in order, feeding each one the previous filter's output.
/// The first `None` blocks and returns `None`.
pub fn apply_content_filters(filters: &[ContentFilter], content: &str) -> Option<String> {
    let mut current = content.to_string();
    for filter in filters {
        match filter.apply(&current) {
            Some(replacement) => current = replacement,
            None => {
                log::debug!("content blocked by filter {}", filter.name);
                return None;
            }
        }
    }
    Some(current)
}

/// Guardrail passing iff the text has at most `max_chars` characters.
pub fn max_length_guardrail(max_chars: usize) -> Guardrail {
    Guardrail::sync("max-length", move |text| {
        let length = text.chars().count();
        if length <= max_chars {
            GuardrailResult::pass()
        } else {
            GuardrailResult::fail(format!("length {} exceeds limit {}", length, max_chars))
        }
    })
}

/// Content filter driven by a regular expression.
///
/// Without a replacement the filter blocks matching content (`None`); with
/// one it rewrites every match.
pub fn regex_block_filter(
    name: impl Into<String>,
    pattern: &str,
    replacement: Option<&str>,
) -> Result<ContentFilter> {
    let regex = Regex::new(pattern)
        .map_err(|e| crate::agentllm::error::AgentError::config(format!("bad filter pattern: {}", e)))?;
    let replacement = replacement.map(|r| r.to_string());

    Ok(ContentFilter::new(name, move |content| {
        if !regex.is_match(content) {
            return Some(content.to_string());
        }
        replacement
            .as_ref()
            .map(|r| regex.replace_all(content, r.as_str()).into_owned())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_empty_lists_pass() {
        assert!(run_input_guardrails(&[], "anything").await.passed);
        assert!(run_output_guardrails(&[], "anything").await.passed);
    }

    #[tokio::test]
    async fn test_first_failure_wins_and_stops_evaluation() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let guardrails = vec![
            Guardrail::sync("g1", |_| GuardrailResult::pass()),
            Guardrail::sync("g2", |_| GuardrailResult::fail("r")),
            Guardrail::sync("g3", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                GuardrailResult::pass()
            }),
        ];

        let result = run_input_guardrails(&guardrails, "text").await;
        assert!(!result.passed);
        let reason = result.reason.unwrap();
        assert!(reason.contains("g2") && reason.contains("r"));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_max_length_guardrail() {
        let guardrail = max_length_guardrail(5);
        assert!(guardrail.check("short").await.passed);
        assert!(!guardrail.check("too long").await.passed);
    }

    #[test]
    fn test_filters_chain_replacements() {
        let filters = vec![
            ContentFilter::new("a-to-b", |c| Some(c.replace('a', "b"))),
            ContentFilter::new("b-to-c", |c| Some(c.replace('b', "c"))),
        ];
        assert_eq!(
            apply_content_filters(&filters, "banana").as_deref(),
            Some("ccncnc")
        );
    }

    #[test]
    fn test_first_none_blocks() {
        let filters = vec![
            ContentFilter::new("block-x", |c| if c.contains('x') { None } else { Some(c.into()) }),
            ContentFilter::new("never-reached", |_| Some("rewritten".into())),
        ];
        assert_eq!(apply_content_filters(&filters, "axe"), None);
        assert_eq!(
            apply_content_filters(&filters, "ae").as_deref(),
            Some("rewritten")
        );
    }

    #[test]
    fn test_regex_block_filter_blocks_without_replacement() {
        let filter = regex_block_filter("no-secrets", r"secret-\d+", None).unwrap();
        assert_eq!(filter.apply("contains secret-42"), None);
        assert_eq!(filter.apply("clean").as_deref(), Some("clean"));
    }

    #[test]
    fn test_regex_block_filter_replaces() {
        let filter = regex_block_filter("redact", r"\d{4}", Some("####")).unwrap();
        assert_eq!(filter.apply("pin 1234 end").as_deref(), Some("pin #### end"));
    }

    #[test]
    fn test_regex_block_filter_bad_pattern() {
        assert!(regex_block_filter("broken", "(", None).is_err());
    }
}
