//! Prompt Assembler
//!
//! Selects a category-specific template and binds its slots: the app name,
//! the question, recent conversation history, formatted SQL results, and
//! retrieved context. Templates are values in a map keyed by routing; the
//! selection is a lookup, never an if-chain. Citation discipline is
//! expressed in the template text, not enforced at runtime.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::models::{HistoryTurn, RetrievalHit, RoutingLabel};

/// Character budget for the retrieved-context slot; the assembler cuts at
/// chunk boundaries, never mid-chunk.
const CONTEXT_CHAR_BUDGET: usize = 8_000;

const SQL_ONLY_TEMPLATE: &str = "\
You are {app_name}, an NBA statistics assistant.

{conversation_history}SQL query results:
{sql_results}

Question: {question}

Answer the question using the SQL query results above. The results are \
authoritative: when a value is present, state it directly and never claim \
the data is unavailable. Cite the results as [SQL] after each figure you use.";

const CONTEXTUAL_TEMPLATE: &str = "\
You are {app_name}, an NBA assistant grounded in a curated text corpus.

{conversation_history}Context:
{context}

Question: {question}

Give a qualitative analysis grounded in the context above. Cite each claim \
with the [Source: ...] header of the passage it comes from. If the context \
does not cover part of the question, say so rather than speculating.";

const HYBRID_TEMPLATE: &str = "\
You are {app_name}, an NBA analyst combining statistics with reporting and \
fan discussion.

{conversation_history}SQL query results:
{sql_results}

Context:
{context}

Question: {question}

Use both blocks. Lead with the statistical answer from the SQL results, \
then connect it to the context. Cite every factual claim: [SQL] for figures \
from the query results, [Source: ...] for claims drawn from the context.";

const FALLBACK_TEMPLATE: &str = "\
You are {app_name}.

{conversation_history}Context:
{context}

Question: {question}

Answer only from the provided context. If the context does not contain the \
answer, say that the available context doesn't contain this information.";

static TEMPLATES: Lazy<HashMap<RoutingLabel, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (RoutingLabel::SqlOnly, SQL_ONLY_TEMPLATE),
        (RoutingLabel::VectorOnly, CONTEXTUAL_TEMPLATE),
        (RoutingLabel::Hybrid, HYBRID_TEMPLATE),
        (RoutingLabel::Unknown, FALLBACK_TEMPLATE),
    ])
});

/// Everything the assembler needs for one request.
pub struct PromptInputs<'a> {
    pub app_name: &'a str,
    pub question: &'a str,
    /// Recent turns, oldest first; empty when no conversation was supplied
    pub history: &'a [HistoryTurn],
    /// Formatted SQL output; `None` renders the no-results literal
    pub sql_results: Option<&'a str>,
    pub hits: &'a [RetrievalHit],
}

/// Assemble the prompt for the effective routing.
pub fn assemble(routing: RoutingLabel, inputs: &PromptInputs<'_>) -> String {
    let template = TEMPLATES
        .get(&routing)
        .copied()
        .unwrap_or(FALLBACK_TEMPLATE);

    template
        .replace("{app_name}", inputs.app_name)
        .replace("{question}", inputs.question)
        .replace("{conversation_history}", &render_history(inputs.history))
        .replace(
            "{sql_results}",
            inputs.sql_results.unwrap_or("No results found."),
        )
        .replace("{context}", &render_context(inputs.hits))
}

/// Alternating `User:` / `Assistant:` lines under a header, followed by a
/// blank line; empty when there is no history.
fn render_history(history: &[HistoryTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut out = String::from("Conversation so far:\n");
    for turn in history {
        out.push_str(&format!("User: {}\n", turn.query));
        out.push_str(&format!("Assistant: {}\n", turn.response));
    }
    out.push('\n');
    out
}

/// Concatenate retrieved chunk texts, each under a `[Source: ...]` header,
/// blank-line separated, within the character budget.
fn render_context(hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return "No supporting passages were retrieved.".to_string();
    }

    let mut out = String::new();
    for hit in hits {
        let block = format!("[Source: {}]\n{}", hit.chunk.source, hit.chunk.text);
        let separator = if out.is_empty() { 0 } else { 2 };
        if !out.is_empty() && out.len() + separator + block.len() > CONTEXT_CHAR_BUDGET {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
    }
    out
}
