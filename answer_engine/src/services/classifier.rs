//! Query Classifier
//!
//! Decides, without calling any model, whether a question should be routed
//! to the SQL path, the vector path, both, or treated as unknown. Three
//! disjoint regex families are evaluated against the lowercased query and
//! the per-family match counts drive a fixed decision table.
//!
//! The catalog is frozen by `tests/classifier_catalog.rs`: editing a pattern
//! silently reclassifies queries, so any change has to update the frozen
//! table deliberately.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::{PatternMatches, QueryClassification, QueryIntent};

/// Superlatives, stat tokens, aggregations, numeric comparisons.
static STATISTICAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b(top|first)\s+\d+\b",
        r"\b(most|highest|best|fewest|lowest|leading)\s+[a-z]+",
        r"\bwho\s+(has|have|had|scored|leads?|led|averaged?)\b",
        r"\b(pts|reb|ast|stl|blk|tov|fgm|fga|fg%|3p%|ft%|ts%|efg%|per|usg%|bpm|vorp)\b",
        r"\b(points?|rebounds?|assists?|steals?|blocks?|turnovers?|minutes)\b",
        r"\b(average|mean|total|sum|count|how\s+many|number\s+of)\b",
        r"\b(more|less|fewer|greater|over|under|above|below|at\s+least)\s+(than\s+)?\d",
        r"\b(per\s+game|season\s+(high|average|total|leaders?))\b",
        r"\bstat(s|istics|line)?\b",
        r"\b(scored|averag(es|ed|ing)|record(ed)?|shot|shooting)\b",
        r"\d+\s*(points?|rebounds?|assists?|blocks?|steals?|threes?|3-pointers?)",
        r"\b(rank(s|ed|ing)?|leaders?|leaderboard)\b",
        r"\b(percentage|efficiency|field\s+goal|free\s+throw|three-point)\b",
    ])
});

/// Explanation verbs, opinion markers, stylistic/strategic nouns.
static CONTEXTUAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bwhy\b",
        r"\bhow\s+(does|did|has|have|is|are|was|were)\b",
        r"\b(explain|explanation|describe|discuss(ion|ed)?)\b",
        r"\b(think|believe|opinion|feel|felt|perceive)\b",
        r"\b(style|approach|strategy|philosophy|scheme|mentality)\b",
        r"\b(impact|influence|legacy|significan(t|ce)|importan(t|ce))\b",
        r"\b(fans?|media|analysts?|people|crowd)\b",
        r"\b(story|history|background|context|narrative|culture)\b",
        r"\b(debate|controversy|argument|criticism|rivalry)\b",
    ])
});

/// Conjunctions of a statistical query with an explanation request.
static HYBRID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(top|most|best|highest|leading).*\b(and|then)\b.*\b(explain|why|what\s+makes|how)\b",
        r"\b(compare|list|show|rank)\b.*\band\b.*\b(explain|analyze|analyse|discuss|tell)\b",
        r"\b(stats?|numbers|statistics)\b.*\b(and|then)\b.*\b(explain|why|discuss|analyze|context)\b",
        r"\b(who|which\s+(player|team))\b.*\b(most|highest|best)\b.*\b(and|then)\b.*\b(why|how|explain)\b",
        r"\bcompare\b.*\b(stats?|numbers|statistics)\b.*\b(explain|discuss|analy[sz]e|valuable|style)\b",
        r"\b(explain|analyze|analyse|discuss)\b.*\b(based\s+on|using|with)\b.*\b(stats?|numbers|data)\b",
        r"\b(valuable|better|worse|improved|declined)\b.*\b(based\s+on|according\s+to)\b.*\b(stats?|numbers|data|playing)\b",
        r"\b(show|give|list)\b.*\b(stats?|numbers)\b.*\b(and|then)\b.*\b(tell|explain|describe)\b",
        r"\b(best|worst|top)\b.*\b(and|then)\b.*\b(what|why|how)\s+(makes|sets|separates)\b",
        r"\bboth\b.*\b(stats?|numbers)\b.*\b(and|as\s+well\s+as)\b.*\b(analysis|context|explanation)\b",
        r"\b(how\s+many|average|total)\b.*\b(and|then)\b.*\b(why|explain|discuss)\b",
        r"\b(leaders?|rankings?)\b.*\b(and|then)\b.*\b(analysis|explain|discuss|why)\b",
        r"\bbreak\s*down\b.*\b(stats?|numbers|performance)\b",
        r"\b(performance|production)\b.*\b(and|then)\b.*\b(explain|context|analysis|discuss)\b",
        r"\b(stats?|statistics|numbers)\b.*\b(what|why|how)\s+(do|does|did)\s+(they|it|that)\s+(mean|say|tell)\b",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid classifier pattern {p}: {e}")))
        .collect()
}

/// Deterministic pattern-based router. Never fails; an empty or gibberish
/// query yields `Unknown` with confidence 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> QueryClassification {
        let normalized = query.to_lowercase();

        // Single-token fragments carry too little signal to route.
        if normalized.split_whitespace().count() < 2 {
            return QueryClassification {
                intent: QueryIntent::Unknown,
                confidence: 0.0,
                matches: PatternMatches::default(),
                reason: "query shorter than two tokens".to_string(),
            };
        }

        let matches = PatternMatches {
            statistical: count_matches(&STATISTICAL_PATTERNS, &normalized),
            contextual: count_matches(&CONTEXTUAL_PATTERNS, &normalized),
            hybrid: count_matches(&HYBRID_PATTERNS, &normalized),
        };

        let (intent, confidence) = decide(&matches);

        debug!(
            intent = ?intent,
            confidence,
            statistical = matches.statistical,
            contextual = matches.contextual,
            hybrid = matches.hybrid,
            "query classified"
        );

        QueryClassification {
            intent,
            confidence,
            matches,
            reason: format!(
                "{} statistical, {} contextual, {} hybrid pattern matches",
                matches.statistical, matches.contextual, matches.hybrid
            ),
        }
    }
}

fn count_matches(patterns: &[Regex], query: &str) -> usize {
    patterns.iter().filter(|p| p.is_match(query)).count()
}

/// The fixed decision table over (S, C, H) counts.
fn decide(matches: &PatternMatches) -> (QueryIntent, f32) {
    let s = matches.statistical;
    let c = matches.contextual;
    let h = matches.hybrid;

    if h >= 1 {
        return (QueryIntent::Hybrid, (0.6 + 0.1 * h as f32).min(0.9));
    }
    if s >= 2 && c >= 1 {
        return (QueryIntent::Hybrid, 0.8);
    }
    if s >= 1 && c == 0 {
        return (QueryIntent::SqlOnly, (0.5 + 0.1 * s as f32).min(0.9));
    }
    if c >= 1 && s == 0 {
        return (QueryIntent::Contextual, (0.5 + 0.1 * c as f32).min(0.85));
    }
    (QueryIntent::Unknown, 0.0)
}
