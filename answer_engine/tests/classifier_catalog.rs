//! Frozen classifier catalog.
//!
//! Changing a classifier pattern silently reclassifies queries, so the
//! catalog's observable behavior is pinned here: a table of representative
//! queries with the intent and per-family match counts they must produce.
//! A pattern edit that shifts any row is a deliberate, reviewed change.

use answer_engine::models::QueryIntent;
use answer_engine::services::classifier::QueryClassifier;

struct Frozen {
    query: &'static str,
    intent: QueryIntent,
    statistical: usize,
    contextual: usize,
    hybrid: usize,
}

const CATALOG: &[Frozen] = &[
    Frozen {
        query: "Who scored the most points this season?",
        intent: QueryIntent::SqlOnly,
        statistical: 4,
        contextual: 0,
        hybrid: 0,
    },
    Frozen {
        query: "How many players scored over 1000 points?",
        intent: QueryIntent::SqlOnly,
        statistical: 5,
        contextual: 0,
        hybrid: 0,
    },
    Frozen {
        query: "Show the top 5 rebounders.",
        intent: QueryIntent::SqlOnly,
        statistical: 1,
        contextual: 0,
        hybrid: 0,
    },
    Frozen {
        query: "What about his assists?",
        intent: QueryIntent::SqlOnly,
        statistical: 1,
        contextual: 0,
        hybrid: 0,
    },
    Frozen {
        query: "What do fans think about home court advantage in the playoffs?",
        intent: QueryIntent::Contextual,
        statistical: 0,
        contextual: 2,
        hybrid: 0,
    },
    Frozen {
        query: "Why is spacing so important in the modern game?",
        intent: QueryIntent::Contextual,
        statistical: 0,
        contextual: 2,
        hybrid: 0,
    },
    Frozen {
        query: "Explain the difference in coaching philosophy between the conferences.",
        intent: QueryIntent::Contextual,
        statistical: 0,
        contextual: 2,
        hybrid: 0,
    },
    Frozen {
        query: "Compare Jokic and Embiid's stats and explain which one is more valuable based on their playing style.",
        intent: QueryIntent::Hybrid,
        statistical: 1,
        contextual: 2,
        hybrid: 4,
    },
    Frozen {
        query: "List the top 10 scorers and discuss what makes them efficient.",
        intent: QueryIntent::Hybrid,
        statistical: 1,
        contextual: 1,
        hybrid: 3,
    },
    Frozen {
        query: "What is the weather forecast for Los Angeles tomorrow?",
        intent: QueryIntent::Unknown,
        statistical: 0,
        contextual: 0,
        hybrid: 0,
    },
    Frozen {
        query: "hello",
        intent: QueryIntent::Unknown,
        statistical: 0,
        contextual: 0,
        hybrid: 0,
    },
];

#[test]
fn catalog_classifications_are_frozen() {
    let classifier = QueryClassifier::new();

    for frozen in CATALOG {
        let result = classifier.classify(frozen.query);
        assert_eq!(
            result.intent, frozen.intent,
            "intent drifted for {:?} ({})",
            frozen.query, result.reason
        );
        assert_eq!(
            result.matches.statistical, frozen.statistical,
            "statistical count drifted for {:?}",
            frozen.query
        );
        assert_eq!(
            result.matches.contextual, frozen.contextual,
            "contextual count drifted for {:?}",
            frozen.query
        );
        assert_eq!(
            result.matches.hybrid, frozen.hybrid,
            "hybrid count drifted for {:?}",
            frozen.query
        );
    }
}

#[test]
fn catalog_is_stable_across_repeated_runs() {
    let classifier = QueryClassifier::new();
    for frozen in CATALOG {
        let first = classifier.classify(frozen.query);
        let second = classifier.classify(frozen.query);
        assert_eq!(first.intent, second.intent);
        assert_eq!(first.matches, second.matches);
    }
}
