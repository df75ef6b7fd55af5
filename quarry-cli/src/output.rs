//! Plain-text rendering of a research corpus.

use quarry_core::ResearchCorpus;
use std::fmt::Write;

/// Render the corpus for a terminal: summary, learnings, context, sources.
pub fn render_text(corpus: &ResearchCorpus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Research: {}", corpus.query);
    let _ = writeln!(
        out,
        "Stopped: {} after {} level(s); {} sub-queries, {} sources, cost {:.1}",
        corpus.termination,
        corpus.levels_completed,
        corpus.sub_queries.len(),
        corpus.citations.len(),
        corpus.cost
    );

    if corpus.is_empty() {
        let _ = writeln!(out, "\nNo relevant content was found.");
        return out;
    }

    if !corpus.learnings.is_empty() {
        let _ = writeln!(out, "\n# Learnings");
        for learning in &corpus.learnings {
            let _ = writeln!(out, "- {learning}");
        }
    }

    if !corpus.context.trim().is_empty() {
        let _ = writeln!(out, "\n# Context\n{}", corpus.context.trim_end());
    }

    if !corpus.citations.is_empty() {
        let _ = writeln!(out, "\n# Sources");
        for (i, citation) in corpus.citations.iter().enumerate() {
            let title = if citation.title.trim().is_empty() {
                citation.url.as_str()
            } else {
                citation.title.trim()
            };
            let _ = writeln!(out, "[{}] {} <{}>", i + 1, title, citation.url);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::research::{Citation, SubQuery};
    use quarry_core::Termination;

    fn corpus() -> ResearchCorpus {
        ResearchCorpus {
            query: "How do tides form?".into(),
            context: "[Tides](https://sea.example/tides)\nThe moon pulls the ocean.\n".into(),
            chunks: vec![],
            citations: vec![
                Citation {
                    url: "https://sea.example/tides".into(),
                    title: "Tides".into(),
                },
                Citation {
                    url: "https://moon.example/".into(),
                    title: " ".into(),
                },
            ],
            visited_urls: vec![
                "https://sea.example/tides".into(),
                "https://moon.example/".into(),
            ],
            cost: 12.0,
            learnings: vec!["The moon pulls the ocean.".into()],
            sub_queries: vec![SubQuery::root("tides moon")],
            levels_completed: 1,
            termination: Termination::Converged,
        }
    }

    #[test]
    fn test_render_populated_corpus() {
        let text = render_text(&corpus());
        assert!(text.starts_with("Research: How do tides form?\n"));
        assert!(text.contains(
            "Stopped: converged after 1 level(s); 1 sub-queries, 2 sources, cost 12.0"
        ));
        assert!(text.contains("# Learnings\n- The moon pulls the ocean.\n"));
        assert!(text.contains("# Context\n[Tides](https://sea.example/tides)"));
        assert!(text.contains("[1] Tides <https://sea.example/tides>"));
        // Blank titles fall back to the URL.
        assert!(text.contains("[2] https://moon.example/ <https://moon.example/>"));
    }

    #[test]
    fn test_render_empty_corpus() {
        let mut empty = corpus();
        empty.context.clear();
        empty.citations.clear();
        empty.learnings.clear();
        let text = render_text(&empty);
        assert!(text.contains("No relevant content was found."));
        assert!(!text.contains("# Sources"));
    }
}
