//! Context assembly.
//!
//! Renders ordered retrieval results into a single grounding string with
//! source attribution. An empty result set renders as an empty string;
//! callers treat that as "answer without grounding", not as an error.

/// Separator between context sections.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// One retrieved piece of grounding text and where it came from.
#[derive(Debug, Clone)]
pub struct ContextSection {
    pub source: String,
    pub content: String,
}

impl ContextSection {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }
}

/// Render sections as `[Source: <label>]\n<content>` joined by the fixed
/// separator.
pub fn assemble_context(sections: &[ContextSection]) -> String {
    sections
        .iter()
        .map(|section| format!("[Source: {}]\n{}", section.source, section.content))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_results_render_as_empty_string() {
        assert_eq!(assemble_context(&[]), "");
    }

    #[test]
    fn sections_are_labeled_and_separated() {
        let sections = vec![
            ContextSection::new("guide.pdf", "How to install the server."),
            ContextSection::new("faq.md", "Common configuration mistakes."),
        ];

        let context = assemble_context(&sections);
        assert_eq!(
            context,
            "[Source: guide.pdf]\nHow to install the server.\n\n---\n\n[Source: faq.md]\nCommon configuration mistakes."
        );
    }
}
