//! Prompt blocks built from store results.

use chatforge_core::memory::RetrievalChunk;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Take memories in relevance order until the next one would overflow
/// `max_tokens` or `limit` entries are selected.
pub fn select_within_budget<'a, I>(memories: I, max_tokens: usize, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut selected = Vec::new();
    let mut used = 0;
    for memory in memories {
        let cost = estimate_tokens(memory);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        selected.push(memory.to_string());
        if selected.len() >= limit {
            break;
        }
    }
    selected
}

/// `<UserMemory>` block, or an empty string when there is nothing to say.
pub fn format_memories(memories: &[String]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let bullets: Vec<String> = memories.iter().map(|m| format!("- {m}")).collect();
    format!(
        "<UserMemory>\nThe following are verified memories about the user. Use them to personalize your reply:\n{}\n</UserMemory>",
        bullets.join("\n")
    )
}

/// `<RetrievedContext>` block listing each chunk with its provenance.
pub fn format_retrieved(chunks: &[RetrievalChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let references: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut source = Vec::new();
            if let Some(name) = &chunk.file_name {
                source.push(format!("file: {name}"));
            }
            if let Some(index) = chunk.chunk_index {
                source.push(format!("chunk {}", index + 1));
            }
            if let Some(page) = chunk.page_number.filter(|p| *p > 0) {
                source.push(format!("page {page}"));
            }
            if let Some(section) = &chunk.section_title {
                source.push(format!("section: {section}"));
            }
            let source = if source.is_empty() {
                String::new()
            } else {
                format!(" ({})", source.join(", "))
            };
            format!("[Reference {}{source}]\n{}", i + 1, chunk.content)
        })
        .collect();

    format!(
        "<RetrievedContext>
The following content has been retrieved from your knowledge base and is highly relevant to the user's question. Please use this information to provide accurate and detailed answers.

{}

IMPORTANT INSTRUCTIONS:
1. Prioritize information from the retrieved context when it directly answers the user's question
2. If the retrieved context is relevant, cite it in your response (e.g., \"According to Reference 1 from [file name]...\")
3. You can combine information from the retrieved context with your own knowledge
4. If the retrieved context is not relevant to the question, you may ignore it and use your own knowledge or web search results instead
5. If web search results are also provided, integrate both sources appropriately
</RetrievedContext>",
        references.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> RetrievalChunk {
        RetrievalChunk {
            id: "c1".into(),
            content: content.into(),
            token_count: 0,
            file_id: "f1".into(),
            file_name: None,
            file_type: None,
            similarity: 0.9,
            chunk_index: None,
            page_number: None,
            section_title: None,
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn budget_stops_at_first_overflow() {
        let memories = ["a".repeat(40), "b".repeat(40), "c".repeat(4)];
        let selected = select_within_budget(memories.iter().map(String::as_str), 15, 10);
        assert_eq!(selected.len(), 1);

        let selected = select_within_budget(memories.iter().map(String::as_str), 100, 2);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn memory_block() {
        assert!(format_memories(&[]).is_empty());
        let block = format_memories(&["Likes tea".into(), "Lives in Oslo".into()]);
        assert!(block.starts_with("<UserMemory>"));
        assert!(block.contains("- Likes tea\n- Lives in Oslo"));
        assert!(block.ends_with("</UserMemory>"));
    }

    #[test]
    fn retrieval_block_lists_provenance() {
        let mut first = chunk("Ownership rules");
        first.file_name = Some("book.md".into());
        first.chunk_index = Some(2);
        first.page_number = Some(14);
        let block = format_retrieved(&[first, chunk("Cargo basics")]);

        assert!(block.starts_with("<RetrievedContext>"));
        assert!(block.contains("[Reference 1 (file: book.md, chunk 3, page 14)]\nOwnership rules"));
        assert!(block.contains("[Reference 2]\nCargo basics"));
        assert!(format_retrieved(&[]).is_empty());
    }
}
