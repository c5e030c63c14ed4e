use docindex_core::types::RetrievalHit;

/// Passages labelled `[Chunk 1]`, `[Chunk 2]`, ... in retrieval order.
pub fn format_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("[Chunk {}]: {}", i + 1, h.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Grounding prompt: the model may answer only from the listed passages.
pub fn build_prompt(question: &str, hits: &[RetrievalHit]) -> String {
    format!(
        "You help a user understand their own documents. Below are passages \
retrieved from those documents for the question that follows.\n\n\
Passages:\n\n{context}\n\n\
Question: {question}\n\n\
Rules:\n\
- Base the answer only on the passages above.\n\
- If the passages do not contain the answer, say plainly that the documents do not cover it.\n\
- Refer to passages by their [Chunk n] label when it helps.\n\n\
Answer:",
        context = format_context(hits),
    )
}
