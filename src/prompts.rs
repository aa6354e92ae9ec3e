//! Instruction text for the primary model

/// Characters of `context` shown inline in the system prompt.
const CONTEXT_PREVIEW_CHARS: usize = 200;

/// Longest prefix of `text` holding at most `max_chars` characters.
///
/// Cuts on a character boundary, never inside a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Build the system prompt for one run.
///
/// `tool_prompt` is the rendered tool description block, inserted verbatim.
pub fn build_system_prompt(context: &str, tool_prompt: &str) -> String {
    let length = context.chars().count();
    let preview = if length > CONTEXT_PREVIEW_CHARS {
        format!("{}...", truncate_chars(context, CONTEXT_PREVIEW_CHARS))
    } else {
        context.to_string()
    };

    format!(
        r#"You are an RLM (Recursive Language Model) operating in a Python REPL environment.

You have a variable `context` available containing the user's input data ({length} characters).
Preview: {preview}

You can write Python code in ```python blocks to:
- Examine and process the context programmatically
- Call retrieval tools to find additional information
- Use llm_query(prompt, ctx) for recursive sub-LM calls on text
- Use print() to see intermediate results

Variables you define persist between code blocks.

When you have your final answer, call SUBMIT("your answer here").

Available tools in the REPL namespace:
{tool_prompt}

Built-in functions:
- llm_query(prompt: str, ctx: str = "") -> str
  Call a sub-LM to process or analyze text. Useful for summarizing
  retrieved documents or extracting specific information.

- SUBMIT(answer: str)
  Call this when you have your final answer.

Strategy:
1. First understand what the user is asking
2. If you need specific files, use find_file() for fuzzy matching
3. If you need conceptual search, use list_knowledge_bases() then search_docs()
4. Process retrieved content with llm_query() if needed
5. SUBMIT your final answer

Write code to solve the problem step by step. You will see the output of each code block before deciding your next step."#
    )
}
