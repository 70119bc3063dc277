use crate::context::ContextFragment;

pub const REGULAR_PROMPT: &str = "You are a friendly clinical assistant. Keep your responses concise and helpful. \
You support clinicians with documentation, summaries and general medical information. \
You do not replace clinical judgement, and you say so when a question calls for it.";

pub const DOCUMENTS_PROMPT: &str = "Documents are a side panel for longer content such as notes, letters, care plans or code. \
Use `createDocument` for substantial content (over about ten lines) or content the user is likely to save or reuse. \
Use `updateDocument` only when the user asks to change a document you created, and never right after creating it. \
Do not use document tools for short conversational answers.";

/// The system prompt for one turn.
///
/// The context fragment goes first. Reasoning-only variants run without
/// tools, so they also get no tool guidance.
pub fn system_prompt(fragment: &ContextFragment, tools_enabled: bool) -> String {
    let base = if tools_enabled {
        format!("{REGULAR_PROMPT}\n\n{DOCUMENTS_PROMPT}")
    } else {
        REGULAR_PROMPT.to_string()
    };
    if fragment.is_empty() {
        base
    } else {
        format!("{}\n\n{base}", fragment.as_str())
    }
}
