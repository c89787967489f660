//! Prompt composition for chat and analysis jobs, and parsing of the
//! structured parts of analysis replies.

use crate::llm::ChatMessage;

pub const ASSISTANT_PROMPT: &str = "You are AIR (AI Reporting Intelligence), a specialized data analysis assistant. You help users analyze their specific datasets, create reports, and answer questions about their data. Always focus on the user's actual data and provide specific, actionable insights. Be concise and professional.";

pub const DATASET_PROMPT: &str = "You are AIR (AI Reporting Intelligence). You have access to a loaded dataset. Analyze the provided data and answer the user's question directly based on the actual data. Be specific and factual. Don't ask for more data - work with what you have.";

pub const ANALYSIS_PROMPT: &str = "You are a data analysis expert. Analyze the provided file content and provide insights, suggestions, and a summary. Be specific and actionable.";

const DATA_QUESTION_KEYWORDS: &[&str] = &[
    "what can you tell me",
    "analyze",
    "tell me about",
    "what is",
    "headers",
    "columns",
    "structure",
    "count",
    "how many",
    "sum",
    "total",
    "years",
    "data",
    "show me",
    "find",
    "list",
];

/// Whether a chat question is likely about the loaded dataset, in which case
/// a preview of the data is worth embedding in the prompt.
pub fn is_data_question(content: &str) -> bool {
    let lower = content.to_lowercase();
    DATA_QUESTION_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn dataset_preview(file_id: &str, size: u64, head: &[u8]) -> String {
    format!(
        "File: {file_id}\nSize: {size} bytes\nData preview:\n{}",
        String::from_utf8_lossy(head)
    )
}

/// Assistant-framed chat turn, grounded in `preview` when one is available.
pub fn chat_messages(content: &str, preview: Option<&str>) -> Vec<ChatMessage> {
    match preview {
        Some(preview) => vec![
            ChatMessage::system(DATASET_PROMPT),
            ChatMessage::user(format!("User question: {content}\n\nDataset:\n{preview}")),
        ],
        None => vec![
            ChatMessage::system(ASSISTANT_PROMPT),
            ChatMessage::user(content),
        ],
    }
}

/// Raw turn: the user's text only, no system framing.
pub fn raw_messages(content: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(content)]
}

pub fn analysis_messages(head: &[u8], query: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANALYSIS_PROMPT),
        ChatMessage::user(format!(
            "Please analyze this file content:\n\n{}\n\nUser query: {query}\n\nProvide:\n1. A summary analysis\n2. Key insights (as a JSON array)\n3. Actionable suggestions (as a JSON array)",
            String::from_utf8_lossy(head)
        )),
    ]
}

/// Every JSON array of strings embedded in `text`, in order of appearance.
pub fn string_arrays(text: &str) -> Vec<Vec<String>> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(start) = text[offset..].find('[').map(|i| offset + i) {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Vec<String>>();
        match stream.next() {
            Some(Ok(items)) => {
                found.push(items);
                offset = start + stream.byte_offset();
            }
            _ => offset = start + 1,
        }
    }
    found
}

/// Insights and suggestions are the first and second string arrays in an
/// analysis reply; either is empty when the model did not produce it.
pub fn insights_and_suggestions(reply: &str) -> (Vec<String>, Vec<String>) {
    let mut arrays = string_arrays(reply).into_iter();
    let insights = arrays.next().unwrap_or_default();
    let suggestions = arrays.next().unwrap_or_default();
    (insights, suggestions)
}
