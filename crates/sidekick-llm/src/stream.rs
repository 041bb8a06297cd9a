//! Provider stream events (SPEC_FULL.md §4.I).

/// Events a provider emits while streaming. Only `TextDelta` and
/// `SummaryTextDelta` are translated into flow events; everything else is
/// provider-specific and dropped by the consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { delta: String },
    SummaryTextDelta { delta: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    Thinking { delta: String },
    Done,
    Error { message: String },
}

/// Parses one line of an `event: <type>` / `data: <json>` SSE stream.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ").map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}
