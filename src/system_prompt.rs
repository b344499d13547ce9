//! Prompt construction
//!
//! The generate endpoint takes a single prompt string, so the preamble and
//! the whole transcript are flattened into labelled lines. The transcript is
//! never truncated: prompt size grows with the conversation.

use crate::config::WidgetConfig;
use crate::conversation::Message;

/// Build the assistant preamble from the widget configuration
pub fn build_preamble(config: &WidgetConfig) -> String {
    let email = &config.contact.email;
    let phone = &config.contact.phone;
    let portfolio = &config.portfolio_url;

    format!(
        "You're a portfolio assistant for a software developer. Keep responses short (1-2 sentences max).

Key Info:
- Portfolio: {portfolio}
- Email: {email}
- Phone: {phone}

Rules:
1. When asked about projects or the portfolio, respond: \"Check my portfolio: {portfolio}\"
2. For contact requests: \"Email: {email} | Phone: {phone}\"
3. Keep responses concise and professional.
4. Answer questions about software development and related tooling.
5. Gracefully steer unrelated questions back to software development."
    )
}

/// Flatten the preamble and transcript into a single prompt
///
/// The transcript is expected to end with the user message being answered;
/// a trailing `Assistant:` cue asks the model to continue as the assistant.
pub fn build_prompt(preamble: &str, transcript: &[Message]) -> String {
    let history = transcript
        .iter()
        .map(|msg| format!("{}: {}", msg.sender.label(), msg.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{preamble}\n\nConversation history:\n{history}\n\nAssistant:")
}
