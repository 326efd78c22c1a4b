//! Request rendering for profile descriptions.

use serde::Serialize;

use super::profile::ProfileRecord;
use crate::chat::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You write short, factual descriptions of social media creators. \
Stick to what the profile says, and do not use emojis or hype.";

/// Endpoint every batch line targets.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// The user instruction for one profile.
pub fn user_prompt(profile: &ProfileRecord) -> String {
    format!(
        "Describe the social media profile below in about 25 words. Cover what they do and \
         the themes of their content. Leave out hashtags, emojis, follower counts and any \
         contact details such as emails or phone numbers.\n\nProfile:\n{}",
        profile.to_prompt_json()
    )
}

/// Messages sent to generate a description for `profile`.
pub fn description_messages(profile: &ProfileRecord) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt(profile))]
}

/// A plausible description, used to estimate output size before generation.
pub fn sample_description(profile: &ProfileRecord) -> String {
    let role = profile.bio.split_whitespace().next().unwrap_or("creator");
    let place = if profile.location.is_empty() {
        "online"
    } else {
        profile.location.as_str()
    };
    format!(
        "{} is a {} from {}. With {} followers, they share content about {}.",
        profile.fullname, role, place, profile.followers, profile.hashtags
    )
}

#[derive(Debug, Serialize)]
struct BatchBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct BatchLine<'a> {
    custom_id: String,
    method: &'static str,
    url: &'static str,
    body: BatchBody<'a>,
}

/// Render profiles as batch-API JSONL, one request per line.
///
/// `custom_id` is `profile{index}` where index is the position in `profiles`.
pub fn render_batch_jsonl(
    profiles: &[ProfileRecord],
    model: &str,
    max_tokens: u32,
) -> Result<String, serde_json::Error> {
    let mut lines = Vec::with_capacity(profiles.len());
    for (index, profile) in profiles.iter().enumerate() {
        let line = BatchLine {
            custom_id: format!("profile{index}"),
            method: "POST",
            url: CHAT_COMPLETIONS_PATH,
            body: BatchBody {
                model,
                messages: description_messages(profile),
                max_tokens,
            },
        };
        lines.push(serde_json::to_string(&line)?);
    }
    Ok(lines.join("\n"))
}
