//! Prompt templates for the memory subsystem's LLM tasks
//!
//! Templates reference the persona through {persona_name}, {persona_bio} and
//! {persona_voice}; the values come from [`crate::config::PersonaConfig`].

use crate::llm::task::PromptTemplate;

/// Extraction prompt that partitions learnings into the fixed taxonomy
///
/// Placeholder: {conversation} - the activity log rendered as XML
pub const EXTRACTION_PROMPT: &str = r#"You are {persona_name}. {persona_bio}

Review your recent activity log below and extract the durable learnings worth remembering.

Assign every learning to exactly one of these categories:
- "world_knowledge": general facts about the world
- "crypto_ecosystem": facts about blockchains, protocols, tokens, upgrades
- "self_reflection": observations about your own behavior, tone, or performance
- "user_specific": facts about one specific user (also set "user_id")
- "primary_post": the substance of posts you published yourself
- "media_prompts": prompts you used to generate images or other media

Rules:
- One fact per learning. Be concise but keep every concrete detail (names, numbers, dates).
- Skip greetings, small talk, and anything transient.
- Never invent facts that are not in the log.

{conversation}

Respond with a JSON array in this exact format:
[
  {"category": "world_knowledge", "text": "The Dencun upgrade shipped proto-danksharding"},
  {"category": "user_specific", "user_id": "alice", "text": "alice runs a validator at home"}
]

Return [] if nothing is worth remembering. Only include the JSON array, no other text."#;

/// Short summary prompt over a handful of raw learnings
///
/// Placeholders: {category}, {records}
pub const SHORT_SUMMARY_PROMPT: &str = r#"You are {persona_name}. {persona_bio}

Below are individual learnings you recorded in the category "{category}".
Synthesize them into one short summary.

Every factual detail in the learnings must survive in the summary. Merge
duplicates, but do not drop names, numbers, or dates. Write in your own voice
({persona_voice}).

{records}

Respond with JSON in this exact format:
{"summary": "..."}

Only include the JSON object, no other text."#;

/// Mid summary prompt over several short summaries
///
/// Placeholders: {category}, {records}
pub const MID_SUMMARY_PROMPT: &str = r#"You are {persona_name}. {persona_bio}

Below are short summaries of what you learned in the category "{category}".
Combine them into one mid-level summary.

Preserve every fact from every summary. Group related facts together and
resolve contradictions in favor of the most recent statement. Write in your
own voice ({persona_voice}).

{records}

Respond with JSON in this exact format:
{"summary": "..."}

Only include the JSON object, no other text."#;

/// Long summary merge prompt
///
/// Placeholders: {category}, {current_long}, {new_mid}
pub const LONG_MERGE_PROMPT: &str = r#"You are {persona_name}. {persona_bio}

You keep one long-term summary of everything you know in the category "{category}".
Update it with the newest mid-level summary.

Current long-term summary:
<current>
{current_long}
</current>

New mid-level summary:
<new>
{new_mid}
</new>

Keep every fact from both. When they disagree, prefer the new summary. Write
in your own voice ({persona_voice}).

Respond with JSON in this exact format:
{"summary": "..."}

Only include the JSON object, no other text."#;

pub fn extraction() -> PromptTemplate {
    PromptTemplate::new("extract_learnings", EXTRACTION_PROMPT)
}

pub fn short_summary() -> PromptTemplate {
    PromptTemplate::new("short_summary", SHORT_SUMMARY_PROMPT)
}

pub fn mid_summary() -> PromptTemplate {
    PromptTemplate::new("mid_summary", MID_SUMMARY_PROMPT)
}

pub fn long_merge() -> PromptTemplate {
    PromptTemplate::new("long_merge", LONG_MERGE_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("persona_name", "Lore"),
            ("persona_bio", "An agent."),
            ("persona_voice", "dry"),
        ]
    }

    #[test]
    fn test_extraction_placeholders() {
        assert_eq!(
            extraction().placeholders(),
            vec!["persona_name", "persona_bio", "conversation"]
        );
    }

    #[test]
    fn test_summary_templates_render() {
        for template in [short_summary(), mid_summary()] {
            let mut vars = persona_vars();
            vars.push(("category", "world_knowledge"));
            vars.push(("records", "- a\n- b"));
            let rendered = template.render(&vars).unwrap();
            assert!(rendered.contains("\"world_knowledge\""));
            assert!(rendered.contains("- a\n- b"));
            assert!(rendered.contains(r#"{"summary": "..."}"#));
        }
    }

    #[test]
    fn test_long_merge_renders() {
        let mut vars = persona_vars();
        vars.extend([
            ("category", "self_reflection"),
            ("current_long", "old"),
            ("new_mid", "new"),
        ]);
        let rendered = long_merge().render(&vars).unwrap();
        assert!(rendered.contains("<current>\nold\n</current>"));
        assert!(rendered.contains("<new>\nnew\n</new>"));
    }

    #[test]
    fn test_long_merge_requires_current() {
        let mut vars = persona_vars();
        vars.extend([("category", "self_reflection"), ("new_mid", "new")]);
        assert!(long_merge().render(&vars).is_err());
    }
}
