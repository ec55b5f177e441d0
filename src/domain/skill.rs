//! Candidate skills extracted from winning solutions

use serde::{Deserialize, Serialize};

/// A skill candidate: a source blob with a single string-in, string-out entry
/// point, pending sandbox validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSkill {
    pub name: String,
    pub source: String,
    /// Name of the entry function inside the source. Contract: takes one
    /// string message, returns a string.
    pub entry: String,
}

/// Library lifecycle of a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillState {
    Draft,
    Active,
}

/// Words that signal the user wants something built rather than answered.
const SKILL_INTENT_WORDS: &[&str] = &[
    "create", "build", "make", "generate", "write", "develop", "code", "script", "tool", "skill",
];

/// Whether a user message implies skill creation.
pub fn implies_skill_creation(message: &str) -> bool {
    message
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| SKILL_INTENT_WORDS.contains(&word.to_lowercase().as_str()))
}

/// Extract the first fenced code block from a solution text.
///
/// Returns the block body with the fence lines (and any language tag) removed.
/// Solutions without a fenced block yield `None` — plain prose is never
/// promoted to a skill.
pub fn extract_code_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the language tag line if present.
    let body_start = after_fence.find('\n').map(|i| i + 1)?;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    let block = body[..close].trim_end();
    if block.is_empty() {
        None
    } else {
        Some(block.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_intent_detection() {
        assert!(implies_skill_creation("Please build a tool that counts words"));
        assert!(implies_skill_creation("write a script for me"));
        assert!(implies_skill_creation("CREATE something"));
        assert!(!implies_skill_creation("what is the capital of France?"));
        // Substrings do not count: "screwdriver" contains no intent word.
        assert!(!implies_skill_creation("my screwdriver is broken"));
    }

    #[test]
    fn test_extract_code_block() {
        let text = "Here is the solution:\n```python\ndef run(message):\n    return message\n```\nDone.";
        let block = extract_code_block(text).unwrap();
        assert_eq!(block, "def run(message):\n    return message");
    }

    #[test]
    fn test_extract_without_language_tag() {
        let text = "```\nprint('hi')\n```";
        assert_eq!(extract_code_block(text).unwrap(), "print('hi')");
    }

    #[test]
    fn test_extract_none_for_prose() {
        assert!(extract_code_block("no code here").is_none());
        assert!(extract_code_block("```\n```").is_none());
    }
}
