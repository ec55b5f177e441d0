//! Phase prompt assembly

/// Phase 1: every enabled slot proposes independently.
pub fn proposal(peer_names: &[String], role: &str, user_message: &str) -> String {
    let role = if role.trim().is_empty() { "a team member" } else { role };
    format!(
        "You are participating in a team with peers {}. The user request follows. \
         Produce your best solution/answer as {}. User: {}",
        peer_names.join(", "),
        role,
        user_message
    )
}

/// Phase 2: revise with peer context.
pub fn refinement(own_proposal: &str, peer_context: &str) -> String {
    format!(
        "Your previous proposal was: {}. Your peers proposed: {}. \
         Revise your proposal, integrating peer insights where they improve \
         correctness and clarity. Return only the refined answer.",
        own_proposal, peer_context
    )
}

/// Phase 3: pick a winner by name.
pub fn vote(labeled_answers: &str) -> String {
    format!(
        "Each team member's refined answer follows: {}. Choose the best answer \
         by returning exactly the name of one slot, and nothing else.",
        labeled_answers
    )
}

/// Peer context for one slot: every *other* slot's text, prefixed with the
/// peer's name and role.
pub fn peer_context(slot: &str, texts: &[(String, String, String)]) -> String {
    let sections: Vec<String> = texts
        .iter()
        .filter(|(name, _, _)| name != slot)
        .map(|(name, role, text)| {
            if role.trim().is_empty() {
                format!("=== {} ===\n{}", name, text)
            } else {
                format!("=== {} ({}) ===\n{}", name, role, text)
            }
        })
        .collect();
    sections.join("\n\n")
}

/// Labeled answers for the vote prompt; the voter sees everyone, itself
/// included.
pub fn labeled_answers(texts: &[(String, String)]) -> String {
    texts
        .iter()
        .map(|(name, text)| format!("=== {} ===\n{}", name, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Out-of-band user input appended to whatever phase prompt goes out next.
pub fn with_user_inputs(prompt: String, inputs: &[String]) -> String {
    if inputs.is_empty() {
        return prompt;
    }
    let mut out = prompt;
    out.push_str("\n\nAdditional input from the user:");
    for input in inputs {
        out.push_str("\n- ");
        out.push_str(input);
    }
    out
}
