//! Edge condition evaluation.
//!
//! A condition is a literal keyword: the edge fires when the keyword appears in
//! the reply text, compared case-sensitively. There is no expression language,
//! so anyone reading a graph definition can tell which branch a reply will take.

use crate::message::ChatMessage;

/// Whether an edge guarded by `condition` fires for `message`.
///
/// An absent condition always matches.
///
/// ```
/// use groupflow::condition::matches;
/// use groupflow::message::ChatMessage;
///
/// let reply = ChatMessage::from_participant("reviewer", "Verdict: APPROVE");
/// assert!(matches(None, &reply));
/// assert!(matches(Some("APPROVE"), &reply));
/// assert!(!matches(Some("approve"), &reply));
/// ```
pub fn matches(condition: Option<&str>, message: &ChatMessage) -> bool {
    match condition {
        None => true,
        Some(keyword) => message.content.contains(keyword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_containment() {
        let message = ChatMessage::from_participant("A", "the answer is no, sorry");
        assert!(matches(Some("no"), &message));
        assert!(matches(Some("answer is"), &message));
        assert!(!matches(Some("yes"), &message));
    }

    #[test]
    fn test_no_pattern_interpretation() {
        let message = ChatMessage::from_participant("A", "cost: $5 (approx.)");
        assert!(matches(Some("$5 (approx.)"), &message));
        assert!(!matches(Some(".*"), &message));
    }
}
