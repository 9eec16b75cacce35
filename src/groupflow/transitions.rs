//! Speaker-transition constraints for flat (roster-based) selection.
//!
//! A flat group chat can restrict who may follow whom without building a full
//! [`DirectedGraph`](crate::graph::DirectedGraph): give either the allowed next
//! speakers per speaker, or the disallowed ones.
//!
//! ```
//! use groupflow::transitions::SpeakerTransitions;
//! use std::collections::BTreeMap;
//!
//! let roster = vec!["coder".to_string(), "tester".to_string(), "lead".to_string()];
//! let transitions = SpeakerTransitions::disallowed(BTreeMap::from([(
//!     "coder".to_string(),
//!     vec!["lead".to_string()],
//! )]));
//!
//! let allowed = transitions.resolve(&roster, true).unwrap();
//! assert_eq!(allowed["coder"], vec!["coder", "tester"]);
//! ```

use crate::graph::StructuralError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether the transition map lists permitted or forbidden next speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Allowed,
    Disallowed,
}

/// Who may (or may not) speak after whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerTransitions {
    pub kind: TransitionKind,
    pub transitions: BTreeMap<String, Vec<String>>,
}

impl SpeakerTransitions {
    pub fn allowed(transitions: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            kind: TransitionKind::Allowed,
            transitions,
        }
    }

    pub fn disallowed(transitions: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            kind: TransitionKind::Disallowed,
            transitions,
        }
    }

    /// Turn the map into allowed next speakers for every roster member.
    ///
    /// Every name must be on the roster. A disallowed map is inverted against the
    /// roster; when repeats are disallowed the inversion leaves out self-loops
    /// instead of producing them. An allowed map is taken as written, so a
    /// speaker missing from it has no successor.
    pub fn resolve(
        &self,
        roster: &[String],
        allow_repeat_speaker: bool,
    ) -> Result<BTreeMap<String, Vec<String>>, StructuralError> {
        for (speaker, next) in &self.transitions {
            for name in std::iter::once(speaker).chain(next.iter()) {
                if !roster.contains(name) {
                    return Err(StructuralError::UnknownNode {
                        referenced_by: "speaker transitions".to_string(),
                        name: name.clone(),
                    });
                }
            }
        }

        let resolved = match self.kind {
            TransitionKind::Allowed => roster
                .iter()
                .map(|speaker| {
                    let next = self.transitions.get(speaker).cloned().unwrap_or_default();
                    (speaker.clone(), next)
                })
                .collect(),
            TransitionKind::Disallowed => roster
                .iter()
                .map(|speaker| {
                    let banned = self.transitions.get(speaker);
                    let next = roster
                        .iter()
                        .filter(|candidate| allow_repeat_speaker || *candidate != speaker)
                        .filter(|candidate| banned.map_or(true, |b| !b.contains(candidate)))
                        .cloned()
                        .collect();
                    (speaker.clone(), next)
                })
                .collect(),
        };
        Ok(resolved)
    }

    /// Resolve and check the flat-mode invariants: at least one edge overall, and
    /// no self-loop when repeat speaking is disallowed.
    pub fn validate(
        &self,
        roster: &[String],
        allow_repeat_speaker: bool,
    ) -> Result<BTreeMap<String, Vec<String>>, StructuralError> {
        let resolved = self.resolve(roster, allow_repeat_speaker)?;
        if resolved.values().all(Vec::is_empty) {
            return Err(StructuralError::NoEdges);
        }
        if !allow_repeat_speaker {
            if let Some((speaker, _)) = resolved.iter().find(|(s, next)| next.contains(s)) {
                return Err(StructuralError::SelfLoop {
                    node: speaker.clone(),
                });
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    fn map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_allowed_map_taken_as_written() {
        let t = SpeakerTransitions::allowed(map(&[("A", &["B"]), ("B", &["C", "A"])]));
        let resolved = t.validate(&roster(), false).unwrap();
        assert_eq!(resolved["A"], vec!["B"]);
        assert_eq!(resolved["B"], vec!["C", "A"]);
        assert!(resolved["C"].is_empty());
    }

    #[test]
    fn test_self_loop_rejected_without_repeats() {
        let t = SpeakerTransitions::allowed(map(&[("A", &["A", "B"])]));
        assert_eq!(
            t.validate(&roster(), false),
            Err(StructuralError::SelfLoop {
                node: "A".to_string()
            })
        );
        assert!(t.validate(&roster(), true).is_ok());
    }

    #[test]
    fn test_no_edges_rejected() {
        let t = SpeakerTransitions::allowed(map(&[("A", &[])]));
        assert_eq!(t.validate(&roster(), true), Err(StructuralError::NoEdges));
    }

    #[test]
    fn test_disallowed_inversion_skips_self_when_repeats_off() {
        let t = SpeakerTransitions::disallowed(map(&[("A", &["C"])]));
        let resolved = t.validate(&roster(), false).unwrap();
        assert_eq!(resolved["A"], vec!["B"]);
        assert_eq!(resolved["B"], vec!["A", "C"]);
    }

    #[test]
    fn test_unknown_speaker_rejected() {
        let t = SpeakerTransitions::allowed(map(&[("A", &["Z"])]));
        assert!(matches!(
            t.validate(&roster(), true),
            Err(StructuralError::UnknownNode { .. })
        ));
    }
}
