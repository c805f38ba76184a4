//! Storage classification: which memory types receive a write.

use engram_types::memory::{MemoryContext, MemoryMetadata, StorageTargets};
use serde_json::Value;

const WORKING_IMPORTANCE: f64 = 0.7;
const SEMANTIC_IMPORTANCE: f64 = 0.6;

/// Decide the storage targets of one write.
///
/// Rule based and stateless. At least one target is always set: content that
/// matches no rule lands in episodic memory.
pub fn determine_targets(
    _content: &Value,
    context: &MemoryContext,
    metadata: &MemoryMetadata,
) -> StorageTargets {
    let importance = metadata.importance_or_zero();

    let mut targets = StorageTargets {
        working: metadata.is_immediate
            || importance > WORKING_IMPORTANCE
            || metadata.content_type_is(&["context"]),
        episodic: context.session_id.is_some()
            || metadata.content_type_is(&["interaction", "conversation"]),
        semantic: metadata.is_knowledge
            || importance > SEMANTIC_IMPORTANCE
            || metadata.content_type_is(&["knowledge", "fact"]),
        procedural: metadata.is_learned || metadata.content_type_is(&["pattern", "behavior"]),
    };

    if !targets.any() {
        targets.episodic = true;
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_types::memory::MemoryType;
    use serde_json::json;

    fn ctx() -> MemoryContext {
        MemoryContext::new("5", "u1")
    }

    fn meta_with_type(content_type: &str) -> MemoryMetadata {
        MemoryMetadata {
            content_type: Some(content_type.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn knowledge_always_reaches_semantic() {
        for importance in [None, Some(0.0), Some(0.9)] {
            let meta = MemoryMetadata {
                is_knowledge: true,
                importance,
                ..Default::default()
            };
            assert!(determine_targets(&json!({}), &ctx(), &meta).semantic);
        }
    }

    #[test]
    fn no_rule_falls_back_to_episodic() {
        let targets = determine_targets(&json!({}), &ctx(), &MemoryMetadata::default());
        assert_eq!(targets.targets(), vec![MemoryType::Episodic]);
    }

    #[test]
    fn session_only_goes_to_episodic() {
        let context = ctx().with_session("s1");
        let targets = determine_targets(&json!({}), &context, &MemoryMetadata::default());
        assert_eq!(targets.targets(), vec![MemoryType::Episodic]);
    }

    #[test]
    fn importance_thresholds_are_strict() {
        let at = |v: f64| {
            let meta = MemoryMetadata {
                importance: Some(v),
                ..Default::default()
            };
            determine_targets(&json!({}), &ctx(), &meta)
        };

        let t = at(0.6);
        assert!(!t.semantic && !t.working);
        assert!(t.episodic);

        let t = at(0.65);
        assert!(t.semantic && !t.working);
        assert!(!t.episodic);

        let t = at(0.75);
        assert!(t.semantic && t.working);
    }

    #[test]
    fn content_types_route_to_their_stores() {
        let cases = [
            ("context", MemoryType::Working),
            ("interaction", MemoryType::Episodic),
            ("conversation", MemoryType::Episodic),
            ("knowledge", MemoryType::Semantic),
            ("fact", MemoryType::Semantic),
            ("pattern", MemoryType::Procedural),
            ("behavior", MemoryType::Procedural),
        ];
        for (content_type, expected) in cases {
            let targets = determine_targets(&json!({}), &ctx(), &meta_with_type(content_type));
            assert_eq!(targets.targets(), vec![expected], "content_type {content_type}");
        }
    }

    #[test]
    fn flags_combine() {
        let meta = MemoryMetadata {
            is_immediate: true,
            is_learned: true,
            ..Default::default()
        };
        let targets = determine_targets(&json!("x"), &ctx().with_session("s"), &meta);
        assert_eq!(
            targets.targets(),
            vec![
                MemoryType::Working,
                MemoryType::Episodic,
                MemoryType::Procedural
            ]
        );
    }

    #[test]
    fn never_all_false() {
        let types = [None, Some("context"), Some("fact"), Some("other"), Some("")];
        let importances = [None, Some(0.0), Some(0.61), Some(0.71), Some(1.0)];
        for content_type in types {
            for importance in importances {
                for flags in 0u8..8 {
                    let meta = MemoryMetadata {
                        is_immediate: flags & 1 != 0,
                        is_knowledge: flags & 2 != 0,
                        is_learned: flags & 4 != 0,
                        importance,
                        content_type: content_type.map(str::to_string),
                        ..Default::default()
                    };
                    for context in [ctx(), ctx().with_session("s")] {
                        assert!(determine_targets(&Value::Null, &context, &meta).any());
                    }
                }
            }
        }
    }
}
