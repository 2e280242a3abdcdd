//! Static stage catalog
//!
//! One row per canonical stage: the symbolic names scripts may use for it,
//! its resource estimate, its topology weight, the parameter fields projected
//! into its input, and the criterion the decision plan reports for it.

use super::types::ResourceEstimate;

/// Catalog row for a canonical stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageProfile {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub resources: ResourceEstimate,
    pub weight: f64,
    pub input_fields: &'static [&'static str],
    pub success_criterion: &'static str,
}

/// Estimate used for stages the catalog does not know
pub const DEFAULT_RESOURCES: ResourceEstimate = ResourceEstimate {
    cpu: 1.0,
    memory: 2.0,
    gpu: 0.0,
    time: 10.0,
};

/// Topology weight for stages the catalog does not know
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Success criterion for stages the catalog does not know
pub const DEFAULT_SUCCESS_CRITERION: &str = "stage returns a non-empty result";

pub static CATALOG: &[StageProfile] = &[
    StageProfile {
        id: "query_processor",
        aliases: &["query", "query_processing", "process_query"],
        resources: ResourceEstimate { cpu: 1.0, memory: 2.0, gpu: 0.0, time: 5.0 },
        weight: 0.6,
        input_fields: &["query", "context"],
        success_criterion: "query parsed with confidence >= 0.7",
    },
    StageProfile {
        id: "semantic_analyzer",
        aliases: &["semantic_analysis", "semantics", "analyze"],
        resources: ResourceEstimate { cpu: 2.0, memory: 4.0, gpu: 0.0, time: 15.0 },
        weight: 0.7,
        input_fields: &["text", "query", "context"],
        success_criterion: "entities and relations extracted",
    },
    StageProfile {
        id: "knowledge_extractor",
        aliases: &["domain_knowledge", "knowledge", "extract_knowledge"],
        resources: ResourceEstimate { cpu: 2.0, memory: 8.0, gpu: 0.0, time: 20.0 },
        weight: 0.8,
        input_fields: &["query", "domain", "sources"],
        success_criterion: "at least one supporting finding",
    },
    StageProfile {
        id: "reasoning_engine",
        aliases: &["reasoning", "reasoner", "reason"],
        resources: ResourceEstimate { cpu: 4.0, memory: 16.0, gpu: 1.0, time: 30.0 },
        weight: 0.9,
        input_fields: &["context", "query", "constraints"],
        success_criterion: "reasoning chain with confidence >= 0.7",
    },
    StageProfile {
        id: "solution_generator",
        aliases: &["generate", "generator", "generate_solution"],
        resources: ResourceEstimate { cpu: 4.0, memory: 16.0, gpu: 1.0, time: 45.0 },
        weight: 1.0,
        input_fields: &["context", "query", "style", "max_tokens"],
        success_criterion: "solution text produced within max_time",
    },
    StageProfile {
        id: "response_evaluator",
        aliases: &["evaluator", "evaluation", "evaluate"],
        resources: ResourceEstimate { cpu: 1.0, memory: 4.0, gpu: 0.0, time: 10.0 },
        weight: 0.7,
        input_fields: &["target", "criteria", "reference"],
        success_criterion: "quality score >= min_quality",
    },
    StageProfile {
        id: "model_comparator",
        aliases: &["comparison", "compare", "comparator"],
        resources: ResourceEstimate { cpu: 2.0, memory: 8.0, gpu: 1.0, time: 40.0 },
        weight: 0.6,
        input_fields: &["candidates", "query", "criteria"],
        success_criterion: "ranking over all candidates",
    },
    StageProfile {
        id: "response_scorer",
        aliases: &["score", "scorer", "scoring"],
        resources: ResourceEstimate { cpu: 1.0, memory: 1.0, gpu: 0.0, time: 3.0 },
        weight: 0.4,
        input_fields: &["response", "reference", "metrics"],
        success_criterion: "score reported for every metric",
    },
];

/// Map a script's symbolic stage name to its canonical id.
///
/// Unknown names pass through unchanged.
pub fn canonical_stage(name: &str) -> &str {
    CATALOG
        .iter()
        .find(|p| p.id == name || p.aliases.contains(&name))
        .map(|p| p.id)
        .unwrap_or(name)
}

/// Catalog row for a canonical stage id
pub fn profile(stage_id: &str) -> Option<&'static StageProfile> {
    CATALOG.iter().find(|p| p.id == stage_id)
}

pub fn resource_estimate(stage_id: &str) -> ResourceEstimate {
    profile(stage_id)
        .map(|p| p.resources)
        .unwrap_or(DEFAULT_RESOURCES)
}

pub fn weight(stage_id: &str) -> f64 {
    profile(stage_id).map(|p| p.weight).unwrap_or(DEFAULT_WEIGHT)
}

pub fn success_criterion(stage_id: &str) -> &'static str {
    profile(stage_id)
        .map(|p| p.success_criterion)
        .unwrap_or(DEFAULT_SUCCESS_CRITERION)
}

/// Whether a symbolic stage name is known to the catalog
pub fn is_known(name: &str) -> bool {
    profile(canonical_stage(name)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_canonical_ids() {
        assert_eq!(canonical_stage("query"), "query_processor");
        assert_eq!(canonical_stage("query_processor"), "query_processor");
        assert_eq!(canonical_stage("reasoning"), "reasoning_engine");
        assert_eq!(canonical_stage("custom_stage"), "custom_stage");
    }

    #[test]
    fn test_unknown_stage_defaults() {
        assert_eq!(resource_estimate("custom_stage"), DEFAULT_RESOURCES);
        assert_eq!(weight("custom_stage"), 0.5);
        assert!(!is_known("custom_stage"));
        assert!(is_known("evaluator"));
    }

    #[test]
    fn test_catalog_ids_and_aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for profile in CATALOG {
            assert!(seen.insert(profile.id), "duplicate id {}", profile.id);
            for alias in profile.aliases {
                assert!(seen.insert(*alias), "duplicate alias {}", alias);
            }
        }
    }
}
