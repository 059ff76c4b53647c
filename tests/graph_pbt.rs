//! Property tests over randomly generated acyclic learning paths.
//!
//! Prerequisites only ever point at lower indices, so every generated path is
//! a DAG by construction.

mod common;

use std::collections::HashSet;

use proptest::prelude::*;

use curriculum_engine::curriculum::reshuffler::ReorderConstraints;
use curriculum_engine::curriculum::types::{Difficulty, Module, ModuleId};
use curriculum_engine::curriculum::{ConceptReshuffler, DependencyAnalyzer, PathGraph};

use common::module;

fn arb_difficulty() -> impl Strategy<Value = Difficulty> {
    prop_oneof![
        Just(Difficulty::Easy),
        Just(Difficulty::Medium),
        Just(Difficulty::Hard),
    ]
}

/// Each entry is a difficulty plus a prerequisite mask over earlier modules.
fn arb_modules() -> impl Strategy<Value = Vec<Module>> {
    prop::collection::vec((arb_difficulty(), any::<u16>()), 1..12).prop_map(|specs| {
        specs
            .iter()
            .enumerate()
            .map(|(i, (difficulty, mask))| {
                let ids: Vec<String> = (0..i).filter(|j| mask & (1u16 << j) != 0).map(|j| format!("m{j}")).collect();
                let prereqs: Vec<&str> = ids.iter().map(String::as_str).collect();
                module(&format!("m{i}"), *difficulty, i as i32, &prereqs)
            })
            .collect()
    })
}

fn ids(graph: &PathGraph) -> Vec<ModuleId> {
    graph.modules().iter().map(|m| m.id.clone()).collect()
}

proptest! {
    #[test]
    fn prop_generated_paths_pass_integrity(modules in arb_modules()) {
        let graph = PathGraph::new("p", modules);
        prop_assert!(graph.validate_integrity());
        prop_assert!(graph.integrity_report().is_ok());
    }

    #[test]
    fn prop_reorder_respects_prerequisites(
        modules in arb_modules(),
        struggling_mask in any::<u16>(),
        target in arb_difficulty(),
    ) {
        let graph = PathGraph::new("p", modules);
        let current = ids(&graph);
        let struggling_ids: HashSet<ModuleId> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| struggling_mask & (1u16 << i) != 0)
            .map(|(_, id)| id.clone())
            .collect();

        let reshuffler = ConceptReshuffler::new();
        let order = reshuffler.reorder_modules(
            &current,
            &ReorderConstraints { graph: &graph, struggling_ids, target_difficulty: target },
        );

        let mut sorted_order = order.clone();
        sorted_order.sort();
        let mut sorted_current = current.clone();
        sorted_current.sort();
        prop_assert_eq!(sorted_order, sorted_current);
        prop_assert!(reshuffler.validate_reshuffled_path(&order, &graph));
    }

    #[test]
    fn prop_available_modules_have_completed_prerequisites(
        modules in arb_modules(),
        completed_prefix in 0usize..12,
    ) {
        let graph = PathGraph::new("p", modules);
        let completed: HashSet<ModuleId> = ids(&graph).into_iter().take(completed_prefix).collect();

        for available in graph.available_modules(&completed) {
            prop_assert!(!completed.contains(&available.id));
            for prereq in graph.prerequisites_of(&available.id) {
                prop_assert!(completed.contains(prereq));
            }
        }
    }

    #[test]
    fn prop_review_chain_covers_direct_prerequisites(modules in arb_modules()) {
        let graph = PathGraph::new("p", modules);
        for id in ids(&graph) {
            let chain: HashSet<&str> = graph
                .prerequisite_review_chain(&id)
                .into_iter()
                .map(|m| m.id.as_str())
                .collect();
            prop_assert!(!chain.contains(id.as_str()));
            for prereq in graph.prerequisites_of(&id) {
                prop_assert!(chain.contains(prereq.as_str()));
            }
        }
    }

    #[test]
    fn prop_critical_path_is_a_prerequisite_chain(modules in arb_modules()) {
        let graph = PathGraph::new("p", modules);
        let path = DependencyAnalyzer::new(&graph).critical_path();
        prop_assert!(!path.is_empty());
        for pair in path.windows(2) {
            prop_assert!(graph.prerequisites_of(&pair[1]).contains(&pair[0]));
        }
    }
}

#[test]
fn test_back_edge_breaks_integrity() {
    let modules = vec![
        module("a", Difficulty::Easy, 0, &["c"]),
        module("b", Difficulty::Medium, 1, &["a"]),
        module("c", Difficulty::Hard, 2, &["b"]),
    ];
    let graph = PathGraph::new("p", modules);
    assert!(!graph.validate_integrity());
}
