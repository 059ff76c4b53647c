//! Read-only dependency analytics over a [`PathGraph`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::curriculum::graph::{round2, PathGraph};
use crate::curriculum::types::ModuleId;

const BOTTLENECK_MIN_DEPENDENTS: usize = 3;
const IMPACT_MIN_DEPENDENTS: usize = 2;
const IMPACT_PER_DEPENDENT: usize = 10;
const DIFFICULTY_SCORE_CAP: f64 = 100.0;
const ALTERNATIVE_SEQUENCE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub module_id: ModuleId,
    pub dependent_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleneckImpact {
    pub module_id: ModuleId,
    pub direct_dependents: usize,
    pub transitive_dependents: usize,
    pub impact_score: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyAnalysis {
    pub total_modules: usize,
    pub avg_prerequisites: f64,
    pub max_prerequisite_depth: usize,
    pub bottleneck_modules: Vec<Bottleneck>,
    pub critical_path: Vec<ModuleId>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

pub struct DependencyAnalyzer<'a> {
    graph: &'a PathGraph,
    /// Longest prerequisite chain below each module, by arena position.
    depths: Vec<usize>,
    /// Length of the longest chain ending at each module, counting itself.
    chain_lengths: Vec<usize>,
    /// Predecessor on that longest chain.
    chain_prev: Vec<Option<usize>>,
}

impl<'a> DependencyAnalyzer<'a> {
    pub fn new(graph: &'a PathGraph) -> Self {
        let n = graph.len();
        let mut analyzer = Self {
            graph,
            depths: vec![0; n],
            chain_lengths: vec![1; n],
            chain_prev: vec![None; n],
        };
        analyzer.compute_chains();
        analyzer
    }

    /// Post-order walk over prerequisites. A prerequisite still on the stack
    /// (a cycle) contributes nothing, so malformed graphs still terminate.
    fn compute_chains(&mut self) {
        let graph = self.graph;
        let modules = graph.modules();
        let prereq_positions: Vec<Vec<usize>> = modules
            .iter()
            .map(|m| {
                graph
                    .prerequisites_of(&m.id)
                    .iter()
                    .filter_map(|p| graph.position(p))
                    .collect()
            })
            .collect();

        let mut visit = vec![Visit::Unvisited; modules.len()];

        for root in 0..modules.len() {
            if visit[root] != Visit::Unvisited {
                continue;
            }
            visit[root] = Visit::OnStack;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if next < prereq_positions[node].len() {
                    top.1 += 1;
                    let child = prereq_positions[node][next];
                    if visit[child] == Visit::Unvisited {
                        visit[child] = Visit::OnStack;
                        stack.push((child, 0));
                    }
                    continue;
                }

                let mut best_depth = 0;
                let mut best_chain = 0;
                let mut best_prev = None;
                for &child in &prereq_positions[node] {
                    if visit[child] != Visit::Done {
                        continue;
                    }
                    best_depth = best_depth.max(self.depths[child]);
                    if self.chain_lengths[child] > best_chain {
                        best_chain = self.chain_lengths[child];
                        best_prev = Some(child);
                    }
                }

                let has_prereqs = !graph.prerequisites_of(&modules[node].id).is_empty();
                self.depths[node] = if has_prereqs { best_depth + 1 } else { 0 };
                self.chain_lengths[node] = best_chain + 1;
                self.chain_prev[node] = best_prev;
                visit[node] = Visit::Done;
                stack.pop();
            }
        }
    }

    pub fn average_prerequisite_count(&self) -> f64 {
        if self.graph.is_empty() {
            return 0.0;
        }
        let total: usize = self
            .graph
            .modules()
            .iter()
            .map(|m| self.graph.prerequisites_of(&m.id).len())
            .sum();
        round2(total as f64 / self.graph.len() as f64)
    }

    pub fn depth(&self, id: &str) -> usize {
        self.graph.position(id).map(|i| self.depths[i]).unwrap_or(0)
    }

    pub fn max_prerequisite_depth(&self) -> usize {
        self.depths.iter().copied().max().unwrap_or(0)
    }

    pub fn bottleneck_modules(&self) -> Vec<Bottleneck> {
        let mut bottlenecks: Vec<Bottleneck> = self
            .graph
            .modules()
            .iter()
            .map(|m| Bottleneck {
                module_id: m.id.clone(),
                dependent_count: self.graph.dependents_of(&m.id).len(),
            })
            .filter(|b| b.dependent_count >= BOTTLENECK_MIN_DEPENDENTS)
            .collect();
        bottlenecks.sort_by(|a, b| b.dependent_count.cmp(&a.dependent_count));
        bottlenecks
    }

    pub fn critical_path(&self) -> Vec<ModuleId> {
        let modules = self.graph.modules();
        let mut best: Option<usize> = None;
        for i in 0..modules.len() {
            if best.map_or(true, |b| self.chain_lengths[i] > self.chain_lengths[b]) {
                best = Some(i);
            }
        }

        let mut path = Vec::new();
        let mut cursor = best;
        while let Some(i) = cursor {
            if path.len() >= modules.len() {
                break;
            }
            path.push(modules[i].id.clone());
            cursor = self.chain_prev[i];
        }
        path.reverse();
        path
    }

    /// Nominal difficulty adjusted upward by dependency complexity, capped at 100.
    pub fn difficulty_score(&self, id: &str) -> Option<f64> {
        let module = self.graph.module(id)?;
        let score = module.difficulty.base_score()
            + 5.0 * self.depth(id) as f64
            + 3.0 * self.graph.prerequisites_of(id).len() as f64;
        Some(score.min(DIFFICULTY_SCORE_CAP))
    }

    pub fn bottleneck_impact(&self) -> Vec<BottleneckImpact> {
        let mut impacts: Vec<BottleneckImpact> = self
            .graph
            .modules()
            .iter()
            .filter_map(|m| {
                let direct = self.graph.dependents_of(&m.id).len();
                if direct < IMPACT_MIN_DEPENDENTS {
                    return None;
                }
                let transitive = self.transitive_dependents(&m.id).len();
                Some(BottleneckImpact {
                    module_id: m.id.clone(),
                    direct_dependents: direct,
                    transitive_dependents: transitive,
                    impact_score: transitive * IMPACT_PER_DEPENDENT,
                })
            })
            .collect();
        impacts.sort_by(|a, b| b.impact_score.cmp(&a.impact_score));
        impacts
    }

    fn transitive_dependents(&self, id: &str) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.graph.dependents_of(id).iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if current == id || !seen.insert(current) {
                continue;
            }
            stack.extend(self.graph.dependents_of(current).iter().map(String::as_str));
        }
        seen
    }

    pub fn analysis(&self) -> DependencyAnalysis {
        DependencyAnalysis {
            total_modules: self.graph.len(),
            avg_prerequisites: self.average_prerequisite_count(),
            max_prerequisite_depth: self.max_prerequisite_depth(),
            bottleneck_modules: self.bottleneck_modules(),
            critical_path: self.critical_path(),
        }
    }

    /// Three greedy sequences starting at `start_id`. Sequence `i` picks
    /// `available[i % len]` at each step so the routes diverge.
    pub fn alternative_sequences_from(&self, start_id: &str, target_length: usize) -> Vec<Vec<ModuleId>> {
        if !self.graph.contains(start_id) {
            return Vec::new();
        }

        (0..ALTERNATIVE_SEQUENCE_COUNT)
            .map(|variant| {
                let mut completed: HashSet<ModuleId> = HashSet::from([start_id.to_string()]);
                let mut sequence = vec![start_id.to_string()];
                while sequence.len() < target_length {
                    let available = self.graph.available_modules(&completed);
                    if available.is_empty() {
                        break;
                    }
                    let pick = &available[variant % available.len()].id;
                    sequence.push(pick.clone());
                    completed.insert(pick.clone());
                }
                sequence
            })
            .collect()
    }
}
