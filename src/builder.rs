//! Bounded breadth-first construction of caller/callee graphs.
//!
//! The builder is generic over a [`CallGraphSource`] so traversal logic can
//! be tested with scripted graphs instead of a live indexer process.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use crate::config::Config;
use crate::models::{DependencyNode, DependencyResult, LevelMap, SymbolRef};

/// Anything that can answer symbol and call-graph queries.
pub trait CallGraphSource {
    /// Resolve the symbol whose definition encloses a position.
    fn resolve_root(&mut self, file: &Path, line: u32, character: u32) -> Option<SymbolRef>;

    /// Resolve a symbol by name within one file.
    fn resolve_by_name(&mut self, file: &Path, name: &str) -> Option<SymbolRef>;

    /// Direct callees of a symbol.
    fn callees_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef>;

    /// Direct callers of a symbol.
    fn callers_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef>;

    /// Source text of a symbol's definition, when readable.
    fn definition_text(&mut self, symbol: &SymbolRef) -> Option<String>;
}

impl CallGraphSource for crate::session::IndexerSession {
    fn resolve_root(&mut self, file: &Path, line: u32, character: u32) -> Option<SymbolRef> {
        self.prepare_call_hierarchy(file, line, character)
    }

    fn resolve_by_name(&mut self, file: &Path, name: &str) -> Option<SymbolRef> {
        let mut matches = self.query_definition(file, name);
        // Prefer callable symbols when the name is overloaded with types.
        if let Some(pos) = matches
            .iter()
            .position(|s| s.kind == "function" || s.kind == "method")
        {
            return Some(matches.swap_remove(pos));
        }
        matches.into_iter().next()
    }

    fn callees_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.query_callees(symbol)
    }

    fn callers_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.query_callers(symbol)
    }

    fn definition_text(&mut self, symbol: &SymbolRef) -> Option<String> {
        crate::session::IndexerSession::definition_text(self, symbol)
    }
}

/// Direction of one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Callees,
    Callers,
}

/// Breadth-first dependency graph builder with depth and width bounds.
pub struct GraphBuilder {
    max_depth: u32,
    max_nodes_per_level: usize,
    dedup_by_name_only: bool,
}

impl GraphBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            max_depth: config.max_traversal_depth,
            max_nodes_per_level: config.max_nodes_per_level,
            dedup_by_name_only: config.dedup_by_name_only,
        }
    }

    /// Build the full result for one root symbol: definition text plus
    /// bounded successor and predecessor maps.
    ///
    /// `level` is the deepest expansion level requested by the caller; it is
    /// clamped to the configured maximum depth. Level 0 holds the root's
    /// direct neighbors.
    pub fn build<S: CallGraphSource>(
        &self,
        source: &mut S,
        root: &SymbolRef,
        level: u32,
    ) -> DependencyResult {
        let depth = level.min(self.max_depth);
        let mut warnings = Vec::new();
        let successors = self.traverse(source, root, depth, Direction::Callees, &mut warnings);
        let predecessors = self.traverse(source, root, depth, Direction::Callers, &mut warnings);
        let definition = source.definition_text(root).unwrap_or_default();

        DependencyResult {
            name: root.name.clone(),
            file: root.file.clone(),
            source: definition,
            successors,
            predecessors,
            warnings,
        }
    }

    fn node_key(&self, symbol: &SymbolRef) -> String {
        if self.dedup_by_name_only {
            symbol.name.clone()
        } else {
            format!(
                "{}@{}:{}:{}",
                symbol.name,
                symbol.file.display(),
                symbol.line,
                symbol.character
            )
        }
    }

    fn traverse<S: CallGraphSource>(
        &self,
        source: &mut S,
        root: &SymbolRef,
        depth: u32,
        direction: Direction,
        warnings: &mut Vec<String>,
    ) -> LevelMap {
        let mut levels: LevelMap = BTreeMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(self.node_key(root));
        let mut frontier: VecDeque<SymbolRef> = VecDeque::new();
        frontier.push_back(root.clone());

        for level in 0..=depth {
            let mut next_frontier: VecDeque<SymbolRef> = VecDeque::new();
            let mut level_nodes: BTreeMap<String, DependencyNode> = BTreeMap::new();
            let mut truncated = false;

            for symbol in frontier.drain(..) {
                let neighbors = match direction {
                    Direction::Callees => source.callees_of(&symbol),
                    Direction::Callers => source.callers_of(&symbol),
                };
                for neighbor in neighbors {
                    let key = self.node_key(&neighbor);
                    if !visited.insert(key.clone()) {
                        continue;
                    }
                    if level_nodes.len() >= self.max_nodes_per_level {
                        truncated = true;
                        continue;
                    }
                    let definition = source.definition_text(&neighbor).unwrap_or_default();
                    level_nodes.insert(
                        key,
                        DependencyNode {
                            name: neighbor.name.clone(),
                            definition,
                            file: neighbor.file.clone(),
                            line: neighbor.line,
                            character: neighbor.character,
                            kind: neighbor.kind.clone(),
                        },
                    );
                    if level < depth {
                        next_frontier.push_back(neighbor);
                    }
                }
            }

            if truncated {
                let direction_name = match direction {
                    Direction::Callees => "successors",
                    Direction::Callers => "predecessors",
                };
                warnings.push(format!(
                    "{} level {} truncated to {} nodes",
                    direction_name, level, self.max_nodes_per_level
                ));
            }

            if level_nodes.is_empty() {
                break;
            }
            levels.insert(level, level_nodes);
            frontier = next_frontier;
        }

        levels
    }
}
