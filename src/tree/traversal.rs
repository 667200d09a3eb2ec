//! Level-synchronous breadth-first expansion

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use crate::error::Result;

/// Expand `root` level by level, collecting `(parent, child)` edges per depth.
///
/// `expand` receives a whole frontier and returns its edges; level k+1 is
/// not requested until level k has returned. Stops when a frontier has no
/// children or after `max_depth` levels have been searched. A node reached
/// twice is expanded once.
pub fn level_edges<N, F>(root: N, max_depth: Option<usize>, mut expand: F) -> Result<Vec<Vec<(N, N)>>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&[N]) -> Result<Vec<(N, N)>>,
{
    let mut levels = Vec::new();
    let mut visited = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([vec![root]]);

    while let Some(frontier) = queue.pop_front() {
        if max_depth.is_some_and(|d| levels.len() >= d) {
            break;
        }

        let edges: Vec<(N, N)> = expand(&frontier)?
            .into_iter()
            .filter(|(_, child)| visited.insert(child.clone()))
            .collect();
        if edges.is_empty() {
            break;
        }

        let next = edges.iter().map(|(_, child)| child.clone()).collect();
        levels.push(edges);
        queue.push_back(next);
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn children(edges: &HashMap<u32, Vec<u32>>, frontier: &[u32]) -> Result<Vec<(u32, u32)>> {
        Ok(frontier
            .iter()
            .flat_map(|p| edges.get(p).into_iter().flatten().map(move |c| (*p, *c)))
            .collect())
    }

    #[test]
    fn test_levels_simple_tree() {
        // 1 -> 2 -> 4
        // 1 -> 3
        let edges: HashMap<u32, Vec<u32>> = [(1, vec![2, 3]), (2, vec![4])].into_iter().collect();

        let levels = level_edges(1, None, |f| children(&edges, f)).unwrap();
        assert_eq!(levels, vec![vec![(1, 2), (1, 3)], vec![(2, 4)]]);
    }

    #[test]
    fn test_max_depth_is_inclusive_of_last_searched_level() {
        let edges: HashMap<u32, Vec<u32>> = [(1, vec![2]), (2, vec![3]), (3, vec![4])].into_iter().collect();

        assert_eq!(level_edges(1, Some(2), |f| children(&edges, f)).unwrap().len(), 2);
        assert_eq!(level_edges(1, Some(10), |f| children(&edges, f)).unwrap().len(), 3);
        assert!(level_edges(1, Some(0), |f| children(&edges, f)).unwrap().is_empty());
    }

    #[test]
    fn test_frontier_calls_are_sequential_per_level() {
        let edges: HashMap<u32, Vec<u32>> = [(1, vec![2, 3]), (2, vec![4]), (3, vec![5])].into_iter().collect();
        let mut seen_frontiers = Vec::new();

        level_edges(1, None, |f| {
            seen_frontiers.push(f.to_vec());
            children(&edges, f)
        })
        .unwrap();

        assert_eq!(seen_frontiers, vec![vec![1], vec![2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_cycle_terminates() {
        // corrupt parent pointers: 1 -> 2 -> 1
        let edges: HashMap<u32, Vec<u32>> = [(1, vec![2]), (2, vec![1])].into_iter().collect();
        let levels = level_edges(1, None, |f| children(&edges, f)).unwrap();
        assert_eq!(levels, vec![vec![(1, 2)]]);
    }
}
