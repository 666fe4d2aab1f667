//! Work Tree Arena
//!
//! Flat id → item map with a parent → children index, built from whatever
//! slice of the store a caller loaded. All completion arithmetic happens here.

use std::collections::{HashMap, HashSet};

use super::entity::{DomainError, DomainResult};
use super::work_item::WorkItem;

/// Mean of `values` rounded half up. Empty input is 0.
pub fn mean_rounded(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let n = values.len() as u64;
    let sum: u64 = values.iter().map(|v| *v as u64).sum();
    ((2 * sum + n) / (2 * n)) as u8
}

#[derive(Debug, Clone, Default)]
pub struct WorkTree {
    nodes: HashMap<String, WorkItem>,
    children: HashMap<String, Vec<String>>,
}

impl WorkTree {
    pub fn from_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let mut nodes = HashMap::new();
        for item in items {
            nodes.insert(item.id.clone(), item);
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for item in nodes.values() {
            if let Some(pid) = &item.parent_id {
                children.entry(pid.clone()).or_default().push(item.id.clone());
            }
        }
        for ids in children.values_mut() {
            ids.sort();
        }

        Self { nodes, children }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.nodes.get(id)
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_children(&self, id: &str) -> bool {
        !self.children_of(id).is_empty()
    }

    /// Resolved completion of a single node
    pub fn resolve_completion(&self, id: &str, max_depth: usize) -> DomainResult<u8> {
        let mut resolved = HashMap::new();
        let mut on_path = HashSet::new();
        self.resolve_into(id, 0, max_depth, &mut on_path, &mut resolved)
    }

    /// Resolved completion of `root` and every node below it
    pub fn resolve_all(&self, root: &str, max_depth: usize) -> DomainResult<HashMap<String, u8>> {
        let mut resolved = HashMap::new();
        let mut on_path = HashSet::new();
        self.resolve_into(root, 0, max_depth, &mut on_path, &mut resolved)?;
        Ok(resolved)
    }

    fn resolve_into(
        &self,
        id: &str,
        depth: usize,
        max_depth: usize,
        on_path: &mut HashSet<String>,
        resolved: &mut HashMap<String, u8>,
    ) -> DomainResult<u8> {
        if let Some(value) = resolved.get(id) {
            return Ok(*value);
        }
        if depth > max_depth {
            return Err(DomainError::ConstraintViolation(format!(
                "Work item {} is nested deeper than {} levels",
                id, max_depth
            )));
        }
        if !on_path.insert(id.to_string()) {
            return Err(DomainError::ConstraintViolation(format!(
                "Parent cycle detected at work item {}",
                id
            )));
        }

        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DomainError::NotFound(format!("Work item {} not found", id)))?;

        let value = if self.has_children(id) {
            let mut values = Vec::with_capacity(self.children_of(id).len());
            for child_id in self.children_of(id) {
                values.push(self.resolve_into(child_id, depth + 1, max_depth, on_path, resolved)?);
            }
            mean_rounded(&values)
        } else {
            node.completion
        };

        on_path.remove(id);
        resolved.insert(id.to_string(), value);
        Ok(value)
    }

    /// Items in display order as (item, depth) pairs.
    /// `None` starts from every node whose parent is absent from the tree.
    pub fn flatten(&self, root: Option<&str>) -> Vec<(WorkItem, usize)> {
        fn collect(
            tree: &WorkTree,
            id: &str,
            depth: usize,
            seen: &mut HashSet<String>,
            result: &mut Vec<(WorkItem, usize)>,
        ) {
            if !seen.insert(id.to_string()) {
                return;
            }
            if let Some(item) = tree.nodes.get(id) {
                result.push((item.clone(), depth));
                for child in tree.children_of(id) {
                    collect(tree, child, depth + 1, seen, result);
                }
            }
        }

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        match root {
            Some(id) => collect(self, id, 0, &mut seen, &mut result),
            None => {
                let mut roots: Vec<&String> = self
                    .nodes
                    .values()
                    .filter(|item| match &item.parent_id {
                        None => true,
                        Some(pid) => !self.nodes.contains_key(pid),
                    })
                    .map(|item| &item.id)
                    .collect();
                roots.sort();
                for id in roots {
                    collect(self, id, 0, &mut seen, &mut result);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(id: &str, parent_id: Option<&str>, completion: u8) -> WorkItem {
        let mut item = WorkItem::new(id, format!("Item {}", id), "p1");
        item.parent_id = parent_id.map(str::to_string);
        item.completion = completion;
        item
    }

    #[test]
    fn test_mean_rounded_half_up() {
        assert_eq!(mean_rounded(&[]), 0);
        assert_eq!(mean_rounded(&[0, 1]), 1);
        assert_eq!(mean_rounded(&[50, 51]), 51);
        assert_eq!(mean_rounded(&[33, 33, 34]), 33);
        assert_eq!(mean_rounded(&[100; 7]), 100);
    }

    #[test]
    fn test_resolve_recursive() {
        // a: [b: [d=100, e=0], c=20] -> b=50, a=35
        let tree = WorkTree::from_items(vec![
            make_item("a", None, 0),
            make_item("b", Some("a"), 99),
            make_item("c", Some("a"), 20),
            make_item("d", Some("b"), 100),
            make_item("e", Some("b"), 0),
        ]);
        let all = tree.resolve_all("a", 16).unwrap();
        assert_eq!(all["b"], 50);
        assert_eq!(all["a"], 35);
        assert_eq!(all["c"], 20);
        assert_eq!(tree.resolve_completion("b", 16).unwrap(), 50);
    }

    #[test]
    fn test_many_children() {
        let mut items = vec![make_item("root", None, 0)];
        for i in 0..150u32 {
            items.push(make_item(&format!("c{:03}", i), Some("root"), (i % 101) as u8));
        }
        let expected: Vec<u8> = (0..150u32).map(|i| (i % 101) as u8).collect();
        let tree = WorkTree::from_items(items);
        assert_eq!(tree.resolve_completion("root", 4).unwrap(), mean_rounded(&expected));
    }

    #[test]
    fn test_cycle_detected() {
        let tree = WorkTree::from_items(vec![
            make_item("x", Some("y"), 0),
            make_item("y", Some("x"), 0),
        ]);
        let err = tree.resolve_completion("x", 16).unwrap_err();
        assert!(matches!(err, DomainError::ConstraintViolation(_)));
    }

    #[test]
    fn test_depth_limit() {
        let tree = WorkTree::from_items(vec![
            make_item("a", None, 0),
            make_item("b", Some("a"), 0),
            make_item("c", Some("b"), 10),
        ]);
        assert!(tree.resolve_completion("a", 1).is_err());
        assert_eq!(tree.resolve_completion("a", 2).unwrap(), 10);
    }

    #[test]
    fn test_flatten_tree() {
        let tree = WorkTree::from_items(vec![
            make_item("1", None, 0),
            make_item("2", None, 0),
            make_item("1a", Some("1"), 0),
            make_item("1b", Some("1"), 0),
            make_item("1a-x", Some("1a"), 0),
        ]);

        let flat = tree.flatten(None);
        let order: Vec<(&str, usize)> = flat.iter().map(|(i, d)| (i.id.as_str(), *d)).collect();
        assert_eq!(
            order,
            vec![("1", 0), ("1a", 1), ("1a-x", 2), ("1b", 1), ("2", 0)]
        );
    }
}
