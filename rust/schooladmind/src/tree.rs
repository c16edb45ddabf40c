use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Parent id carried by top-level categories.
pub const ROOT_PARENT_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: i64,
    #[serde(default)]
    pub sort_order: i64,
}

/// A course, always filed under exactly one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub category: CategoryNode,
    pub leaves: Vec<Leaf>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    pub prune: bool,
    pub root_parent_id: i64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            prune: true,
            root_parent_id: ROOT_PARENT_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("category hierarchy contains a cycle through category {category_id}")]
    CyclicHierarchy { category_id: i64 },
}

impl TreeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CyclicHierarchy { .. } => "cyclic_hierarchy",
        }
    }
}

fn category_order(a: &CategoryNode, b: &CategoryNode) -> Ordering {
    a.sort_order
        .cmp(&b.sort_order)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

fn leaf_order(a: &Leaf, b: &Leaf) -> Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}

/// Collapses duplicate category ids to a single representative. The pick only
/// depends on row contents, never on input position.
fn index_categories(categories: &[CategoryNode]) -> BTreeMap<i64, &CategoryNode> {
    let mut by_id: BTreeMap<i64, &CategoryNode> = BTreeMap::new();
    for c in categories {
        match by_id.get(&c.id) {
            None => {
                by_id.insert(c.id, c);
            }
            Some(existing) => {
                warn!(category_id = c.id, "duplicate category row; keeping one");
                let key = |n: &CategoryNode| (n.parent_id, n.sort_order, n.name.clone());
                if key(c) < key(existing) {
                    by_id.insert(c.id, c);
                }
            }
        }
    }
    by_id
}

fn index_leaves(leaves: &[Leaf]) -> BTreeMap<i64, &Leaf> {
    let mut by_id: BTreeMap<i64, &Leaf> = BTreeMap::new();
    for l in leaves {
        match by_id.get(&l.id) {
            None => {
                by_id.insert(l.id, l);
            }
            Some(existing) => {
                warn!(course_id = l.id, "duplicate course row; keeping one");
                if (l.category_id, &l.name) < (existing.category_id, &existing.name) {
                    by_id.insert(l.id, l);
                }
            }
        }
    }
    by_id
}

/// Walks every parent chain once. Chains end at a parent id that is not a
/// known category; reaching a node already on the current chain is a cycle.
fn ensure_acyclic(by_id: &BTreeMap<i64, &CategoryNode>) -> Result<(), TreeError> {
    let mut settled: HashSet<i64> = HashSet::new();
    for &start in by_id.keys() {
        let mut chain: Vec<i64> = Vec::new();
        let mut on_chain: HashSet<i64> = HashSet::new();
        let mut cur = start;
        while let Some(node) = by_id.get(&cur) {
            if settled.contains(&cur) {
                break;
            }
            if !on_chain.insert(cur) {
                return Err(TreeError::CyclicHierarchy { category_id: cur });
            }
            chain.push(cur);
            cur = node.parent_id;
        }
        settled.extend(chain);
    }
    Ok(())
}

struct Indexes<'a> {
    children: HashMap<i64, Vec<&'a CategoryNode>>,
    leaves: HashMap<i64, Vec<Leaf>>,
    prune: bool,
}

impl<'a> Indexes<'a> {
    fn new(
        categories: &BTreeMap<i64, &'a CategoryNode>,
        leaves: &BTreeMap<i64, &Leaf>,
        prune: bool,
    ) -> Self {
        let mut children: HashMap<i64, Vec<&'a CategoryNode>> = HashMap::new();
        for c in categories.values() {
            children.entry(c.parent_id).or_default().push(*c);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| category_order(a, b));
        }

        let mut by_category: HashMap<i64, Vec<Leaf>> = HashMap::new();
        for l in leaves.values() {
            if !categories.contains_key(&l.category_id) {
                warn!(
                    course_id = l.id,
                    category_id = l.category_id,
                    "course references an unknown category; dropped from tree"
                );
                continue;
            }
            by_category.entry(l.category_id).or_default().push((*l).clone());
        }
        for list in by_category.values_mut() {
            list.sort_by(leaf_order);
        }

        Self {
            children,
            leaves: by_category,
            prune,
        }
    }

    fn node(&self, category: &CategoryNode) -> Option<TreeNode> {
        let children = self.level(category.id);
        let leaves = self.leaves.get(&category.id).cloned().unwrap_or_default();
        let node = TreeNode {
            category: category.clone(),
            leaves,
            children,
        };
        if self.prune && node.is_empty() {
            return None;
        }
        Some(node)
    }

    fn level(&self, parent_id: i64) -> Vec<TreeNode> {
        let Some(siblings) = self.children.get(&parent_id) else {
            return Vec::new();
        };
        siblings.iter().filter_map(|c| self.node(c)).collect()
    }
}

/// Builds the category forest below `options.root_parent_id` and files each
/// course under its category.
pub fn build_tree(
    categories: &[CategoryNode],
    leaves: &[Leaf],
    options: &TreeOptions,
) -> Result<Vec<TreeNode>, TreeError> {
    let cats = index_categories(categories);
    ensure_acyclic(&cats)?;
    let leaf_rows = index_leaves(leaves);
    let idx = Indexes::new(&cats, &leaf_rows, options.prune);
    let roots = idx.level(options.root_parent_id);
    debug!(
        categories = cats.len(),
        courses = leaf_rows.len(),
        roots = roots.len(),
        prune = options.prune,
        "built category tree"
    );
    Ok(roots)
}

/// Same as [`build_tree`] but rooted at one category, which is included as
/// the single top node. Empty when the category is unknown or pruned away.
pub fn build_subtree(
    categories: &[CategoryNode],
    leaves: &[Leaf],
    category_id: i64,
    prune: bool,
) -> Result<Vec<TreeNode>, TreeError> {
    let cats = index_categories(categories);
    ensure_acyclic(&cats)?;
    let Some(root) = cats.get(&category_id).copied() else {
        return Ok(Vec::new());
    };
    let leaf_rows = index_leaves(leaves);
    let idx = Indexes::new(&cats, &leaf_rows, prune);
    Ok(idx.node(root).into_iter().collect())
}

pub fn load_categories(conn: &Connection) -> anyhow::Result<Vec<CategoryNode>> {
    let mut stmt = conn.prepare("SELECT id, name, parent_id, sort_order FROM categories")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategoryNode {
                id: row.get(0)?,
                name: row.get(1)?,
                parent_id: row.get(2)?,
                sort_order: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every course row, hidden ones included, optionally limited to those
/// linked to one school.
pub fn load_courses(conn: &Connection, linked_to: Option<i64>) -> anyhow::Result<Vec<Leaf>> {
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Leaf> {
        Ok(Leaf {
            id: row.get(0)?,
            name: row.get(1)?,
            category_id: row.get(2)?,
        })
    };
    let rows = match linked_to {
        Some(tenant_id) => {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.full_name, c.category_id
                 FROM courses c
                 JOIN tenant_courses tc ON tc.course_id = c.id
                 WHERE tc.tenant_id = ?",
            )?;
            let rows = stmt
                .query_map([tenant_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare("SELECT id, full_name, category_id FROM courses")?;
            let rows = stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}
