//! # Path Mutation
//!
//! Sets a value at a dotted key path in every branch of a tree.
//!
//! Some set-at-path implementations, given a branch with several entries and
//! a nested path whose root key is absent, return a branch holding only the
//! new path instead of adding it next to the existing entries. The result of
//! every set is checked for that signature and, when it shows up, the value
//! is set again in two steps: first the root key alone (a single-level set
//! inserts it as a sibling), then the full path (the root now exists, so it
//! is updated in place).
//!
//! [`TreeBranch::set`] itself always inserts additively, so with it the
//! check only fires for empty branches, where both strategies agree.

use tracing::debug;

use crate::tree::{PathSegment, Tree, TreeBranch, Value};

/// Split a dotted key into path segments: `"a.b.c"` -> `["a", "b", "c"]`.
pub fn convert_key_to_path(key: &str) -> Vec<PathSegment> {
    key.split('.').map(PathSegment::from).collect()
}

/// Whether `next` looks like `previous` was thrown away rather than extended.
///
/// A set that erased the branch leaves exactly one entry. That is only
/// legitimate when the branch already had that single entry under the same key.
pub fn branch_was_erased(previous: &TreeBranch, next: &TreeBranch) -> bool {
    if next.len() != 1 {
        return false;
    }
    if previous.len() != 1 {
        return true;
    }
    previous.items()[0].key != next.items()[0].key
}

/// Apply `set` to one branch, compensating if it erased the existing entries.
pub fn set_in_branch<F>(branch: &TreeBranch, path: &[PathSegment], value: &Value, set: F) -> TreeBranch
where
    F: Fn(&TreeBranch, &[PathSegment], &Value) -> TreeBranch,
{
    let next = set(branch, path, value);
    if !branch_was_erased(branch, &next) {
        return next;
    }
    let Some(root) = path.first() else {
        return next;
    };

    debug!(entries = branch.len(), "Set replaced the branch, inserting the root key first");
    let with_root = set(branch, std::slice::from_ref(root), value);
    set(&with_root, path, value)
}

/// Set `value` at `path` in every branch of `tree`, each independently.
pub fn set_in_tree(tree: &mut Tree, path: &[PathSegment], value: &Value) {
    for branch in &mut tree.branches {
        *branch = set_in_branch(branch, path, value, TreeBranch::set);
    }
}
