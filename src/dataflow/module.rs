//! Module hierarchy: `Application` / `ModuleGroup` /
//! `ApplicationModule` / `VariableGroup`, with the five hierarchy
//! modifiers and tag-based variable search.

use std::collections::HashSet;

use regex::Regex;

use crate::accessor::RegisterAccessor;
use crate::error::{CoreError, Result};

pub type ModuleId = usize;

/// Where a module's variables appear to the outside world relative to
/// its natural tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HierarchyModifier {
    #[default]
    None,
    /// This module's own path segment is omitted; children still nest
    /// under the parent.
    HideThis,
    /// Variables appear one level higher than their natural position.
    OneLevelUp,
    /// Combination of `OneLevelUp` and `HideThis`.
    OneUpAndHide,
    /// Variables appear directly under the application root.
    MoveToRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    ApplicationRoot,
    ModuleGroup,
    ApplicationModule,
    VariableGroup,
}

/// One named accessor exposed by an `ApplicationModule` or
/// `VariableGroup`, bound to its `dyn RegisterAccessor` implementation.
pub struct AccessorSlot {
    pub key: String,
    pub is_output: bool,
    pub accessor: Box<dyn RegisterAccessor + Send>,
}

pub struct ModuleTreeNode {
    pub name: String,
    pub kind: ModuleKind,
    pub parent: Option<ModuleId>,
    pub children: Vec<ModuleId>,
    pub modifier: HierarchyModifier,
    pub tags: HashSet<String>,
    pub accessors: Vec<AccessorSlot>,
}

impl ModuleTreeNode {
    fn new(name: impl Into<String>, kind: ModuleKind, parent: Option<ModuleId>) -> Self {
        ModuleTreeNode {
            name: name.into(),
            kind,
            parent,
            children: Vec::new(),
            modifier: HierarchyModifier::None,
            tags: HashSet::new(),
            accessors: Vec::new(),
        }
    }
}

/// The tree of modules/groups that make up one application. Path
/// computation honours each node's [`HierarchyModifier`].
pub struct ModuleTree {
    nodes: Vec<ModuleTreeNode>,
}

impl ModuleTree {
    pub fn new(application_name: impl Into<String>) -> Self {
        ModuleTree {
            nodes: vec![ModuleTreeNode::new(application_name, ModuleKind::ApplicationRoot, None)],
        }
    }

    pub fn root(&self) -> ModuleId {
        0
    }

    /// Enforces the containment rules from the module tree's data model:
    /// an `ApplicationModule` may be owned by the root or a `ModuleGroup`;
    /// a `ModuleGroup` likewise; a `VariableGroup` may be owned by an
    /// `ApplicationModule` or another `VariableGroup`.
    pub fn add_child(&mut self, parent: ModuleId, name: impl Into<String>, kind: ModuleKind) -> ModuleId {
        self.try_add_child(parent, name, kind)
        .unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_add_child(
        &mut self,
        parent: ModuleId,
        name: impl Into<String>,
        kind: ModuleKind,
    ) -> Result<ModuleId> {
        let parent_kind = self.nodes[parent].kind;
        let allowed = match kind {
            ModuleKind::ApplicationRoot => false,
            ModuleKind::ModuleGroup | ModuleKind::ApplicationModule => {
                matches!(parent_kind, ModuleKind::ApplicationRoot | ModuleKind::ModuleGroup)
            }
            ModuleKind::VariableGroup => {
                matches!(parent_kind, ModuleKind::ApplicationModule | ModuleKind::VariableGroup)
            }
        };
        if !allowed {
            return Err(CoreError::logic(format!(
                        "{:?} cannot be owned by a {:?}",
                        kind, parent_kind
            )));
        }

        let id = self.nodes.len();
        self.nodes.push(ModuleTreeNode::new(name, kind, Some(parent)));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub fn node(&self, id: ModuleId) -> &ModuleTreeNode {
        &self.nodes[id]
    }

    /// Binds a concrete accessor to a named slot on `module`, as the
    /// runner does at freeze time when it resolves a `Device` or
    /// `Application` node to its backing accessor.
    pub fn add_accessor(
        &mut self,
        module: ModuleId,
        key: impl Into<String>,
        is_output: bool,
        accessor: Box<dyn RegisterAccessor + Send>,
    ) {
        self.nodes[module].accessors.push(AccessorSlot { key: key.into(), is_output, accessor });
    }

    pub fn accessor_mut(&mut self, module: ModuleId, key: &str) -> Option<&mut AccessorSlot> {
        self.nodes[module].accessors.iter_mut().find(|slot| slot.key == key)
    }

    pub fn node_mut(&mut self, id: ModuleId) -> &mut ModuleTreeNode {
        &mut self.nodes[id]
    }

    pub fn set_modifier(&mut self, id: ModuleId, modifier: HierarchyModifier) {
        self.nodes[id].modifier = modifier;
    }

    pub fn add_tag(&mut self, id: ModuleId, tag: impl Into<String>) {
        self.nodes[id].tags.insert(tag.into());
    }

    /// Resolves a module's externally visible path, applying every
    /// ancestor's hierarchy modifier along the way.
    pub fn qualified_path(&self, id: ModuleId) -> String {
        let mut segments: Vec<String> = Vec::new();
        let mut current = Some(id);
        let mut skip_remaining = false;

        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            if node.kind == ModuleKind::ApplicationRoot {
                break;
            }

            if !skip_remaining {
                match node.modifier {
                    HierarchyModifier::None => segments.push(node.name.clone()),
                    HierarchyModifier::HideThis => {}
                    HierarchyModifier::OneLevelUp => {
                        segments.push(node.name.clone());
                        // Skip one ancestor level (the immediate parent's
                        // own segment is dropped for this subtree).
                        if let Some(parent) = node.parent {
                            current = self.nodes[parent].parent;
                            continue;
                        }
                    }
                    HierarchyModifier::OneUpAndHide => {
                        if let Some(parent) = node.parent {
                            current = self.nodes[parent].parent;
                            continue;
                        }
                    }
                    HierarchyModifier::MoveToRoot => {
                        segments.push(node.name.clone());
                        skip_remaining = true;
                    }
                }
            }
            current = node.parent;
        }

        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn descendants(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut out = vec![id];
        let mut stack = self.nodes[id].children.clone();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().copied());
        }
        out
    }

    /// All accessor slots reachable from `id`, paired with the owning
    /// module's qualified path, matching a tag predicate.
    fn matching_accessors(&self, id: ModuleId, predicate: impl Fn(&HashSet<String>) -> bool) -> Vec<(String, &AccessorSlot)> {
        let mut out = Vec::new();
        for module_id in self.descendants(id) {
            let node = &self.nodes[module_id];
            if predicate(&node.tags) {
                let path = self.qualified_path(module_id);
                for slot in &node.accessors {
                    out.push((path.clone(), slot));
                }
            }
        }
        out
    }

    /// `findTag(regex)`: accessors under modules carrying a tag matching
    /// `pattern`.
    pub fn find_tag(&self, id: ModuleId, pattern: &str) -> Result<Vec<(String, &AccessorSlot)>> {
        let re = Regex::new(pattern)
        .map_err(|e| CoreError::logic(format!("invalid tag pattern {pattern:?}: {e}")))?;
        Ok(self.matching_accessors(id, |tags| tags.iter().any(|t| re.is_match(t))))
    }

    /// `excludeTag(regex)`: accessors under modules NOT carrying any tag
    /// matching `pattern`.
    pub fn exclude_tag(&self, id: ModuleId, pattern: &str) -> Result<Vec<(String, &AccessorSlot)>> {
        let re = Regex::new(pattern)
        .map_err(|e| CoreError::logic(format!("invalid tag pattern {pattern:?}: {e}")))?;
        Ok(self.matching_accessors(id, |tags| !tags.iter().any(|t| re.is_match(t))))
    }

    /// `readAll()` / `writeAll()`: walk every accessor in the subtree,
    /// in tree order, reading or writing them.
    pub fn read_all(&mut self, id: ModuleId) -> Result<()> {
        for module_id in self.descendants(id) {
            for slot in &mut self.nodes[module_id].accessors {
                if slot.accessor.is_readable() {
                    slot.accessor.read()?;
                }
            }
        }
        Ok(())
    }

    pub fn write_all(&mut self, id: ModuleId) -> Result<()> {
        for module_id in self.descendants(id) {
            for slot in &mut self.nodes[module_id].accessors {
                if slot.accessor.is_writeable() {
                    slot.accessor.write()?;
                }
            }
        }
        Ok(())
    }

    /// `readAnyGroup()`: reads every direct child `VariableGroup` of
    /// `id`, returning the names of the groups that produced at least
    /// one readable accessor.
    pub fn read_any_group(&mut self, id: ModuleId) -> Result<Vec<String>> {
        let children: Vec<ModuleId> = self.nodes[id]
        .children
        .iter()
        .copied()
        .filter(|&c| self.nodes[c].kind == ModuleKind::VariableGroup)
        .collect();
        let mut touched = Vec::new();
        for child in children {
            let mut any = false;
            for slot in &mut self.nodes[child].accessors {
                if slot.accessor.is_readable() {
                    slot.accessor.read()?;
                    any = true;
                }
            }
            if any {
                touched.push(self.nodes[child].name.clone());
            }
        }
        Ok(touched)
    }

    pub fn application_modules(&self) -> Vec<ModuleId> {
        self.nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == ModuleKind::ApplicationModule)
        .map(|(id, _)| id)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_level_up_drops_parent_segment() {
        let mut tree = ModuleTree::new("App");
        let group = tree.add_child(tree.root(), "Group", ModuleKind::ModuleGroup);
        let module = tree.add_child(group, "Module", ModuleKind::ApplicationModule);
        assert_eq!(tree.qualified_path(module), "/Group/Module");

        tree.set_modifier(module, HierarchyModifier::OneLevelUp);
        assert_eq!(tree.qualified_path(module), "/Module");
    }

    #[test]
    fn move_to_root_ignores_ancestors() {
        let mut tree = ModuleTree::new("App");
        let group = tree.add_child(tree.root(), "Group", ModuleKind::ModuleGroup);
        let nested = tree.add_child(group, "Nested", ModuleKind::ModuleGroup);
        let module = tree.add_child(nested, "Module", ModuleKind::ApplicationModule);
        tree.set_modifier(module, HierarchyModifier::MoveToRoot);
        assert_eq!(tree.qualified_path(module), "/Module");
    }

    #[test]
    fn hide_this_omits_own_segment_but_keeps_children() {
        let mut tree = ModuleTree::new("App");
        let group = tree.add_child(tree.root(), "Group", ModuleKind::ModuleGroup);
        tree.set_modifier(group, HierarchyModifier::HideThis);
        let module = tree.add_child(group, "Module", ModuleKind::ApplicationModule);
        assert_eq!(tree.qualified_path(module), "/Module");
    }

    #[test]
    fn find_tag_matches_regex_against_module_tags() {
        let mut tree = ModuleTree::new("App");
        let module = tree.add_child(tree.root(), "Module", ModuleKind::ApplicationModule);
        tree.add_tag(module, "calibration/fast");
        let root = tree.root();
        let found = tree.find_tag(root, "^calibration/").unwrap();
        assert!(found.is_empty()); // no accessors registered yet, but no error
        assert!(tree.find_tag(root, "(").is_err());
    }
}
