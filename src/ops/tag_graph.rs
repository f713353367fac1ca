use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::mpsc;

use crate::model::event::{IndexEvent, Notifier};
use crate::model::note::NoteId;
use crate::model::tag::{
    HIERARCHY_SEPARATOR, ReservedTag, TagError, TagId, TagNode, validate_tag_name,
};
use crate::parse::task_parser::TagResolver;

/// Tags removed together with a subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedTags {
    /// Removed tag ids, subtree root first
    pub tags: Vec<TagId>,
    /// Every note that was linked to one of the removed tags
    pub notes: BTreeSet<NoteId>,
}

/// The hierarchical tag/group tree.
///
/// Nodes live in an arena keyed by [`TagId`]. Top-level nodes (the children
/// of the implicit super-root) are `Groups` followed by the free tags.
/// `Groups` holds `All` and `NotGrouped` first, the user groups, then
/// `Archive` last.
#[derive(Debug)]
pub struct TagGraph {
    nodes: HashMap<TagId, TagNode>,
    roots: Vec<TagId>,
    reserved: [TagId; 4],
    group_list: Vec<TagId>,
    notifier: Notifier,
}

impl Default for TagGraph {
    fn default() -> Self {
        TagGraph::new()
    }
}

impl TagGraph {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut reserved = [TagId::generate(); 4];
        for r in ReservedTag::ALL {
            let node = TagNode::new(r.name(), Some(r));
            reserved[r.index()] = node.id;
            nodes.insert(node.id, node);
        }
        let groups = reserved[ReservedTag::Groups.index()];
        let pseudo = [ReservedTag::All, ReservedTag::NotGrouped, ReservedTag::Archive]
            .map(|r| reserved[r.index()]);
        for id in pseudo {
            if let Some(node) = nodes.get_mut(&id) {
                node.parent = Some(groups);
            }
        }
        if let Some(node) = nodes.get_mut(&groups) {
            node.children = pseudo.to_vec();
        }

        TagGraph {
            nodes,
            roots: vec![groups],
            reserved,
            group_list: Vec::new(),
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<IndexEvent> {
        self.notifier.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn reserved(&self, r: ReservedTag) -> TagId {
        self.reserved[r.index()]
    }

    pub fn node(&self, id: TagId) -> Option<&TagNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `parent`, or the top-level nodes for `None`
    pub fn children_of(&self, parent: Option<TagId>) -> &[TagId] {
        match parent {
            Some(p) => self
                .nodes
                .get(&p)
                .map(|n| n.children.as_slice())
                .unwrap_or(&[]),
            None => &self.roots,
        }
    }

    /// All group tags except the reserved ones, in tree order
    pub fn group_list(&self) -> &[TagId] {
        &self.group_list
    }

    /// Free (non-group) tags, in tree order
    pub fn free_tags(&self) -> Vec<TagId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| !n.is_group))
            .collect()
    }

    /// Every node in tree order, starting with `Groups`
    pub fn preorder(&self) -> Vec<TagId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.collect_subtree(root, &mut out);
        }
        out
    }

    /// `id` and its descendants in tree order
    pub fn subtree(&self, id: TagId) -> Vec<TagId> {
        let mut out = Vec::new();
        self.collect_subtree(id, &mut out);
        out
    }

    fn collect_subtree(&self, id: TagId, out: &mut Vec<TagId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        out.push(id);
        for &child in &node.children {
            self.collect_subtree(child, out);
        }
    }

    fn is_ancestor_or_self(&self, ancestor: TagId, mut id: TagId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes.get(&id).and_then(|n| n.parent) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    /// Separator-joined path of the tag. Group paths start below `Groups`;
    /// `Groups` itself has an empty external name.
    pub fn external_name(&self, id: TagId) -> Option<String> {
        let groups = self.reserved(ReservedTag::Groups);
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == groups {
                break;
            }
            let node = self.nodes.get(&cur)?;
            segments.push(node.name.as_str());
            current = node.parent;
        }
        segments.reverse();
        Some(segments.join(&HIERARCHY_SEPARATOR.to_string()))
    }

    /// Direct child of `parent` named `name`
    pub fn find_child(&self, parent: Option<TagId>, name: &str) -> Option<TagId> {
        self.children_of(parent)
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    /// First descendant of `parent` (excluding `parent`) named `name`
    pub fn find_in_subtree(&self, parent: Option<TagId>, name: &str) -> Option<TagId> {
        let mut stack: Vec<TagId> = self.children_of(parent).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = self.nodes.get(&id)?;
            if node.name == name {
                return Some(id);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    fn find_free_tag(&self, name: &str, exclude: Option<TagId>) -> Option<TagId> {
        self.nodes
            .values()
            .find(|n| !n.is_group && n.name == name && Some(n.id) != exclude)
            .map(|n| n.id)
    }

    fn is_group_context(&self, parent: Option<TagId>) -> bool {
        parent
            .and_then(|p| self.nodes.get(&p))
            .is_some_and(|n| n.is_group)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check that `name` may be used for a tag under `parent`.
    /// `exclude` is the tag being renamed or moved, if any.
    fn validate_placement(
        &self,
        parent: Option<TagId>,
        name: &str,
        exclude: Option<TagId>,
    ) -> Result<String, TagError> {
        let name = validate_tag_name(name)?.to_string();
        if let Some(p) = parent {
            let node = self.nodes.get(&p).ok_or(TagError::NotFound(p))?;
            if let Some(r) = node.reserved
                && !r.accepts_children()
            {
                return Err(TagError::NoChildren(node.name.clone()));
            }
        }

        if self.is_group_context(parent) {
            let clash = self
                .children_of(parent)
                .iter()
                .any(|id| Some(*id) != exclude && self.nodes.get(id).is_some_and(|n| n.name == name));
            if clash {
                return Err(TagError::DuplicateSibling(name));
            }
        } else if self.find_free_tag(&name, exclude).is_some() {
            return Err(TagError::DuplicateTag(name));
        }
        Ok(name)
    }

    fn editable(&self, id: TagId) -> Result<&TagNode, TagError> {
        let node = self.nodes.get(&id).ok_or(TagError::NotFound(id))?;
        match node.reserved {
            Some(r) => Err(TagError::Reserved(r)),
            None => Ok(node),
        }
    }

    /// Check a rename without applying it
    pub fn validate_rename(&self, id: TagId, new_name: &str) -> Result<String, TagError> {
        let node = self.editable(id)?;
        self.validate_placement(node.parent, new_name, Some(id))
    }

    /// Check a move without applying it
    pub fn validate_move(&self, id: TagId, new_parent: Option<TagId>) -> Result<(), TagError> {
        let node = self.editable(id)?;
        if let Some(p) = new_parent
            && self.is_ancestor_or_self(id, p)
        {
            return Err(TagError::Cycle);
        }
        if node.is_group != self.is_group_context(new_parent) {
            return Err(TagError::KindMismatch(node.name.clone()));
        }
        self.validate_placement(new_parent, &node.name, Some(id))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Creation and resolution
    // -----------------------------------------------------------------------

    /// Create a child tag of `parent` (`None` = top-level free tag).
    /// Flags are inherited from the parent.
    pub fn create_child(&mut self, parent: Option<TagId>, name: &str) -> Result<TagId, TagError> {
        let name = self.validate_placement(parent, name, None)?;
        let node = TagNode::new(&name, None);
        let id = node.id;
        self.nodes.insert(id, node);
        self.attach(id, parent);
        tracing::debug!(tag = %name, "created tag");
        self.notifier.emit(IndexEvent::TagAdded(id));
        self.refresh_structure();
        Ok(id)
    }

    /// Insert `id` among `parent`'s children, keeping `Archive` last under `Groups`
    fn attach(&mut self, id: TagId, parent: Option<TagId>) {
        let archive = self.reserved(ReservedTag::Archive);
        let groups = self.reserved(ReservedTag::Groups);
        let list = match parent {
            Some(p) => match self.nodes.get_mut(&p) {
                Some(node) => &mut node.children,
                None => return,
            },
            None => &mut self.roots,
        };
        if parent == Some(groups) {
            let pos = list.iter().position(|c| *c == archive).unwrap_or(list.len());
            list.insert(pos, id);
        } else {
            list.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
        }
    }

    fn detach(&mut self, id: TagId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|c| *c != id),
        }
    }

    /// Find `name` under `parent` (direct children, or the whole subtree when
    /// `search_subtree`), creating it when missing and `create_if_missing`.
    /// Invalid names are logged and yield `None`.
    pub fn resolve_or_create(
        &mut self,
        name: &str,
        parent: Option<TagId>,
        create_if_missing: bool,
        search_subtree: bool,
    ) -> Option<TagId> {
        let trimmed = name.trim();
        let found = if search_subtree {
            self.find_in_subtree(parent, trimmed)
        } else {
            self.find_child(parent, trimmed)
        };
        if found.is_some() || !create_if_missing {
            return found;
        }
        match self.create_child(parent, trimmed) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(tag = %trimmed, error = %e, "cannot create tag");
                None
            }
        }
    }

    /// Resolve a group path segment by segment from `Groups`. Empty segments
    /// are ignored; resolution stops at the first missing segment.
    pub fn resolve_external_name(&self, path: &str) -> Option<TagId> {
        let mut current = self.reserved(ReservedTag::Groups);
        for segment in path.split(HIERARCHY_SEPARATOR) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            current = self.find_child(Some(current), segment)?;
        }
        Some(current)
    }

    /// Like [`resolve_external_name`](Self::resolve_external_name), creating
    /// missing groups along the way
    pub fn resolve_external_name_or_create(&mut self, path: &str) -> Option<TagId> {
        let mut current = self.reserved(ReservedTag::Groups);
        for segment in path.split(HIERARCHY_SEPARATOR) {
            if segment.trim().is_empty() {
                continue;
            }
            current = self.resolve_or_create(segment, Some(current), true, false)?;
        }
        Some(current)
    }

    fn find_free_child(&self, parent: Option<TagId>, name: &str) -> Option<TagId> {
        self.children_of(parent)
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| !n.is_group && n.name == name))
    }

    /// Look up a free-tag path from the top level without creating anything.
    /// A single-segment path also matches a nested free tag by its
    /// (forest-unique) name.
    pub fn find_tag_path(&self, path: &str) -> Option<TagId> {
        let segments = split_path(path);
        if segments.is_empty() {
            return None;
        }
        if segments.len() == 1
            && let Some(id) = self.find_free_tag(segments[0], None)
        {
            return Some(id);
        }
        let mut current = None;
        for segment in segments {
            current = Some(self.find_free_child(current, segment)?);
        }
        current
    }

    /// [`find_tag_path`](Self::find_tag_path), creating missing segments
    /// when `create_if_missing`
    pub fn resolve_tag_path(&mut self, path: &str, create_if_missing: bool) -> Option<TagId> {
        if let Some(id) = self.find_tag_path(path) {
            return Some(id);
        }
        if !create_if_missing {
            return None;
        }
        let mut current: Option<TagId> = None;
        for segment in split_path(path) {
            current = match self.find_free_child(current, segment) {
                Some(id) => Some(id),
                None => match self.create_child(current, segment) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(tag = %path, error = %e, "cannot create tag");
                        return None;
                    }
                },
            };
        }
        current
    }

    /// Group tag for a note's group external name (`None` = NotGrouped)
    pub fn group_for_note(&mut self, group: Option<&str>, create_if_missing: bool) -> Option<TagId> {
        match group {
            None => Some(self.reserved(ReservedTag::NotGrouped)),
            Some(path) if create_if_missing => self.resolve_external_name_or_create(path),
            Some(path) => self.resolve_external_name(path),
        }
    }

    /// External name to use in a note file name for `group`
    /// (`None` for NotGrouped)
    pub fn note_group_name(&self, group: TagId) -> Option<String> {
        if group == self.reserved(ReservedTag::NotGrouped) {
            return None;
        }
        self.external_name(group).filter(|n| !n.is_empty())
    }

    /// External name of the group's mirror: `Archive~<name>` for a live
    /// group, the name without `Archive~` for an archived one
    pub fn complementary_path(&self, id: TagId) -> Option<String> {
        let node = self.nodes.get(&id)?;
        if !node.is_group || node.reserved.is_some() {
            return None;
        }
        let external = self.external_name(id)?;
        let archive = ReservedTag::Archive.name();
        if node.is_archived {
            let prefix = format!("{}{}", archive, HIERARCHY_SEPARATOR);
            Some(external.strip_prefix(&prefix)?.to_string())
        } else {
            Some(format!("{}{}{}", archive, HIERARCHY_SEPARATOR, external))
        }
    }

    /// The group's mirror under `Archive`, or for an archived group the
    /// live group it mirrors
    pub fn complementary_group(&mut self, id: TagId, create_if_missing: bool) -> Option<TagId> {
        let target = self.complementary_path(id)?;
        if create_if_missing {
            self.resolve_external_name_or_create(&target)
        } else {
            self.resolve_external_name(&target)
        }
    }

    // -----------------------------------------------------------------------
    // Structural edits
    // -----------------------------------------------------------------------

    /// Rename a tag in memory, or delete it when `new_name` is `None`.
    /// Group renames must already have been applied to storage.
    pub fn rename(&mut self, id: TagId, new_name: Option<&str>) -> Result<RemovedTags, TagError> {
        let Some(new_name) = new_name else {
            return self.remove(id);
        };
        let name = self.validate_rename(id, new_name)?;
        if let Some(node) = self.nodes.get_mut(&id)
            && node.name != name
        {
            tracing::info!(from = %node.name, to = %name, "renamed tag");
            node.name = name;
            self.notifier.emit(IndexEvent::TagChanged(id));
        }
        Ok(RemovedTags::default())
    }

    /// Remove a tag and its subtree
    pub fn remove(&mut self, id: TagId) -> Result<RemovedTags, TagError> {
        self.editable(id)?;
        let tags = self.subtree(id);
        self.detach(id);
        let mut notes = BTreeSet::new();
        for tag in &tags {
            if let Some(node) = self.nodes.remove(tag) {
                notes.extend(node.linked_notes);
            }
            self.notifier.emit(IndexEvent::TagRemoved(*tag));
        }
        tracing::info!(count = tags.len(), "removed tags");
        self.refresh_structure();
        Ok(RemovedTags { tags, notes })
    }

    /// Move a tag (with its subtree) under a new parent
    pub fn move_tag(&mut self, id: TagId, new_parent: Option<TagId>) -> Result<(), TagError> {
        self.validate_move(id, new_parent)?;
        if self.nodes.get(&id).and_then(|n| n.parent) == new_parent {
            return Ok(());
        }
        self.detach(id);
        self.attach(id, new_parent);
        self.notifier.emit(IndexEvent::TagChanged(id));
        self.refresh_structure();
        Ok(())
    }

    /// Recompute `parent`, `level`, `is_group`, `is_archived` for every
    /// node and the flat group list. Emits events only for actual changes.
    pub fn refresh_structure(&mut self) {
        let mut stack: Vec<(TagId, Option<TagId>, usize, bool, bool)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (*id, None, 0, false, false))
            .collect();
        let mut changed = Vec::new();

        while let Some((id, parent, level, is_group, is_archived)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let (g, a, l) = match node.reserved {
                Some(r) => r.fixed_flags(),
                None => (is_group, is_archived, level),
            };
            if node.parent != parent || node.level != l || node.is_group != g || node.is_archived != a
            {
                node.parent = parent;
                node.level = l;
                node.is_group = g;
                node.is_archived = a;
                changed.push(id);
            }
            for &child in node.children.iter().rev() {
                stack.push((child, Some(id), l + 1, g, a));
            }
        }

        for id in changed {
            self.notifier.emit(IndexEvent::TagChanged(id));
        }

        let group_list: Vec<TagId> = self
            .subtree(self.reserved(ReservedTag::Groups))
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.is_group && !n.is_reserved()))
            .collect();
        if group_list != self.group_list {
            self.group_list = group_list;
            self.notifier.emit(IndexEvent::GroupListChanged);
        }
    }

    // -----------------------------------------------------------------------
    // Note links
    // -----------------------------------------------------------------------

    pub fn link_note(&mut self, tag: TagId, note: NoteId) -> bool {
        let inserted = self
            .nodes
            .get_mut(&tag)
            .is_some_and(|n| n.linked_notes.insert(note));
        if inserted {
            self.notifier.emit(IndexEvent::TagLinksChanged(tag));
        }
        inserted
    }

    pub fn unlink_note(&mut self, tag: TagId, note: NoteId) -> bool {
        let removed = self
            .nodes
            .get_mut(&tag)
            .is_some_and(|n| n.linked_notes.remove(&note));
        if removed {
            self.notifier.emit(IndexEvent::TagLinksChanged(tag));
        }
        removed
    }

    /// Unlink a note from every tag. Returns the tags it was linked to.
    pub fn unlink_note_everywhere(&mut self, note: NoteId) -> Vec<TagId> {
        let tags: Vec<TagId> = self
            .preorder()
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.linked_notes.contains(&note)))
            .collect();
        for &tag in &tags {
            self.unlink_note(tag, note);
        }
        tags
    }

    pub fn notes_of(&self, tag: TagId) -> impl Iterator<Item = NoteId> + '_ {
        self.nodes
            .get(&tag)
            .into_iter()
            .flat_map(|n| n.linked_notes.iter().copied())
    }

    /// The group tag a note is linked to, if any
    pub fn group_of_note(&self, note: NoteId) -> Option<TagId> {
        self.preorder().into_iter().find(|id| {
            self.nodes
                .get(id)
                .is_some_and(|n| n.is_group && n.linked_notes.contains(&note))
        })
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Verify the tree invariants. Returns one message per violation.
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let groups = self.reserved(ReservedTag::Groups);

        for r in ReservedTag::ALL {
            match self.nodes.get(&self.reserved(r)) {
                Some(n) if n.name == r.name() => {}
                _ => problems.push(format!("reserved tag {} is missing", r)),
            }
        }
        if self.roots.first() != Some(&groups) {
            problems.push("Groups is not the first top-level tag".into());
        }
        let group_children = self.children_of(Some(groups));
        let expected_head = [ReservedTag::All, ReservedTag::NotGrouped].map(|r| self.reserved(r));
        if group_children.len() < 3
            || group_children[..2] != expected_head
            || group_children.last() != Some(&self.reserved(ReservedTag::Archive))
        {
            problems.push("reserved groups are out of place".into());
        }

        let reachable = self.preorder();
        if reachable.len() != self.nodes.len() {
            problems.push(format!(
                "{} tags are unreachable",
                self.nodes.len().saturating_sub(reachable.len())
            ));
        }

        let mut free_names = BTreeSet::new();
        for id in &reachable {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if let Some(parent) = node.parent {
                let expected = self.nodes.get(&parent).map(|p| {
                    if node.is_reserved() {
                        node.reserved.map(ReservedTag::fixed_flags)
                    } else {
                        Some((p.is_group, p.is_archived, p.level + 1))
                    }
                });
                if expected.flatten() != Some((node.is_group, node.is_archived, node.level)) {
                    problems.push(format!("tag {:?} has stale flags", node.name));
                }
            }
            if node.is_group {
                let names = node
                    .children
                    .iter()
                    .filter_map(|c| self.nodes.get(c).map(|n| n.name.as_str()))
                    .collect::<Vec<_>>();
                let unique: BTreeSet<&str> = names.iter().copied().collect();
                if unique.len() != names.len() {
                    problems.push(format!("group {:?} has duplicate children", node.name));
                }
            } else if !free_names.insert(node.name.as_str()) {
                problems.push(format!("free tag {:?} is not unique", node.name));
            }
        }
        problems
    }

    /// Indented outline of the tree, one tag per line
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            self.outline_node(root, 0, &mut out);
        }
        out
    }

    fn outline_node(&self, id: TagId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let mut flags = Vec::new();
        if node.is_group {
            flags.push("group");
        }
        if node.is_archived {
            flags.push("archived");
        }
        let _ = write!(out, "{}{}", "  ".repeat(depth), node.name);
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(", "));
        }
        if !node.linked_notes.is_empty() {
            let _ = write!(out, " ({})", node.linked_notes.len());
        }
        out.push('\n');
        for &child in &node.children {
            self.outline_node(child, depth + 1, out);
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split(HIERARCHY_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl TagResolver for TagGraph {
    fn resolve_tag(&mut self, path: &str) -> Option<TagId> {
        self.resolve_tag_path(path, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::drain;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    fn groups(g: &TagGraph) -> Option<TagId> {
        Some(g.reserved(ReservedTag::Groups))
    }

    fn sample() -> TagGraph {
        let mut g = TagGraph::new();
        let work = g.create_child(groups(&g), "Work").unwrap();
        g.create_child(Some(work), "Meetings").unwrap();
        g.create_child(groups(&g), "Home").unwrap();
        let urgent = g.create_child(None, "urgent").unwrap();
        g.create_child(Some(urgent), "today").unwrap();
        g
    }

    #[test]
    fn new_graph_has_reserved_layout() {
        let g = TagGraph::new();
        assert!(g.check().is_empty(), "{:?}", g.check());
        assert_snapshot!(g.outline(), @r"
        Groups [group]
          All [group]
          NotGrouped [group]
          Archive [group, archived]
        ");
    }

    #[test]
    fn children_inherit_flags_and_levels() {
        let g = sample();
        let work = g.resolve_external_name("Work").unwrap();
        let meetings = g.resolve_external_name("Work~Meetings").unwrap();
        let node = g.node(meetings).unwrap();
        assert!(node.is_group);
        assert!(!node.is_archived);
        assert_eq!(node.level, 2);
        assert_eq!(node.parent, Some(work));

        let today = g.find_in_subtree(None, "today").unwrap();
        let node = g.node(today).unwrap();
        assert!(!node.is_group);
        assert_eq!(node.level, 1);
        assert!(g.check().is_empty());
    }

    #[test]
    fn user_groups_stay_between_reserved_groups() {
        let g = sample();
        assert_snapshot!(g.outline(), @r"
        Groups [group]
          All [group]
          NotGrouped [group]
          Work [group]
            Meetings [group]
          Home [group]
          Archive [group, archived]
        urgent
          today
        ");
    }

    #[test]
    fn duplicate_sibling_group_is_rejected_without_mutation() {
        let mut g = sample();
        let before = g.outline();
        let err = g.create_child(groups(&g), "Work").unwrap_err();
        assert_eq!(err, TagError::DuplicateSibling("Work".into()));
        assert_eq!(g.outline(), before);
        assert_eq!(g.resolve_or_create("Work", groups(&g), true, false), g.resolve_external_name("Work"));
    }

    #[test]
    fn same_group_name_allowed_under_different_parents() {
        let mut g = sample();
        let home = g.resolve_external_name("Home").unwrap();
        assert!(g.create_child(Some(home), "Meetings").is_ok());
    }

    #[test]
    fn free_tag_names_are_forest_unique() {
        let mut g = sample();
        let urgent = g.resolve_tag_path("urgent", false).unwrap();
        assert_eq!(
            g.create_child(Some(urgent), "urgent"),
            Err(TagError::DuplicateTag("urgent".into()))
        );
        assert_eq!(g.resolve_or_create("today", None, true, false), None);
        assert_eq!(
            g.resolve_or_create("today", None, false, true),
            g.resolve_tag_path("urgent~today", false)
        );
    }

    #[test]
    fn pseudo_groups_accept_no_children() {
        let mut g = TagGraph::new();
        let all = g.reserved(ReservedTag::All);
        assert!(matches!(
            g.create_child(Some(all), "x"),
            Err(TagError::NoChildren(_))
        ));
        assert_eq!(g.resolve_or_create("x", Some(all), true, false), None);
    }

    #[test]
    fn external_name_round_trip() {
        let g = sample();
        for id in g.subtree(g.reserved(ReservedTag::Groups)) {
            let name = g.external_name(id).unwrap();
            assert_eq!(g.resolve_external_name(&name), Some(id), "path {:?}", name);
        }
    }

    #[test]
    fn resolve_stops_at_missing_segment() {
        let g = sample();
        assert_eq!(g.resolve_external_name("Work~Nope~Meetings"), None);
        assert_eq!(
            g.resolve_external_name("~Work~~Meetings~"),
            g.resolve_external_name("Work~Meetings")
        );
        assert_eq!(g.resolve_external_name(""), groups(&g));
    }

    #[test]
    fn resolve_or_create_path_creates_each_level() {
        let mut g = TagGraph::new();
        let id = g.resolve_external_name_or_create("A~B~C").unwrap();
        assert_eq!(g.external_name(id).unwrap(), "A~B~C");
        assert_eq!(g.node(id).unwrap().level, 3);
        assert_eq!(g.group_list().len(), 3);
    }

    #[test]
    fn tag_resolver_creates_free_tags() {
        let mut g = sample();
        let today = g.resolve_tag("today").unwrap();
        assert_eq!(g.external_name(today).unwrap(), "urgent~today");
        let new = g.resolve_tag("errands~shop").unwrap();
        assert!(!g.node(new).unwrap().is_group);
        assert_eq!(g.resolve_tag("Work~x").map(|t| g.node(t).unwrap().is_group), Some(false));
    }

    #[test]
    fn reserved_tags_cannot_be_renamed_or_moved() {
        let mut g = TagGraph::new();
        let archive = g.reserved(ReservedTag::Archive);
        assert_eq!(
            g.rename(archive, Some("Old")),
            Err(TagError::Reserved(ReservedTag::Archive))
        );
        assert_eq!(
            g.rename(archive, None),
            Err(TagError::Reserved(ReservedTag::Archive))
        );
        assert!(g.move_tag(archive, None).is_err());
    }

    #[test]
    fn rename_checks_siblings() {
        let mut g = sample();
        let work = g.resolve_external_name("Work").unwrap();
        assert_eq!(
            g.rename(work, Some("Home")),
            Err(TagError::DuplicateSibling("Home".into()))
        );
        g.rename(work, Some("Job")).unwrap();
        assert_eq!(g.external_name(work).unwrap(), "Job");
        assert!(g.resolve_external_name("Job~Meetings").is_some());
    }

    #[test]
    fn delete_removes_subtree_and_reports_notes() {
        let mut g = sample();
        let work = g.resolve_external_name("Work").unwrap();
        let meetings = g.resolve_external_name("Work~Meetings").unwrap();
        g.link_note(work, NoteId(1));
        g.link_note(meetings, NoteId(2));

        let removed = g.rename(work, None).unwrap();
        assert_eq!(removed.tags, vec![work, meetings]);
        assert_eq!(removed.notes, BTreeSet::from([NoteId(1), NoteId(2)]));
        assert!(!g.contains(meetings));
        assert!(!g.group_list().contains(&work));
        assert!(g.check().is_empty());
    }

    #[test]
    fn move_recomputes_flags() {
        let mut g = sample();
        let work = g.resolve_external_name("Work").unwrap();
        let archive = g.reserved(ReservedTag::Archive);
        g.move_tag(work, Some(archive)).unwrap();

        let meetings = g.resolve_external_name("Archive~Work~Meetings").unwrap();
        let node = g.node(meetings).unwrap();
        assert!(node.is_archived);
        assert_eq!(node.level, 3);
        assert!(g.check().is_empty());
    }

    #[test]
    fn move_rejects_cycles_and_kind_changes() {
        let mut g = sample();
        let work = g.resolve_external_name("Work").unwrap();
        let meetings = g.resolve_external_name("Work~Meetings").unwrap();
        assert_eq!(g.move_tag(work, Some(meetings)), Err(TagError::Cycle));
        assert!(matches!(
            g.move_tag(work, None),
            Err(TagError::KindMismatch(_))
        ));
        let urgent = g.resolve_tag_path("urgent", false).unwrap();
        assert!(matches!(
            g.move_tag(urgent, Some(work)),
            Err(TagError::KindMismatch(_))
        ));
    }

    #[test]
    fn complementary_group_maps_both_ways() {
        let mut g = sample();
        let meetings = g.resolve_external_name("Work~Meetings").unwrap();
        assert_eq!(g.complementary_group(meetings, false), None);

        let mirror = g.complementary_group(meetings, true).unwrap();
        assert_eq!(g.external_name(mirror).unwrap(), "Archive~Work~Meetings");
        assert!(g.node(mirror).unwrap().is_archived);
        assert_eq!(g.complementary_group(mirror, false), Some(meetings));
    }

    #[test]
    fn complementary_path_only_for_user_groups() {
        let mut g = sample();
        let meetings = g.resolve_external_name("Work~Meetings").unwrap();
        assert_eq!(g.complementary_path(meetings).unwrap(), "Archive~Work~Meetings");
        let mirror = g.complementary_group(meetings, true).unwrap();
        assert_eq!(g.complementary_path(mirror).unwrap(), "Work~Meetings");
        assert_eq!(g.complementary_path(g.reserved(ReservedTag::Archive)), None);
    }

    #[test]
    fn refresh_is_idempotent_and_quiet() {
        let mut g = sample();
        let rx = g.subscribe();
        g.refresh_structure();
        g.refresh_structure();
        assert!(drain(&rx).is_empty());

        g.create_child(groups(&g), "Garden").unwrap();
        let events = drain(&rx);
        assert!(events.contains(&IndexEvent::GroupListChanged));
        assert_eq!(
            events.iter().filter(|e| matches!(e, IndexEvent::TagAdded(_))).count(),
            1
        );
    }

    #[test]
    fn note_links() {
        let mut g = sample();
        let home = g.resolve_external_name("Home").unwrap();
        let urgent = g.resolve_tag_path("urgent", false).unwrap();
        assert!(g.link_note(home, NoteId(3)));
        assert!(!g.link_note(home, NoteId(3)));
        g.link_note(urgent, NoteId(3));
        assert_eq!(g.group_of_note(NoteId(3)), Some(home));

        let tags = g.unlink_note_everywhere(NoteId(3));
        assert_eq!(tags, vec![home, urgent]);
        assert_eq!(g.notes_of(home).count(), 0);
    }
}
