//! Row geometry for the panel and the scroll placement derived from a
//! resolved scroll target.

use std::collections::{HashMap, HashSet};
use tabdock_core::{GroupId, Snapshot, TabId};
use tracing::debug;

use crate::scheduler::{ScrollKind, ScrollTarget, Update};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutMetrics {
    pub group_header: u32,
    pub tab_row: u32,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            group_header: 32,
            tab_row: 30,
        }
    }
}

/// Collapse flags for groups. Owned by the panel, never sent to the agent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupState {
    collapsed: HashSet<GroupId>,
}

impl GroupState {
    pub fn is_collapsed(&self, group: GroupId) -> bool {
        self.collapsed.contains(&group)
    }

    /// Returns the new collapsed value.
    pub fn toggle(&mut self, group: GroupId) -> bool {
        if self.collapsed.remove(&group) {
            false
        } else {
            self.collapsed.insert(group);
            true
        }
    }

    /// Returns true when the group was collapsed before.
    pub fn expand(&mut self, group: GroupId) -> bool {
        self.collapsed.remove(&group)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Row {
    GroupHeader {
        group_id: GroupId,
        y: u32,
        collapsed: bool,
        tab_count: usize,
    },
    Tab {
        tab_id: TabId,
        group_id: Option<GroupId>,
        y: u32,
        visible: bool,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PanelLayout {
    rows: Vec<Row>,
    height: u32,
}

impl PanelLayout {
    /// Tabs keep agent order. A group's section opens at its first tab and
    /// pulls in every member, so a group renders as one block even when the
    /// agent interleaves its tabs with others.
    pub fn build(snapshot: &Snapshot, groups: &GroupState, metrics: LayoutMetrics) -> Self {
        let mut members: HashMap<GroupId, Vec<TabId>> = HashMap::new();
        for tab in &snapshot.tabs {
            if let Some(group_id) = snapshot.effective_group(tab) {
                members.entry(group_id).or_default().push(tab.id);
            }
        }

        let mut rows = Vec::with_capacity(snapshot.tabs.len() + members.len());
        let mut opened = HashSet::new();
        let mut y = 0u32;
        for tab in &snapshot.tabs {
            let Some(group_id) = snapshot.effective_group(tab) else {
                rows.push(Row::Tab {
                    tab_id: tab.id,
                    group_id: None,
                    y,
                    visible: true,
                });
                y += metrics.tab_row;
                continue;
            };
            if !opened.insert(group_id) {
                continue;
            }
            let section = members.get(&group_id).map(Vec::as_slice).unwrap_or(&[]);
            let collapsed = groups.is_collapsed(group_id);
            rows.push(Row::GroupHeader {
                group_id,
                y,
                collapsed,
                tab_count: section.len(),
            });
            y += metrics.group_header;
            for tab_id in section {
                rows.push(Row::Tab {
                    tab_id: *tab_id,
                    group_id: Some(group_id),
                    y,
                    visible: !collapsed,
                });
                if !collapsed {
                    y += metrics.tab_row;
                }
            }
        }
        Self { rows, height: y }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tab_y(&self, id: TabId) -> Option<u32> {
        self.rows.iter().find_map(|row| match row {
            Row::Tab { tab_id, y, .. } if *tab_id == id => Some(*y),
            _ => None,
        })
    }

    pub fn group_y(&self, id: GroupId) -> Option<u32> {
        self.rows.iter().find_map(|row| match row {
            Row::GroupHeader { group_id, y, .. } if *group_id == id => Some(*y),
            _ => None,
        })
    }

    pub fn position(&self, resolved: Resolved) -> Option<u32> {
        match resolved {
            Resolved::Tab(id) => self.tab_y(id),
            Resolved::GroupHeader(id) => self.group_y(id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolved {
    Tab(TabId),
    GroupHeader(GroupId),
}

/// Maps a scroll target onto a row in `snapshot`. Any group the row sits in
/// is expanded first so the position is real.
pub fn resolve_target(
    target: Option<ScrollTarget>,
    snapshot: &Snapshot,
    groups: &mut GroupState,
) -> Option<Resolved> {
    let target = target?;
    let tab = match target.kind {
        ScrollKind::ActiveTab => snapshot.active_tab(),
        ScrollKind::Tab(id) => snapshot.tab(id),
        ScrollKind::Group(id) => {
            snapshot.group(id)?;
            if groups.expand(id) {
                debug!(event = "group_expanded", group_id = id);
            }
            return Some(match snapshot.active_tab_in_group(id) {
                Some(tab) => Resolved::Tab(tab.id),
                None => Resolved::GroupHeader(id),
            });
        }
    }?;
    if let Some(group_id) = snapshot.effective_group(tab) {
        if groups.expand(group_id) {
            debug!(event = "group_expanded", group_id = group_id);
        }
    }
    Some(Resolved::Tab(tab.id))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollPlacement {
    /// Keep whatever offset the panel currently has.
    Preserve,
    Center {
        target: Resolved,
        y: u32,
        offset: u32,
    },
}

impl ScrollPlacement {
    pub fn center(target: Resolved, layout: &PanelLayout, viewport_height: u32) -> Self {
        match layout.position(target) {
            Some(y) => ScrollPlacement::Center {
                target,
                y,
                offset: y.saturating_sub(viewport_height / 2),
            },
            None => ScrollPlacement::Preserve,
        }
    }
}

/// Everything the render collaborator needs for one apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderFrame {
    pub snapshot: Snapshot,
    pub layout: PanelLayout,
    pub scroll: ScrollPlacement,
    pub forced: bool,
    pub tab_count: usize,
}

impl RenderFrame {
    pub fn compose(
        update: Update,
        groups: &mut GroupState,
        metrics: LayoutMetrics,
        viewport_height: u32,
    ) -> Self {
        let Update {
            snapshot,
            scroll,
            forced,
        } = update;
        let resolved = resolve_target(scroll, &snapshot, groups);
        if scroll.is_some() && resolved.is_none() {
            debug!(event = "scroll_target_unresolved", target = ?scroll.map(|t| t.kind));
        }
        let layout = PanelLayout::build(&snapshot, groups, metrics);
        let scroll = match resolved {
            Some(target) => ScrollPlacement::center(target, &layout, viewport_height),
            None => ScrollPlacement::Preserve,
        };
        let tab_count = snapshot.tabs.len();
        Self {
            snapshot,
            layout,
            scroll,
            forced,
            tab_count,
        }
    }

    /// Same snapshot laid out again after a local collapse change.
    pub fn relayout(&self, groups: &GroupState, metrics: LayoutMetrics) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            layout: PanelLayout::build(&self.snapshot, groups, metrics),
            scroll: ScrollPlacement::Preserve,
            forced: false,
            tab_count: self.tab_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tabdock_core::{Group, GroupColor, Tab};

    fn tab(id: TabId, group_id: Option<GroupId>, active: bool) -> Tab {
        Tab {
            id,
            title: format!("tab {id}"),
            fav_icon: None,
            active,
            group_id,
            pinned: false,
        }
    }

    fn group(id: GroupId) -> Group {
        Group {
            id,
            title: format!("group {id}"),
            color: GroupColor::Blue,
        }
    }

    fn target(kind: ScrollKind) -> Option<ScrollTarget> {
        Some(ScrollTarget {
            kind,
            issued_at: Instant::now(),
        })
    }

    /// 1 loose, 2 and 4 in group 9, 3 loose between them, 5 in a group the
    /// agent did not send.
    fn mixed() -> Snapshot {
        Snapshot {
            tabs: vec![
                tab(1, None, false),
                tab(2, Some(9), false),
                tab(3, None, false),
                tab(4, Some(9), true),
                tab(5, Some(77), false),
            ],
            groups: vec![group(9)],
        }
    }

    #[test]
    fn group_section_collects_members_at_first_appearance() {
        let layout = PanelLayout::build(&mixed(), &GroupState::default(), LayoutMetrics::default());
        assert_eq!(
            layout.rows(),
            &[
                Row::Tab { tab_id: 1, group_id: None, y: 0, visible: true },
                Row::GroupHeader { group_id: 9, y: 30, collapsed: false, tab_count: 2 },
                Row::Tab { tab_id: 2, group_id: Some(9), y: 62, visible: true },
                Row::Tab { tab_id: 4, group_id: Some(9), y: 92, visible: true },
                Row::Tab { tab_id: 3, group_id: None, y: 122, visible: true },
                Row::Tab { tab_id: 5, group_id: None, y: 152, visible: true },
            ]
        );
        assert_eq!(layout.height(), 182);
    }

    #[test]
    fn collapsed_group_rows_take_no_height() {
        let mut groups = GroupState::default();
        assert!(groups.toggle(9));
        let layout = PanelLayout::build(&mixed(), &groups, LayoutMetrics::default());
        assert_eq!(layout.group_y(9), Some(30));
        assert_eq!(layout.tab_y(2), Some(62));
        assert_eq!(layout.tab_y(4), Some(62));
        assert_eq!(layout.tab_y(3), Some(62));
        assert_eq!(layout.height(), 122);
    }

    #[test]
    fn group_target_expands_collapsed_group_before_positioning() {
        let snapshot = mixed();
        let mut groups = GroupState::default();
        groups.toggle(9);

        let resolved = resolve_target(target(ScrollKind::Group(9)), &snapshot, &mut groups);
        assert_eq!(resolved, Some(Resolved::Tab(4)));
        assert!(!groups.is_collapsed(9));

        let layout = PanelLayout::build(&snapshot, &groups, LayoutMetrics::default());
        assert_eq!(layout.tab_y(4), Some(92));
    }

    #[test]
    fn group_without_active_tab_resolves_to_header() {
        let mut snapshot = mixed();
        snapshot.tabs[3].active = false;
        let mut groups = GroupState::default();
        let resolved = resolve_target(target(ScrollKind::Group(9)), &snapshot, &mut groups);
        assert_eq!(resolved, Some(Resolved::GroupHeader(9)));
    }

    #[test]
    fn active_tab_inside_collapsed_group_is_revealed() {
        let snapshot = mixed();
        let mut groups = GroupState::default();
        groups.toggle(9);
        let resolved = resolve_target(target(ScrollKind::ActiveTab), &snapshot, &mut groups);
        assert_eq!(resolved, Some(Resolved::Tab(4)));
        assert!(!groups.is_collapsed(9));
    }

    #[test]
    fn unknown_targets_resolve_to_nothing() {
        let snapshot = mixed();
        let mut groups = GroupState::default();
        assert_eq!(resolve_target(None, &snapshot, &mut groups), None);
        assert_eq!(
            resolve_target(target(ScrollKind::Tab(404)), &snapshot, &mut groups),
            None
        );
        assert_eq!(
            resolve_target(target(ScrollKind::Group(77)), &snapshot, &mut groups),
            None
        );
    }

    #[test]
    fn compose_centres_target_and_clamps_at_top() {
        let mut groups = GroupState::default();
        let frame = RenderFrame::compose(
            Update {
                snapshot: mixed(),
                scroll: target(ScrollKind::Tab(5)),
                forced: true,
            },
            &mut groups,
            LayoutMetrics::default(),
            200,
        );
        assert_eq!(
            frame.scroll,
            ScrollPlacement::Center {
                target: Resolved::Tab(5),
                y: 152,
                offset: 52
            }
        );
        assert!(frame.forced);
        assert_eq!(frame.tab_count, 5);

        let frame = RenderFrame::compose(
            Update {
                snapshot: mixed(),
                scroll: target(ScrollKind::Tab(1)),
                forced: false,
            },
            &mut groups,
            LayoutMetrics::default(),
            200,
        );
        assert_eq!(
            frame.scroll,
            ScrollPlacement::Center {
                target: Resolved::Tab(1),
                y: 0,
                offset: 0
            }
        );
    }

    #[test]
    fn compose_without_target_preserves_offset() {
        let mut groups = GroupState::default();
        let frame = RenderFrame::compose(
            Update {
                snapshot: mixed(),
                scroll: target(ScrollKind::Tab(404)),
                forced: false,
            },
            &mut groups,
            LayoutMetrics::default(),
            600,
        );
        assert_eq!(frame.scroll, ScrollPlacement::Preserve);
    }

    #[test]
    fn relayout_follows_collapse_changes() {
        let mut groups = GroupState::default();
        let frame = RenderFrame::compose(
            Update {
                snapshot: mixed(),
                scroll: None,
                forced: false,
            },
            &mut groups,
            LayoutMetrics::default(),
            600,
        );
        groups.toggle(9);
        let collapsed = frame.relayout(&groups, LayoutMetrics::default());
        assert_eq!(collapsed.layout.height(), 122);
        assert_eq!(collapsed.scroll, ScrollPlacement::Preserve);
        assert_eq!(collapsed.snapshot, frame.snapshot);
    }
}
