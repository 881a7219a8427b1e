//! Group membership: which nodes sit inside which group rectangles.
//!
//! Containment is purely geometric. A node belongs to a group when its whole
//! bounding box lies inside the group's box (edges inclusive); a group's
//! nesting level is the number of other groups that contain it.

use serde::Serialize;
use std::collections::HashSet;

use crate::canvas::{CanvasColor, CanvasNode, Rect};

/// One group and the non-group nodes it contains.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_node: CanvasNode,
    /// Ids of contained non-group nodes, in document order.
    pub member_nodes: Vec<String>,
    pub bounds: Rect,
    pub nesting_level: usize,
    /// Innermost (smallest) group containing this one.
    pub parent_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_groups: usize,
    pub total_members: usize,
    pub orphan_count: usize,
    pub max_nesting_level: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAnalysisResult {
    pub groups: Vec<GroupInfo>,
    /// Ids of non-group nodes inside at least one group.
    pub member_nodes: Vec<String>,
    /// Ids of non-group nodes outside every group.
    pub orphan_nodes: Vec<String>,
    pub stats: GroupStats,
}

impl GroupAnalysisResult {
    pub fn group(&self, id: &str) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.group_node.id == id)
    }
}

/// Compute group membership and nesting for a set of nodes.
pub fn analyze(nodes: &[CanvasNode]) -> GroupAnalysisResult {
    let (groups, others): (Vec<&CanvasNode>, Vec<&CanvasNode>) =
        nodes.iter().partition(|n| n.is_group());

    let mut infos = Vec::with_capacity(groups.len());
    let mut contained: HashSet<&str> = HashSet::new();

    for group in &groups {
        let bounds = group.bounds();

        let members: Vec<&CanvasNode> = others
            .iter()
            .copied()
            .filter(|n| bounds.contains(&n.bounds()))
            .collect();
        contained.extend(members.iter().map(|n| n.id.as_str()));

        let ancestors: Vec<&&CanvasNode> = groups
            .iter()
            .filter(|other| other.id != group.id && other.bounds().contains(&bounds))
            .collect();
        let parent_group_id = ancestors
            .iter()
            .min_by(|a, b| a.bounds().area().total_cmp(&b.bounds().area()))
            .map(|g| g.id.clone());

        infos.push(GroupInfo {
            group_node: (*group).clone(),
            member_nodes: members.iter().map(|n| n.id.clone()).collect(),
            bounds,
            nesting_level: ancestors.len(),
            parent_group_id,
        });
    }

    let (member_nodes, orphan_nodes): (Vec<String>, Vec<String>) = others
        .iter()
        .map(|n| n.id.clone())
        .partition(|id| contained.contains(id.as_str()));

    let stats = GroupStats {
        total_groups: infos.len(),
        total_members: member_nodes.len(),
        orphan_count: orphan_nodes.len(),
        max_nesting_level: infos.iter().map(|g| g.nesting_level).max().unwrap_or(0),
    };

    GroupAnalysisResult {
        groups: infos,
        member_nodes,
        orphan_nodes,
        stats,
    }
}

/// Nodes eligible for a color-filtered sync.
///
/// A node qualifies by its own color whether or not it sits in a group, so
/// group members need no separate pass. The color of a group itself never
/// pulls its members in. The result keeps document order and holds each id
/// once.
pub fn resolve_by_color(nodes: &[CanvasNode], colors: &[CanvasColor]) -> Vec<CanvasNode> {
    let mut emitted = HashSet::new();
    nodes
        .iter()
        .filter(|node| !node.is_group())
        .filter(|node| node.color.as_ref().is_some_and(|color| colors.contains(color)))
        .filter(|&node| emitted.insert(node.id.as_str()))
        .cloned()
        .collect()
}
