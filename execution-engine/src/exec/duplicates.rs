//! Duplicate Element Detection
//!
//! Partitions the elements of a recorded action batch into duplicate groups
//! using the weighted similarity scorer, and drives the caller-facing
//! confirmation flow that merges each group under one shared element id.
//!
//! Grouping is single-linkage seeded from the first unassigned element: a
//! later element joins a group when its score against the seed meets the
//! threshold. Members are not re-verified pairwise against each other; the
//! group score is the minimum accepted pair score, a conservative bound.

use crate::error::{ExecResult, ExecutionError};
use crate::exec::similarity::{score, DEFAULT_SIMILARITY_THRESHOLD};
use std::cmp::Ordering;
use testcase_common::{Action, ActionType};
use tracing::{debug, info};
use uuid::Uuid;

/// One element reference inside a duplicate group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// Index of the owning action in the batch
    pub action_index: usize,
    /// Index of the element within that action
    pub element_index: usize,
    /// Owning action's kind, for confirmation UI context
    pub action_type: ActionType,
    /// Owning action's description, for confirmation UI context
    pub description: String,
}

/// A derived, non-persistent set of elements considered the same logical
/// element
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateElementGroup {
    pub members: Vec<GroupMember>,
    /// Minimum pairwise score observed while forming the group
    pub similarity_score: f64,
}

/// Find duplicate element groups across a batch of recorded actions.
///
/// Deterministic for a given input order and threshold; groups are returned
/// most-confident first. Elements without an attribute map are skipped.
pub fn find_duplicate_element_groups(
    actions: &[Action],
    threshold: Option<f64>,
) -> Vec<DuplicateElementGroup> {
    let threshold = threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

    struct Candidate<'a> {
        action_index: usize,
        element_index: usize,
        action_type: ActionType,
        description: &'a str,
        data: &'a crate::exec::similarity::AttributeMap,
    }

    let mut candidates = Vec::new();
    for (action_index, action) in actions.iter().enumerate() {
        for (element_index, element) in action.elements.iter().enumerate() {
            if let Some(data) = element.element_data.as_ref() {
                candidates.push(Candidate {
                    action_index,
                    element_index,
                    action_type: action.action_type,
                    description: &action.description,
                    data,
                });
            }
        }
    }

    let member_of = |c: &Candidate<'_>| GroupMember {
        action_index: c.action_index,
        element_index: c.element_index,
        action_type: c.action_type,
        description: c.description.to_string(),
    };

    let mut assigned = vec![false; candidates.len()];
    let mut groups = Vec::new();

    for i in 0..candidates.len() {
        if assigned[i] {
            continue;
        }

        let mut members = vec![member_of(&candidates[i])];
        let mut group_score = f64::INFINITY;

        for j in (i + 1)..candidates.len() {
            if assigned[j] {
                continue;
            }
            let pair_score = score(Some(candidates[i].data), Some(candidates[j].data));
            if pair_score >= threshold {
                members.push(member_of(&candidates[j]));
                assigned[j] = true;
                group_score = group_score.min(pair_score);
            }
        }

        // a lone element forms no group and stays available
        if members.len() >= 2 {
            assigned[i] = true;
            debug!(
                "duplicate group of {} elements (score {:.3})",
                members.len(),
                group_score
            );
            groups.push(DuplicateElementGroup {
                members,
                similarity_score: group_score,
            });
        }
    }

    groups.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });

    info!(
        "duplicate check: {} group(s) across {} element(s)",
        groups.len(),
        candidates.len()
    );
    groups
}

/// Assign every member of `group` the same element id, mutating only the
/// `element_id` field. Reuses the first existing id among the members, else
/// generates a fresh one. Returns the id applied.
pub fn assign_group_id(actions: &mut [Action], group: &DuplicateElementGroup) -> Uuid {
    let existing = group.members.iter().find_map(|m| {
        actions
            .get(m.action_index)
            .and_then(|a| a.elements.get(m.element_index))
            .and_then(|e| e.element_id)
    });
    let id = existing.unwrap_or_else(Uuid::new_v4);

    for member in &group.members {
        if let Some(element) = actions
            .get_mut(member.action_index)
            .and_then(|a| a.elements.get_mut(member.element_index))
        {
            element.element_id = Some(id);
        }
    }
    id
}

/// Confirmation flow state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    /// No duplicate check pending
    Idle,
    /// Waiting for the caller to accept or skip the group at this index
    AwaitingConfirmation { group_index: usize },
    /// Every group has been decided
    Resolved,
}

/// Explicit state machine for the interactive duplicate-confirmation flow.
///
/// The caller steps through the groups one at a time, accepting or skipping
/// each, then applies the accepted merges in one pass.
#[derive(Debug)]
pub struct DuplicateResolution {
    groups: Vec<DuplicateElementGroup>,
    accepted: Vec<usize>,
    state: ResolutionState,
}

impl DuplicateResolution {
    pub fn new(groups: Vec<DuplicateElementGroup>) -> Self {
        let state = if groups.is_empty() {
            ResolutionState::Resolved
        } else {
            ResolutionState::AwaitingConfirmation { group_index: 0 }
        };
        Self {
            groups,
            accepted: Vec::new(),
            state,
        }
    }

    /// Run the grouper and open a confirmation flow over its output
    pub fn from_actions(actions: &[Action], threshold: Option<f64>) -> Self {
        Self::new(find_duplicate_element_groups(actions, threshold))
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// Group currently awaiting a decision
    pub fn current_group(&self) -> Option<&DuplicateElementGroup> {
        match self.state {
            ResolutionState::AwaitingConfirmation { group_index } => self.groups.get(group_index),
            _ => None,
        }
    }

    /// Accept the current group for merging and advance
    pub fn accept_current(&mut self) -> ExecResult<()> {
        let index = self.pending_index()?;
        self.accepted.push(index);
        self.advance(index);
        Ok(())
    }

    /// Skip the current group and advance
    pub fn skip_current(&mut self) -> ExecResult<()> {
        let index = self.pending_index()?;
        self.advance(index);
        Ok(())
    }

    /// Apply all accepted merges. Only legal once every group is decided.
    /// Returns the number of groups merged.
    pub fn apply(&self, actions: &mut [Action]) -> ExecResult<usize> {
        if self.state != ResolutionState::Resolved {
            return Err(ExecutionError::Duplicates(
                "confirmation flow still has undecided groups".to_string(),
            ));
        }
        for index in &self.accepted {
            assign_group_id(actions, &self.groups[*index]);
        }
        Ok(self.accepted.len())
    }

    fn pending_index(&self) -> ExecResult<usize> {
        match self.state {
            ResolutionState::AwaitingConfirmation { group_index } => Ok(group_index),
            _ => Err(ExecutionError::Duplicates(
                "no group awaiting confirmation".to_string(),
            )),
        }
    }

    fn advance(&mut self, current: usize) {
        let next = current + 1;
        self.state = if next < self.groups.len() {
            ResolutionState::AwaitingConfirmation { group_index: next }
        } else {
            ResolutionState::Resolved
        };
    }
}
