//! Milestone forest for one market side.
//!
//! Milestones live in an arena and reference their parent by [`MilestoneId`].
//! A milestone with a parent stays `Pending` until the parent fires; firing
//! completes the milestone, cancels its siblings, and activates its children.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::trend::TrendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MilestoneId(pub u64);

impl fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Direction in which price must cross the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Crossing {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    /// Waiting for its parent to fire.
    Pending,
    /// Eligible to fire.
    Active,
    Completed,
    Cancelled,
}

/// What happens when a milestone fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MilestoneAction {
    ActivateTrend(TrendConfig),
    /// Close every position on the side and revert to `NEUTRAL`.
    CloseAll,
}

/// Operator request for a new milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub crossing: Crossing,
    pub threshold: Decimal,
    pub action: MilestoneAction,
    pub parent: Option<MilestoneId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub crossing: Crossing,
    pub threshold: Decimal,
    pub action: MilestoneAction,
    pub parent: Option<MilestoneId>,
    pub status: MilestoneStatus,
    pub created_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

impl Milestone {
    #[must_use]
    pub fn is_crossed(&self, price: Decimal) -> bool {
        match self.crossing {
            Crossing::Above => price >= self.threshold,
            Crossing::Below => price <= self.threshold,
        }
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.status == MilestoneStatus::Completed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTree {
    nodes: Vec<Milestone>,
    next_id: u64,
}

impl MilestoneTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a milestone. Root milestones are immediately eligible.
    ///
    /// # Errors
    /// Returns `MilestoneParent` if the parent is unknown, completed, or cancelled.
    pub fn add(&mut self, spec: MilestoneSpec, now: DateTime<Utc>) -> Result<MilestoneId, EngineError> {
        let status = match spec.parent {
            None => MilestoneStatus::Active,
            Some(parent) => match self.get(parent).map(|m| m.status) {
                Some(MilestoneStatus::Pending | MilestoneStatus::Active) => MilestoneStatus::Pending,
                _ => return Err(EngineError::MilestoneParent(parent)),
            },
        };
        let id = MilestoneId(self.next_id);
        self.next_id += 1;
        self.nodes.push(Milestone {
            id,
            crossing: spec.crossing,
            threshold: spec.threshold,
            action: spec.action,
            parent: spec.parent,
            status,
            created_at: now,
            fired_at: None,
        });
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: MilestoneId) -> Option<&Milestone> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    #[must_use]
    pub fn all(&self) -> &[Milestone] {
        &self.nodes
    }

    fn index_of(&self, id: MilestoneId) -> Option<usize> {
        // Ids are handed out in insertion order
        self.nodes.binary_search_by_key(&id, |m| m.id).ok()
    }

    /// Cancels an unfired milestone together with its descendants.
    ///
    /// # Errors
    /// Returns `UnknownMilestone` if the id does not exist or already fired.
    pub fn cancel(&mut self, id: MilestoneId) -> Result<(), EngineError> {
        let idx = self.index_of(id).ok_or(EngineError::UnknownMilestone(id))?;
        if matches!(
            self.nodes[idx].status,
            MilestoneStatus::Completed | MilestoneStatus::Cancelled
        ) {
            return Err(EngineError::UnknownMilestone(id));
        }
        self.cancel_subtree(id);
        Ok(())
    }

    fn cancel_subtree(&mut self, id: MilestoneId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for node in &mut self.nodes {
                if node.id == current
                    && matches!(node.status, MilestoneStatus::Pending | MilestoneStatus::Active)
                {
                    node.status = MilestoneStatus::Cancelled;
                }
                if node.parent == Some(current) {
                    stack.push(node.id);
                }
            }
        }
    }

    /// Eligible milestone that `price` has crossed and whose threshold is
    /// closest to `price`; ties go to the earliest created.
    #[must_use]
    pub fn next_trigger(&self, price: Decimal) -> Option<MilestoneId> {
        self.nodes
            .iter()
            .filter(|m| m.status == MilestoneStatus::Active && m.is_crossed(price))
            .min_by(|a, b| {
                let da = (a.threshold - price).abs();
                let db = (b.threshold - price).abs();
                da.cmp(&db).then(a.id.cmp(&b.id))
            })
            .map(|m| m.id)
    }

    /// Marks `id` fired, cancels its siblings, and activates its children.
    ///
    /// # Errors
    /// Returns `UnknownMilestone` unless `id` is currently eligible.
    pub fn fire(&mut self, id: MilestoneId, now: DateTime<Utc>) -> Result<&Milestone, EngineError> {
        let idx = self.index_of(id).ok_or(EngineError::UnknownMilestone(id))?;
        if self.nodes[idx].status != MilestoneStatus::Active {
            return Err(EngineError::UnknownMilestone(id));
        }
        let parent = self.nodes[idx].parent;
        self.nodes[idx].status = MilestoneStatus::Completed;
        self.nodes[idx].fired_at = Some(now);

        let siblings: Vec<MilestoneId> = self
            .nodes
            .iter()
            .filter(|m| m.id != id && m.parent == parent)
            .filter(|m| matches!(m.status, MilestoneStatus::Pending | MilestoneStatus::Active))
            .map(|m| m.id)
            .collect();
        for sibling in siblings {
            self.cancel_subtree(sibling);
        }

        for node in &mut self.nodes {
            if node.parent == Some(id) && node.status == MilestoneStatus::Pending {
                node.status = MilestoneStatus::Active;
            }
        }
        Ok(&self.nodes[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrendMode;
    use rust_decimal_macros::dec;

    fn spec(crossing: Crossing, threshold: Decimal, parent: Option<MilestoneId>) -> MilestoneSpec {
        MilestoneSpec {
            crossing,
            threshold,
            action: MilestoneAction::ActivateTrend(TrendConfig::default().with_mode(TrendMode::LongOnly)),
            parent,
        }
    }

    #[test]
    fn child_waits_for_parent() {
        let mut tree = MilestoneTree::new();
        let root = tree.add(spec(Crossing::Above, dec!(105), None), Utc::now()).unwrap();
        let child = tree
            .add(spec(Crossing::Above, dec!(110), Some(root)), Utc::now())
            .unwrap();

        // Child is crossed but not eligible yet; root is crossed too
        assert_eq!(tree.next_trigger(dec!(111)), Some(root));
        assert_eq!(tree.get(child).unwrap().status, MilestoneStatus::Pending);

        tree.fire(root, Utc::now()).unwrap();
        assert_eq!(tree.get(child).unwrap().status, MilestoneStatus::Active);
        assert_eq!(tree.next_trigger(dec!(111)), Some(child));
    }

    #[test]
    fn closest_threshold_wins_then_creation_order() {
        let mut tree = MilestoneTree::new();
        let _far = tree.add(spec(Crossing::Below, dec!(99), None), Utc::now()).unwrap();
        let near = tree.add(spec(Crossing::Below, dec!(97), None), Utc::now()).unwrap();
        assert_eq!(tree.next_trigger(dec!(96)), Some(near));

        let mut tied = MilestoneTree::new();
        let first = tied.add(spec(Crossing::Above, dec!(101), None), Utc::now()).unwrap();
        let _second = tied.add(spec(Crossing::Below, dec!(103), None), Utc::now()).unwrap();
        assert_eq!(tied.next_trigger(dec!(102)), Some(first));
    }

    #[test]
    fn firing_cancels_siblings_and_never_refires() {
        let mut tree = MilestoneTree::new();
        let a = tree.add(spec(Crossing::Above, dec!(105), None), Utc::now()).unwrap();
        let b = tree.add(spec(Crossing::Below, dec!(95), None), Utc::now()).unwrap();
        let b_child = tree.add(spec(Crossing::Below, dec!(90), Some(b)), Utc::now()).unwrap();

        tree.fire(a, Utc::now()).unwrap();
        assert_eq!(tree.get(b).unwrap().status, MilestoneStatus::Cancelled);
        assert_eq!(tree.get(b_child).unwrap().status, MilestoneStatus::Cancelled);

        assert!(tree.get(a).unwrap().is_fired());
        assert_eq!(tree.next_trigger(dec!(200)), None);
        assert!(tree.fire(a, Utc::now()).is_err());
    }

    #[test]
    fn parent_must_be_unresolved() {
        let mut tree = MilestoneTree::new();
        let root = tree.add(spec(Crossing::Above, dec!(105), None), Utc::now()).unwrap();
        tree.fire(root, Utc::now()).unwrap();
        let result = tree.add(spec(Crossing::Above, dec!(110), Some(root)), Utc::now());
        assert!(matches!(result, Err(EngineError::MilestoneParent(_))));
        assert!(tree
            .add(spec(Crossing::Above, dec!(110), Some(MilestoneId(99))), Utc::now())
            .is_err());
    }
}
