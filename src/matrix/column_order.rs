use super::model::GradeStructure;

/// Display order of UE column groups. Purely presentational: data is always
/// keyed by id, never by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOrder {
    ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Moved,
    Unchanged,
    UnknownId,
}

impl ColumnOrder {
    /// Keeps the saved ids that still exist, in saved order, then appends the
    /// structure's remaining UEs in structure order.
    pub fn reconciled(structure: &GradeStructure, saved: &[String]) -> Self {
        let mut ids: Vec<String> = Vec::with_capacity(structure.ues.len());
        for id in saved {
            if structure.ue(id).is_some() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        for ue in &structure.ues {
            if !ids.contains(&ue.id) {
                ids.push(ue.id.clone());
            }
        }
        Self { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// List move: the source is taken out and reinserted at the target's
    /// index, so everything in between shifts by one.
    pub fn reorder(&mut self, source_id: &str, target_id: &str) -> ReorderOutcome {
        let Some(from) = self.ids.iter().position(|id| id == source_id) else {
            return ReorderOutcome::UnknownId;
        };
        let Some(to) = self.ids.iter().position(|id| id == target_id) else {
            return ReorderOutcome::UnknownId;
        };
        if from == to {
            return ReorderOutcome::Unchanged;
        }
        let moved = self.ids.remove(from);
        self.ids.insert(to, moved);
        ReorderOutcome::Moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::model::fixtures::structure;
    use crate::matrix::model::Ue;

    fn order(ids: &[&str]) -> ColumnOrder {
        ColumnOrder {
            ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn forward_move_shifts_intermediates_left() {
        let mut o = order(&["A", "B", "C", "D"]);
        assert_eq!(o.reorder("A", "C"), ReorderOutcome::Moved);
        assert_eq!(o.ids(), ["B", "C", "A", "D"]);
    }

    #[test]
    fn backward_move_shifts_intermediates_right() {
        let mut o = order(&["A", "B", "C", "D"]);
        assert_eq!(o.reorder("D", "A"), ReorderOutcome::Moved);
        assert_eq!(o.ids(), ["D", "A", "B", "C"]);
    }

    #[test]
    fn adjacent_move_is_not_a_swap_of_distant_items() {
        let mut o = order(&["A", "B", "C", "D"]);
        o.reorder("B", "C");
        assert_eq!(o.ids(), ["A", "C", "B", "D"]);
    }

    #[test]
    fn unknown_or_same_ids_leave_order() {
        let mut o = order(&["A", "B"]);
        assert_eq!(o.reorder("A", "A"), ReorderOutcome::Unchanged);
        assert_eq!(o.reorder("Z", "A"), ReorderOutcome::UnknownId);
        assert_eq!(o.reorder("A", "Z"), ReorderOutcome::UnknownId);
        assert_eq!(o.ids(), ["A", "B"]);
    }

    #[test]
    fn reconcile_drops_vanished_and_appends_new() {
        let mut s = structure();
        s.ues.push(Ue {
            id: "ue-c".into(),
            code: "C".into(),
            credit: 2.0,
            ecs: Vec::new(),
        });
        let saved = vec!["ue-b".to_string(), "gone".to_string(), "ue-a".to_string()];
        let o = ColumnOrder::reconciled(&s, &saved);
        assert_eq!(o.ids(), ["ue-b", "ue-a", "ue-c"]);
        assert_eq!(ColumnOrder::reconciled(&s, &[]).ids(), ["ue-a", "ue-b", "ue-c"]);
    }
}
