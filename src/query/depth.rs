//! Translates depth parameters and the previous step's ids into
//! backend-agnostic constraints. Nothing here touches a store.

use crate::model::{IdSet, NodeId, Unit};
use crate::query::plan::DepthSpec;
use std::collections::BTreeMap;

/// Graph-shape restriction applied alongside a step's predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Unconstrained,
    /// Node id is one of the set.
    IdIn(IdSet),
    /// Some direct parent is one of the set.
    ParentsAny(IdSet),
    /// Some ancestor, at any distance, is one of the set.
    AncestorsAny(IdSet),
    /// Some ancestor of the set sits at most `max_distance` edges away.
    AncestorsWithin { ids: IdSet, max_distance: u32 },
    /// `min_depth <= level <= max_depth`.
    DepthSpans(u32),
    MaxDepthAtMost(u32),
    NoParents,
    All(Vec<Constraint>),
}

impl Constraint {
    pub fn and(self, other: Constraint) -> Constraint {
        match (self, other) {
            (Constraint::Unconstrained, c) | (c, Constraint::Unconstrained) => c,
            (Constraint::All(mut items), Constraint::All(more)) => {
                items.extend(more);
                Constraint::All(items)
            }
            (Constraint::All(mut items), c) | (c, Constraint::All(mut items)) => {
                items.push(c);
                Constraint::All(items)
            }
            (a, b) => Constraint::All(vec![a, b]),
        }
    }

    /// Direct check against a Unit, used for path filtering and tests.
    pub fn admits(&self, unit: &Unit) -> bool {
        match self {
            Constraint::Unconstrained => true,
            Constraint::IdIn(ids) => ids.contains(&unit.id),
            Constraint::ParentsAny(ids) => !unit.parent_ids.is_disjoint(ids),
            Constraint::AncestorsAny(ids) => {
                ids.iter().any(|id| unit.ancestor_depths.contains_key(id))
            }
            Constraint::AncestorsWithin { ids, max_distance } => {
                unit.has_ancestor_within(ids, *max_distance)
            }
            Constraint::DepthSpans(level) => unit.min_depth <= *level && *level <= unit.max_depth,
            Constraint::MaxDepthAtMost(level) => unit.max_depth <= *level,
            Constraint::NoParents => unit.is_root(),
            Constraint::All(items) => items.iter().all(|c| c.admits(unit)),
        }
    }
}

/// How a Unit filter step reaches its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    Match(Constraint),
    /// Ancestors of `from` within `distance` edges must be aggregated first;
    /// they then become an id-membership constraint.
    Ascending { from: IdSet, distance: u32 },
}

/// Classifies a Unit filter step. Exact depth wins over relative depth.
pub fn plan_unit_step(depth: DepthSpec, prev: &IdSet, first_step: bool) -> StepPlan {
    if depth.exact > 0 {
        let spans = Constraint::DepthSpans(depth.exact);
        if prev.is_empty() {
            return StepPlan::Match(spans);
        }
        return StepPlan::Match(Constraint::AncestorsAny(prev.clone()).and(spans));
    }
    match depth.relative {
        0 => StepPlan::Match(same_level(prev, first_step)),
        1 if prev.is_empty() => StepPlan::Match(Constraint::MaxDepthAtMost(1)),
        1 => StepPlan::Match(Constraint::ParentsAny(prev.clone())),
        d if d > 1 => {
            let distance = d.unsigned_abs();
            if prev.is_empty() {
                StepPlan::Match(Constraint::MaxDepthAtMost(distance))
            } else {
                StepPlan::Match(Constraint::AncestorsWithin {
                    ids: prev.clone(),
                    max_distance: distance,
                })
            }
        }
        d => {
            if prev.is_empty() {
                StepPlan::Match(Constraint::IdIn(IdSet::new()))
            } else {
                StepPlan::Ascending {
                    from: prev.clone(),
                    distance: d.unsigned_abs(),
                }
            }
        }
    }
}

fn same_level(prev: &IdSet, first_step: bool) -> Constraint {
    match (prev.is_empty(), first_step) {
        (true, true) => Constraint::NoParents,
        (true, false) => Constraint::Unconstrained,
        (false, _) => Constraint::IdIn(prev.clone()),
    }
}

/// Object group steps never traverse depth: they hang off the previous Units,
/// narrow previous object groups, or start unconstrained.
pub fn plan_object_group_step(prev: &IdSet, prev_holds_units: bool) -> Constraint {
    if prev.is_empty() {
        Constraint::Unconstrained
    } else if prev_holds_units {
        Constraint::ParentsAny(prev.clone())
    } else {
        Constraint::IdIn(prev.clone())
    }
}

/// Unions ancestor maps keeping the shortest distance per ancestor, then
/// returns the ancestors within `max_distance`.
pub fn fold_ancestor_depths<'a>(
    maps: impl IntoIterator<Item = &'a BTreeMap<NodeId, u32>>,
    max_distance: u32,
) -> IdSet {
    let mut shortest: BTreeMap<&NodeId, u32> = BTreeMap::new();
    for map in maps {
        for (id, distance) in map {
            shortest
                .entry(id)
                .and_modify(|current| *current = (*current).min(*distance))
                .or_insert(*distance);
        }
    }
    shortest
        .into_iter()
        .filter(|(_, distance)| *distance <= max_distance)
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, id_set};

    fn depth(exact: u32, relative: i32) -> DepthSpec {
        DepthSpec { exact, relative }
    }

    #[test]
    fn same_level_steps_narrow_or_start_from_roots() {
        let prev = id_set(["a", "b"]);
        assert_eq!(
            plan_unit_step(depth(0, 0), &prev, false),
            StepPlan::Match(Constraint::IdIn(prev.clone()))
        );
        assert_eq!(
            plan_unit_step(depth(0, 0), &IdSet::new(), true),
            StepPlan::Match(Constraint::NoParents)
        );
        assert_eq!(
            plan_unit_step(depth(0, 0), &IdSet::new(), false),
            StepPlan::Match(Constraint::Unconstrained)
        );
    }

    #[test]
    fn descending_steps() {
        let prev = id_set(["a"]);
        assert_eq!(
            plan_unit_step(depth(0, 1), &prev, false),
            StepPlan::Match(Constraint::ParentsAny(prev.clone()))
        );
        assert_eq!(
            plan_unit_step(depth(0, 1), &IdSet::new(), true),
            StepPlan::Match(Constraint::MaxDepthAtMost(1))
        );
        assert_eq!(
            plan_unit_step(depth(0, 3), &prev, false),
            StepPlan::Match(Constraint::AncestorsWithin {
                ids: prev.clone(),
                max_distance: 3
            })
        );
        assert_eq!(
            plan_unit_step(depth(2, 5), &prev, false),
            StepPlan::Match(Constraint::All(vec![
                Constraint::AncestorsAny(prev.clone()),
                Constraint::DepthSpans(2)
            ]))
        );
    }

    #[test]
    fn ascending_steps_need_aggregation() {
        let prev = id_set(["c"]);
        assert_eq!(
            plan_unit_step(depth(0, -2), &prev, false),
            StepPlan::Ascending {
                from: prev.clone(),
                distance: 2
            }
        );
        assert_eq!(
            plan_unit_step(depth(0, -1), &IdSet::new(), true),
            StepPlan::Match(Constraint::IdIn(IdSet::new()))
        );
    }

    #[test]
    fn object_group_steps_follow_previous_kind() {
        let prev = id_set(["x"]);
        assert_eq!(
            plan_object_group_step(&prev, true),
            Constraint::ParentsAny(prev.clone())
        );
        assert_eq!(
            plan_object_group_step(&prev, false),
            Constraint::IdIn(prev.clone())
        );
        assert_eq!(
            plan_object_group_step(&IdSet::new(), true),
            Constraint::Unconstrained
        );
    }

    #[test]
    fn aggregation_keeps_shortest_distance() {
        let first: BTreeMap<NodeId, u32> = [
            (NodeId::from("p"), 1),
            (NodeId::from("g"), 2),
            (NodeId::from("r"), 3),
        ]
        .into_iter()
        .collect();
        let second: BTreeMap<NodeId, u32> = [(NodeId::from("g"), 1), (NodeId::from("r"), 4)]
            .into_iter()
            .collect();
        assert_eq!(fold_ancestor_depths([&first, &second], 1), id_set(["g", "p"]));
        assert_eq!(
            fold_ancestor_depths([&first, &second], 3),
            id_set(["g", "p", "r"])
        );
    }

    #[test]
    fn exact_depth_admits_only_spanning_units() {
        let root = Unit::new("r", Document::new());
        let mut child = Unit::new("c", Document::new());
        child.link_under(&root).expect("link");
        let constraint = Constraint::AncestorsAny(id_set(["r"])).and(Constraint::DepthSpans(2));
        assert!(constraint.admits(&child));
        assert!(!constraint.admits(&root));
        assert!(!Constraint::DepthSpans(3).admits(&child));
    }
}
