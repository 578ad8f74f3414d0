//! Per-unit action progression: a cursor over the unit type's ordered action steps.

use hexfront_protocol::{ActionKind, Unit};

use crate::rules::{ActionStep, UnitType};

fn permits(step: &ActionStep, chosen: Option<ActionKind>, kind: ActionKind) -> bool {
    let walking = |k: ActionKind| matches!(k, ActionKind::Move | ActionKind::Retreat);
    match chosen {
        Some(chosen) if step.has_alternatives() => {
            chosen == kind || (walking(chosen) && walking(kind))
        }
        _ => match kind {
            ActionKind::Move | ActionKind::Retreat => step.allows_walking(),
            other => step.contains(other),
        },
    }
}

/// First step at or after the cursor that permits `kind`. Skipping earlier steps is allowed.
pub fn step_for(unit: &Unit, utype: &UnitType, kind: ActionKind) -> Option<usize> {
    let cursor = usize::from(unit.progression_step);
    utype
        .action_order
        .iter()
        .enumerate()
        .skip(cursor)
        .find(|(i, step)| {
            let chosen = if *i == cursor {
                unit.chosen_alternative
            } else {
                None
            };
            permits(step, chosen, kind)
        })
        .map(|(i, _)| i)
}

/// Movement available if the unit walks at step `index`.
pub fn walking_budget(unit: &Unit, utype: &UnitType, index: usize) -> i32 {
    let is_retreat = utype
        .action_order
        .get(index)
        .is_some_and(|s| s.contains(ActionKind::Retreat) && !s.contains(ActionKind::Move));
    if index != usize::from(unit.progression_step) && is_retreat {
        utype.retreat_points
    } else {
        unit.distance_left
    }
}

/// Actions the unit may take right now, in a stable order.
pub fn allowed_actions(unit: &Unit, utype: &UnitType) -> Vec<ActionKind> {
    let mut allowed = Vec::new();
    if let Some(i) = step_for(unit, utype, ActionKind::Move) {
        if walking_budget(unit, utype, i) > 0 {
            allowed.push(ActionKind::Move);
        }
    }
    if step_for(unit, utype, ActionKind::Attack).is_some()
        && (utype.move_then_attack || !unit.moved_this_turn)
    {
        allowed.push(ActionKind::Attack);
    }
    if utype.can_capture && step_for(unit, utype, ActionKind::Capture).is_some() {
        allowed.push(ActionKind::Capture);
    }
    allowed
}

/// Moves the cursor to `index`, refreshing movement when entering a retreat step.
pub fn enter_step(unit: &mut Unit, utype: &UnitType, index: usize) {
    if index == usize::from(unit.progression_step) {
        return;
    }
    unit.distance_left = walking_budget(unit, utype, index);
    unit.progression_step = index.min(usize::from(u8::MAX)) as u8;
    unit.chosen_alternative = None;
}

/// Records `kind` as the chosen alternative at the current step.
pub fn choose(unit: &mut Unit, utype: &UnitType, kind: ActionKind) {
    let step = utype.action_order.get(usize::from(unit.progression_step));
    if step.is_some_and(ActionStep::has_alternatives) {
        unit.chosen_alternative = Some(kind);
    }
}

/// Finishes the current step and advances the cursor.
pub fn complete_step(unit: &mut Unit, utype: &UnitType) {
    let next = usize::from(unit.progression_step) + 1;
    let entering_retreat = utype
        .action_order
        .get(next)
        .is_some_and(|s| s.contains(ActionKind::Retreat) && !s.contains(ActionKind::Move));
    unit.progression_step = next.min(usize::from(u8::MAX)) as u8;
    unit.chosen_alternative = None;
    unit.distance_left = if entering_retreat {
        utype.retreat_points
    } else {
        0
    };
}

pub fn is_exhausted(unit: &Unit, utype: &UnitType) -> bool {
    usize::from(unit.progression_step) >= utype.action_order.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::UnitType;
    use hexfront_protocol::{Hex, PlayerId, Shortcut, UnitTypeId};

    fn utype(order: &[&str]) -> UnitType {
        UnitType {
            data_id: "t".to_string(),
            name: "T".to_string(),
            health: 10,
            movement: 3,
            attack_range: 1,
            retreat_points: 1,
            cost: 1,
            can_capture: true,
            move_then_attack: true,
            action_order: order.iter().map(|s| ActionStep::parse(s).unwrap()).collect(),
        }
    }

    fn unit(step: u8, chosen: Option<ActionKind>, distance_left: i32) -> Unit {
        Unit {
            shortcut: Shortcut::new(PlayerId(0), 1),
            coord: Hex::new(0, 0),
            unit_type: UnitTypeId::new(0),
            owner: PlayerId(0),
            health: 10,
            max_health: 10,
            distance_left,
            last_acted_turn: 0,
            last_topped_up_turn: 1,
            progression_step: step,
            chosen_alternative: chosen,
            moved_this_turn: false,
            wound_bonus: 0,
            attack_history: Vec::new(),
        }
    }

    #[test]
    fn allowed_actions_follow_the_cursor() {
        let t = utype(&["move", "attack|capture"]);
        use ActionKind::*;
        let cases = [
            (unit(0, None, 3), vec![Move, Attack, Capture]),
            (unit(0, None, 0), vec![Attack, Capture]),
            (unit(1, None, 0), vec![Attack, Capture]),
            (unit(1, Some(Attack), 0), vec![Attack]),
            (unit(2, None, 0), vec![]),
        ];
        for (u, expected) in cases {
            assert_eq!(allowed_actions(&u, &t), expected, "step {}", u.progression_step);
        }
    }

    #[test]
    fn no_move_after_the_move_step() {
        let t = utype(&["move", "attack"]);
        assert_eq!(step_for(&unit(1, None, 3), &t, ActionKind::Move), None);
        assert_eq!(step_for(&unit(0, None, 3), &t, ActionKind::Attack), Some(1));
    }

    #[test]
    fn attack_then_retreat_refreshes_movement() {
        let t = utype(&["move", "attack", "retreat"]);
        let mut u = unit(0, None, 2);
        let i = step_for(&u, &t, ActionKind::Attack).unwrap();
        enter_step(&mut u, &t, i);
        complete_step(&mut u, &t);
        assert_eq!(u.progression_step, 2);
        assert_eq!(u.distance_left, 1);
        assert_eq!(allowed_actions(&u, &t), vec![ActionKind::Move]);

        complete_step(&mut u, &t);
        assert!(is_exhausted(&u, &t));
        assert!(allowed_actions(&u, &t).is_empty());
    }

    #[test]
    fn choosing_an_alternative_locks_the_step() {
        let t = utype(&["move|capture", "attack"]);
        let mut u = unit(0, None, 3);
        choose(&mut u, &t, ActionKind::Move);
        assert_eq!(step_for(&u, &t, ActionKind::Capture), None);
        assert_eq!(step_for(&u, &t, ActionKind::Move), Some(0));
    }

    #[test]
    fn moved_units_without_move_then_attack_cannot_attack() {
        let mut t = utype(&["move", "attack"]);
        t.move_then_attack = false;
        let mut u = unit(0, None, 1);
        u.moved_this_turn = true;
        assert_eq!(allowed_actions(&u, &t), vec![ActionKind::Move]);
    }
}
