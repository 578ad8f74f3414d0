use std::collections::{BTreeMap, HashMap};

use hexfront_protocol::{ActionKind, DataId, TerrainId, UnitTypeId};
use serde::Deserialize;

use crate::rules::RulesError;

/// Immutable lookup tables compiled from the rules data. Loaded once, shared by reference.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub version: u32,
    /// Extra damage per point of accumulated wound bonus.
    pub wound_damage: i32,
    pub terrains: Vec<TerrainType>,
    pub unit_types: Vec<UnitType>,

    pub terrain_ids: HashMap<DataId, TerrainId>,
    pub unit_type_ids: HashMap<DataId, UnitTypeId>,

    /// Dense `terrain * unit_types.len() + unit` table.
    pub(crate) movement: Vec<MovementCost>,
    pub(crate) combat: HashMap<(UnitTypeId, UnitTypeId), CombatParams>,
    pub(crate) rules_hash: u64,
}

impl CompiledRules {
    /// Ids must come from these rules; worlds loaded from outside go through
    /// `World::from_snapshot_checked` first.
    pub fn terrain(&self, id: TerrainId) -> &TerrainType {
        &self.terrains[id.raw as usize]
    }

    pub fn unit_type(&self, id: UnitTypeId) -> &UnitType {
        &self.unit_types[id.raw as usize]
    }

    pub fn try_terrain(&self, id: TerrainId) -> Option<&TerrainType> {
        self.terrains.get(id.raw as usize)
    }

    pub fn try_unit_type(&self, id: UnitTypeId) -> Option<&UnitType> {
        self.unit_types.get(id.raw as usize)
    }

    pub fn terrain_id(&self, data_id: &str) -> Option<TerrainId> {
        self.terrain_ids.get(data_id).copied()
    }

    pub fn unit_type_id(&self, data_id: &str) -> Option<UnitTypeId> {
        self.unit_type_ids.get(data_id).copied()
    }

    /// Cost for `unit` to enter a hex of `terrain`. Every pair is present after loading.
    pub fn movement_cost(&self, terrain: TerrainId, unit: UnitTypeId) -> MovementCost {
        let index = terrain.raw as usize * self.unit_types.len() + unit.raw as usize;
        self.movement
            .get(index)
            .copied()
            .unwrap_or(MovementCost::Impassable)
    }

    /// Damage table for `attacker` hitting `defender`; `None` means the matchup cannot attack.
    pub fn combat_params(&self, attacker: UnitTypeId, defender: UnitTypeId) -> Option<&CombatParams> {
        self.combat.get(&(attacker, defender))
    }

    /// FNV-1a over the source documents, for detecting peers on different rules.
    pub fn rules_hash(&self) -> u64 {
        self.rules_hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementCost {
    Passable(i32),
    Impassable,
}

impl MovementCost {
    pub fn cost(self) -> Option<i32> {
        match self {
            MovementCost::Passable(cost) => Some(cost),
            MovementCost::Impassable => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTerrainType {
    pub name: String,
    /// Default cost for every unit; `~` makes the terrain impassable.
    #[serde(default = "default_move_cost")]
    pub move_cost: Option<i32>,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub income: i32,
    #[serde(default = "default_capture_turns")]
    pub capture_turns: u32,
    #[serde(default)]
    pub heal: i32,
    #[serde(default)]
    pub buildable_units: Vec<String>,
}

impl RawTerrainType {
    pub fn compile(
        self,
        data_id: &str,
        unit_ids: &HashMap<DataId, UnitTypeId>,
    ) -> Result<TerrainType, RulesError> {
        if let Some(cost) = self.move_cost {
            check_cost(data_id, cost)?;
        }
        let buildable_units = self
            .buildable_units
            .into_iter()
            .map(|id| {
                unit_ids
                    .get(&id)
                    .copied()
                    .ok_or(RulesError::MissingId(id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !buildable_units.is_empty() && !self.building {
            return Err(RulesError::Invalid(format!(
                "terrain `{data_id}` lists buildable units but is not a building"
            )));
        }
        Ok(TerrainType {
            data_id: data_id.to_string(),
            name: self.name,
            move_cost: self.move_cost,
            building: self.building,
            income: self.income.max(0),
            capture_turns: self.capture_turns.max(1),
            heal: self.heal.max(0),
            buildable_units,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TerrainType {
    pub data_id: DataId,
    pub name: String,
    pub move_cost: Option<i32>,
    pub building: bool,
    pub income: i32,
    pub capture_turns: u32,
    pub heal: i32,
    pub buildable_units: Vec<UnitTypeId>,
}

impl TerrainType {
    pub fn can_build(&self, unit: UnitTypeId) -> bool {
        self.buildable_units.contains(&unit)
    }
}

fn default_move_cost() -> Option<i32> {
    Some(1)
}

fn default_capture_turns() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUnitType {
    pub name: String,
    pub health: i32,
    pub movement: i32,
    #[serde(default = "default_attack_range")]
    pub attack_range: i32,
    #[serde(default)]
    pub retreat_points: i32,
    pub cost: i32,
    #[serde(default)]
    pub can_capture: bool,
    #[serde(default = "default_true")]
    pub move_then_attack: bool,
    #[serde(default)]
    pub action_order: Vec<String>,
    /// Per-terrain overrides of the terrain's default move cost.
    #[serde(default)]
    pub move_costs: BTreeMap<String, Option<i32>>,
}

impl RawUnitType {
    pub fn compile(self, data_id: &str) -> Result<UnitType, RulesError> {
        if self.health <= 0 || self.movement < 0 || self.attack_range < 0 || self.cost < 0 {
            return Err(RulesError::Invalid(format!(
                "unit `{data_id}` has negative stats or no health"
            )));
        }
        let action_order = if self.action_order.is_empty() {
            UnitType::default_action_order()
        } else {
            self.action_order
                .iter()
                .map(|step| ActionStep::parse(step))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RulesError::Invalid(format!("unit `{data_id}`: {e}")))?
        };
        Ok(UnitType {
            data_id: data_id.to_string(),
            name: self.name,
            health: self.health,
            movement: self.movement,
            attack_range: self.attack_range,
            retreat_points: self.retreat_points.max(0),
            cost: self.cost,
            can_capture: self.can_capture,
            move_then_attack: self.move_then_attack,
            action_order,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnitType {
    pub data_id: DataId,
    pub name: String,
    pub health: i32,
    pub movement: i32,
    pub attack_range: i32,
    pub retreat_points: i32,
    pub cost: i32,
    pub can_capture: bool,
    pub move_then_attack: bool,
    pub action_order: Vec<ActionStep>,
}

impl UnitType {
    pub fn default_action_order() -> Vec<ActionStep> {
        vec![
            ActionStep(vec![ActionKind::Move]),
            ActionStep(vec![ActionKind::Attack, ActionKind::Capture]),
        ]
    }
}

fn default_attack_range() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

/// One step of an action order; several kinds means mutually exclusive alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionStep(pub Vec<ActionKind>);

impl ActionStep {
    /// Parses `"attack|capture"` style entries.
    pub fn parse(step: &str) -> Result<Self, String> {
        let kinds = step
            .split('|')
            .map(str::parse::<ActionKind>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(kinds))
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn has_alternatives(&self) -> bool {
        self.0.len() > 1
    }

    /// Whether this step lets the unit move (plain moves and retreats both walk).
    pub fn allows_walking(&self) -> bool {
        self.contains(ActionKind::Move) || self.contains(ActionKind::Retreat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DamageBucket {
    pub min: i32,
    pub max: i32,
    pub weight: u32,
}

/// Damage distribution for one attacker/defender matchup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatParams {
    pub buckets: Vec<DamageBucket>,
}

impl CombatParams {
    pub fn base_damage_range(&self) -> (i32, i32) {
        let min = self.buckets.iter().map(|b| b.min).min().unwrap_or(0);
        let max = self.buckets.iter().map(|b| b.max).max().unwrap_or(0);
        (min, max)
    }

    pub fn total_weight(&self) -> u32 {
        self.buckets.iter().map(|b| b.weight).sum()
    }

    /// Probability of each bucket, in declaration order.
    pub fn probabilities(&self) -> Vec<f64> {
        let total = f64::from(self.total_weight());
        self.buckets
            .iter()
            .map(|b| f64::from(b.weight) / total)
            .collect()
    }

    pub fn expected_damage(&self) -> f64 {
        self.buckets
            .iter()
            .zip(self.probabilities())
            .map(|(b, p)| p * f64::from(b.min + b.max) / 2.0)
            .sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCombatParams {
    pub buckets: Vec<DamageBucket>,
}

impl RawCombatParams {
    pub fn compile(self, matchup: &str) -> Result<CombatParams, RulesError> {
        if self.buckets.is_empty() {
            return Err(RulesError::Invalid(format!("matchup `{matchup}` has no damage buckets")));
        }
        for bucket in &self.buckets {
            if bucket.weight == 0 || bucket.min < 0 || bucket.min > bucket.max {
                return Err(RulesError::Invalid(format!(
                    "matchup `{matchup}` has a malformed bucket {bucket:?}"
                )));
            }
        }
        Ok(CombatParams {
            buckets: self.buckets,
        })
    }
}

pub(crate) fn check_cost(context: &str, cost: i32) -> Result<(), RulesError> {
    if cost < 1 {
        return Err(RulesError::Invalid(format!(
            "`{context}` has move cost {cost}, expected at least 1"
        )));
    }
    Ok(())
}
