use std::collections::{BTreeMap, HashMap};

use hexfront_protocol::wire::hash_bytes_fnv1a64;
use hexfront_protocol::{TerrainId, UnitTypeId};
use serde::Deserialize;
use thiserror::Error;

use crate::rules::types::check_cost;
use crate::rules::{CompiledRules, MovementCost, RawCombatParams, RawTerrainType, RawUnitType};

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing referenced id: {0}")]
    MissingId(String),
    #[error("invalid rules: {0}")]
    Invalid(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub enum RulesSource<'a> {
    Embedded,
    Path(String),
    Bytes {
        terrain: &'a [u8],
        units: &'a [u8],
        combat: &'a [u8],
    },
}

/// Matchup table plus global combat settings.
#[derive(Debug, Deserialize)]
struct RawCombat {
    version: u32,
    #[serde(default)]
    wound_damage: i32,
    /// attacker -> defender -> params
    matchups: BTreeMap<String, BTreeMap<String, RawCombatParams>>,
}

#[derive(Debug, Deserialize)]
struct RawRules {
    terrains: BTreeMap<String, RawTerrainType>,
    units: BTreeMap<String, RawUnitType>,
    combat: RawCombat,
}

pub fn load_rules(source: RulesSource<'_>) -> Result<CompiledRules, RulesError> {
    let (raw, rules_hash) = match source {
        RulesSource::Embedded => {
            let terrain_yaml = include_str!("../../data/base/terrain.yaml");
            let units_yaml = include_str!("../../data/base/units.yaml");
            let combat_yaml = include_str!("../../data/base/combat.yaml");
            parse_raw_rules(terrain_yaml, units_yaml, combat_yaml)?
        }
        RulesSource::Path(path) => {
            let terrain_yaml = std::fs::read_to_string(format!("{path}/terrain.yaml"))?;
            let units_yaml = std::fs::read_to_string(format!("{path}/units.yaml"))?;
            let combat_yaml = std::fs::read_to_string(format!("{path}/combat.yaml"))?;
            parse_raw_rules(&terrain_yaml, &units_yaml, &combat_yaml)?
        }
        RulesSource::Bytes {
            terrain,
            units,
            combat,
        } => parse_raw_rules(
            std::str::from_utf8(terrain)?,
            std::str::from_utf8(units)?,
            std::str::from_utf8(combat)?,
        )?,
    };

    compile_rules(raw, rules_hash)
}

fn parse_raw_rules(
    terrain_yaml: &str,
    units_yaml: &str,
    combat_yaml: &str,
) -> Result<(RawRules, u64), RulesError> {
    let terrains = serde_yaml::from_str(terrain_yaml)?;
    let units = serde_yaml::from_str(units_yaml)?;
    let combat = serde_yaml::from_str(combat_yaml)?;

    let mut bytes = Vec::with_capacity(terrain_yaml.len() + units_yaml.len() + combat_yaml.len());
    for doc in [terrain_yaml, units_yaml, combat_yaml] {
        bytes.extend_from_slice(doc.as_bytes());
        bytes.push(0);
    }

    Ok((
        RawRules {
            terrains,
            units,
            combat,
        },
        hash_bytes_fnv1a64(&bytes),
    ))
}

fn compile_rules(raw: RawRules, rules_hash: u64) -> Result<CompiledRules, RulesError> {
    if raw.terrains.is_empty() || raw.units.is_empty() {
        return Err(RulesError::Invalid(
            "rules need at least one terrain and one unit type".to_string(),
        ));
    }
    if raw.terrains.len() > usize::from(u16::MAX) || raw.units.len() > usize::from(u16::MAX) {
        return Err(RulesError::Invalid("too many rule entries".to_string()));
    }

    let terrain_ids = raw
        .terrains
        .keys()
        .enumerate()
        .map(|(i, k)| (k.clone(), TerrainId::new(i as u16)))
        .collect::<HashMap<_, _>>();
    let unit_ids = raw
        .units
        .keys()
        .enumerate()
        .map(|(i, k)| (k.clone(), UnitTypeId::new(i as u16)))
        .collect::<HashMap<_, _>>();

    // Dense movement table: terrain default, then per-unit overrides.
    let mut movement = Vec::with_capacity(raw.terrains.len() * raw.units.len());
    for (terrain_key, terrain) in &raw.terrains {
        for (unit_key, unit) in &raw.units {
            let cost = match unit.move_costs.get(terrain_key) {
                Some(over) => *over,
                None => terrain.move_cost,
            };
            movement.push(match cost {
                Some(cost) => {
                    check_cost(&format!("{terrain_key}:{unit_key}"), cost)?;
                    MovementCost::Passable(cost)
                }
                None => MovementCost::Impassable,
            });
        }
    }
    for (unit_key, unit) in &raw.units {
        if let Some(unknown) = unit.move_costs.keys().find(|t| !terrain_ids.contains_key(*t)) {
            return Err(RulesError::MissingId(format!("{unit_key}.move_costs.{unknown}")));
        }
    }

    let mut combat = HashMap::new();
    for (attacker_key, defenders) in raw.combat.matchups {
        let attacker = *unit_ids
            .get(&attacker_key)
            .ok_or_else(|| RulesError::MissingId(attacker_key.clone()))?;
        for (defender_key, params) in defenders {
            let defender = *unit_ids
                .get(&defender_key)
                .ok_or_else(|| RulesError::MissingId(defender_key.clone()))?;
            let params = params.compile(&format!("{attacker_key}:{defender_key}"))?;
            combat.insert((attacker, defender), params);
        }
    }

    let terrains = raw
        .terrains
        .into_iter()
        .map(|(k, t)| t.compile(&k, &unit_ids))
        .collect::<Result<Vec<_>, _>>()?;
    let unit_types = raw
        .units
        .into_iter()
        .map(|(k, u)| u.compile(&k))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledRules {
        version: raw.combat.version,
        wound_damage: raw.combat.wound_damage.max(0),
        terrains,
        unit_types,
        terrain_ids,
        unit_type_ids: unit_ids,
        movement,
        combat,
        rules_hash,
    })
}
