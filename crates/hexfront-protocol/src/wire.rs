use rmp_serde::{decode, encode};
use serde_json;
use thiserror::Error;

use crate::{GameAction, Proposal, Snapshot, StateHash, ValidationReport, WorldChange};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] decode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn serialize_actions(actions: &[GameAction]) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(actions)?)
}

pub fn deserialize_actions(bytes: &[u8]) -> Result<Vec<GameAction>, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_changes(changes: &[WorldChange]) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(changes)?)
}

pub fn deserialize_changes(bytes: &[u8]) -> Result<Vec<WorldChange>, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(snapshot)?)
}

pub fn deserialize_snapshot(bytes: &[u8]) -> Result<Snapshot, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_proposal(proposal: &Proposal) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(proposal)?)
}

pub fn deserialize_proposal(bytes: &[u8]) -> Result<Proposal, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_report(report: &ValidationReport) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(report)?)
}

pub fn deserialize_report(bytes: &[u8]) -> Result<ValidationReport, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn actions_to_json(actions: &[GameAction]) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(actions)?)
}

pub fn actions_from_json(json: &str) -> Result<Vec<GameAction>, WireError> {
    Ok(serde_json::from_str(json)?)
}

pub fn changes_to_json(changes: &[WorldChange]) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(changes)?)
}

pub fn snapshot_to_json(snapshot: &Snapshot) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn snapshot_from_json(json: &str) -> Result<Snapshot, WireError> {
    Ok(serde_json::from_str(json)?)
}

/// Deterministic snapshot hash used as the consensus result hash.
///
/// Hashes the MessagePack-serialized snapshot using FNV-1a 64-bit.
pub fn snapshot_hash(snapshot: &Snapshot) -> Result<StateHash, WireError> {
    let bytes = serialize_snapshot(snapshot)?;
    Ok(StateHash(hash_bytes_fnv1a64(&bytes)))
}

/// Deterministic, stable 64-bit hash for raw bytes (FNV-1a).
pub fn hash_bytes_fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
