//! Heavy/light/target role assignment for author chains.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

const ROLE_ORDER: [char; 3] = ['H', 'L', 'T'];

/// Letters handed out once `H`, `L`, and `T` are taken.
const FALLBACK_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Parses a role hint such as `H`, `heavy`, `l`, or `TARGET`.
pub fn normalize_role(value: &str) -> Option<char> {
    match value.trim().to_ascii_lowercase().as_str() {
        "h" | "heavy" => Some('H'),
        "l" | "light" => Some('L'),
        "t" | "target" => Some('T'),
        _ => None,
    }
}

/// Role letter of every author chain, kept in the chain order they were assigned from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRoles {
    assignments: Vec<(String, char)>,
}

impl ChainRoles {
    pub fn role(&self, chain: &str) -> Option<char> {
        self.assignments
            .iter()
            .find(|(c, _)| c == chain)
            .map(|(_, role)| *role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, char)> {
        self.assignments.iter().map(|(c, r)| (c.as_str(), *r))
    }

    /// Assignments with the `H`, `L`, `T` chains first, everything else in chain order.
    pub fn ordered(&self) -> Vec<(&str, char)> {
        let mut ordered: Vec<(usize, (&str, char))> = self.iter().enumerate().collect();
        ordered.sort_by_key(|(idx, (_, role))| {
            let priority = ROLE_ORDER
                .iter()
                .position(|r| r == role)
                .unwrap_or(ROLE_ORDER.len());
            (priority, *idx)
        });
        ordered.into_iter().map(|(_, pair)| pair).collect()
    }

    /// Author chain to role letter, as written to `chain_map.json`.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(chain, role)| (chain.to_string(), role.to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl fmt::Display for ChainRoles {
    /// `H:H,L:L,A:T` in role order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ordered()
            .into_iter()
            .map(|(chain, role)| format!("{chain}:{role}"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Assigns a role letter to every chain.
///
/// Hints map a chain to a role or a role to a chain (`{"A": "target"}` and `{"T": "A"}` mean
/// the same thing). Hinted chains keep their role; the remaining chains receive the unused
/// roles `H`, `L`, `T` in chain order, then the first unused letters from `A`.
pub fn assign_chain_roles(chains: &[&str], hints: &BTreeMap<String, String>) -> ChainRoles {
    let mut hinted: BTreeMap<&str, char> = BTreeMap::new();
    for (key, value) in hints {
        if let Some(role) = normalize_role(key) {
            hinted.insert(value.trim(), role);
        } else if let Some(role) = normalize_role(value) {
            hinted.insert(key.trim(), role);
        } else {
            warn!(key = %key, value = %value, "ignoring chain role hint without a role");
        }
    }

    let mut roles: Vec<Option<char>> = chains.iter().map(|c| hinted.get(c).copied()).collect();
    let mut used: Vec<char> = roles.iter().flatten().copied().collect();

    let free: Vec<char> = ROLE_ORDER
        .iter()
        .filter(|r| !used.contains(r))
        .copied()
        .collect();
    let mut free_roles = free.into_iter();
    for slot in roles.iter_mut().filter(|slot| slot.is_none()) {
        match free_roles.next() {
            Some(role) => {
                *slot = Some(role);
                used.push(role);
            }
            None => break,
        }
    }

    let mut letters = FALLBACK_LETTERS.chars();
    for (chain, slot) in chains.iter().zip(roles.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        match letters.by_ref().find(|c| !used.contains(c)) {
            Some(letter) => {
                *slot = Some(letter);
                used.push(letter);
            }
            None => warn!(chain = %chain, "no role letter left for chain"),
        }
    }

    ChainRoles {
        assignments: chains
            .iter()
            .zip(roles)
            .filter_map(|(chain, role)| role.map(|r| (chain.to_string(), r)))
            .collect(),
    }
}
