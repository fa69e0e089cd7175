//! Domains: ordered, stable element identities that define a Field's iteration space.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Neighbor lists by element position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    neighbors: Vec<Vec<usize>>,
}

impl Topology {
    pub fn neighbors(&self, index: usize) -> &[usize] {
        self.neighbors.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// An immutable element sequence. Construction is a pure function of its
/// parameters, so rebuilding with the same parameters yields the same ids.
#[derive(Clone, Debug)]
pub struct Domain {
    id: String,
    elements: Vec<ElementId>,
    positions: HashMap<ElementId, usize>,
    topology: Option<Topology>,
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.elements == other.elements && self.topology == other.topology
    }
}

impl Domain {
    pub fn from_ids(id: &str, elements: Vec<ElementId>) -> Result<Self, LibraryError> {
        let mut positions = HashMap::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            if positions.insert(element.clone(), index).is_some() {
                return Err(LibraryError::invalid_argument(format!(
                    "duplicate element id '{}' in domain '{}'",
                    element, id
                )));
            }
        }
        Ok(Self {
            id: id.to_string(),
            elements,
            positions,
            topology: None,
        })
    }

    /// `count` elements named `e0..e{count-1}`.
    pub fn from_count(id: &str, count: usize) -> Self {
        let elements = (0..count).map(|i| ElementId(format!("e{}", i))).collect();
        Self::unchecked(id, elements, None)
    }

    /// `count` elements with ids derived from `seed`. Ids are unique within the
    /// domain and identical for identical `(count, seed)`.
    pub fn from_seed(id: &str, count: usize, seed: u64) -> Self {
        let elements = (0..count)
            .map(|i| ElementId(format!("{:016x}", splitmix64(seed ^ splitmix64(i as u64)))))
            .collect();
        Self::unchecked(id, elements, None)
    }

    /// Row-major `rows x cols` grid with a 4-neighborhood topology.
    pub fn grid(id: &str, rows: usize, cols: usize) -> Self {
        let mut elements = Vec::with_capacity(rows * cols);
        let mut neighbors = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                elements.push(ElementId(format!("r{}c{}", row, col)));
                let mut adjacent = Vec::with_capacity(4);
                if row > 0 {
                    adjacent.push((row - 1) * cols + col);
                }
                if col > 0 {
                    adjacent.push(row * cols + col - 1);
                }
                if col + 1 < cols {
                    adjacent.push(row * cols + col + 1);
                }
                if row + 1 < rows {
                    adjacent.push((row + 1) * cols + col);
                }
                neighbors.push(adjacent);
            }
        }
        Self::unchecked(id, elements, Some(Topology { neighbors }))
    }

    fn unchecked(id: &str, elements: Vec<ElementId>, topology: Option<Topology>) -> Self {
        let positions = elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.clone(), i))
            .collect();
        Self {
            id: id.to_string(),
            elements,
            positions,
            topology,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elements(&self) -> &[ElementId] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn position_of(&self, element: &ElementId) -> Option<usize> {
        self.positions.get(element).copied()
    }

    pub fn element_at(&self, index: usize) -> Option<&ElementId> {
        self.elements.get(index)
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }
}

/// True iff both domains carry the same element ids in the same order.
pub fn domains_are_compatible(a: &Domain, b: &Domain) -> bool {
    a.elements.len() == b.elements.len()
        && a.elements.iter().zip(b.elements.iter()).all(|(x, y)| x == y)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_ids_are_stable() {
        let a = Domain::grid("g", 2, 3);
        let b = Domain::grid("g", 2, 3);
        assert_eq!(a.len(), 6);
        assert_eq!(a.elements(), b.elements());
        assert_eq!(a.elements()[4], ElementId::new("r1c1"));
        assert!(domains_are_compatible(&a, &b));
    }

    #[test]
    fn test_grid_topology() {
        let g = Domain::grid("g", 2, 3);
        let topo = g.topology().unwrap();
        assert_eq!(topo.neighbors(0), &[1, 3]);
        assert_eq!(topo.neighbors(4), &[1, 3, 5]);
        assert!(topo.neighbors(99).is_empty());
    }

    #[test]
    fn test_compatibility() {
        let a = Domain::from_count("a", 3);
        let b = Domain::from_count("b", 3);
        let c = Domain::from_count("c", 4);
        assert!(domains_are_compatible(&a, &a));
        assert!(domains_are_compatible(&a, &b));
        assert!(domains_are_compatible(&b, &a));
        assert!(!domains_are_compatible(&a, &c));
        assert!(!domains_are_compatible(&c, &a));

        let reordered = Domain::from_ids(
            "r",
            vec![ElementId::new("e1"), ElementId::new("e0"), ElementId::new("e2")],
        )
        .unwrap();
        assert!(!domains_are_compatible(&a, &reordered));
    }

    #[test]
    fn test_seeded_domains() {
        let a = Domain::from_seed("s", 16, 42);
        let b = Domain::from_seed("s", 16, 42);
        let c = Domain::from_seed("s", 16, 43);
        assert_eq!(a.elements(), b.elements());
        assert!(!domains_are_compatible(&a, &c));
        let unique: std::collections::HashSet<_> = a.elements().iter().collect();
        assert_eq!(unique.len(), 16);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Domain::from_ids("d", vec![ElementId::new("x"), ElementId::new("x")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_position_lookup() {
        let d = Domain::from_count("d", 5);
        assert_eq!(d.position_of(&ElementId::new("e3")), Some(3));
        assert_eq!(d.position_of(&ElementId::new("zz")), None);
    }
}
