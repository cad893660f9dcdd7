//! Atom records as read from structure files.
//!
//! Atoms carry just enough information to be written back out verbatim: name, element,
//! coordinates, occupancy, and temperature factor.

use super::types::{Element, Point};
use smol_str::SmolStr;
use std::fmt;

/// Labeled atom with element identity and crystallographic attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Atom name as it appears in the source file (e.g., `CA`).
    pub name: SmolStr,
    /// Chemical element; `Element::Unknown` when it could not be resolved.
    pub element: Element,
    /// Cartesian coordinates in ångströms.
    pub pos: Point,
    /// Occupancy of the retained alternate location.
    pub occupancy: f64,
    /// Isotropic temperature factor.
    pub b_factor: f64,
}

impl Atom {
    /// Creates a fully occupied atom with a zero temperature factor.
    ///
    /// # Arguments
    ///
    /// * `name` - Atom label such as `"CA"`.
    /// * `element` - Resolved chemical element.
    /// * `pos` - Cartesian position in ångströms.
    pub fn new(name: &str, element: Element, pos: Point) -> Self {
        Self {
            name: SmolStr::new(name),
            element,
            pos,
            occupancy: 1.0,
            b_factor: 0.0,
        }
    }

    /// Returns a copy with the given occupancy and temperature factor.
    pub fn with_crystallographic(mut self, occupancy: f64, b_factor: f64) -> Self {
        self.occupancy = occupancy;
        self.b_factor = b_factor;
        self
    }

    /// Indicates whether all three coordinates are finite numbers.
    pub fn has_finite_position(&self) -> bool {
        self.pos.iter().all(|c| c.is_finite())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Atom {{ name: \"{}\", element: {}, pos: [{:.3}, {:.3}, {:.3}] }}",
            self.name, self.element, self.pos.x, self.pos.y, self.pos.z
        )
    }
}
