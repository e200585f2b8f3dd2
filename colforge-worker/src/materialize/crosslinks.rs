//! Valid crosslink combinations per species
//!
//! Crosslink chemistry is only defined at specific residue positions
//! of the species collagen templates, so requests are checked against
//! this table before anything touches the filesystem. Combination
//! strings use the `"<residue>.<chain>"` notation the structure
//! templates use, e.g. `"9.C"`.

use std::collections::HashMap;

/// Which end of the triple helix a crosslink attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminus {
    N,
    C,
}

impl Terminus {
    pub fn label(&self) -> &'static str {
        match self {
            Terminus::N => "n-terminal",
            Terminus::C => "c-terminal",
        }
    }
}

/// Lookup table of valid (species, crosslink type, terminus) position
/// combinations.
pub struct CrosslinkTable {
    entries: HashMap<(String, String, Terminus), Vec<&'static str>>,
}

impl CrosslinkTable {
    /// The built-in combination set for the bundled species templates.
    pub fn builtin() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
        };

        for species in ["homo_sapiens", "rattus_norvegicus", "mus_musculus"] {
            table.add(species, "HLKNL", Terminus::N, &["9.C", "5.B"]);
            table.add(species, "HLKNL", Terminus::C, &["947.A", "944.B"]);
            table.add(species, "LKNL", Terminus::N, &["9.C"]);
            table.add(species, "LKNL", Terminus::C, &["947.A"]);
            table.add(species, "PYD", Terminus::C, &["944.B", "947.A"]);
        }
        // Divalent DHLNL is characterized for human templates only
        table.add("homo_sapiens", "DHLNL", Terminus::N, &["5.B", "9.C"]);
        table.add("homo_sapiens", "DHLNL", Terminus::C, &["944.B"]);

        table
    }

    fn add(
        &mut self,
        species: &str,
        crosslink_type: &str,
        terminus: Terminus,
        positions: &[&'static str],
    ) {
        self.entries.insert(
            (species.to_string(), crosslink_type.to_string(), terminus),
            positions.to_vec(),
        );
    }

    /// Whether the position is a valid combination for this species,
    /// type, and terminus.
    pub fn is_valid(
        &self,
        species: &str,
        crosslink_type: &str,
        terminus: Terminus,
        position: &str,
    ) -> bool {
        self.entries
            .get(&(species.to_string(), crosslink_type.to_string(), terminus))
            .is_some_and(|positions| positions.contains(&position))
    }

    /// Species the table knows about.
    pub fn species(&self) -> Vec<&str> {
        let mut species: Vec<&str> = self
            .entries
            .keys()
            .map(|(s, _, _)| s.as_str())
            .collect();
        species.sort_unstable();
        species.dedup();
        species
    }
}
