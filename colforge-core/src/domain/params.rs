//! Closed parameter schemas per job type
//!
//! Each job type has a versioned, closed schema; unknown or extra
//! fields are rejected at the submission boundary rather than being
//! carried as loose key/value bags. Field names follow the original
//! submission forms so existing clients map one-to-one.

use serde::{Deserialize, Serialize};

use crate::domain::job::JobType;
use crate::error::JobFailure;

/// Residue-count band accepted for a custom chain sequence.
pub const MIN_CHAIN_RESIDUES: usize = 1000;
pub const MAX_CHAIN_RESIDUES: usize = 1100;

/// Alphabet accepted in custom chain sequences.
pub const ALLOWED_RESIDUES: &str = "ACDEFGHIKLMNOPQRSTVWY";

/// Force fields the topology generator supports.
pub const SUPPORTED_FORCE_FIELDS: &[&str] = &["charmm36", "amber99sb-ildn", "gromos54a7"];

/// Crosslink type meaning "no crosslink at this terminus".
pub const CROSSLINK_TYPE_NONE: &str = "none";

/// Sequence input for molecule generation: a species template or
/// three custom triple-helix chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum SequenceInput {
    Species {
        species: String,
    },
    Custom {
        chain_a: String,
        chain_b: String,
        chain_c: String,
    },
}

impl SequenceInput {
    /// Species this input validates crosslinks against, if any.
    pub fn species(&self) -> Option<&str> {
        match self {
            SequenceInput::Species { species } => Some(species),
            SequenceInput::Custom { .. } => None,
        }
    }

    pub fn chains(&self) -> Option<[(&'static str, &str); 3]> {
        match self {
            SequenceInput::Custom {
                chain_a,
                chain_b,
                chain_c,
            } => Some([("A", chain_a.as_str()), ("B", chain_b.as_str()), ("C", chain_c.as_str())]),
            SequenceInput::Species { .. } => None,
        }
    }

    /// Hard precondition for custom chains: each chain inside the
    /// residue band, every character from the allowed alphabet.
    pub fn validate(&self) -> Result<(), JobFailure> {
        let Some(chains) = self.chains() else {
            return Ok(());
        };

        for (chain_id, sequence) in chains {
            let len = sequence.chars().count();
            if !(MIN_CHAIN_RESIDUES..=MAX_CHAIN_RESIDUES).contains(&len) {
                return Err(JobFailure::Validation(format!(
                    "chain {chain_id} must be between {MIN_CHAIN_RESIDUES} and \
                     {MAX_CHAIN_RESIDUES} residues (current: {len})"
                )));
            }
            if let Some(bad) = sequence.chars().find(|c| !ALLOWED_RESIDUES.contains(*c)) {
                return Err(JobFailure::Validation(format!(
                    "chain {chain_id} contains invalid residue '{bad}'"
                )));
            }
        }
        Ok(())
    }
}

/// Crosslink request for one terminus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminusSpec {
    pub crosslink_type: String,
    /// Required unless `crosslink_type` is `"none"`.
    #[serde(default)]
    pub position: Option<String>,
}

impl TerminusSpec {
    pub fn is_none(&self) -> bool {
        self.crosslink_type == CROSSLINK_TYPE_NONE
    }
}

/// Crosslink configuration, enabled only when explicitly requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrosslinkSpec {
    pub n_terminal: TerminusSpec,
    pub c_terminal: TerminusSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoleculeParams {
    pub input: SequenceInput,
    #[serde(default)]
    pub crosslinks: Option<CrosslinkSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FibrilParams {
    /// Path to the input molecule PDB
    pub input_pdb: String,
    /// Contact distance between molecules, nm
    pub contact_distance: f64,
    /// Fibril length, nm
    pub fibril_length: f64,
    /// Also generate GROMACS topology files
    #[serde(default)]
    pub generate_topology: bool,
    /// Required when `generate_topology` is set
    #[serde(default)]
    pub force_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixedCrosslinksParams {
    pub reference_pdb_a: String,
    pub reference_pdb_b: String,
    pub crosslink_type_a: String,
    pub crosslink_type_b: String,
    /// Percentage split as one descriptive ratio string, e.g. "70/30"
    pub ratio: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DensityChangeParams {
    pub input_pdb: String,
    /// Target crosslink density, percent (0–100)
    pub target_density: f64,
}

/// Typed parameter payload of a job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobParameters {
    Molecule(MoleculeParams),
    Fibril(FibrilParams),
    MixedCrosslinks(MixedCrosslinksParams),
    DensityChange(DensityChangeParams),
}

impl JobParameters {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParameters::Molecule(_) => JobType::Molecule,
            JobParameters::Fibril(_) => JobType::Fibril,
            JobParameters::MixedCrosslinks(_) => JobType::MixedCrosslinks,
            JobParameters::DensityChange(_) => JobType::DensityChange,
        }
    }

    /// Parses a raw submission payload into the closed schema for the
    /// given job type. Unknown fields are a validation failure here,
    /// at the boundary, never deeper in materialization.
    pub fn from_submission(
        job_type: JobType,
        raw: serde_json::Value,
    ) -> Result<Self, JobFailure> {
        let parsed = match job_type {
            JobType::Molecule => serde_json::from_value(raw).map(JobParameters::Molecule),
            JobType::Fibril => serde_json::from_value(raw).map(JobParameters::Fibril),
            JobType::MixedCrosslinks => {
                serde_json::from_value(raw).map(JobParameters::MixedCrosslinks)
            }
            JobType::DensityChange => {
                serde_json::from_value(raw).map(JobParameters::DensityChange)
            }
        };
        parsed.map_err(|e| {
            JobFailure::Validation(format!("invalid {} parameters: {e}", job_type.as_str()))
        })
    }
}
