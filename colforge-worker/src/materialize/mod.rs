//! Colbuilder configuration materialization
//!
//! Turns validated job parameters into the on-disk YAML document the
//! colbuilder tool consumes. The materializer owns two things: the
//! pre-flight parameter validation (pure, no filesystem) and the
//! construction of the [`ConfigArtifact`] written into the job
//! workdir. Writing is verify-on-write: the artifact is read back and
//! structurally compared before the tool is ever invoked.

mod crosslinks;

pub use crosslinks::{CrosslinkTable, Terminus};

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use colforge_core::domain::job::JobRecord;
use colforge_core::domain::params::{
    CrosslinkSpec, DensityChangeParams, FibrilParams, JobParameters, MixedCrosslinksParams,
    MoleculeParams, SequenceInput, SUPPORTED_FORCE_FIELDS, TerminusSpec,
};
use colforge_core::error::JobFailure;

use crate::config::PolicyLimits;

/// Fasta file written into the workdir for custom chain submissions.
pub const FASTA_FILE_NAME: &str = "sequences.fasta";

/// A configuration document pinned to its on-disk location.
#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    pub path: PathBuf,
    pub document: Mapping,
}

impl ConfigArtifact {
    /// Writes the document and verifies the write by reading it back
    /// and comparing structurally. A mismatch means the filesystem is
    /// not to be trusted for this run.
    pub async fn write_and_verify(&self) -> Result<(), JobFailure> {
        let rendered = serde_yaml::to_string(&self.document)
            .map_err(|e| JobFailure::Materialize(format!("cannot render config: {e}")))?;

        tokio::fs::write(&self.path, rendered).await?;

        let raw = tokio::fs::read_to_string(&self.path).await?;
        let reread: Mapping = serde_yaml::from_str(&raw).map_err(|e| {
            JobFailure::Materialize(format!(
                "config at {} is unreadable after write: {e}",
                self.path.display()
            ))
        })?;

        if reread != self.document {
            return Err(JobFailure::Materialize(format!(
                "config at {} does not match what was written",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Builds and validates colbuilder configuration documents.
pub struct Materializer {
    limits: PolicyLimits,
    crosslinks: CrosslinkTable,
}

impl Materializer {
    pub fn new(limits: PolicyLimits) -> Self {
        Self {
            limits,
            crosslinks: CrosslinkTable::builtin(),
        }
    }

    /// Pre-flight validation, run before the job is dispatched. Pure:
    /// no filesystem access, so a failure here leaves nothing behind.
    pub fn validate(&self, params: &JobParameters) -> Result<(), JobFailure> {
        match params {
            JobParameters::Molecule(p) => self.validate_molecule(p),
            JobParameters::Fibril(p) => self.validate_fibril(p),
            JobParameters::MixedCrosslinks(p) => self.validate_mixed(p),
            JobParameters::DensityChange(p) => self.validate_density(p),
        }
    }

    /// Builds the config artifact for a job inside its workdir. The
    /// path is deterministic per job type, `<kind>_config.yaml`.
    pub fn materialize(
        &self,
        job: &JobRecord,
        workdir: &Path,
    ) -> Result<ConfigArtifact, JobFailure> {
        self.validate(&job.parameters)?;

        let document = match &job.parameters {
            JobParameters::Molecule(p) => molecule_document(p, workdir),
            JobParameters::Fibril(p) => fibril_document(p, workdir),
            JobParameters::MixedCrosslinks(p) => mixed_document(p, workdir),
            JobParameters::DensityChange(p) => density_document(p, workdir),
        };

        let path = workdir.join(format!("{}_config.yaml", job.job_type.config_kind()));
        Ok(ConfigArtifact { path, document })
    }

    fn validate_molecule(&self, params: &MoleculeParams) -> Result<(), JobFailure> {
        params.input.validate()?;

        let Some(crosslinks) = &params.crosslinks else {
            return Ok(());
        };
        for (terminus, spec) in [
            (Terminus::N, &crosslinks.n_terminal),
            (Terminus::C, &crosslinks.c_terminal),
        ] {
            self.validate_terminus(&params.input, terminus, spec)?;
        }
        Ok(())
    }

    fn validate_terminus(
        &self,
        input: &SequenceInput,
        terminus: Terminus,
        spec: &TerminusSpec,
    ) -> Result<(), JobFailure> {
        if spec.is_none() {
            return Ok(());
        }

        let Some(species) = input.species() else {
            return Err(JobFailure::Validation(format!(
                "{} crosslink requested, but crosslinks are only defined \
                 for species templates, not custom sequences",
                terminus.label()
            )));
        };

        let Some(position) = spec.position.as_deref() else {
            return Err(JobFailure::Validation(format!(
                "{} crosslink '{}' requires a position",
                terminus.label(),
                spec.crosslink_type
            )));
        };

        if !self
            .crosslinks
            .is_valid(species, &spec.crosslink_type, terminus, position)
        {
            return Err(JobFailure::Validation(format!(
                "invalid {} crosslink: type '{}' at position '{}' is not \
                 defined for species '{}'",
                terminus.label(),
                spec.crosslink_type,
                position,
                species
            )));
        }
        Ok(())
    }

    fn validate_fibril(&self, params: &FibrilParams) -> Result<(), JobFailure> {
        if params.input_pdb.is_empty() {
            return Err(JobFailure::Validation("input_pdb is required".to_string()));
        }
        if !self.limits.contact_distance_nm.contains(&params.contact_distance) {
            return Err(JobFailure::Validation(format!(
                "contact_distance {} nm is outside the accepted range {:.1}-{:.1} nm",
                params.contact_distance,
                self.limits.contact_distance_nm.start(),
                self.limits.contact_distance_nm.end()
            )));
        }
        if !self.limits.fibril_length_nm.contains(&params.fibril_length) {
            return Err(JobFailure::Validation(format!(
                "fibril_length {} nm is outside the accepted range {:.1}-{:.1} nm",
                params.fibril_length,
                self.limits.fibril_length_nm.start(),
                self.limits.fibril_length_nm.end()
            )));
        }

        if params.generate_topology {
            let Some(force_field) = params.force_field.as_deref() else {
                return Err(JobFailure::Validation(
                    "force_field is required when generate_topology is set".to_string(),
                ));
            };
            if !SUPPORTED_FORCE_FIELDS.contains(&force_field) {
                return Err(JobFailure::Validation(format!(
                    "force field '{force_field}' is not yet available \
                     (supported: {})",
                    SUPPORTED_FORCE_FIELDS.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn validate_mixed(&self, params: &MixedCrosslinksParams) -> Result<(), JobFailure> {
        if params.reference_pdb_a.is_empty() || params.reference_pdb_b.is_empty() {
            return Err(JobFailure::Validation(
                "both reference structures are required for crosslink mixing".to_string(),
            ));
        }
        for (label, tag) in [
            ("crosslink_type_a", &params.crosslink_type_a),
            ("crosslink_type_b", &params.crosslink_type_b),
        ] {
            if tag.is_empty() || tag == "none" {
                return Err(JobFailure::Validation(format!(
                    "{label} must name a crosslink type"
                )));
            }
        }
        parse_ratio(&params.ratio)?;
        Ok(())
    }

    fn validate_density(&self, params: &DensityChangeParams) -> Result<(), JobFailure> {
        if params.input_pdb.is_empty() {
            return Err(JobFailure::Validation("input_pdb is required".to_string()));
        }
        if !self.limits.density_percent.contains(&params.target_density) {
            return Err(JobFailure::Validation(format!(
                "target_density {} is outside the accepted range {:.0}-{:.0} percent",
                params.target_density,
                self.limits.density_percent.start(),
                self.limits.density_percent.end()
            )));
        }
        Ok(())
    }
}

/// Parses a mixing ratio like `"70/30"`: two integer percentages
/// summing to 100.
fn parse_ratio(ratio: &str) -> Result<(u32, u32), JobFailure> {
    let invalid = || {
        JobFailure::Validation(format!(
            "ratio '{ratio}' must be two percentages summing to 100, like \"70/30\""
        ))
    };

    let (a, b) = ratio.split_once('/').ok_or_else(invalid)?;
    let a: u32 = a.trim().parse().map_err(|_| invalid())?;
    let b: u32 = b.trim().parse().map_err(|_| invalid())?;
    if a.checked_add(b) != Some(100) {
        return Err(invalid());
    }
    Ok((a, b))
}

// === Document builders (original colbuilder YAML shapes) ===

fn insert(map: &mut Mapping, key: &str, value: Value) {
    map.insert(Value::String(key.to_string()), value);
}

fn base_document(
    workdir: &Path,
    sequence: bool,
    geometry: bool,
    topology: bool,
) -> Mapping {
    let mut doc = Mapping::new();
    insert(&mut doc, "sequence_generator", Value::Bool(sequence));
    insert(&mut doc, "geometry_generator", Value::Bool(geometry));
    insert(&mut doc, "topology_generator", Value::Bool(topology));
    insert(&mut doc, "debug", Value::Bool(false));
    insert(
        &mut doc,
        "working_directory",
        Value::String(workdir.display().to_string()),
    );
    doc
}

fn molecule_document(params: &MoleculeParams, workdir: &Path) -> Mapping {
    let mut doc = base_document(workdir, true, false, false);

    match &params.input {
        SequenceInput::Species { species } => {
            insert(&mut doc, "species", Value::String(species.clone()));
        }
        SequenceInput::Custom { .. } => {
            insert(
                &mut doc,
                "fasta_file",
                Value::String(workdir.join(FASTA_FILE_NAME).display().to_string()),
            );
        }
    }

    match &params.crosslinks {
        Some(crosslinks) => append_crosslinks(&mut doc, crosslinks),
        None => insert(&mut doc, "crosslink", Value::Bool(false)),
    }
    doc
}

fn append_crosslinks(doc: &mut Mapping, crosslinks: &CrosslinkSpec) {
    insert(doc, "crosslink", Value::Bool(true));
    insert(
        doc,
        "n_term_type",
        Value::String(crosslinks.n_terminal.crosslink_type.clone()),
    );
    insert(
        doc,
        "c_term_type",
        Value::String(crosslinks.c_terminal.crosslink_type.clone()),
    );
    insert(
        doc,
        "n_term_combination",
        optional_string(crosslinks.n_terminal.position.as_deref()),
    );
    insert(
        doc,
        "c_term_combination",
        optional_string(crosslinks.c_terminal.position.as_deref()),
    );
}

fn optional_string(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::String(v.to_string()),
        None => Value::Null,
    }
}

fn fibril_document(params: &FibrilParams, workdir: &Path) -> Mapping {
    let mut doc = base_document(workdir, false, true, params.generate_topology);
    insert(&mut doc, "pdb_file", Value::String(params.input_pdb.clone()));
    insert(
        &mut doc,
        "contact_distance",
        Value::Number(serde_yaml::Number::from(params.contact_distance)),
    );
    insert(
        &mut doc,
        "fibril_length",
        Value::Number(serde_yaml::Number::from(params.fibril_length)),
    );
    if params.generate_topology {
        if let Some(force_field) = &params.force_field {
            insert(&mut doc, "force_field", Value::String(force_field.clone()));
        }
    }
    doc
}

fn modification_document(
    workdir: &Path,
    pdb_file: &str,
    modification_type: &str,
    parameters: Mapping,
) -> Mapping {
    let mut doc = base_document(workdir, false, false, false);

    let mut modification = Mapping::new();
    insert(
        &mut modification,
        "type",
        Value::String(modification_type.to_string()),
    );
    insert(&mut modification, "parameters", Value::Mapping(parameters));

    insert(&mut doc, "modification", Value::Mapping(modification));
    insert(&mut doc, "pdb_file", Value::String(pdb_file.to_string()));
    doc
}

fn mixed_document(params: &MixedCrosslinksParams, workdir: &Path) -> Mapping {
    let mut parameters = Mapping::new();
    insert(
        &mut parameters,
        "crosslink_type_a",
        Value::String(params.crosslink_type_a.clone()),
    );
    insert(
        &mut parameters,
        "crosslink_type_b",
        Value::String(params.crosslink_type_b.clone()),
    );
    insert(
        &mut parameters,
        "reference_pdb_b",
        Value::String(params.reference_pdb_b.clone()),
    );
    insert(&mut parameters, "ratio", Value::String(params.ratio.clone()));

    modification_document(workdir, &params.reference_pdb_a, "mix", parameters)
}

fn density_document(params: &DensityChangeParams, workdir: &Path) -> Mapping {
    let mut parameters = Mapping::new();
    insert(
        &mut parameters,
        "target_density",
        Value::Number(serde_yaml::Number::from(params.target_density)),
    );

    modification_document(workdir, &params.input_pdb, "density", parameters)
}
