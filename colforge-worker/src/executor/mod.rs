//! Job execution pipeline
//!
//! One attempt of one job: prepare inputs, materialize the config,
//! invoke colbuilder, verify the expected artifacts. Progress
//! milestones are reported at fixed points so pollers see the attempt
//! advance; the executor never decides retries, it only classifies
//! what went wrong into a [`JobFailure`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use colforge_core::domain::job::{JobRecord, JobType};
use colforge_core::domain::params::{JobParameters, SequenceInput};
use colforge_core::error::JobFailure;

use crate::config::Config;
use crate::materialize::{FASTA_FILE_NAME, Materializer};
use crate::process::{self, ProcessSpec};
use crate::progress::ProgressReporter;

/// Files produced by one successful attempt.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub input_files: HashMap<String, String>,
    pub output_files: HashMap<String, String>,
}

pub struct JobExecutor {
    colbuilder_path: PathBuf,
    workdir_base: PathBuf,
    soft_limit: std::time::Duration,
    hard_limit: std::time::Duration,
    termination_grace: std::time::Duration,
    materializer: Materializer,
}

impl JobExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            colbuilder_path: config.colbuilder_path.clone(),
            workdir_base: config.workdir_base.clone(),
            soft_limit: config.soft_time_limit,
            hard_limit: config.hard_time_limit,
            termination_grace: config.termination_grace,
            materializer: Materializer::new(config.limits.clone()),
        }
    }

    /// Workdir for a job, stable across attempts.
    pub fn workdir_for(&self, job: &JobRecord) -> PathBuf {
        self.workdir_base.join(job.id.to_string())
    }

    /// Runs one attempt end to end.
    pub async fn execute(
        &self,
        job: &JobRecord,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, JobFailure> {
        let workdir = self.workdir_for(job);
        tokio::fs::create_dir_all(&workdir).await?;

        let input_files = prepare_inputs(job, &workdir).await?;
        progress.report(20, "preparing inputs").await;

        let artifact = self.materializer.materialize(job, &workdir)?;
        artifact.write_and_verify().await?;
        progress.report(40, "configuration written").await;

        // Artifacts from a previous attempt must not be mistaken for
        // this attempt's output
        let (required, optional) = expected_artifacts(job);
        remove_stale_artifacts(&workdir, &required, &optional).await?;

        progress.report(50, "running colbuilder").await;
        let spec = ProcessSpec {
            executable: self.colbuilder_path.clone(),
            args: vec![
                "--config_file".to_string(),
                artifact.path.display().to_string(),
            ],
            workdir: workdir.clone(),
            env: Vec::new(),
            soft_limit: self.soft_limit,
            hard_limit: self.hard_limit,
            termination_grace: self.termination_grace,
        };
        let outcome = process::run(&spec, cancel).await?;
        debug!(
            exit_code = outcome.exit_code,
            duration_ms = outcome.duration.as_millis() as u64,
            "colbuilder finished"
        );

        if outcome.exit_code != 0 {
            return Err(JobFailure::Subprocess {
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }
        progress.report(90, "processing output").await;

        let mut output_files = HashMap::new();
        for (kind, file_name) in &required {
            let path = workdir.join(file_name);
            if !tokio::fs::try_exists(&path).await? {
                return Err(JobFailure::MissingArtifact(file_name.to_string()));
            }
            output_files.insert(kind.to_string(), path.display().to_string());
        }
        for (kind, file_name) in &optional {
            let path = workdir.join(file_name);
            if tokio::fs::try_exists(&path).await? {
                output_files.insert(kind.to_string(), path.display().to_string());
            }
        }

        info!(
            job_type = job.job_type.as_str(),
            outputs = output_files.len(),
            "attempt produced all expected artifacts"
        );
        Ok(ExecutionOutcome {
            input_files,
            output_files,
        })
    }

    /// Pre-dispatch parameter check, used by the queue worker before
    /// it transitions the job to Running.
    pub fn validate(&self, parameters: &JobParameters) -> Result<(), JobFailure> {
        self.materializer.validate(parameters)
    }
}

/// Writes workdir inputs the tool needs beyond the config file.
async fn prepare_inputs(
    job: &JobRecord,
    workdir: &Path,
) -> Result<HashMap<String, String>, JobFailure> {
    let mut input_files = HashMap::new();

    if let JobParameters::Molecule(params) = &job.parameters {
        if let SequenceInput::Custom {
            chain_a,
            chain_b,
            chain_c,
        } = &params.input
        {
            let path = workdir.join(FASTA_FILE_NAME);
            let fasta =
                format!(">chain_A\n{chain_a}\n>chain_B\n{chain_b}\n>chain_C\n{chain_c}\n");
            tokio::fs::write(&path, fasta).await?;
            input_files.insert("fasta".to_string(), path.display().to_string());
        }
    }
    Ok(input_files)
}

type ArtifactList = Vec<(&'static str, &'static str)>;

/// Expected workdir artifacts per job type: required ones whose
/// absence fails the attempt, and optional ones registered only when
/// present.
fn expected_artifacts(job: &JobRecord) -> (ArtifactList, ArtifactList) {
    match job.job_type {
        JobType::Molecule => (vec![("pdb", "molecule.pdb")], Vec::new()),
        JobType::Fibril => {
            let optional = match &job.parameters {
                JobParameters::Fibril(p) if p.generate_topology => vec![
                    ("top", "fibril.top"),
                    ("gro", "fibril.gro"),
                    ("mdp", "fibril.mdp"),
                ],
                _ => Vec::new(),
            };
            (vec![("pdb", "fibril.pdb")], optional)
        }
        JobType::MixedCrosslinks | JobType::DensityChange => {
            (vec![("pdb", "modified.pdb")], Vec::new())
        }
    }
}

async fn remove_stale_artifacts(
    workdir: &Path,
    required: &ArtifactList,
    optional: &ArtifactList,
) -> Result<(), JobFailure> {
    for (_, file_name) in required.iter().chain(optional.iter()) {
        let path = workdir.join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(file = file_name, "removed artifact from previous attempt"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
