use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};

/// Locates the assets directory of a named genome.
pub trait GenomeResolver {
    fn resolve_genome_path(&self, genome: &str) -> PipelineResult<PathBuf>;

    /// FASTA assembly inside the genome assets directory.
    fn genome_fasta(&self, genome: &str) -> PipelineResult<PathBuf> {
        Ok(self
            .resolve_genome_path(genome)?
            .join("assembly")
            .join(format!("{}.fa", genome)))
    }
}

/// Reads `<GENOME>` (upper-cased genome name) from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvGenomeResolver;

impl GenomeResolver for EnvGenomeResolver {
    fn resolve_genome_path(&self, genome: &str) -> PipelineResult<PathBuf> {
        let var = genome.to_uppercase();
        env::var_os(&var)
            .map(PathBuf::from)
            .ok_or(PipelineError::MissingEnv(var))
    }
}

/// Fixed genome → directory table.
#[derive(Debug, Default, Clone)]
pub struct StaticGenomeResolver(pub HashMap<String, PathBuf>);

impl GenomeResolver for StaticGenomeResolver {
    fn resolve_genome_path(&self, genome: &str) -> PipelineResult<PathBuf> {
        self.0
            .get(genome)
            .cloned()
            .ok_or_else(|| PipelineError::MissingEnv(genome.to_uppercase()))
    }
}
