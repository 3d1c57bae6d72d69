//! Batch directory processing
//!
//! Walks an input directory and encrypts (every file) or decrypts (only
//! `*.enc` files) into a flat output directory. A failing file is logged
//! and counted; the run carries on with the rest.

use crate::core::{CipherSuite, Direction};
use crate::crypto::Algorithm;
use crate::error::{FileCryptError, IoResultExt, Result};
use crate::progress::ProgressReporter;
use crate::staging::{decrypted_name, encrypted_name, ENCRYPTED_SUFFIX};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// One batch run
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Encrypt or decrypt
    pub direction: Direction,
    /// Algorithm to apply
    pub algorithm: Algorithm,
    /// Directory walked for inputs
    pub input_dir: PathBuf,
    /// Directory receiving outputs
    pub output_dir: PathBuf,
    /// Passphrase (ignored for `rsa`)
    pub key: String,
}

/// Outcome of a batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files written successfully
    pub processed: u64,
    /// Input bytes of the successful files
    pub bytes_processed: u64,
    /// Failed inputs with their error text
    pub failures: Vec<(PathBuf, String)>,
    /// Total duration
    pub duration: Duration,
}

impl BatchReport {
    /// Number of failed files
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Check if every file succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Print summary to console
    pub fn print_summary(&self, job: &BatchJob) {
        println!("\n=== Batch Summary ===");
        println!("Algorithm:       {}", job.algorithm);
        println!("Direction:       {}", job.direction.verb());
        println!("Output:          {}", job.output_dir.display());
        println!("Files processed: {}", self.processed);
        println!(
            "Bytes processed: {}",
            humansize::format_size(self.bytes_processed, humansize::BINARY)
        );
        println!("Duration:        {:.2?}", self.duration);

        if !self.failures.is_empty() {
            println!("\nFailures: {}", self.failures.len());
            for (path, error) in &self.failures {
                println!("  {} - {}", path.display(), error);
            }
        }
    }
}

/// Runs batch jobs over a cipher suite
pub struct BatchProcessor<'a> {
    suite: &'a CipherSuite,
    threads: usize,
    progress: Option<ProgressReporter>,
}

impl<'a> BatchProcessor<'a> {
    /// Create a processor; `threads == 0` uses every core
    pub fn new(suite: &'a CipherSuite, threads: usize) -> Self {
        Self {
            suite,
            threads,
            progress: None,
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Collect the inputs of a job
    pub fn collect_inputs(job: &BatchJob) -> Result<Vec<PathBuf>> {
        if !job.input_dir.is_dir() {
            return Err(FileCryptError::NotFound(job.input_dir.clone()));
        }

        let mut inputs = Vec::new();
        for entry in WalkDir::new(&job.input_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| job.input_dir.clone());
                match e.into_io_error() {
                    Some(io) => FileCryptError::io(path, io),
                    None => FileCryptError::invalid(format!("filesystem loop at {}", path.display())),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let wanted = match job.direction {
                Direction::Encrypt => true,
                Direction::Decrypt => entry.file_name().to_string_lossy().ends_with(ENCRYPTED_SUFFIX),
            };
            if wanted {
                inputs.push(entry.into_path());
            }
        }
        Ok(inputs)
    }

    /// Run a job to completion
    pub fn run(&self, job: &BatchJob) -> Result<BatchReport> {
        let start = Instant::now();
        let inputs = Self::collect_inputs(job)?;
        fs::create_dir_all(&job.output_dir).with_path(&job.output_dir)?;

        tracing::info!(
            "Batch {} of {} file(s) from {:?} with {}",
            job.direction.verb(),
            inputs.len(),
            job.input_dir,
            job.algorithm
        );
        if let Some(progress) = &self.progress {
            progress.set_total_files(inputs.len() as u64);
            progress.set_status(&format!("Processing {}", job.input_dir.display()));
        }

        let threads = if self.threads == 0 { num_cpus::get() } else { self.threads };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| FileCryptError::ThreadPoolError(e.to_string()))?;

        let progress = &self.progress;
        let results: Vec<(PathBuf, Result<u64>)> = pool.install(|| {
            inputs
                .par_iter()
                .map(|path| {
                    if let Some(progress) = progress {
                        progress.set_current_file(&path.to_string_lossy());
                    }
                    let result = self.process_file(job, path);
                    if let Some(progress) = progress {
                        match &result {
                            Ok(bytes) => progress.file_done(*bytes),
                            Err(_) => progress.file_failed(),
                        }
                    }
                    (path.clone(), result)
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (path, result) in results {
            match result {
                Ok(bytes) => {
                    report.processed += 1;
                    report.bytes_processed += bytes;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    report.failures.push((path, e.to_string()));
                }
            }
        }
        report.duration = start.elapsed();

        if let Some(progress) = &self.progress {
            if report.is_success() {
                progress.finish_success(&format!("{} file(s) {}", report.processed, job.direction.verb()));
            } else {
                progress.finish_error(&format!("{} file(s) failed", report.failed()));
            }
            let summary = progress.summary();
            tracing::info!(
                "Batch finished: {:.0}% of {} file(s) in {:.2?} at {}/s",
                summary.percentage(),
                summary.total_files,
                summary.elapsed,
                humansize::format_size(summary.throughput() as u64, humansize::BINARY)
            );
        }
        Ok(report)
    }

    fn process_file(&self, job: &BatchJob, path: &Path) -> Result<u64> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileCryptError::invalid(format!("unusable file name {:?}", path)))?;
        let output_name = match job.direction {
            Direction::Encrypt => encrypted_name(name)?,
            Direction::Decrypt => decrypted_name(job.algorithm, name)?,
        };

        let input = fs::read(path).with_path(path)?;
        let output = self.suite.apply(job.direction, job.algorithm, &input, &job.key)?;

        let output_path = job.output_dir.join(output_name);
        fs::write(&output_path, output).with_path(&output_path)?;
        Ok(input.len() as u64)
    }
}
