use super::{Backend, CliError};
use anyhow::Context;
use serde::Serialize;
#[cfg(feature = "mpi")]
use slabpm_core::comm::mpi_world::MpiCommunicator;
use slabpm_core::comm::{Communicator, LocalCluster, ReduceOp};
use slabpm_core::common::config::{ParticleSource, RunConfig, load_run_config};
use slabpm_core::domain::{LocalDomain, LocalParticles, PmError, PmResult};
use slabpm_core::mesh::grid::RealGrid;
use slabpm_core::modules::ingest::{
    VelocityFrame, build_density_from_files, lattice_particles, load_particles, open_reader,
    reconstruct_displacements, rescale_lpt_displacements,
};
use slabpm_core::modules::{ForceOutcome, ForcePipeline, SpectrumInput, power_spectrum};
use slabpm_core::numerics::growth::GrowthHistory;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
#[cfg(feature = "mpi")]
use tracing::warn;

#[derive(clap::Args)]
pub(super) struct ForcesArgs {
    /// JSON run configuration
    #[arg(long)]
    config: PathBuf,

    /// Number of consecutive force evaluations
    #[arg(long, default_value_t = 1)]
    steps: usize,

    /// JSON report output path (overrides output.report)
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct IngestArgs {
    /// JSON run configuration with a particle file set
    #[arg(long)]
    config: PathBuf,

    /// Start particles at rest relative to the LPT trajectory
    #[arg(long)]
    cola: bool,

    /// JSON report output path (overrides output.report)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Power-spectrum table output path (overrides output.powerSpectrum)
    #[arg(long)]
    power_spectrum: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct LayoutArgs {
    /// JSON run configuration
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct ForceReport {
    command: &'static str,
    tasks: usize,
    nmesh: usize,
    nsample: usize,
    #[serde(rename = "boxSize")]
    box_size: f64,
    steps: usize,
    #[serde(rename = "totalParticles")]
    total_particles: u64,
    #[serde(rename = "particlesPerTask")]
    particles_per_task: Vec<usize>,
    #[serde(rename = "migrationRounds")]
    migration_rounds: usize,
    #[serde(rename = "meanDisplacement")]
    mean_displacement: [f64; 3],
    #[serde(rename = "rmsDisplacement")]
    rms_displacement: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest: Option<IngestReport>,
}

#[derive(Debug, Clone, Serialize)]
struct IngestReport {
    #[serde(rename = "particlesDeposited")]
    particles_deposited: u64,
    #[serde(rename = "coordinateRange")]
    coordinate_range: Option<[f64; 2]>,
    #[serde(rename = "powerSpectrumBins")]
    power_spectrum_bins: usize,
}

/// What one task hands back after its last force evaluation. Run-wide fields
/// are already reduced, so the root's summary describes the whole run.
struct TaskSummary {
    particles_per_task: Vec<usize>,
    migration_rounds: usize,
    outcome: ForceOutcome,
    rms_displacement: f64,
    ingest: Option<IngestReport>,
    spectrum_table: Option<String>,
}

pub(super) fn run_forces_command(backend: Backend, args: ForcesArgs) -> Result<i32, CliError> {
    if args.steps == 0 {
        return Err(CliError::Usage("--steps must be at least 1".to_string()));
    }
    let config = load_config(&args.config)?;
    let growth = config.growth.build().map_err(PmError::from)?;
    let a_init = config.initial_scale_factor();
    let steps = args.steps;

    let root = run_tasks(backend, config.tasks, |comm: &dyn Communicator| {
        let domain = LocalDomain::new(comm.rank(), comm.size(), config.solver)?;
        let mut particles = initial_particles(&domain, &config, growth.as_ref(), a_init)?;
        run_force_steps(&domain, &mut particles, comm, steps, None, None)
    })?;
    let Some(root) = root else {
        return Ok(0);
    };

    let report = build_report("forces", &config, steps, &root);
    finish(&report, args.report.or(config.output.report.clone()))
}

pub(super) fn run_ingest_command(backend: Backend, args: IngestArgs) -> Result<i32, CliError> {
    let config = load_config(&args.config)?;
    let ParticleSource::Files(files) = &config.particles else {
        return Err(CliError::Compute(PmError::input_validation(
            "INPUT.INGEST_SOURCE",
            "the ingest command needs particles.kind = \"files\"",
        )));
    };
    let reader = open_reader(files);
    let growth = config.growth.build().map_err(PmError::from)?;
    let reference = config.reference_growth().build().map_err(PmError::from)?;
    let a_init = config.initial_scale_factor();
    let frame = if args.cola {
        VelocityFrame::Cola
    } else {
        VelocityFrame::Comoving
    };
    let spectrum_path = args
        .power_spectrum
        .or(config.output.power_spectrum.clone());
    let want_spectrum = spectrum_path.is_some();

    let root = run_tasks(backend, config.tasks, |comm: &dyn Communicator| {
        let domain = LocalDomain::new(comm.rank(), comm.size(), config.solver)?;
        let ingested =
            build_density_from_files(&domain, reader.as_ref(), reference.as_ref(), a_init, comm)?;
        let spectrum = power_spectrum(
            &ingested.density,
            config.solver.box_size,
            config.solver.nsample,
            SpectrumInput::Normalized,
            comm,
        )?;
        let displacements =
            reconstruct_displacements(&domain, &ingested.density, growth.as_ref(), comm)?;
        drop(ingested.density);
        let mut particles =
            lattice_particles(&domain, &displacements, reference.as_ref(), a_init, frame)?;
        drop(displacements);
        if frame == VelocityFrame::Cola {
            let factor = rescale_lpt_displacements(
                &mut particles,
                reference.as_ref(),
                growth.as_ref(),
                a_init,
            );
            if domain.is_root() {
                info!(factor, "rescaled LPT displacements to the model growth");
            }
        }

        let ingest = IngestReport {
            particles_deposited: ingested.total_particles,
            coordinate_range: ingested.bounds.map(|(low, high)| [low, high]),
            power_spectrum_bins: spectrum.bins.len(),
        };
        let table = (want_spectrum && domain.is_root()).then(|| spectrum.to_table());
        run_force_steps(&domain, &mut particles, comm, 1, Some(ingest), table)
    })?;
    let Some(root) = root else {
        return Ok(0);
    };

    if let Some(path) = &spectrum_path
        && let Some(table) = &root.spectrum_table
    {
        write_output(path, table)?;
        println!("Power spectrum: {}", path.display());
    }
    let report = build_report("ingest", &config, 1, &root);
    finish(&report, args.report.or(config.output.report.clone()))
}

pub(super) fn run_layout_command(args: LayoutArgs) -> Result<i32, CliError> {
    let config = load_config(&args.config)?;
    let domain = LocalDomain::new(0, config.tasks, config.solver)?;
    let (mesh, lattice) = (domain.mesh(), domain.lattice());
    println!("task  mesh_start  mesh_slices  lattice_start  lattice_slices");
    for rank in 0..config.tasks {
        println!(
            "{rank:>4}  {:>10}  {:>11}  {:>13}  {:>14}",
            mesh.start(rank),
            mesh.count(rank),
            lattice.start(rank),
            lattice.count(rank)
        );
    }
    let idle = config.tasks - mesh.active_task_count();
    if idle > 0 {
        println!("{idle} task(s) own no mesh slices");
    }
    Ok(0)
}

/// Runs `body` once per task and hands back the root task's value. The other
/// processes of an MPI job get `None`; a failing MPI process aborts the job.
fn run_tasks<T, F>(backend: Backend, tasks: usize, body: F) -> Result<Option<T>, CliError>
where
    T: Send,
    F: Fn(&dyn Communicator) -> PmResult<T> + Sync,
{
    match backend {
        Backend::Threads => {
            let results = LocalCluster::new(tasks)?.run_all(|comm| body(comm))?;
            Ok(results.into_iter().next())
        }
        #[cfg(feature = "mpi")]
        Backend::Mpi => {
            let comm = MpiCommunicator::initialize().map_err(PmError::from)?;
            if comm.rank() == 0 && comm.size() != tasks {
                warn!(
                    configured = tasks,
                    launched = comm.size(),
                    "running on the launched MPI process count"
                );
            }
            match body(&comm) {
                Ok(value) => Ok((comm.rank() == 0).then_some(value)),
                Err(error) => {
                    comm.abort(&error);
                    Err(error.into())
                }
            }
        }
    }
}

fn load_config(path: &Path) -> Result<RunConfig, CliError> {
    let mut config = load_run_config(path).map_err(PmError::from)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    Ok(config)
}

/// Particles a `forces` run starts from: the configured files, or an
/// unperturbed lattice.
fn initial_particles(
    domain: &LocalDomain,
    config: &RunConfig,
    growth: &dyn GrowthHistory,
    a_init: f64,
) -> PmResult<LocalParticles> {
    match &config.particles {
        ParticleSource::Files(files) => load_particles(domain, open_reader(files).as_ref()),
        ParticleSource::Lattice => {
            let layout = domain.layout();
            let still = [
                RealGrid::zeros(layout),
                RealGrid::zeros(layout),
                RealGrid::zeros(layout),
            ];
            lattice_particles(domain, &still, growth, a_init, VelocityFrame::Comoving)
        }
    }
}

fn run_force_steps(
    domain: &LocalDomain,
    particles: &mut LocalParticles,
    comm: &dyn Communicator,
    steps: usize,
    ingest: Option<IngestReport>,
    spectrum_table: Option<String>,
) -> PmResult<TaskSummary> {
    let mut pipeline = ForcePipeline::new(domain, comm);
    let mut last = None;
    for step in 0..steps {
        if domain.is_root() {
            info!(step = step + 1, of = steps, "force evaluation");
        }
        last = Some(pipeline.compute_displacements(particles, None)?);
    }
    let Some(outcome) = last else {
        return Err(PmError::internal("SYS.CLI_STEPS", "no force evaluation ran"));
    };

    let mut sums = [outcome
        .forces
        .displacements
        .iter()
        .map(|value| value.iter().map(|component| component * component).sum::<f64>())
        .sum::<f64>()];
    comm.all_reduce_f64(&mut sums, ReduceOp::Sum)?;
    let rms_displacement = (sums[0] / outcome.forces.total_particles.max(1) as f64).sqrt();
    let mut counts = vec![0u64; comm.size()];
    counts[comm.rank()] = particles.len() as u64;
    comm.all_reduce_u64(&mut counts, ReduceOp::Sum)?;
    let mut rounds = [outcome.migration.rounds as u64];
    comm.all_reduce_u64(&mut rounds, ReduceOp::Max)?;

    Ok(TaskSummary {
        particles_per_task: counts.into_iter().map(|count| count as usize).collect(),
        migration_rounds: rounds[0] as usize,
        outcome,
        rms_displacement,
        ingest,
        spectrum_table,
    })
}

fn build_report(
    command: &'static str,
    config: &RunConfig,
    steps: usize,
    root: &TaskSummary,
) -> ForceReport {
    ForceReport {
        command,
        tasks: root.particles_per_task.len(),
        nmesh: config.solver.nmesh,
        nsample: config.solver.nsample,
        box_size: config.solver.box_size,
        steps,
        total_particles: root.outcome.forces.total_particles,
        particles_per_task: root.particles_per_task.clone(),
        migration_rounds: root.migration_rounds,
        mean_displacement: root.outcome.forces.mean_displacement,
        rms_displacement: root.rms_displacement,
        ingest: root.ingest.clone(),
    }
}

fn finish(report: &ForceReport, report_path: Option<PathBuf>) -> Result<i32, CliError> {
    println!(
        "Force evaluation complete: {} particles on {} task(s), mean displacement [{:.6e}, {:.6e}, {:.6e}]",
        report.total_particles,
        report.tasks,
        report.mean_displacement[0],
        report.mean_displacement[1],
        report.mean_displacement[2]
    );
    if let Some(path) = report_path {
        let rendered =
            serde_json::to_string_pretty(report).context("failed to serialize force report")?;
        write_output(&path, &rendered)?;
        println!("Report: {}", path.display());
    }
    Ok(0)
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}
