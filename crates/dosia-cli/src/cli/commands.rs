use super::CliError;
use super::helpers::*;
use anyhow::Context;
use dosia_core::domain::BeamRecord;
use dosia_core::modules::image::{ElementType, VoxelGrid};
use dosia_core::modules::phantom::CtPhantom;
use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct PlanArgs {
    /// Directory holding dbtype.dump and the phase dumps
    #[arg(value_name = "rt_dir")]
    plan_dir: PathBuf,

    /// JSON settings file; defaults apply to every omitted field
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print the normalized beam record as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
pub(super) struct PhantomArgs {
    /// Directory holding the plan dumps and ct.xdr
    #[arg(value_name = "rt_dir")]
    plan_dir: PathBuf,

    /// JSON settings file; defaults apply to every omitted field
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct ConvertArgs {
    /// Source image (.xdr or .mhd)
    input: PathBuf,

    /// Destination image (.xdr or .mhd)
    output: PathBuf,

    /// Store voxels as 16-bit integers instead of 32-bit floats
    #[arg(long)]
    short: bool,
}

pub(super) fn run_plan_command(args: PlanArgs) -> Result<i32, CliError> {
    let settings = resolve_settings(args.settings.as_deref())?;
    let record = BeamRecord::load(&args.plan_dir, &settings)?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&record).with_context(|| {
            format!(
                "failed to serialize beam record from '{}'",
                args.plan_dir.display()
            )
        })?;
        println!("{rendered}");
    } else {
        println!("{}", render_plan_summary(&args.plan_dir, &record));
    }
    Ok(0)
}

pub(super) fn run_phantom_command(args: PhantomArgs) -> Result<i32, CliError> {
    let settings = resolve_settings(args.settings.as_deref())?;
    let record = BeamRecord::load(&args.plan_dir, &settings)?;
    let ct = CtPhantom::load(&args.plan_dir, &settings, &record.metadata)?;
    println!("{}", render_phantom_summary(&args.plan_dir, &ct.phantom));
    Ok(0)
}

pub(super) fn run_convert_command(args: ConvertArgs) -> Result<i32, CliError> {
    let element = if args.short {
        ElementType::Short
    } else {
        ElementType::Float
    };
    let grid = VoxelGrid::load(&args.input)?;
    grid.store_as(&args.output, element)?;
    println!(
        "Converted '{}' -> '{}' ({} voxels, {:?}).",
        args.input.display(),
        args.output.display(),
        grid.voxel_count(),
        element
    );
    Ok(0)
}
