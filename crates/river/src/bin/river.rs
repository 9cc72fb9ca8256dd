use std::{error::Error, path::Path, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use river::core::{
    load_json, solve_camera, solve_nadir, solve_oblique, solve_oblique_from_world, write_json,
    CameraSolveOptions, GcpTable, NadirInput, ObliqueInput, ObliqueSolution,
};
use river::discharge::integrate;
use river::piv::{CancelToken, PivEngine};
use river::{
    load_cross_section, load_cross_sections, load_frame, load_sections, save_gray_png,
    save_mask_png, update_pixels, AnalysisRegion, AnalysisResult, DischargeParams, ImageDirectory,
    PivParams, RiverError, SectionReport, TransformationMapping,
};
use serde::Serialize;
use serde_json::json;

/// River discharge from video.
#[derive(Debug, Parser)]
#[command(author, version, about = "River surface velocimetry and discharge")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines through `tracing` (filtered by RUST_LOG).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Nadir (UAV) calibration from one segment of known length.
    Nadir(NadirArgs),
    /// Oblique calibration from four points on the water surface.
    Oblique(ObliqueArgs),
    /// Camera calibration from six or more surveyed 3D points.
    Camera(CameraArgs),
    /// Discretize sections and refresh their bank pixel positions.
    Section(SectionArgs),
    /// Build the analysis mask and bounding box around the sections.
    Mask(MaskArgs),
    /// Velocimetry on a single frame pair.
    PivTest(PivTestArgs),
    /// Velocimetry on every consecutive pair of a frame directory.
    PivAll(PivAllArgs),
    /// Integrate discharge over one section.
    Discharge(DischargeArgs),
}

#[derive(Debug, Args)]
struct NadirArgs {
    /// JSON with two `pixels`, their `world` positions and an optional
    /// `pixel_size`.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the transformation JSON.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Frame to orthorectify with the fitted mapping.
    #[arg(long, requires = "ortho")]
    frame: Option<PathBuf>,

    /// Output PNG for the orthophoto.
    #[arg(long, requires = "frame")]
    ortho: Option<PathBuf>,

    /// Orthophoto resolution in metres per pixel; the solved pixel size
    /// when omitted.
    #[arg(long)]
    resolution: Option<f64>,
}

#[derive(Debug, Args)]
struct ObliqueArgs {
    /// JSON with four `pixels` and the six surveyed `distances`.
    #[arg(long, conflicts_with = "gcp", required_unless_present = "gcp")]
    input: Option<PathBuf>,

    /// Ground control table with exactly four points of known X/Y.
    #[arg(long)]
    gcp: Option<PathBuf>,

    /// Where to write the transformation JSON.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Frame to orthorectify with the fitted mapping.
    #[arg(long, requires = "ortho")]
    frame: Option<PathBuf>,

    /// Output PNG for the orthophoto.
    #[arg(long, requires = "frame")]
    ortho: Option<PathBuf>,

    /// Orthophoto resolution in metres per pixel.
    #[arg(long, default_value_t = 0.05)]
    resolution: f64,
}

#[derive(Debug, Args)]
struct CameraArgs {
    /// Ground control table with pixel and X/Y/Z columns.
    #[arg(long)]
    gcp: PathBuf,

    /// Where to write the transformation JSON.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Search point subsets for the lowest reprojection error.
    #[arg(long)]
    optimize: bool,
}

#[derive(Debug, Args)]
struct SectionArgs {
    /// Section map JSON (`{"section1": {...}}`).
    #[arg(long)]
    sections: PathBuf,

    #[arg(long)]
    transformation: PathBuf,

    /// Window size (px) the recommended ROI height should span.
    #[arg(long, default_value_t = 64)]
    window: usize,

    /// Write the section map back with bank pixels filled in.
    #[arg(long)]
    update: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MaskArgs {
    #[arg(long)]
    sections: PathBuf,

    #[arg(long)]
    transformation: PathBuf,

    /// First frame of the video; fixes the mask size.
    #[arg(long)]
    frame: PathBuf,

    /// Height in metres of the band analysed around each section.
    #[arg(long)]
    height_roi: f64,

    /// Where to write `{mask, bbox}`.
    #[arg(long)]
    out: PathBuf,

    /// Also save the mask as a PNG.
    #[arg(long)]
    save_png_mask: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PivTestArgs {
    #[arg(long)]
    frame_a: PathBuf,

    #[arg(long)]
    frame_b: PathBuf,

    /// Region JSON written by `mask`.
    #[arg(long)]
    region: PathBuf,

    /// PIV parameters JSON; defaults when omitted.
    #[arg(long)]
    params: Option<PathBuf>,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PivAllArgs {
    /// Directory of frames, processed in file-name order.
    #[arg(long)]
    frames: PathBuf,

    #[arg(long)]
    region: PathBuf,

    #[arg(long)]
    params: Option<PathBuf>,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DischargeArgs {
    #[arg(long)]
    sections: PathBuf,

    /// Section to integrate over.
    #[arg(long)]
    name: String,

    #[arg(long)]
    transformation: PathBuf,

    /// Velocimetry output of `piv-all`.
    #[arg(long)]
    piv: PathBuf,

    /// Discharge parameters JSON; flags below override it.
    #[arg(long)]
    params: Option<PathBuf>,

    #[arg(long)]
    fps: Option<f64>,

    /// Frames between the two images of a pair.
    #[arg(long)]
    frame_step: Option<usize>,

    /// Override the section's velocity coefficient.
    #[arg(long)]
    alpha: Option<f64>,

    /// Leave stations without samples empty instead of interpolating.
    #[arg(long)]
    no_interpolate: bool,

    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    match cli.command {
        Command::Nadir(args) => run_nadir(args),
        Command::Oblique(args) => run_oblique(args),
        Command::Camera(args) => run_camera(args),
        Command::Section(args) => run_section(args),
        Command::Mask(args) => run_mask(args),
        Command::PivTest(args) => run_piv_test(args),
        Command::PivAll(args) => run_piv_all(args),
        Command::Discharge(args) => run_discharge(args),
    }
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "tracing")]
    {
        if cli.log_json {
            let _ = tracing_log::LogTracer::init();
            river::core::init_tracing(true);
            return Ok(());
        }
    }
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    river::core::init_with_level(level)?;
    Ok(())
}

/// Write `value` to `out`, or print it when no path is given.
fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), Box<dyn Error>> {
    match out {
        Some(path) => {
            write_json(value, path)?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn load_piv_params(path: Option<&Path>) -> Result<PivParams, RiverError> {
    match path {
        Some(p) => Ok(load_json(p)?),
        None => Ok(PivParams::default()),
    }
}

fn run_nadir(args: NadirArgs) -> Result<(), Box<dyn Error>> {
    let input = NadirInput::load_json(&args.input)?;
    let solution = solve_nadir(&input.pixels, &input.world, input.pixel_size)?;
    log::info!(
        "nadir calibration: {:.5} m/px, rotation {:.2} deg",
        solution.pixel_size,
        solution.rotation.to_degrees()
    );

    let mut ortho_report = None;
    if let (Some(frame), Some(ortho)) = (&args.frame, &args.ortho) {
        let img = river::open_image(frame)?.to_luma8();
        let extent = solution.frame_extent(img.width(), img.height());
        let resolution = args.resolution.unwrap_or(solution.pixel_size);
        let photo = solution
            .mapping
            .orthorectify(&river::gray_view(&img), extent, resolution)?;
        save_gray_png(&photo.image, ortho)?;
        log::info!(
            "orthophoto {}x{} written to {}",
            photo.image.width,
            photo.image.height,
            ortho.display()
        );
        ortho_report = Some(json!({
            "path": ortho,
            "output_resolution": resolution,
            "extent": extent,
        }));
    }

    let mapping = TransformationMapping::from(solution.mapping.clone());
    if let Some(out) = &args.out {
        mapping.write_json(out)?;
        log::info!("wrote {}", out.display());
    }
    let report = json!({
        "transformation": mapping,
        "pixel_size": solution.pixel_size,
        "rotation_deg": solution.rotation.to_degrees(),
        "orthophoto": ortho_report,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_oblique(args: ObliqueArgs) -> Result<(), Box<dyn Error>> {
    let solution: ObliqueSolution = match (&args.input, &args.gcp) {
        (Some(path), _) => {
            let input = ObliqueInput::load_json(path)?;
            solve_oblique(&input.pixels, &input.distances)?
        }
        (None, Some(path)) => solve_oblique_from_world(&GcpTable::load_json(path)?.to_planar()?)?,
        (None, None) => return Err("either --input or --gcp is required".into()),
    };
    log::info!(
        "oblique calibration: worst distance residual {:.4} m",
        solution.max_abs_residual()
    );

    if let (Some(frame), Some(ortho)) = (&args.frame, &args.ortho) {
        let img = river::open_image(frame)?.to_luma8();
        let w = &solution.world_points;
        let extent = [
            w.iter().map(|p| p.x).fold(f64::INFINITY, f64::min),
            w.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max),
            w.iter().map(|p| p.y).fold(f64::INFINITY, f64::min),
            w.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max),
        ];
        let photo = solution
            .mapping
            .orthorectify(&river::gray_view(&img), extent, args.resolution)?;
        save_gray_png(&photo.image, ortho)?;
        log::info!(
            "orthophoto {}x{} written to {}",
            photo.image.width,
            photo.image.height,
            ortho.display()
        );
    }

    let mapping = TransformationMapping::from(solution.mapping.clone());
    if let Some(out) = &args.out {
        mapping.write_json(out)?;
        log::info!("wrote {}", out.display());
    }
    let report = json!({
        "transformation": mapping,
        "world_points": solution.world_points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>(),
        "distance_residuals": solution.distance_residuals,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_camera(args: CameraArgs) -> Result<(), Box<dyn Error>> {
    let set = GcpTable::load_json(&args.gcp)?.to_spatial()?;
    let camera = solve_camera(
        &set,
        CameraSolveOptions {
            optimize: args.optimize,
        },
    )?;
    log::info!(
        "camera calibration: {} of {} points, mean reprojection error {:.3} px",
        camera.point_indices.len(),
        set.len(),
        camera.mean_error
    );
    let mapping = TransformationMapping::from(camera);
    if let Some(out) = &args.out {
        mapping.write_json(out)?;
        log::info!("wrote {}", out.display());
    }
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

fn run_section(args: SectionArgs) -> Result<(), Box<dyn Error>> {
    let mapping = TransformationMapping::load_json(&args.transformation)?;
    if let Some(out) = &args.update {
        let updated = update_pixels(&load_sections(&args.sections)?, &mapping)?;
        write_json(&updated, out)?;
        log::info!("wrote {}", out.display());
    }
    let reports = load_cross_sections(&args.sections)?
        .iter()
        .map(|(name, section)| SectionReport::new(name, section, &mapping, args.window))
        .collect::<Result<Vec<_>, _>>()?;
    emit(&reports, None)
}

fn run_mask(args: MaskArgs) -> Result<(), Box<dyn Error>> {
    let mapping = TransformationMapping::load_json(&args.transformation)?;
    let (width, height) = ImageDirectory::from_paths(vec![args.frame.clone()], true).frame_size()?;
    let sections = load_cross_sections(&args.sections)?;
    let region = AnalysisRegion::from_sections(
        sections.iter().map(|(_, s)| s),
        &mapping,
        args.height_roi,
        width,
        height,
    )?;
    region.write_json(&args.out)?;
    if let Some(png) = &args.save_png_mask {
        save_mask_png(&region.mask, png)?;
    }
    let b = region.bbox;
    println!("{}", json!({ "bbox": [b.x, b.y, b.width, b.height] }));
    Ok(())
}

fn run_piv_test(args: PivTestArgs) -> Result<(), Box<dyn Error>> {
    let params = load_piv_params(args.params.as_deref())?;
    let region = AnalysisRegion::load_json(&args.region)?;
    let a = load_frame(&args.frame_a, params.grayscale)?;
    let b = load_frame(&args.frame_b, params.grayscale)?;
    let engine = PivEngine::new(params, region.mask, region.bbox)?;
    let result = engine.run_test(&a, &b)?;
    log::info!(
        "{} of {} points valid",
        result.stats.valid,
        result.stats.evaluated
    );
    emit(&result, args.out.as_deref())
}

fn run_piv_all(args: PivAllArgs) -> Result<(), Box<dyn Error>> {
    let params = load_piv_params(args.params.as_deref())?;
    let region = AnalysisRegion::load_json(&args.region)?;
    let frames = ImageDirectory::open(&args.frames, params.grayscale)?;
    let engine = PivEngine::new(params, region.mask, region.bbox)?;
    let result = engine.run_analyze_all(&frames, &CancelToken::new())?;
    if result.pairs_skipped > 0 {
        log::warn!("{} frame pairs could not be read", result.pairs_skipped);
    }
    emit(&result, args.out.as_deref())
}

fn run_discharge(args: DischargeArgs) -> Result<(), Box<dyn Error>> {
    let mapping = TransformationMapping::load_json(&args.transformation)?;
    let section = load_cross_section(&args.sections, &args.name)?;
    let analysis: AnalysisResult = load_json(&args.piv)?;

    let mut params = match &args.params {
        Some(p) => load_json(p)?,
        None => DischargeParams::default(),
    };
    if let Some(fps) = args.fps {
        params.fps = fps;
    }
    if let Some(step) = args.frame_step {
        params.frame_step = step;
    }
    if args.alpha.is_some() {
        params.alpha = args.alpha;
    }
    if args.no_interpolate {
        params.interpolate = false;
    }

    let summary = integrate(&section, &analysis, &mapping, &params)?;
    log::info!(
        "section '{}': Q = {:.3} ± {:.3} m³/s",
        args.name,
        summary.total_q,
        summary.total_q_std
    );
    emit(&summary, args.out.as_deref())
}
