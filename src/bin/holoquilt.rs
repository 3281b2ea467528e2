use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use glam::{DMat4, DVec3};

use holoquilt::{
    CalibrationSource, CalibrationStatus, CpuPresenter, FrameSource, HoloquiltResult,
    ImageSequence, LightfieldParams, LiveSession, PipelineConfig, PixelBuffer, Presenter,
    ProbeRenderer, QuiltLayout, QuiltPreset, QuiltSettings, QuiltTexture, RenderSetupBuilder,
    RigConfig, RigManifest, Sampling, ServiceClient, SourceCamera,
};

#[derive(Parser, Debug)]
#[command(name = "holoquilt", version)]
struct Cli {
    /// Pipeline config JSON.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Display service IPC socket.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Display service timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the per-view camera matrices as JSON.
    Views(ViewsArgs),
    /// Assemble a `name.NN.ext` image sequence into a quilt PNG.
    Assemble(AssembleArgs),
    /// Interleave a quilt PNG into a display-sized image.
    Lightfield(LightfieldArgs),
    /// Render a parallax probe scene into a quilt PNG.
    Probe(ProbeArgs),
    /// Print the active calibration as JSON.
    Calibration(CalibrationArgs),
    /// Send a quilt to the display service.
    Show(ShowArgs),
    /// Hide the display service window.
    Hide,
    /// Clear the display.
    Wipe,
    /// Write the offline render rig manifest as JSON.
    Rig(RigArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetChoice {
    Standard,
    HighRes,
}

impl From<PresetChoice> for QuiltPreset {
    fn from(p: PresetChoice) -> Self {
        match p {
            PresetChoice::Standard => QuiltPreset::Standard,
            PresetChoice::HighRes => QuiltPreset::HighRes,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SamplingChoice {
    Nearest,
    Linear,
}

impl From<SamplingChoice> for Sampling {
    fn from(s: SamplingChoice) -> Self {
        match s {
            SamplingChoice::Nearest => Sampling::Nearest,
            SamplingChoice::Linear => Sampling::Linear,
        }
    }
}

#[derive(Args, Debug, Default)]
struct LayoutArgs {
    /// Named quilt layout.
    #[arg(long, value_enum)]
    preset: Option<PresetChoice>,

    /// Tile columns (with --rows; overrides --preset).
    #[arg(long, requires = "rows")]
    columns: Option<u32>,

    /// Tile rows.
    #[arg(long, requires = "columns")]
    rows: Option<u32>,

    /// View size as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_size)]
    view_size: Option<(u32, u32)>,

    /// Quilt size as WIDTHxHEIGHT (defaults to the tight fit of the tiles).
    #[arg(long, value_parser = parse_size)]
    quilt_size: Option<(u32, u32)>,
}

impl LayoutArgs {
    fn is_set(&self) -> bool {
        self.preset.is_some() || self.columns.is_some()
    }

    /// Resolve the layout. `view_hint` fills in a missing view size (e.g. from the first image).
    fn resolve(
        &self,
        cfg: &PipelineConfig,
        view_hint: Option<(u32, u32)>,
    ) -> anyhow::Result<QuiltLayout> {
        if let (Some(columns), Some(rows)) = (self.columns, self.rows) {
            let (vw, vh) = self
                .view_size
                .or(view_hint)
                .context("--view-size is required with --columns/--rows")?;
            let layout = match self.quilt_size {
                Some((qw, qh)) => QuiltLayout::new(columns, rows, vw, vh, qw, qh)?,
                None => QuiltLayout::tight(columns, rows, vw, vh)?,
            };
            return Ok(layout);
        }
        if let Some(p) = self.preset {
            return Ok(QuiltLayout::preset(p.into()));
        }
        Ok(cfg.resolve_layout(None))
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("height: {e}"))?;
    Ok((w, h))
}

fn parse_vec3(s: &str) -> Result<DVec3, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(format!("expected X,Y,Z, got '{s}'")),
    }
}

#[derive(Args, Debug)]
struct CameraArgs {
    /// Camera position.
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,10", allow_hyphen_values = true)]
    eye: DVec3,

    /// Point the camera looks at (and focuses on).
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,0", allow_hyphen_values = true)]
    target: DVec3,

    /// Vertical field of view in degrees.
    #[arg(long, default_value_t = 40.0)]
    fov: f64,

    #[arg(long, default_value_t = 0.1)]
    near: f64,

    #[arg(long, default_value_t = 100.0)]
    far: f64,

    /// Convergence distance overriding the eye-target distance.
    #[arg(long)]
    focus: Option<f64>,
}

impl CameraArgs {
    fn camera(&self, aspect: f64) -> SourceCamera {
        let mut cam = SourceCamera::look_at(
            self.eye, self.target, DVec3::Y, self.fov, aspect, self.near, self.far,
        );
        if let Some(d) = self.focus {
            cam.focus_distance = Some(d);
        }
        cam
    }
}

#[derive(Args, Debug)]
struct ViewsArgs {
    #[command(flatten)]
    layout: LayoutArgs,

    #[command(flatten)]
    camera: CameraArgs,

    /// View cone in degrees (defaults to the config's).
    #[arg(long)]
    cone: Option<f64>,

    /// Use the camera's vertical field of view as the view cone.
    #[arg(long, conflicts_with = "cone")]
    cone_from_fov: bool,

    /// Display width / height.
    #[arg(long, default_value_t = 1.6)]
    aspect: f64,

    /// Output path (stdout when omitted).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AssembleArgs {
    /// First image of the sequence (`name.00.ext`).
    #[arg(long, conflicts_with = "base")]
    first: Option<PathBuf>,

    /// Sequence base path (`name.ext`).
    #[arg(long)]
    base: Option<PathBuf>,

    #[command(flatten)]
    layout: LayoutArgs,

    /// Output quilt PNG.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct LightfieldArgs {
    /// Input quilt PNG.
    #[arg(long)]
    quilt: PathBuf,

    #[command(flatten)]
    layout: LayoutArgs,

    #[command(flatten)]
    calibration: CalibrationSourceArgs,

    #[arg(long, value_enum)]
    sampling: Option<SamplingChoice>,

    /// Output PNG (display resolution).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    layout: LayoutArgs,

    /// Output quilt PNG.
    #[arg(long)]
    out: PathBuf,

    /// Also write the interleaved image here.
    #[arg(long)]
    lightfield_out: Option<PathBuf>,

    /// Render through the cameras of this rig manifest (see `rig`) instead of a single camera.
    #[arg(long)]
    rig: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct CalibrationSourceArgs {
    /// Read calibration from a saved JSON file.
    #[arg(long, conflicts_with_all = ["calibration_utility", "from_service"])]
    calibration_file: Option<PathBuf>,

    /// Run this calibration extraction utility.
    #[arg(long, conflicts_with = "from_service")]
    calibration_utility: Option<PathBuf>,

    /// Ask the display service.
    #[arg(long)]
    from_service: bool,
}

impl CalibrationSourceArgs {
    fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(p) = &self.calibration_file {
            cfg.calibration = CalibrationSource::File(p.clone());
        } else if let Some(p) = &self.calibration_utility {
            cfg.calibration = CalibrationSource::Utility(p.clone());
        } else if self.from_service {
            cfg.calibration = CalibrationSource::Service;
        }
    }
}

#[derive(Args, Debug)]
struct CalibrationArgs {
    #[command(flatten)]
    source: CalibrationSourceArgs,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Quilt PNG to upload.
    #[arg(long, required_unless_present = "load")]
    quilt: Option<PathBuf>,

    #[command(flatten)]
    layout: LayoutArgs,

    /// Displayed aspect of one view (defaults to the device's screen aspect).
    #[arg(long)]
    aspect: Option<f64>,

    /// Store the quilt in the service cache under this name instead of showing it.
    #[arg(long, conflicts_with = "load")]
    cache: Option<String>,

    /// Show a quilt previously cached under this name.
    #[arg(long)]
    load: Option<String>,
}

#[derive(Args, Debug)]
struct RigArgs {
    #[command(flatten)]
    layout: LayoutArgs,

    /// View cone in degrees (defaults to the config's).
    #[arg(long)]
    cone: Option<f64>,

    /// Display width / height.
    #[arg(long, default_value_t = 1.6)]
    display_aspect: f64,

    /// Half depth of the renderable volume.
    #[arg(long, default_value_t = 1.0)]
    depth: f64,

    /// Output path (stdout when omitted).
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &cli.config {
        Some(p) => PipelineConfig::load(p)?,
        None => PipelineConfig::default(),
    };
    if let Some(s) = &cli.socket {
        cfg.service.socket_path = s.clone();
    }
    if let Some(t) = cli.timeout_ms {
        cfg.service.timeout_ms = t;
    }

    match cli.cmd {
        Command::Views(args) => cmd_views(cfg, args),
        Command::Assemble(args) => cmd_assemble(&cfg, args),
        Command::Lightfield(args) => cmd_lightfield(cfg, args),
        Command::Probe(args) => cmd_probe(cfg, args),
        Command::Calibration(args) => cmd_calibration(cfg, args),
        Command::Show(args) => cmd_show(&cfg, args),
        Command::Hide => {
            ServiceClient::new(cfg.service).hide()?;
            Ok(())
        }
        Command::Wipe => {
            ServiceClient::new(cfg.service).wipe()?;
            Ok(())
        }
        Command::Rig(args) => cmd_rig(&cfg, args),
    }
}

fn write_text(out: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(p) => {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir '{}'", parent.display()))?;
            }
            std::fs::write(p, text).with_context(|| format!("write '{}'", p.display()))?;
            eprintln!("wrote {}", p.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn cmd_views(mut cfg: PipelineConfig, args: ViewsArgs) -> anyhow::Result<()> {
    let layout = args.layout.resolve(&cfg, None)?;
    let camera = args.camera.camera(args.aspect);
    if let Some(c) = args.cone {
        cfg.view_cone_degrees = c;
    } else if args.cone_from_fov {
        cfg.view_cone_degrees = camera.vertical_fov_degrees();
    }
    cfg.validate()?;

    let views = cfg
        .solver()
        .solve_views(&camera, layout.total_views(), args.aspect)?;
    let json = serde_json::to_string_pretty(&views).context("serialize views")?;
    write_text(args.out.as_deref(), &json)
}

fn cmd_assemble(cfg: &PipelineConfig, args: AssembleArgs) -> anyhow::Result<()> {
    let base = match (&args.first, &args.base) {
        (Some(first), _) => holoquilt::sequence::base_from_first_frame(first)?,
        (None, Some(base)) => base.clone(),
        (None, None) => anyhow::bail!("one of --first or --base is required"),
    };

    let first_view = PixelBuffer::load(&holoquilt::sequence::sequence_path(&base, 0))?;
    let layout = args
        .layout
        .resolve(cfg, Some((first_view.width, first_view.height)))?;
    let mut seq = ImageSequence::new(base, layout.total_views())?;
    let missing = seq.missing();
    if !missing.is_empty() {
        anyhow::bail!(
            "{} of {} views are missing, first: '{}'",
            missing.len(),
            layout.total_views(),
            missing[0].display()
        );
    }

    let mut quilt = QuiltTexture::new(layout)?;
    seq.composite_into(&mut quilt)?;
    quilt.pixels().save_png(&args.out)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

/// Session with the calibration loaded from the configured source.
fn calibrated_session(cfg: PipelineConfig) -> anyhow::Result<LiveSession> {
    let client = matches!(cfg.calibration, CalibrationSource::Service)
        .then(|| ServiceClient::new(cfg.service.clone()));
    let mut session = LiveSession::new(cfg)?;
    match session.refresh_calibration(client.as_ref())? {
        CalibrationStatus::Updated => {}
        CalibrationStatus::NoDevices => eprintln!("no devices connected, using default calibration"),
        CalibrationStatus::KeptPrevious(why) => {
            eprintln!("calibration unavailable ({why}), using default calibration")
        }
    }
    Ok(session)
}

fn cmd_lightfield(mut cfg: PipelineConfig, args: LightfieldArgs) -> anyhow::Result<()> {
    args.calibration.apply(&mut cfg);
    if let Some(s) = args.sampling {
        cfg.sampling = s.into();
    }
    let sampling = cfg.sampling;
    let session = calibrated_session(cfg)?;

    let pixels = PixelBuffer::load(&args.quilt)?;
    let layout = if args.layout.is_set() {
        args.layout.resolve(session.config(), None)?
    } else {
        *session.layout()
    };
    let quilt = QuiltTexture::from_pixels(layout, pixels)?;

    let params = LightfieldParams::new(session.calibration(), &layout)?;
    let screen = holoquilt::render_lightfield(&params, &quilt, sampling)?;
    screen.save_png(&args.out)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_probe(mut cfg: PipelineConfig, args: ProbeArgs) -> anyhow::Result<()> {
    let layout = args.layout.resolve(&cfg, None)?;
    cfg.quilt = Some(layout);
    let mut session = LiveSession::new(cfg)?;

    let rig_views = match &args.rig {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read rig manifest '{}'", path.display()))?;
            let views = RigManifest::from_json(&text)?
                .view_set(DMat4::IDENTITY, session.calibration().display_aspect)?
                .with_context(|| format!("'{}' contains no multiview rig", path.display()))?;
            Some(views)
        }
        None => None,
    };
    let distance = rig_views.as_ref().map_or(10.0, |v| v.convergence_distance);

    let radius = (layout.view_height / 24).max(1);
    let depth = 0.3 * distance;
    let mut probe = ProbeRenderer::new([16, 16, 24, 255])
        .with_marker(DVec3::new(0.0, 0.0, -depth), [40, 90, 255, 255], radius)
        .with_marker(DVec3::ZERO, [255, 255, 255, 255], radius)
        .with_marker(DVec3::new(0.0, 0.0, depth), [255, 60, 40, 255], radius);

    let mut cpu = CpuPresenter::new();
    let mut quilt_only = QuiltOnly;
    let presenter: &mut dyn Presenter = if args.lightfield_out.is_some() {
        &mut cpu
    } else {
        &mut quilt_only
    };
    let source = match &rig_views {
        Some(views) => FrameSource::Views {
            views,
            renderer: &mut probe,
        },
        None => FrameSource::Camera {
            camera: SourceCamera::look_at(
                DVec3::new(0.0, 0.0, distance),
                DVec3::ZERO,
                DVec3::Y,
                session.config().view_cone_degrees,
                session.calibration().display_aspect,
                0.1,
                100.0,
            ),
            renderer: &mut probe,
        },
    };
    let report = session.run_cycle(source, presenter)?;
    if !report.views_skipped.is_empty() {
        eprintln!("skipped views: {:?}", report.views_skipped);
    }

    let quilt = session.quilt().context("probe cycle left no quilt")?;
    quilt.pixels().save_png(&args.out)?;
    eprintln!("wrote {}", args.out.display());

    if let Some(path) = &args.lightfield_out {
        let screen = cpu
            .take_last_frame()
            .context("probe cycle produced no lightfield image")?;
        screen.save_png(path)?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

/// Keeps the quilt only; nothing is interleaved.
struct QuiltOnly;

impl Presenter for QuiltOnly {
    fn present(
        &mut self,
        _quilt: &QuiltTexture,
        _params: &LightfieldParams,
        _sampling: Sampling,
    ) -> HoloquiltResult<()> {
        Ok(())
    }
}

fn cmd_calibration(mut cfg: PipelineConfig, args: CalibrationArgs) -> anyhow::Result<()> {
    args.source.apply(&mut cfg);
    let session = calibrated_session(cfg)?;
    let json =
        serde_json::to_string_pretty(session.calibration()).context("serialize calibration")?;
    println!("{json}");
    Ok(())
}

fn cmd_show(cfg: &PipelineConfig, args: ShowArgs) -> anyhow::Result<()> {
    let client = ServiceClient::new(cfg.service.clone());

    if let Some(name) = &args.load {
        let settings = if args.layout.is_set() {
            let layout = args.layout.resolve(cfg, None)?;
            Some(QuiltSettings::from_layout(&layout, args.aspect.unwrap_or(1.6)))
        } else {
            None
        };
        client.load_quilt(name, settings)?;
        eprintln!("showing cached quilt '{name}'");
        return Ok(());
    }

    let path = args.quilt.as_ref().context("--quilt is required")?;
    let pixels = PixelBuffer::load(path)?;
    let aspect = match args.aspect {
        Some(a) => a,
        None => client
            .info()?
            .first()
            .map(|d| d.calibration.display_aspect)
            .unwrap_or(1.6),
    };
    let layout = args.layout.resolve(cfg, None)?;
    let quilt = QuiltTexture::from_pixels(layout, pixels)?;

    match &args.cache {
        Some(name) => {
            client.cache_quilt(name, &quilt, aspect)?;
            eprintln!("cached quilt as '{name}'");
        }
        None => {
            client.show_quilt(&quilt, aspect)?;
            eprintln!("showing {}", path.display());
        }
    }
    Ok(())
}

fn cmd_rig(cfg: &PipelineConfig, args: RigArgs) -> anyhow::Result<()> {
    let rig = RigConfig {
        view_cone_degrees: args.cone.unwrap_or(cfg.view_cone_degrees),
        layout: args.layout.resolve(cfg, None)?,
        display_aspect: args.display_aspect,
        depth_half_extent: args.depth,
        ..RigConfig::default()
    };
    let mut manifest = RigManifest::default();
    RenderSetupBuilder::new(rig).build(&mut manifest)?;
    write_text(args.out.as_deref(), &manifest.to_json_pretty()?)
}
