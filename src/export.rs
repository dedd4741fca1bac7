use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use image::{DynamicImage, ImageFormat, RgbImage};
use plotters::prelude::*;
use plotters::style::FontStyle;
use thiserror::Error;
use time::macros::format_description;

use crate::color::ColorTable;
use crate::config::ExportConfig;
use crate::events::{ExportKind, Notification};
use crate::fault::Fault;
use crate::frame::{local_now, FrameStore, ProcessedFrame};
use crate::render::{resample_nearest, strip_colors, StripImage};

/// Same-second collisions tried before giving up
const MAX_SUFFIX: u32 = 1000;

const HEADER: [&str; 2] = ["wavelength_nm", "intensity_counts"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export yet (no frame acquired)")]
    NoFrame,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("plot render failed: {0}")]
    Plot(String),

    #[error("timestamp format failed: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ExportError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ExportError::Plot(value.to_string())
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Visible data range of the on-screen plot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlotView {
    pub x: (f64, f64),
    pub y: (f64, f64),
}

impl PlotView {
    /// Full wavelength range, counts from 0 (or the minimum) to 5% above the peak
    pub fn fit(frame: &ProcessedFrame) -> Self {
        let x = frame.wavelengths.range();
        let lo = frame.min_intensity().min(0.0);
        let hi = frame.max_intensity();
        let hi = if hi > lo { hi + (hi - lo) * 0.05 } else { lo + 1.0 };
        Self { x, y: (lo, hi) }
    }

    fn is_usable(&self) -> bool {
        let ok = |(a, b): (f64, f64)| a.is_finite() && b.is_finite() && b > a;
        ok(self.x) && ok(self.y)
    }
}

/// A queued export request from the GUI
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExportJob {
    pub kind: ExportKind,
    /// Plot bounds to reproduce; None fits the data
    pub view: Option<PlotView>,
}

/// Writes the latest frame to disk as delimited text and PNG images.
///
/// Every operation reads the frame store once at entry and works on that
/// frame; acquisition is never blocked by an export in progress.
pub struct ExportManager {
    config: ExportConfig,
    store: FrameStore,
    colors: Arc<ColorTable>,
    title: String,
}

impl ExportManager {
    pub fn new(config: ExportConfig, store: FrameStore, colors: Arc<ColorTable>, title: String) -> Self {
        Self {
            config,
            store,
            colors,
            title,
        }
    }

    fn latest(&self) -> Result<Arc<ProcessedFrame>, ExportError> {
        self.store.latest().ok_or(ExportError::NoFrame)
    }

    /// `prefix_YYYYMMDD_HHMMSS`
    fn default_stem(&self) -> Result<String, ExportError> {
        let ts = local_now().format(format_description!("[year][month][day]_[hour][minute][second]"))?;
        Ok(format!("{}_{}", self.config.file_prefix, ts))
    }

    /// Write wavelength/intensity pairs. With no `path`, a fresh
    /// timestamped file is created in the output directory.
    pub fn save_data(&self, path: Option<&Path>) -> Result<PathBuf, ExportError> {
        let frame = self.latest()?;
        let ext = self.config.delimiter.extension();

        let (path, file) = match path {
            Some(path) => (path.to_path_buf(), File::create(path).map_err(io_error(path))?),
            None => {
                let stem = self.default_stem()?;
                claim_name(&stem, |candidate| {
                    let path = self.config.output_dir.join(format!("{candidate}.{ext}"));
                    create_new(&path).map(|file| (path, file))
                })?
            }
        };

        self.write_data(&frame, file, &path)?;
        tracing::info!(
            "[Export] Saved frame {} (captured {}) to {}",
            frame.sequence,
            frame.captured_at,
            path.display()
        );
        Ok(path)
    }

    /// Rasterize the plot and the strip to `{stem}_plot.png` and
    /// `{stem}_ccd.png`. With no `stem`, a fresh timestamped stem is used.
    pub fn save_visual(&self, stem: Option<&Path>, view: Option<PlotView>) -> Result<[PathBuf; 2], ExportError> {
        let frame = self.latest()?;

        let (paths, files) = match stem {
            Some(stem) => {
                let paths = visual_paths(stem);
                let plot = File::create(&paths[0]).map_err(io_error(&paths[0]))?;
                let ccd = File::create(&paths[1]).map_err(io_error(&paths[1]))?;
                (paths, [plot, ccd])
            }
            None => {
                let stem = self.default_stem()?;
                claim_name(&stem, |candidate| {
                    let paths = visual_paths(&self.config.output_dir.join(candidate));
                    let plot = create_new(&paths[0])?;
                    match create_new(&paths[1]) {
                        Ok(ccd) => Ok((paths, [plot, ccd])),
                        Err(e) => {
                            drop(plot);
                            let _ = fs::remove_file(&paths[0]);
                            Err(e)
                        }
                    }
                })?
            }
        };

        self.write_visual(&frame, files, &paths, view)?;
        tracing::info!("[Export] Saved {} and {}", paths[0].display(), paths[1].display());
        Ok(paths)
    }

    /// Create a fresh timestamped directory and save data and images into
    /// it, all named after the directory.
    pub fn save_all(&self, view: Option<PlotView>) -> Result<PathBuf, ExportError> {
        let frame = self.latest()?;
        let stem = self.default_stem()?;

        let (dir, name) = claim_name(&stem, |candidate| {
            let dir = self.config.output_dir.join(candidate);
            fs::create_dir(&dir).map(|()| (dir, candidate.to_string()))
        })?;

        let base = dir.join(&name);
        let data_path = dir.join(format!("{name}.{}", self.config.delimiter.extension()));
        let data_file = create_new(&data_path).map_err(io_error(&data_path))?;
        self.write_data(&frame, data_file, &data_path)?;

        let paths = visual_paths(&base);
        let plot = create_new(&paths[0]).map_err(io_error(&paths[0]))?;
        let ccd = create_new(&paths[1]).map_err(io_error(&paths[1]))?;
        self.write_visual(&frame, [plot, ccd], &paths, view)?;

        tracing::info!("[Export] Saved data and images in {}", dir.display());
        Ok(dir)
    }

    fn write_data(&self, frame: &ProcessedFrame, file: File, path: &Path) -> Result<(), ExportError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter.as_byte())
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(file));

        writer.write_record(HEADER)?;
        for (nm, counts) in frame.points() {
            writer.write_record([nm.to_string(), counts.to_string()])?;
        }
        writer.flush().map_err(io_error(path))
    }

    fn write_visual(
        &self,
        frame: &ProcessedFrame,
        files: [File; 2],
        paths: &[PathBuf; 2],
        view: Option<PlotView>,
    ) -> Result<(), ExportError> {
        let [plot_file, ccd_file] = files;
        let width = self.config.image_width;

        let view = view.filter(PlotView::is_usable).unwrap_or_else(|| PlotView::fit(frame));
        let plot = render_plot(frame, &view, &self.title, width, self.config.plot_height)?;
        write_png(plot, plot_file, &paths[0])?;

        let strip = render_strip(frame, &self.colors, width, self.config.strip_height)?;
        write_png(strip, ccd_file, &paths[1])
    }

    pub fn run_job(&self, job: &ExportJob) -> Result<Notification, ExportError> {
        let message = match job.kind {
            ExportKind::Data => {
                let path = self.save_data(None)?;
                format!("Saved {}", path.display())
            }
            ExportKind::Visual => {
                let [plot, ccd] = self.save_visual(None, job.view)?;
                format!("Saved {} and {}", plot.display(), ccd.display())
            }
            ExportKind::All => {
                let dir = self.save_all(job.view)?;
                format!("Saved CSV and PNG in {}/", dir.display())
            }
        };
        Ok(Notification::Exported {
            kind: job.kind,
            message,
        })
    }
}

/// Run export jobs until every job sender is dropped
pub fn spawn_worker(
    manager: ExportManager,
    jobs: Receiver<ExportJob>,
    notify: Sender<Notification>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("export".to_string())
        .spawn(move || {
            tracing::debug!("[Export] Worker started");
            for job in jobs.iter() {
                let note = match manager.run_job(&job) {
                    Ok(note) => note,
                    Err(e) => {
                        let fault = Fault::Export(e);
                        fault.log();
                        Notification::ExportFailed(fault.to_string())
                    }
                };
                // GUI gone means we're shutting down; keep draining
                let _ = notify.send(note);
            }
            tracing::debug!("[Export] Worker stopped");
        })
}

// ========================================================================
// FILE NAMING
// ========================================================================

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn visual_paths(stem: &Path) -> [PathBuf; 2] {
    let with_suffix = |suffix: &str| {
        let mut name = stem.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [with_suffix("_plot.png"), with_suffix("_ccd.png")]
}

/// Try `stem`, then `stem_1`, `stem_2`, … until `attempt` succeeds.
/// `attempt` must fail with `AlreadyExists` when a name is taken.
fn claim_name<T>(stem: &str, mut attempt: impl FnMut(&str) -> io::Result<T>) -> Result<T, ExportError> {
    for n in 0..MAX_SUFFIX {
        let candidate = if n == 0 { stem.to_string() } else { format!("{stem}_{n}") };
        match attempt(&candidate) {
            Ok(claimed) => return Ok(claimed),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(ExportError::Io {
                    path: PathBuf::from(candidate),
                    source,
                })
            }
        }
    }
    Err(ExportError::Io {
        path: PathBuf::from(stem),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
    })
}

// ========================================================================
// RASTERIZING
// ========================================================================

fn write_png(image: RgbImage, file: File, path: &Path) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(file);
    DynamicImage::ImageRgb8(image).write_to(&mut writer, ImageFormat::Png)?;
    writer.flush().map_err(io_error(path))
}

/// Detector strip at `width` × `height`: nearest-channel columns, rows duplicated
pub fn render_strip(frame: &ProcessedFrame, colors: &ColorTable, width: u32, height: u32) -> Result<RgbImage, ExportError> {
    let row = resample_nearest(&strip_colors(&frame.intensities, colors), width as usize);
    let strip = StripImage::from_row(&row, height as usize);
    RgbImage::from_raw(width, height, strip.to_rgb_bytes())
        .ok_or_else(|| ExportError::Plot("strip buffer size mismatch".into()))
}

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Register a system font for plot labels once. False if none was found.
fn labels_available() -> bool {
    static READY: OnceLock<bool> = OnceLock::new();
    *READY.get_or_init(|| {
        for candidate in FONT_CANDIDATES {
            let Ok(bytes) = fs::read(candidate) else { continue };
            // Registered fonts must live for the rest of the process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
                tracing::debug!("[Export] Plot font: {}", candidate);
                return true;
            }
        }
        tracing::warn!("[Export] No usable system font, plot images will be unlabeled");
        false
    })
}

/// Line plot of the frame over `view`
pub fn render_plot(frame: &ProcessedFrame, view: &PlotView, title: &str, width: u32, height: u32) -> Result<RgbImage, ExportError> {
    let labeled = labels_available();
    let curve = RGBColor(20, 90, 200);

    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| ExportError::Plot(format!("plot size {width}x{height} is too large")))?;
    let mut buffer = vec![0u8; len];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if labeled {
            builder
                .caption(title, ("sans-serif", 20).into_font())
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 45);
        }
        let mut chart = builder.build_cartesian_2d(view.x.0..view.x.1, view.y.0..view.y.1)?;

        if labeled {
            chart
                .configure_mesh()
                .x_desc("Wavelength (nm)")
                .y_desc("Counts")
                .light_line_style(&BLACK.mix(0.05))
                .draw()?;
        }

        let (x_lo, x_hi) = view.x;
        let series = frame.points().filter(|(nm, _)| *nm >= x_lo && *nm <= x_hi);
        chart.draw_series(LineSeries::new(series, &curve))?;

        root.present()?;
    }

    RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| ExportError::Plot("failed to allocate image buffer".into()))
}
