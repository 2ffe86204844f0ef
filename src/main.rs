//! sct command-line front-end.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Parser;

use sct::save::resolve_template;
use sct::{
    logging, BackendKind, Monitor, SaveOptions, SaveOutput, Session, SessionOptions,
    DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE,
};

#[derive(Parser)]
#[command(name = "sct")]
#[command(version, about = "Take screenshots of one or more monitors")]
struct Cli {
    /// The part of the screen to capture: top,left,width,height
    #[arg(short, long, value_name = "TOP,LEFT,WIDTH,HEIGHT")]
    coordinates: Option<String>,

    /// The PNG compression level
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// The monitor to screenshot: -1 all-in-one, 0 each monitor, N monitor N
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    monitor: i32,

    /// The output file name template ({mon}, {top}, {left}, {width},
    /// {height}, {date})
    #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
    output: String,

    /// Include the mouse cursor
    #[arg(long)]
    with_cursor: bool,

    /// Do not print created files
    #[arg(short, long)]
    quiet: bool,

    /// Platform-specific backend (Linux: default, xshmgetimage,
    /// xgetimage, xlib)
    #[arg(short, long, default_value = "default")]
    backend: String,
}

/// Print the canonical path of a created file.
fn announce(path: &Path, quiet: bool) {
    if !quiet {
        let shown = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        println!("{}", shown.display());
    }
}

fn parse_coordinates(arg: &str) -> Option<Monitor> {
    let fields: Vec<i64> = arg
        .split(',')
        .map(|field| field.trim().parse().ok())
        .collect::<Option<_>>()?;
    match fields[..] {
        [top, left, width, height] if width > 0 && height > 0 => Some(Monitor::new(
            left as i32,
            top as i32,
            width as u32,
            height as u32,
        )),
        _ => None,
    }
}

fn capture_region(session: &Session, region: &Monitor, output: &str, cli: &Cli) -> Result<()> {
    let resolved = resolve_template(output, 0, region, DEFAULT_DATE_FORMAT);
    let shot = session.grab(region)?;
    let png = sct::to_png(shot.raw(), (shot.width(), shot.height()), cli.level)?;
    std::fs::write(&resolved, png).with_context(|| format!("cannot write {resolved}"))?;
    announce(Path::new(&resolved), cli.quiet);
    Ok(())
}

fn capture_monitors(session: &Session, cli: &Cli) -> Result<()> {
    let save = SaveOptions::new()
        .monitor(cli.monitor)
        .output(cli.output.clone());

    let mut failures = 0usize;
    for result in session.save(save)? {
        match result {
            Ok(SaveOutput::File(path)) => announce(&path, cli.quiet),
            Ok(SaveOutput::Bytes(png)) => {
                // Empty template: stream the PNG to stdout.
                std::io::stdout()
                    .write_all(&png)
                    .context("cannot write PNG to stdout")?;
            }
            Err(err) => {
                if !cli.quiet {
                    eprintln!("sct: {err}");
                }
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} capture(s) failed");
    }
    Ok(())
}

fn run(cli: &Cli, region: Option<Monitor>) -> Result<()> {
    let backend = BackendKind::from_str(&cli.backend)?;

    // The X display name is taken from the ambient DISPLAY variable by
    // the Linux backends themselves.
    let options = SessionOptions::new()
        .compression_level(cli.level)
        .with_cursor(cli.with_cursor)
        .backend(backend);

    let session = Session::open(options)?;

    match region {
        Some(region) => {
            // Coordinate grabs get a geometry-based default name.
            let output = if cli.output == DEFAULT_TEMPLATE {
                "sct-{top}x{left}_{width}x{height}.png".to_owned()
            } else {
                cli.output.clone()
            };
            capture_region(&session, &region, &output, cli)
        }
        None => capture_monitors(&session, cli),
    }
}

fn main() -> ExitCode {
    logging::init_logging();
    let cli = Cli::parse();

    // A malformed value is a usage error and exits 2, like any other
    // bad command line; capture failures exit 1 below.
    let region = match cli.coordinates.as_deref() {
        Some(arg) => match parse_coordinates(arg) {
            Some(region) => Some(region),
            None => {
                eprintln!("sct: coordinates syntax: top,left,width,height");
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    match run(&cli, region) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !cli.quiet {
                eprintln!("sct: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
