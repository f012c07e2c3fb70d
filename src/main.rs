extern crate clap;
extern crate env_logger;
extern crate image;
#[macro_use]
extern crate log;
extern crate num;
extern crate num_cpus;
extern crate quadbrot;

use clap::{App, Arg, ArgMatches};
use image::pnm::{PNMEncoder, PNMSubtype, SampleEncoding};
use image::ColorType;
use num::Complex;
use std::fs::File;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use quadbrot::{
    Dispatch, ForkJoinDispatcher, Mandelbrot, PooledDispatcher, RenderParams, Session,
    DEFAULT_POOL_SIZE, SHUTDOWN_GRACE,
};

// A watched session re-renders on every wall-clock multiple of this.
const REFRESH: Duration = Duration::from_secs(10);

// Splits "left<sep>right" and parses both halves as the same type.
fn split_pair<T: FromStr>(s: &str, separator: char) -> Option<(T, T)> {
    let mut halves = s.splitn(2, separator);
    match (halves.next(), halves.next()) {
        (Some(left), Some(right)) => match (left.parse::<T>(), right.parse::<T>()) {
            (Ok(l), Ok(r)) => Some((l, r)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_complex(s: &str) -> Option<Complex<f64>> {
    split_pair(s, ',').map(|(re, im)| Complex { re, im })
}

// The integer arguments all validate the same way: parse, then bound.
fn whole_number_in(s: &str, low: usize, high: usize, what: &str) -> Result<(), String> {
    match s.parse::<usize>() {
        Ok(n) if n >= low && n <= high => Ok(()),
        _ => Err(format!(
            "{} must be a whole number between {} and {}",
            what, low, high
        )),
    }
}

fn positive_float(s: &str, what: &str) -> Result<(), String> {
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => Ok(()),
        _ => Err(format!("{} must be a positive finite number", what)),
    }
}

const OUTPUT: &str = "output";
const CORNER: &str = "corner";
const BOXSIZE: &str = "boxsize";
const PIXELS: &str = "pixels";
const MINBOX: &str = "minbox";
const POOLSIZE: &str = "poolsize";
const POLICY: &str = "policy";
const ITERATIONS: &str = "iterations";
const WATCH: &str = "watch";

fn args<'a>() -> ArgMatches<'a> {
    App::new("quadbrot")
        .version("0.1.0")
        .about("Quadtree-partitioned Mandelbrot renderer")
        .arg(
            Arg::with_name(OUTPUT)
                .required(false)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .default_value("mandel.pnm")
                .help("Output file"),
        )
        .arg(
            Arg::with_name(CORNER)
                .required(false)
                .long(CORNER)
                .short("c")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("-2.0,-1.5")
                .validator(|s| match split_pair::<f64>(&s, ',') {
                    Some(_) => Ok(()),
                    None => Err("Could not parse corner point".to_string()),
                })
                .help("Upper left corner of the rendered region, real,imag"),
        )
        .arg(
            Arg::with_name(BOXSIZE)
                .required(false)
                .long(BOXSIZE)
                .short("b")
                .takes_value(true)
                .default_value("3.0")
                .validator(|s| positive_float(&s, "Box size"))
                .help("Side length of the rendered region on the complex plane"),
        )
        .arg(
            Arg::with_name(PIXELS)
                .required(false)
                .long(PIXELS)
                .short("p")
                .takes_value(true)
                .default_value("700")
                .validator(|s| whole_number_in(&s, 1, 20_000, "Pixel dimension"))
                .help("Side length of the square output image in pixels"),
        )
        .arg(
            Arg::with_name(MINBOX)
                .required(false)
                .long(MINBOX)
                .short("m")
                .takes_value(true)
                .default_value("50")
                .validator(|s| whole_number_in(&s, 1, 20_000, "Minimum box size"))
                .help("Tile side length at which subdivision stops"),
        )
        .arg(
            Arg::with_name(POOLSIZE)
                .required(false)
                .long(POOLSIZE)
                .short("t")
                .takes_value(true)
                .validator(|s| whole_number_in(&s, 1, 1_000, "Pool size"))
                .help("Number of worker threads in the bounded pool (default 20)"),
        )
        .arg(
            Arg::with_name(POLICY)
                .required(false)
                .long(POLICY)
                .takes_value(true)
                .possible_values(&["pool", "forkjoin"])
                .default_value("pool")
                .help("Work-dispatch policy"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .required(false)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .default_value("2000")
                .validator(|s| whole_number_in(&s, 1, 200_000, "Iteration count"))
                .help("Escape-time iteration budget per point"),
        )
        .arg(
            Arg::with_name(WATCH)
                .required(false)
                .long(WATCH)
                .short("w")
                .help("Keep re-rendering on every ten-second wall-clock boundary"),
        )
        .get_matches()
}

fn write_image(outfile: &str, pixels: &[u8], dim: usize) -> Result<(), std::io::Error> {
    let output = File::create(outfile)?;
    let mut encoder =
        PNMEncoder::new(output).with_subtype(PNMSubtype::Graymap(SampleEncoding::Binary));
    encoder.encode(pixels, dim as u32, dim as u32, ColorType::Gray(8))?;
    Ok(())
}

// Milliseconds until the next wall-clock multiple of the refresh
// interval, so repeated frames land on :00, :10, :20, ...
fn delay_to_boundary() -> Duration {
    let interval = REFRESH.as_secs() * 1000;
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() * 1000 + u64::from(elapsed.subsec_millis()))
        .unwrap_or(0);
    let over = since_epoch % interval;
    if over == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis(interval - over)
    }
}

fn render_frame(session: &Session, outfile: &str) {
    session.render();
    if !session.wait_idle(REFRESH) {
        warn!("frame still incomplete after {:?}; writing it anyway", REFRESH);
    }
    if let Err(e) = write_image(outfile, &session.snapshot(), session.pixel_dim()) {
        eprintln!("Could not write {}: {}", outfile, e);
        std::process::exit(1);
    }
}

fn main() {
    env_logger::init();
    let matches = args();

    let corner =
        parse_complex(matches.value_of(CORNER).unwrap()).expect("Error parsing corner point");
    let box_size: f64 = matches
        .value_of(BOXSIZE)
        .unwrap()
        .parse()
        .expect("Error parsing box size");
    let pixels: usize = matches
        .value_of(PIXELS)
        .unwrap()
        .parse()
        .expect("Error parsing pixel dimension");
    let min_box: usize = matches
        .value_of(MINBOX)
        .unwrap()
        .parse()
        .expect("Error parsing minimum box size");
    let pool_size = match matches.value_of(POOLSIZE) {
        Some(s) => s.parse().expect("Error parsing pool size"),
        None => DEFAULT_POOL_SIZE,
    };
    let iterations: usize = matches
        .value_of(ITERATIONS)
        .unwrap()
        .parse()
        .expect("Error parsing iteration count");
    let outfile = matches.value_of(OUTPUT).unwrap();

    let params = match RenderParams::new(corner.re, corner.im, box_size, pixels, min_box, pool_size)
    {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher: Box<dyn Dispatch> = match matches.value_of(POLICY).unwrap() {
        "forkjoin" => Box::new(ForkJoinDispatcher::new()),
        _ => Box::new(PooledDispatcher::new(params.pool_size)),
    };

    info!(
        "rendering {0}x{0} pixels, min box {1}, pool of {2} on a {3}-cpu machine",
        params.pixel_dim,
        params.min_box_size,
        params.pool_size,
        num_cpus::get()
    );

    let session = Session::new(params, Box::new(Mandelbrot::new(iterations)), dispatcher);

    if matches.is_present(WATCH) {
        // First frame right away, then one per boundary until killed.
        render_frame(&session, outfile);
        loop {
            thread::sleep(delay_to_boundary());
            info!("re-rendering");
            render_frame(&session, outfile);
        }
    }

    render_frame(&session, outfile);
    session.close(SHUTDOWN_GRACE);
}
