use clap::{crate_name, crate_version, value_parser, Arg, ArgAction, Command};
use gifplayer::decoder::Decoder;
use gifplayer::events::{ChannelEvents, FrameInfo, PlayerEvent};
use gifplayer::{GifDecoder, NativeDecoder, Player, Settings};
use pbr::ProgressBar;

mod png;

pub type BinResult<T, E = Box<dyn std::error::Error + Send + Sync>> = Result<T, E>;

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = bin_main() {
        eprintln!("error: {e}");
        if let Some(e) = e.source() {
            eprintln!("error: {e}");
        }
        std::process::exit(1);
    }
}

struct Options {
    file: PathBuf,
    max_frames: Option<u64>,
    seek: Option<u32>,
    dump: Option<PathBuf>,
    quiet: bool,
    settings: Settings,
}

fn bin_main() -> BinResult<()> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("Plays an animated GIF without a window, reporting progress on the console.\nRuns until interrupted, unless --frames or --seek is given.")
        .arg_required_else_help(true)
        .arg(Arg::new("library")
            .long("library")
            .short('l')
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .help("Decode with this decoder library instead of the built-in GIF decoder"))
        .arg(Arg::new("frames")
            .long("frames")
            .short('n')
            .value_name("num")
            .value_parser(value_parser!(u64).range(1..))
            .help("Stop after displaying this many frames"))
        .arg(Arg::new("seek")
            .long("seek")
            .value_name("frame")
            .value_parser(value_parser!(u32))
            .help("Wait until the file is indexed, jump to this frame (0-based), and stop"))
        .arg(Arg::new("min-interval")
            .long("min-interval")
            .value_name("ms")
            .value_parser(value_parser!(u64).range(1..))
            .default_value("16")
            .help("Shortest time a frame is displayed"))
        .arg(Arg::new("poll-interval")
            .long("poll-interval")
            .value_name("ms")
            .value_parser(value_parser!(u64).range(1..))
            .default_value("500")
            .help("How often to check whether the decoder has finished indexing"))
        .arg(Arg::new("dump")
            .long("dump")
            .short('o')
            .value_name("a.png")
            .value_parser(value_parser!(PathBuf))
            .help("Save the last displayed frame as PNG"))
        .arg(Arg::new("quiet")
            .long("quiet")
            .short('q')
            .action(ArgAction::SetTrue)
            .help("Do not display anything on standard error/console"))
        .arg(Arg::new("FILE")
            .help("Animated GIF file")
            .value_parser(value_parser!(PathBuf))
            .required(true))
        .get_matches_from(wild::args_os());

    let file = matches.get_one::<PathBuf>("FILE").ok_or("Missing file")?.clone();
    check_if_path_exists(&file)?;

    let ms = |name: &str| matches.get_one::<u64>(name).copied().map(Duration::from_millis);
    let defaults = Settings::default();
    let opts = Options {
        file,
        max_frames: matches.get_one::<u64>("frames").copied(),
        seek: matches.get_one::<u32>("seek").copied(),
        dump: matches.get_one::<PathBuf>("dump").cloned(),
        quiet: matches.get_flag("quiet"),
        settings: Settings {
            min_frame_interval: ms("min-interval").unwrap_or(defaults.min_frame_interval),
            index_poll_interval: ms("poll-interval").unwrap_or(defaults.index_poll_interval),
            autoplay: true,
        },
    };

    match matches.get_one::<PathBuf>("library") {
        Some(lib) => {
            let decoder = NativeDecoder::load(lib)
                .map_err(|e| format!("Can't use {} as a decoder: {e}", lib.display()))?;
            run(decoder, &opts)
        },
        None => run(GifDecoder::new(), &opts),
    }
}

fn run<D: Decoder>(decoder: D, opts: &Options) -> BinResult<()> {
    let (events, receiver) = ChannelEvents::new();
    let mut player = Player::new(decoder, opts.settings, Box::new(events));
    player.load(&opts.file)?;

    let mut pb = (!opts.quiet).then(|| {
        let mut pb = ProgressBar::on(io::stderr(), 100);
        pb.show_speed = false;
        pb.show_counter = false;
        pb.message("Indexing ");
        pb.set_max_refresh_rate(Some(Duration::from_millis(250)));
        pb
    });

    let mut frames_shown = 0;
    let mut last_frame = None::<FrameInfo>;
    let mut seek_done = false;
    let mut last_tick = Instant::now();
    loop {
        for event in receiver.try_iter() {
            match event {
                PlayerEvent::StatusUpdated(status) => if !opts.quiet {
                    eprintln!("{status}");
                },
                PlayerEvent::FrameUpdated(info) => {
                    log::debug!("frame {} ({}ms)", info.current_index, info.delay_ms);
                    frames_shown += 1;
                    last_frame = Some(info);
                },
                PlayerEvent::IndexStatusChanged(_) => {},
            }
        }

        let index = player.index_status();
        if let Some(bar) = pb.as_mut() {
            bar.set(index.progress.into());
            if index.ready {
                let total = player.cursor().total_frames.map_or("unknown".into(), |t| t.to_string());
                bar.finish_print(&format!("Indexed, {total} frames"));
                pb = None;
            }
        }

        if seek_done || opts.max_frames.is_some_and(|max| frames_shown >= max) {
            break;
        }
        if let Some(frame) = opts.seek {
            if index.ready {
                match player.cursor().total_frames {
                    Some(total) if frame < total => player.seek_to_frame(frame),
                    Some(total) => return Err(format!("Can't seek to frame {frame}, there are only {total}").into()),
                    None => return Err("The decoder doesn't know how many frames there are".into()),
                }
                seek_done = true;
                continue;
            }
        }

        let Some(wait) = player.next_deadline() else { break };
        thread::sleep(wait);
        let now = Instant::now();
        player.advance(now - last_tick);
        last_tick = now;
    }

    if let Some(info) = last_frame.filter(|_| !opts.quiet) {
        let total = info.total_frames.map_or("?".into(), |t| t.to_string());
        eprintln!("Shown {frames_shown} frames, last was {}/{total} ({}x{})", info.current_index + 1, info.width, info.height);
    }

    if let Some(path) = &opts.dump {
        let surface = player.surface().ok_or("Nothing to save")?;
        png::write_surface(path, surface)
            .map_err(|e| format!("Can't write to {}: {e}", path.display()))?;
        if !opts.quiet {
            let abs_path = dunce::canonicalize(path);
            eprintln!("Saved {}", abs_path.as_deref().unwrap_or(path.as_path()).display());
        }
    }

    player.dispose();
    Ok(())
}

fn check_if_path_exists(path: &Path) -> BinResult<()> {
    if !path.exists() {
        let mut msg = format!("Unable to find the input file: \"{}\"", path.display());
        if path.to_str().map_or(false, |p| p.contains('*')) {
            msg += "\nThe path contains a literal \"*\" character. Only one file can be played at a time.";
        } else if path.is_relative() {
            msg += &format!(" (searched in \"{}\")", env::current_dir()?.display());
        }
        return Err(msg.into());
    }
    Ok(())
}
