use anyhow::{Context, Result};
use clap::Parser;
use feedcat::config::Config;
use feedcat::feeds::image::HttpImageFetcher;
use feedcat::feeds::{LineStream, Recorder, StreamHandler};
use feedcat::filter::{MuteSet, NgWordList};
use feedcat::ui::clock::LocalZone;
use feedcat::ui::color::{Background, Palette};
use feedcat::ui::image::{ImageCache, Img2Sixel, TerminalGraphics};
use feedcat::ui::{RenderSession, RenderSettings};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Show a Twitter event stream in the terminal
#[derive(Parser, Debug)]
#[command(name = "feedcat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Replay events from a file instead of reading stdin
    #[arg(long, value_name = "FILE")]
    play: Option<PathBuf>,

    /// Append every received event to a file
    #[arg(long, value_name = "FILE")]
    record: Option<PathBuf>,

    /// Number of colors: 2, 16 or 256
    #[arg(long, value_name = "N")]
    color: Option<u32>,

    /// Terminal cell height in pixels
    #[arg(long, value_name = "PX")]
    font_height: Option<u32>,

    /// Screen width in columns (0 disables wrapping)
    #[arg(long, value_name = "COLS")]
    width: Option<usize>,

    /// Colors for a light background
    #[arg(long)]
    white: bool,

    #[arg(long)]
    no_color: bool,

    #[arg(long)]
    no_image: bool,

    /// Replace bodies of protected accounts with a notice
    #[arg(long)]
    hide_protected: bool,

    /// Output character set of the terminal
    #[arg(long, value_name = "NAME")]
    codeset: Option<String>,

    /// IANA time zone for timestamps and %LIVE rules
    #[arg(long, value_name = "ZONE")]
    timezone: Option<String>,

    /// Debug logging on stderr
    #[arg(long)]
    debug: bool,

    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        let display = &mut config.display;
        if let Some(n) = self.color {
            display.color_mode = n;
        }
        if let Some(px) = self.font_height {
            display.font_height = px;
        }
        if let Some(cols) = self.width {
            display.screen_cols = Some(cols);
        }
        if self.white {
            display.background = Background::Light;
        }
        display.no_color |= self.no_color;
        display.no_image |= self.no_image;
        display.hide_protected |= self.hide_protected;
        if self.codeset.is_some() {
            display.output_codeset = self.codeset.clone();
        }
        if self.timezone.is_some() {
            config.timezone = self.timezone.clone();
        }
        if self.record.is_some() {
            config.paths.record_file = self.record.clone();
        }
    }
}

fn screen_cols(config: &Config) -> usize {
    if let Some(cols) = config.display.screen_cols {
        return cols;
    }
    if !std::io::stdout().is_terminal() {
        return 0;
    }
    crossterm::terminal::size()
        .map(|(cols, _)| usize::from(cols))
        .unwrap_or(0)
}

fn converter(config: &Config) -> Option<Arc<dyn TerminalGraphics>> {
    if config.display.no_image {
        return None;
    }
    let program = config
        .paths
        .converter
        .clone()
        .or_else(|| which::which("img2sixel").ok());
    match program {
        Some(program) => Some(Arc::new(Img2Sixel::new(
            program,
            config.display.color_mode(),
            config.paths.colormap_dir(),
        ))),
        None => {
            warn!("img2sixel not found; images disabled");
            None
        }
    }
}

fn build_session(config: &Config) -> Result<RenderSession<std::io::BufWriter<std::io::Stdout>>> {
    let display = &config.display;
    let settings = RenderSettings {
        screen_cols: screen_cols(config),
        icon_size: display.icon_size(),
        image_size: display.image_size(),
        color_mode: display.color_mode(),
        output_codeset: display.output_codeset.clone(),
        hide_protected: display.hide_protected,
        max_concurrent_images: display.max_concurrent_images,
        zone: LocalZone::parse(config.timezone.as_deref())?,
    };
    let palette = Palette::new(display.color_mode(), display.background, display.no_color);

    let mutes = match config.paths.mute_file() {
        Some(path) => MuteSet::load(&path)?,
        None => MuteSet::new(),
    };
    let ngwords = match config.paths.ngword_file() {
        Some(path) => NgWordList::load(&path)?,
        None => NgWordList::default(),
    };
    info!("{} muted users, {} ngword rules", mutes.len(), ngwords.len());

    let images = ImageCache::new(
        config.paths.cache_dir()?,
        Arc::new(HttpImageFetcher::new()),
        converter(config),
    )?;
    if let Err(e) = images.expire(SystemTime::now()) {
        warn!("cache expiry: {:#}", e);
    }

    Ok(RenderSession::new(
        settings,
        palette,
        mutes,
        ngwords,
        images,
        std::io::BufWriter::new(std::io::stdout()),
    ))
}

async fn drive<R, H>(reader: R, record: Option<&PathBuf>, handler: &mut H) -> Result<usize>
where
    R: AsyncBufRead + Unpin + Send,
    H: StreamHandler,
{
    let mut stream = LineStream::new(reader);
    if let Some(path) = record {
        stream = stream.with_recorder(Recorder::open(path).await?);
    }
    stream.run(handler).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    let mut session = build_session(&config)?;
    let record = config.paths.record_file.as_ref();

    let events = match &args.play {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            drive(BufReader::new(file), record, &mut session).await?
        }
        None => drive(BufReader::new(tokio::io::stdin()), record, &mut session).await?,
    };
    info!("end of stream after {} events", events);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "feedcat",
            "--color",
            "16",
            "--width",
            "100",
            "--white",
            "--no-image",
            "--timezone",
            "Asia/Tokyo",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.display.color_mode, 16);
        assert_eq!(config.display.screen_cols, Some(100));
        assert_eq!(config.display.background, Background::Light);
        assert!(config.display.no_image);
        assert_eq!(config.timezone.as_deref(), Some("Asia/Tokyo"));
        assert!(converter(&config).is_none());
    }

    #[test]
    fn test_explicit_width_wins() {
        let mut config = Config::default();
        config.display.screen_cols = Some(0);
        assert_eq!(screen_cols(&config), 0);
    }
}
