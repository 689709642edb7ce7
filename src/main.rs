use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use stickercam_lib::config::{ApiKey, PipelineConfig};
use stickercam_lib::db::{Database, NewSticker, Sticker, StickerStyle};
use stickercam_lib::frames::{FileFrameSource, FrameSource};
use stickercam_lib::models::{SegmentationResult, SourceMode};
use stickercam_lib::poller::{PollerCondition, PollerStatus, SegmentationPoller, StickerSink};
use stickercam_lib::segmentation::SegmentationClient;
use stickercam_lib::{init_logging, BUNDLED_CONFIG_FILE, DATABASE_FILE};
use uuid::Uuid;

/// Turn camera frames into stickers with SAM3 on fal.ai.
#[derive(Parser, Debug)]
#[command(name = "stickercam")]
#[command(about = "Segment images into stickers and manage the local sticker library")]
struct Cli {
    /// Where the sticker database and config.json live
    #[arg(long, global = true, default_value = ".stickercam")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment a single image once
    Segment {
        image: PathBuf,
        #[arg(short, long, help = "What to cut out, e.g. \"coffee mug\"")]
        prompt: String,
        #[arg(short, long, help = "Write the cropped mask PNG here")]
        output: Option<PathBuf>,
        #[arg(long, help = "Store the result in the sticker library")]
        save: bool,
    },
    /// Poll an image file that another tool keeps overwriting
    Watch {
        image: PathBuf,
        #[arg(short, long)]
        prompt: String,
        #[arg(short, long, default_value_t = 2.0, help = "Seconds between submissions (minimum 1)")]
        interval: f64,
        #[arg(long, help = "Treat each cycle as a fresh photo capture")]
        photo: bool,
        #[arg(long, help = "Auto-save every result to the sticker library")]
        save: bool,
        #[arg(short, long, help = "Stop after this long: 30s, 2m, 1h (default: until Ctrl-C)")]
        duration: Option<String>,
    },
    /// List saved stickers, newest first
    List {
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Mark or unmark a sticker as favorite
    Favorite {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Replace a sticker's tags
    Tag { id: String, tags: Vec<String> },
    /// Pick the display style: original, outlined, cartoon, neon, retro
    Style { id: String, style: StickerStyle },
    /// Delete a sticker
    Delete { id: String },
    /// Write a sticker's image to a file
    Export { id: String, out: PathBuf },
    /// Show the newest sticker saved for a prompt
    Latest {
        prompt: String,
        #[arg(short, long, help = "Also write its image here")]
        out: Option<PathBuf>,
    },
    /// Delete all but the newest stickers; favorites are always kept
    Prune {
        #[arg(long, default_value_t = 100)]
        keep: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Segment {
            image,
            prompt,
            output,
            save,
        } => segment_once(&cli.data_dir, &image, &prompt, output.as_deref(), save).await,
        Command::Watch {
            image,
            prompt,
            interval,
            photo,
            save,
            duration,
        } => {
            let duration = duration.as_deref().map(parse_duration).transpose()?;
            watch(&cli.data_dir, image, prompt, interval, photo, save, duration).await
        }
        Command::List {
            favorites,
            prompt,
            limit,
        } => {
            let db = open_db(&cli.data_dir)?;
            let stickers = match (favorites, prompt) {
                (true, _) => db.favorite_stickers().await?,
                (false, Some(prompt)) => db.stickers_by_prompt(&prompt).await?,
                (false, None) => db.recent_stickers(limit).await?,
            };
            if stickers.is_empty() {
                println!("No stickers yet.");
            }
            for sticker in stickers.iter().take(limit as usize) {
                print_sticker(sticker);
            }
            Ok(())
        }
        Command::Favorite { id, off } => {
            let db = open_db(&cli.data_dir)?;
            if !db.set_favorite(&id, !off).await? {
                bail!("no sticker with id {id}");
            }
            println!("{id} {}", if off { "unfavorited" } else { "favorited" });
            Ok(())
        }
        Command::Tag { id, tags } => {
            let db = open_db(&cli.data_dir)?;
            let stored = db.set_tags(&id, tags).await?;
            println!("{id} tags: {}", stored.join(", "));
            Ok(())
        }
        Command::Style { id, style } => {
            let db = open_db(&cli.data_dir)?;
            if !db.set_style(&id, style).await? {
                bail!("no sticker with id {id}");
            }
            println!("{id} style: {style}");
            Ok(())
        }
        Command::Delete { id } => {
            let db = open_db(&cli.data_dir)?;
            if !db.delete_sticker(&id).await? {
                bail!("no sticker with id {id}");
            }
            println!("deleted {id}");
            Ok(())
        }
        Command::Export { id, out } => {
            let db = open_db(&cli.data_dir)?;
            let sticker = db
                .get_sticker(&id)
                .await?
                .ok_or_else(|| anyhow!("no sticker with id {id}"))?;
            std::fs::write(&out, &sticker.image)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} ({} bytes)", out.display(), sticker.image.len());
            Ok(())
        }
        Command::Latest { prompt, out } => {
            let db = open_db(&cli.data_dir)?;
            let Some(sticker) = db.latest_for_prompt(&prompt).await? else {
                println!("No \"{prompt}\" stickers yet.");
                return Ok(());
            };
            print_sticker(&sticker);
            if let Some(out) = out {
                std::fs::write(&out, &sticker.image)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("wrote {}", out.display());
            }
            Ok(())
        }
        Command::Prune { keep } => {
            let db = open_db(&cli.data_dir)?;
            let removed = db.prune_stickers(keep).await?;
            println!("removed {removed} stickers, {} left", db.sticker_count().await?);
            Ok(())
        }
    }
}

fn open_db(data_dir: &Path) -> Result<Database> {
    Database::new(data_dir.join(DATABASE_FILE))
}

fn build_client(data_dir: &Path, config: PipelineConfig) -> Result<SegmentationClient> {
    let api_key = ApiKey::resolve(Some(&data_dir.join(BUNDLED_CONFIG_FILE)))
        .ok_or_else(|| anyhow!("no fal.ai API key: set FAL_KEY or add fal_api_key to {BUNDLED_CONFIG_FILE}"))?;
    Ok(SegmentationClient::new(config, Some(api_key))?)
}

async fn segment_once(
    data_dir: &Path,
    image: &Path,
    prompt: &str,
    output: Option<&Path>,
    save: bool,
) -> Result<()> {
    let client = build_client(data_dir, PipelineConfig::default())?;
    let frame = FileFrameSource::new(image)
        .latest_frame()
        .ok_or_else(|| anyhow!("could not read an image from {}", image.display()))?;

    let Some(result) = client.segment(&frame, prompt).await? else {
        println!("No \"{prompt}\" found.");
        return Ok(());
    };
    let result = match result.mask_url().map(str::to_owned) {
        Some(url) => {
            let mask = client.download_mask(&url).await?;
            result.with_mask_image(mask)
        }
        None => result,
    };
    print_result(&result);

    if let (Some(path), Some(mask)) = (output, result.mask_image()) {
        std::fs::write(path, mask.bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("mask written to {}", path.display());
    }

    if save {
        let sticker = NewSticker::from_result(&result, prompt)
            .ok_or_else(|| anyhow!("result has no mask image to save"))?;
        let saved = open_db(data_dir)?.save_sticker(sticker).await?;
        println!("saved sticker {}", saved.id);
    }
    Ok(())
}

async fn watch(
    data_dir: &Path,
    image: PathBuf,
    prompt: String,
    interval: f64,
    photo: bool,
    save: bool,
    duration: Option<Duration>,
) -> Result<()> {
    let config = PipelineConfig::default();
    let client = Arc::new(build_client(data_dir, config.clone())?);
    let source: Arc<dyn FrameSource> = Arc::new(FileFrameSource::new(image));
    let sink: Option<Arc<dyn StickerSink>> = if save {
        Some(Arc::new(open_db(data_dir)?))
    } else {
        None
    };

    let poller = SegmentationPoller::new(config, client, source, sink);
    poller.set_prompt(prompt).await;
    poller
        .set_source_mode(if photo {
            SourceMode::FreshPhotoCapture
        } else {
            SourceMode::LatestVideoFrame
        })
        .await;
    poller.set_auto_save(save).await;
    let applied = poller.set_polling_interval(interval).await;
    println!("polling every {:.1}s, Ctrl-C to stop", applied.as_secs_f64());

    let mut updates = poller.subscribe();
    poller.start().await;

    let deadline = async {
        match duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut reporter = WatchLog::default();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                for event in reporter.observe(&status) {
                    match event {
                        WatchEvent::Result(result) => print_result(&result),
                        WatchEvent::Error(message) => eprintln!("error: {message}"),
                        WatchEvent::Waiting(condition) => eprintln!("waiting: {condition:?}"),
                    }
                }
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.stop().await;
    println!("{} results this session", poller.history().await.len());
    Ok(())
}

enum WatchEvent {
    Result(SegmentationResult),
    Error(String),
    Waiting(PollerCondition),
}

/// Turns the status stream into lines worth printing: each new result, and
/// errors or conditions only when they change.
#[derive(Default)]
struct WatchLog {
    last_seen: Option<Uuid>,
    last_error: Option<String>,
    last_condition: Option<PollerCondition>,
}

impl WatchLog {
    fn observe(&mut self, status: &PollerStatus) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        if let Some(result) = &status.last_result {
            if self.last_seen != Some(result.id()) {
                self.last_seen = Some(result.id());
                events.push(WatchEvent::Result(result.clone()));
            }
        }
        if status.last_error != self.last_error {
            if let Some(message) = &status.last_error {
                events.push(WatchEvent::Error(message.clone()));
            }
            self.last_error = status.last_error.clone();
        }
        if status.condition != self.last_condition {
            if let Some(condition) = status.condition {
                events.push(WatchEvent::Waiting(condition));
            }
            self.last_condition = status.condition;
        }
        events
    }
}

fn print_result(result: &SegmentationResult) {
    let score = result
        .score()
        .map(|s| format!("{s:.3}"))
        .unwrap_or_else(|| "-".into());
    let bbox = result
        .bounding_box()
        .map(|b| format!("[{:.0}, {:.0}, {:.0}, {:.0}]", b.x_min, b.y_min, b.x_max, b.y_max))
        .unwrap_or_else(|| "-".into());
    let mask = result
        .mask_image()
        .map(|m| format!("{}x{} ({} bytes)", m.width, m.height, m.len()))
        .unwrap_or_else(|| "not downloaded".into());
    println!(
        "{} score={score} box={bbox} mask={mask}",
        result.created_at().format("%H:%M:%S")
    );
}

fn print_sticker(sticker: &Sticker) {
    let favorite = if sticker.is_favorite { "*" } else { " " };
    let score = sticker
        .score
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "-".into());
    let tags = if sticker.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", sticker.tags.join(", "))
    };
    println!(
        "{favorite} {}  {}  {:<20} {score} {}x{} {}{tags}",
        sticker.id,
        sticker.created_at.format("%Y-%m-%d %H:%M"),
        sticker.prompt,
        sticker.image_width,
        sticker.image_height,
        sticker.style,
    );
}

/// Parse duration string like "30s", "2m", "1h"
fn parse_duration(duration: &str) -> Result<Duration> {
    if let Ok(seconds) = duration.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    let Some((split, unit)) = duration.char_indices().last() else {
        bail!("Invalid duration format: {duration}");
    };

    let number = &duration[..split];
    let number: u64 = number
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {number}"))?;
    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => bail!("Invalid duration unit: {unit}. Use 's', 'm' or 'h'"),
    };
    number
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration out of range: {duration}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("x").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5é").is_err());
        assert!(parse_duration(&format!("{}h", u64::MAX)).is_err());
    }

    fn idle_status(condition: Option<PollerCondition>) -> PollerStatus {
        PollerStatus {
            enabled: true,
            polling_interval_secs: 2.0,
            prompt: "mug".into(),
            source_mode: SourceMode::LatestVideoFrame,
            auto_save_enabled: false,
            is_processing: false,
            last_error: None,
            last_result: None,
            history_len: 0,
            condition,
        }
    }

    #[test]
    fn watch_log_reports_conditions_once() {
        let mut reporter = WatchLog::default();
        let waiting = idle_status(Some(PollerCondition::SourceUnavailable));

        assert!(matches!(
            &reporter.observe(&waiting)[..],
            [WatchEvent::Waiting(PollerCondition::SourceUnavailable)]
        ));
        let busy = PollerStatus {
            is_processing: true,
            history_len: 3,
            ..waiting.clone()
        };
        assert!(reporter.observe(&busy).is_empty());
        assert!(reporter.observe(&waiting).is_empty());

        assert!(reporter.observe(&idle_status(None)).is_empty());
        assert_eq!(reporter.observe(&idle_status(Some(PollerCondition::MissingApiKey))).len(), 1);
    }

    #[test]
    fn watch_log_reports_each_error_once() {
        let mut reporter = WatchLog::default();
        let failing = PollerStatus {
            last_error: Some("HTTP 500".into()),
            ..idle_status(None)
        };

        assert!(matches!(&reporter.observe(&failing)[..], [WatchEvent::Error(m)] if m == "HTTP 500"));
        assert!(reporter.observe(&failing).is_empty());
        assert!(reporter.observe(&idle_status(None)).is_empty());
        assert_eq!(reporter.observe(&failing).len(), 1);
    }

    #[test]
    fn cli_parses_library_maintenance() {
        let cli = Cli::try_parse_from(["stickercam", "prune", "--keep", "10"]).unwrap();
        assert!(matches!(cli.command, Command::Prune { keep: 10 }));

        let cli = Cli::try_parse_from(["stickercam", "prune"]).unwrap();
        assert!(matches!(cli.command, Command::Prune { keep: 100 }));

        let cli = Cli::try_parse_from(["stickercam", "latest", "mug", "-o", "mug.png"]).unwrap();
        match cli.command {
            Command::Latest { prompt, out } => {
                assert_eq!(prompt, "mug");
                assert_eq!(out, Some(PathBuf::from("mug.png")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parses_watch() {
        let cli = Cli::try_parse_from([
            "stickercam", "watch", "frame.jpg", "--prompt", "mug", "--interval", "0.5", "--photo",
        ])
        .unwrap();
        match cli.command {
            Command::Watch {
                interval, photo, ..
            } => {
                assert_eq!(interval, 0.5);
                assert!(photo);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
