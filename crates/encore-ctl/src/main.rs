//! encore-ctl: interactive consumer console.
//!
//! Bootstraps against the configured broker, then repeatedly asks for an
//! artist and a song and saves the downloaded file. End of input quits.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use encore_core::config::EncoreConfig;
use encore_core::SongInfo;
use encore_services::{ConsumerClient, Download, RetryPolicy, RpcClient};

type Input = Lines<BufReader<Stdin>>;

enum Round {
    Quit,
    Skipped,
    Downloaded(Download),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EncoreConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        EncoreConfig::default()
    });

    let bootstrap = config
        .roster
        .bootstrap()
        .context("bootstrap broker is not in the roster")?;

    let mut client = ConsumerClient::new(
        bootstrap.clone(),
        RpcClient::new(config.rpc.connect_timeout()),
        RetryPolicy::from(&config.retry),
    );

    println!("Connecting to {bootstrap}...");
    let table = client
        .bootstrap()
        .await
        .with_context(|| format!("no responsibility table from {bootstrap}"))?;
    println!(
        "{} brokers, {} artists available.",
        table.len(),
        table.artists().len()
    );

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match round(&client, &mut input).await? {
            Round::Quit => return Ok(()),
            Round::Skipped => continue,
            Round::Downloaded(download) => save(&download, &config.consumer.download_dir)?,
        }
    }
}

/// One artist, song, download round.
async fn round(client: &ConsumerClient, input: &mut Input) -> Result<Round> {
    let (broker, artist) = loop {
        let Some(name) = prompt(input, "Artist: ").await? else {
            return Ok(Round::Quit);
        };
        match client.resolve(&name) {
            Some(found) => break found,
            None => println!("No broker knows {name:?}. Names are case-sensitive."),
        }
    };

    let songs = client
        .request_songs(&broker, &artist)
        .await
        .with_context(|| format!("no song list for {artist} from {broker}"))?;
    if songs.is_empty() {
        println!("{artist} has no songs.");
        return Ok(Round::Skipped);
    }
    for (i, song) in songs.iter().enumerate() {
        println!("{:>3}. {song}", i + 1);
    }

    let song = loop {
        let Some(choice) = prompt(input, "Song number: ").await? else {
            return Ok(Round::Quit);
        };
        match choice.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
            Some(i) if i < songs.len() => break &songs[i],
            _ => println!("Pick a number between 1 and {}.", songs.len()),
        }
    };

    println!("Downloading {} ({} parts)...", song.title, song.total_chunks);
    Ok(Round::Downloaded(client.download(&broker, song).await))
}

/// Print `label` and read one trimmed, non-empty line. `None` on end of input.
async fn prompt(input: &mut Input, label: &str) -> Result<Option<String>> {
    loop {
        print!("{label}");
        std::io::stdout().flush().context("failed to flush stdout")?;
        match input.next_line().await.context("failed to read stdin")? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(line.trim().to_string())),
        }
    }
}

fn save(download: &Download, dir: &Path) -> Result<()> {
    let Some(bytes) = download.assemble() else {
        println!(
            "Download incomplete, missing parts {:?}. Nothing saved.",
            download.missing_parts()
        );
        return Ok(());
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(file_name(&download.song));
    std::fs::write(&path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// `Artist - Title.ext`, with path separators replaced.
fn file_name(song: &SongInfo) -> PathBuf {
    let ext = Path::new(&song.path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let name = format!("{} - {}.{ext}", song.artist, song.title);
    PathBuf::from(name.replace(['/', '\\'], "_"))
}
