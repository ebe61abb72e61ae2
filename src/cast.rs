// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Turn a music playlist into a servable podcast.
//!
//! Every playlist entry is re-encoded to MP3 under a content-derived name, an
//! RSS feed listing the episodes is generated, and a minimal lighttpd
//! configuration is written so the output directory can be served as-is.

use crate::{
    hash::sha256_file,
    path::current_user,
    process::{capture, which, ProcessError},
};

use chrono::{DateTime, Duration as Delta, TimeZone};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{seq::SliceRandom, Rng};
use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{metadata, read_to_string, write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Port the generated lighttpd configuration listens on.
pub const SERVER_PORT: u16 = 8000;

/// Bit rate episodes are encoded with.
pub const BIT_RATE: &str = "192k";

/// Options for building a podcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastOptions {
    /// Playlist, one file per line.
    pub input: PathBuf,

    /// Existing directory to write episodes, feed, and server config to.
    pub output: PathBuf,

    /// Base URL episodes will be served from.
    pub prefix: String,

    /// Randomise episode order.
    pub shuffle: bool,

    /// Channel title and description.
    pub title: String,
}

/// One episode of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub title: String,
    pub guid: String,
    pub url: String,
    pub length: u64,
    pub pub_date: String,
    pub duration: String,
}

/// RSS channel with its episodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub episodes: Vec<Episode>,
}

impl Display for Feed {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "<?xml version='1.0' encoding='UTF-8'?>")?;
        writeln!(
            fmt,
            r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">"#
        )?;
        writeln!(fmt, "  <channel>")?;
        writeln!(fmt, "    <title>{}</title>", xml_escape(&self.title))?;
        writeln!(fmt, "    <link>{}</link>", xml_escape(&self.link))?;
        writeln!(fmt, "    <description>{}</description>", xml_escape(&self.description))?;
        writeln!(fmt, "    <itunes:author>{}</itunes:author>", xml_escape(&self.author))?;

        for episode in &self.episodes {
            writeln!(fmt, "    <item>")?;
            writeln!(fmt, "      <title>{}</title>", xml_escape(&episode.title))?;
            writeln!(
                fmt,
                r#"      <enclosure url="{}" length="{}" type="audio/mpeg" />"#,
                xml_escape(&episode.url),
                episode.length
            )?;
            writeln!(fmt, "      <pubDate>{}</pubDate>", xml_escape(&episode.pub_date))?;
            writeln!(fmt, "      <guid>{}</guid>", xml_escape(&episode.guid))?;
            writeln!(
                fmt,
                "      <itunes:duration>{}</itunes:duration>",
                xml_escape(&episode.duration)
            )?;
            writeln!(fmt, "    </item>")?;
        }

        writeln!(fmt, "  </channel>")?;
        writeln!(fmt, "</rss>")
    }
}

/// Escape text for use in XML content and attribute values.
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Format whole seconds as `MM:SS`.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Publication date of the episode at index, counting minutes from start.
pub fn publication_date<Tz: TimeZone>(start: &DateTime<Tz>, index: usize) -> String
where
    Tz::Offset: Display,
{
    (start.clone() + Delta::minutes(index as i64)).to_rfc2822()
}

/// List playlist entries, skipping blank lines.
pub fn read_playlist(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Lighttpd configuration serving document root.
pub fn lighttpd_conf(document_root: &Path) -> String {
    format!(
        "server.document-root = \"{}\"\nserver.port = {SERVER_PORT}\nmimetype.assign = (\".mp3\" => \"audio/mpeg\")\n",
        document_root.display()
    )
}

/// Encode every playlist entry, then write feed and server configuration.
///
/// Returns path of the written feed.
///
/// # Errors
///
/// - Return [`CastError::NotADirectory`] if output is not a directory.
/// - Return [`CastError::MissingTool`] if ffmpeg or ffprobe are missing.
/// - Return [`CastError::Encode`] if an entry fails to encode.
/// - Return [`CastError::Io`] if a file cannot be read or written.
#[instrument(skip(opts, rng), level = "debug")]
pub fn build(opts: &CastOptions, rng: &mut impl Rng) -> Result<PathBuf> {
    if !opts.output.is_dir() {
        return Err(CastError::NotADirectory {
            path: opts.output.clone(),
        });
    }

    for tool in ["ffmpeg", "ffprobe"] {
        if which(tool).is_none() {
            return Err(CastError::MissingTool { tool });
        }
    }

    let content = read_to_string(&opts.input).map_err(|source| CastError::Io {
        source,
        path: opts.input.clone(),
    })?;
    let mut entries = read_playlist(&content);
    if opts.shuffle {
        entries.shuffle(rng);
    }

    let bar = ProgressBar::new(entries.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]")?
            .progress_chars("-Cco."),
    );

    let start = chrono::Local::now() - Delta::hours(1);
    let mut episodes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        bar.set_message(format!("encoding {}", entry.display()));
        episodes.push(encode(entry, opts, publication_date(&start, index))?);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let feed = Feed {
        title: opts.title.clone(),
        link: opts.prefix.clone(),
        description: opts.title.clone(),
        author: current_user(),
        episodes,
    };

    let feed_path = opts.output.join("feed.xml");
    write(&feed_path, feed.to_string()).map_err(|source| CastError::Io {
        source,
        path: feed_path.clone(),
    })?;

    let root = std::path::absolute(&opts.output).map_err(|source| CastError::Io {
        source,
        path: opts.output.clone(),
    })?;
    let conf_path = opts.output.join("lighttpd.conf");
    write(&conf_path, lighttpd_conf(&root)).map_err(|source| CastError::Io {
        source,
        path: conf_path.clone(),
    })?;

    info!("wrote feed with {} episodes", feed.episodes.len());
    Ok(feed_path)
}

fn encode(entry: &Path, opts: &CastOptions, pub_date: String) -> Result<Episode> {
    let guid = sha256_file(entry).map_err(|source| CastError::Io {
        source,
        path: entry.to_path_buf(),
    })?;
    let output = opts.output.join(format!("{guid}.mp3"));

    let outcome = capture(
        "ffmpeg",
        [
            OsStr::new("-y"),
            OsStr::new("-i"),
            entry.as_os_str(),
            OsStr::new("-ab"),
            OsStr::new(BIT_RATE),
            output.as_os_str(),
        ],
    )?;
    if !outcome.success() {
        return Err(CastError::Encode {
            path: entry.to_path_buf(),
            message: outcome.stderr,
        });
    }

    let length = metadata(&output)
        .map_err(|source| CastError::Io {
            source,
            path: output.clone(),
        })?
        .len();

    Ok(Episode {
        title: entry
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
        url: format!("{}{guid}.mp3", opts.prefix),
        guid,
        length,
        pub_date,
        duration: format_duration(probe_duration(&output)?),
    })
}

fn probe_duration(path: &Path) -> Result<u64> {
    let outcome = capture(
        "ffprobe",
        [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format=duration"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            path.as_os_str(),
        ],
    )?;

    outcome
        .stdout
        .trim()
        .parse::<f64>()
        .map(|seconds| seconds.max(0.0) as u64)
        .map_err(|_| CastError::Duration {
            path: path.to_path_buf(),
        })
}

/// Podcast builder error types.
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    /// Output location is not a directory.
    #[error("{} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Required program is not installed.
    #[error("{tool} not found")]
    MissingTool { tool: &'static str },

    /// Encoder failed.
    #[error("failed to encode {:?}: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    /// Duration could not be determined.
    #[error("failed to determine duration of {:?}", path.display())]
    Duration { path: PathBuf },

    /// File cannot be read or written.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// External program failed to start.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Progress template is invalid.
    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = CastError> = std::result::Result<T, E>;
