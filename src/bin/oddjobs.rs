// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oddjobs::{
    build::{RuleSet, Signatures, DEFAULT_BUILD_FILE},
    cast::{self, CastOptions},
    compress::{compress, default_compressors},
    config::{Settings, SmtpSettings},
    cub::Linter,
    dd,
    desktop::{detect_window_manager, typist, Capabilities, SystemCapabilities},
    forward::Forwarder,
    git::{
        branch::{self, CleanupOptions},
        rebase::{self, RetimeOptions},
        GitRepo,
    },
    lottery::{regular_users, Scores, DEFAULT_DATABASE, DEFAULT_MIN_UID},
    mail::{Dispatch, Draft, Postman, SmtpPostman},
    mbox::Mailbox,
    path::{default_config_file, default_mbox, default_signature_cache, hostname},
    reroute::{reroute, RerouteOptions},
    watch::{FileTable, Scanner},
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::{
    env::current_dir,
    ffi::OsString,
    fs::read_to_string,
    io::{IsTerminal, Read},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oddjobs [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<i32> {
        let config = match self.config {
            Some(path) => path,
            None => default_config_file()?,
        };
        let settings = Settings::load(config)?;

        match self.command {
            Command::Forward(opts) => run_forward(opts, settings).await,
            Command::Sendmail(opts) => run_sendmail(opts, settings).await,
            Command::Watch(opts) => run_watch(opts, settings).await,
            Command::Lottery(opts) => run_lottery(opts),
            Command::Build(opts) => run_build(opts),
            Command::GitCleanup(opts) => run_git_cleanup(opts),
            Command::GitIncrement(opts) => run_git_increment(opts),
            Command::GitReup(opts) => run_git_reup(opts),
            Command::GitEdit(opts) => run_git_edit(opts),
            Command::GitRetime(opts) => run_git_retime(opts),
            Command::Compress(opts) => run_compress(opts).await,
            Command::Cub(opts) => run_cub(opts),
            Command::Cast(opts) => run_cast(opts),
            Command::Dd(opts) => Ok(dd::run(opts.operands).await?),
            Command::Wm(opts) => run_wm(opts),
            Command::Typist => Ok(run_typist(settings)),
            Command::Reroute(opts) => Ok(run_reroute(opts, settings)),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Forward local mailbox to another address over SMTP.
    #[command(override_usage = "oddjobs forward [options] --from <addr> --to <addr>")]
    Forward(ForwardOptions),

    /// Send mail with body read from stdin.
    #[command(override_usage = "oddjobs sendmail [options] --from <addr> --to <addr>...")]
    Sendmail(SendmailOptions),

    /// Record file changes below directories, and report them.
    #[command(override_usage = "oddjobs watch [options] --database <file> --path <dir>...")]
    Watch(WatchOptions),

    /// Pick a user at random, favouring those picked least.
    #[command(override_usage = "oddjobs lottery [options]")]
    Lottery(LotteryOptions),

    /// Build target from JSON build file.
    #[command(override_usage = "oddjobs build [options] [target]")]
    Build(BuildOptions),

    /// Delete branch series once merged.
    #[command(override_usage = "oddjobs git-cleanup [options] <branch>")]
    GitCleanup(GitCleanupOptions),

    /// Start next iteration of branch series.
    #[command(override_usage = "oddjobs git-increment [options] <branch>")]
    GitIncrement(GitIncrementOptions),

    /// Rebase current branch onto upstream.
    #[command(override_usage = "oddjobs git-reup [options]")]
    GitReup(GitRebaseOptions),

    /// Interactively edit commits not yet upstream.
    #[command(override_usage = "oddjobs git-edit [options]")]
    GitEdit(GitRebaseOptions),

    /// Rewrite commit dates of a range to now.
    #[command(override_usage = "oddjobs git-retime [options] [base] [head]")]
    GitRetime(GitRetimeOptions),

    /// Compress file with whichever format turns out smallest.
    #[command(override_usage = "oddjobs compress <file>")]
    Compress(CompressOptions),

    /// Look for C undefined behaviour idioms.
    #[command(override_usage = "oddjobs cub <path>")]
    Cub(CubOptions),

    /// Build podcast feed from playlist.
    #[command(override_usage = "oddjobs cast [options] --input <playlist> --output <dir> --prefix <url>")]
    Cast(CastCliOptions),

    /// Run dd with live progress.
    #[command(override_usage = "oddjobs dd [operands]...")]
    Dd(DdOptions),

    /// Show current window manager.
    #[command(override_usage = "oddjobs wm [options]")]
    Wm(TtyOptions),

    /// Type characters not found on the keyboard.
    #[command(override_usage = "oddjobs typist")]
    Typist,

    /// Run configured shortcut.
    #[command(override_usage = "oddjobs reroute [options] [shortcut]")]
    Reroute(RerouteCliOptions),
}

#[derive(Args, Clone, Debug, Default)]
struct SmtpOptions {
    /// SMTP server to send through.
    #[arg(long, value_name = "host")]
    pub server: Option<String>,

    /// Port of SMTP server.
    #[arg(long, value_name = "port")]
    pub port: Option<u16>,

    /// Upgrade connection with STARTTLS.
    #[arg(long)]
    pub tls: bool,

    /// Login name for SMTP authentication.
    #[arg(long, value_name = "name")]
    pub login: Option<String>,

    /// Password for SMTP authentication.
    #[arg(long, value_name = "password")]
    pub password: Option<String>,
}

impl SmtpOptions {
    /// Merge flags over configured settings.
    fn settings(self, base: Option<SmtpSettings>) -> Result<SmtpSettings> {
        let mut settings = match (self.server, base) {
            (Some(server), Some(base)) => SmtpSettings { server, ..base },
            (Some(server), None) => SmtpSettings::new(server),
            (None, Some(base)) => base,
            (None, None) => return Err(anyhow!("no SMTP server given")),
        };

        if let Some(port) = self.port {
            settings.port = port;
        }
        settings.tls |= self.tls;
        if self.login.is_some() {
            settings.login = self.login;
        }
        if self.password.is_some() {
            settings.password = self.password;
        }

        Ok(settings)
    }
}

fn sender(from: Option<String>, smtp: Option<&SmtpSettings>) -> Result<String> {
    from.or_else(|| smtp.and_then(|smtp| smtp.from.clone()))
        .ok_or_else(|| anyhow!("no sender address given"))
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ForwardOptions {
    /// Address to send forwarded mail from.
    #[arg(short, long, value_name = "addr")]
    pub from: Option<String>,

    /// Address to forward mail to.
    #[arg(short, long, required = true, value_name = "addr")]
    pub to: String,

    /// Mailbox to forward, default is local mailbox of current user.
    #[arg(short, long, value_name = "path")]
    pub mbox: Option<PathBuf>,

    #[command(flatten)]
    pub smtp: SmtpOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SendmailOptions {
    /// Sender address.
    #[arg(short, long, value_name = "addr")]
    pub from: Option<String>,

    /// Primary recipients.
    #[arg(short, long, required = true, value_name = "addr")]
    pub to: Vec<String>,

    /// Carbon copy recipients.
    #[arg(long, value_name = "addr")]
    pub cc: Vec<String>,

    /// Blind carbon copy recipients.
    #[arg(long, value_name = "addr")]
    pub bcc: Vec<String>,

    /// Subject line.
    #[arg(short, long, default_value = "", value_name = "text")]
    pub subject: String,

    /// Date header in RFC 2822 form, default is now.
    #[arg(short, long, value_name = "date")]
    pub date: Option<String>,

    /// Do not send anything if body is empty.
    #[arg(long)]
    pub empty: bool,

    /// Print message instead of sending it.
    #[arg(long)]
    pub debug: bool,

    #[command(flatten)]
    pub smtp: SmtpOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WatchOptions {
    /// File to keep track of watched files in.
    #[arg(short, long, required = true, value_name = "file")]
    pub database: PathBuf,

    /// Directories to watch.
    #[arg(short, long = "path", required = true, value_name = "dir")]
    pub paths: Vec<PathBuf>,

    /// Also compare file content hashes.
    #[arg(long)]
    pub hash: bool,

    /// Skip paths matching glob.
    #[arg(short, long, value_name = "glob")]
    pub exclude: Vec<String>,

    /// Mail report to these addresses.
    #[arg(short, long, value_name = "addr")]
    pub to: Vec<String>,

    /// Address to mail report from.
    #[arg(short, long, value_name = "addr")]
    pub from: Option<String>,

    /// Subject of report mail.
    #[arg(short, long, value_name = "text")]
    pub subject: Option<String>,

    #[command(flatten)]
    pub smtp: SmtpOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LotteryOptions {
    /// Score table to read and update.
    #[arg(short, long, default_value = DEFAULT_DATABASE, value_name = "file")]
    pub filename: PathBuf,

    /// Users not to consider this time.
    #[arg(short, long, value_name = "user")]
    pub exclude: Vec<String>,

    /// Account database to find users in.
    #[arg(long, default_value = "/etc/passwd", value_name = "file")]
    pub passwd: PathBuf,

    /// Lowest uid of a regular user.
    #[arg(long, default_value_t = DEFAULT_MIN_UID, value_name = "uid")]
    pub min_uid: u32,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildOptions {
    /// Build file to read rules from.
    #[arg(short, long, default_value = DEFAULT_BUILD_FILE, value_name = "file")]
    pub file: PathBuf,

    /// Say what is being done and why.
    #[arg(short, long)]
    pub verbose: bool,

    /// Dependency signature cache.
    #[arg(short, long, value_name = "file")]
    pub cache: Option<PathBuf>,

    /// Target to build, default is first rule.
    #[arg(value_name = "target")]
    pub target: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GitCleanupOptions {
    /// Branch series to delete, optionally as `fork:branch`.
    #[arg(required = true, value_name = "branch")]
    pub branch: String,

    /// Only show what would be deleted.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Remote the series was merged into.
    #[arg(short, long, default_value = "origin", value_name = "remote")]
    pub remote: String,

    /// Branch the series was merged into, default branch of remote if unset.
    #[arg(short, long, value_name = "branch")]
    pub onto: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GitIncrementOptions {
    /// Branch series to extend.
    #[arg(required = true, value_name = "branch")]
    pub branch: String,

    /// Remote to compare against.
    #[arg(short, long, default_value = "origin", value_name = "remote")]
    pub remote: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GitRebaseOptions {
    /// Remote to rebase onto.
    #[arg(short, long, default_value = "origin", value_name = "remote")]
    pub remote: String,

    /// Branch to rebase onto, default branch of remote if unset.
    #[arg(short, long, value_name = "branch")]
    pub onto: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GitRetimeOptions {
    /// Only print the command that would run.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Remote to find merge base with.
    #[arg(short, long, default_value = "origin", value_name = "remote")]
    pub remote: String,

    /// Branch to find merge base with, default branch of remote if unset.
    #[arg(short, long, value_name = "branch")]
    pub onto: Option<String>,

    /// Optional base, then head of range.
    #[arg(value_name = "ref", num_args = 0..=2)]
    pub refs: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CompressOptions {
    /// File to compress.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CubOptions {
    /// File or directory to scan.
    #[arg(required = true, value_name = "path")]
    pub path: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CastCliOptions {
    /// Playlist of audio files, one per line.
    #[arg(short, long, required = true, value_name = "playlist")]
    pub input: PathBuf,

    /// Existing directory to write podcast to.
    #[arg(short, long, required = true, value_name = "dir")]
    pub output: PathBuf,

    /// URL podcast will be served from.
    #[arg(short, long, required = true, value_name = "url")]
    pub prefix: String,

    /// Randomise episode order.
    #[arg(short, long)]
    pub shuffle: bool,

    /// Title of podcast.
    #[arg(short, long, default_value = "My Music", value_name = "title")]
    pub title: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DdOptions {
    /// Operands passed to dd as-is.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "operand")]
    pub operands: Vec<OsString>,
}

#[derive(Args, Clone, Debug, Default)]
struct TtyOptions {
    /// Treat output as a terminal.
    #[arg(long, conflicts_with = "no_tty")]
    pub tty: bool,

    /// Treat output as not a terminal.
    #[arg(long)]
    pub no_tty: bool,
}

impl TtyOptions {
    fn forced(&self) -> Option<bool> {
        match (self.tty, self.no_tty) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RerouteCliOptions {
    /// Show available shortcuts.
    #[arg(short, long)]
    pub list: bool,

    #[command(flatten)]
    pub tty: TtyOptions,

    /// Shortcut to run.
    #[arg(value_name = "shortcut")]
    pub shortcut: Option<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    Cli::parse().run().await
}

async fn run_forward(opts: ForwardOptions, settings: Settings) -> Result<i32> {
    let from = sender(opts.from, settings.smtp.as_ref())?;
    let mut mailbox = Mailbox::open(opts.mbox.unwrap_or_else(default_mbox))?;
    if mailbox.is_empty() {
        info!("nothing to forward");
        return Ok(0);
    }

    let postman = SmtpPostman::new(&opts.smtp.settings(settings.smtp)?)?;
    postman.verify().await?;

    let forwarder = Forwarder {
        from,
        to: opts.to,
        hostname: hostname(),
    };
    let count = forwarder.forward_all(&mut mailbox, &postman).await?;
    info!("forwarded {count} messages");

    Ok(0)
}

async fn run_sendmail(opts: SendmailOptions, settings: Settings) -> Result<i32> {
    let mut body = String::new();
    std::io::stdin().read_to_string(&mut body)?;

    let draft = Draft {
        from: sender(opts.from, settings.smtp.as_ref())?,
        to: opts.to,
        cc: opts.cc,
        bcc: opts.bcc,
        subject: opts.subject,
        date: opts.date,
        body,
    };

    match draft.dispatch(opts.empty, opts.debug)? {
        Dispatch::Skip => info!("empty body, nothing to send"),
        Dispatch::Print(text) => print!("{text}"),
        Dispatch::Send(message) => {
            let postman = SmtpPostman::new(&opts.smtp.settings(settings.smtp)?)?;
            postman.deliver(*message).await?;
        }
    }

    Ok(0)
}

async fn run_watch(opts: WatchOptions, settings: Settings) -> Result<i32> {
    let scanner = Scanner::new(opts.hash, &opts.exclude)?;
    let mut table = FileTable::load(&opts.database)?;
    for path in &opts.paths {
        table.scan(path, &scanner);
    }
    table.save(&opts.database)?;

    let Some(report) = table.report() else {
        return Ok(0);
    };
    print!("{report}");

    if opts.to.is_empty() {
        return Ok(0);
    }

    let from = sender(opts.from, settings.smtp.as_ref())?;
    let subject = opts
        .subject
        .unwrap_or_else(|| format!("File changes on {}", hostname()));
    if let Some(draft) = table.notification(from, opts.to, subject) {
        let postman = SmtpPostman::new(&opts.smtp.settings(settings.smtp)?)?;
        postman.deliver(draft.compose()?).await?;
    }

    Ok(0)
}

fn run_lottery(opts: LotteryOptions) -> Result<i32> {
    let mut scores = Scores::load(&opts.filename)?;
    let passwd = read_to_string(&opts.passwd)?;
    scores.merge(regular_users(&passwd, opts.min_uid));

    let winner = scores.choose(&opts.exclude, &mut rand::rng())?;
    println!("{winner}");
    scores.save(&opts.filename)?;

    Ok(0)
}

fn run_build(opts: BuildOptions) -> Result<i32> {
    let rules = RuleSet::load(&opts.file)?;
    let target = match opts.target {
        Some(target) => rules.resolve(target)?,
        None => rules.default_target()?.to_path_buf(),
    };

    let cache = match opts.cache {
        Some(cache) => cache,
        None => default_signature_cache()?,
    };
    let mut signatures = Signatures::load(&cache)?;

    // INVARIANT: Keep signatures of whatever did build, even on failure.
    let result = rules.build(&target, &mut signatures, opts.verbose);
    signatures.save(&cache)?;
    result?;

    Ok(0)
}

fn open_repo() -> Result<GitRepo> {
    Ok(GitRepo::discover(current_dir()?)?)
}

fn run_git_cleanup(opts: GitCleanupOptions) -> Result<i32> {
    let repo = open_repo()?.with_env("GIT_CONFIG_GLOBAL", "/dev/null");
    branch::cleanup(
        &repo,
        CleanupOptions {
            branch: opts.branch,
            remote: opts.remote,
            onto: opts.onto,
            dry_run: opts.dry_run,
        },
    )?;

    Ok(0)
}

fn run_git_increment(opts: GitIncrementOptions) -> Result<i32> {
    let repo = open_repo()?;
    let created = branch::increment(&repo, &opts.branch, &opts.remote)?;
    info!("now on {created}");

    Ok(0)
}

fn run_git_reup(opts: GitRebaseOptions) -> Result<i32> {
    rebase::reup(&open_repo()?, &opts.remote, opts.onto)?;
    Ok(0)
}

fn run_git_edit(opts: GitRebaseOptions) -> Result<i32> {
    rebase::edit(&open_repo()?, &opts.remote, opts.onto)?;
    Ok(0)
}

fn run_git_retime(opts: GitRetimeOptions) -> Result<i32> {
    let repo = open_repo()?.with_env("FILTER_BRANCH_SQUELCH_WARNING", "1");
    let now = chrono::Local::now().to_rfc2822();
    rebase::retime(
        &repo,
        RetimeOptions {
            dry_run: opts.dry_run,
            remote: opts.remote,
            onto: opts.onto,
            refs: opts.refs,
        },
        &now,
    )?;

    Ok(0)
}

async fn run_compress(opts: CompressOptions) -> Result<i32> {
    let winner = compress(&opts.file, &default_compressors()).await?;
    println!("winner is {}", winner.display());
    Ok(0)
}

fn run_cub(opts: CubOptions) -> Result<i32> {
    for finding in Linter::new()?.scan(&opts.path)? {
        println!("{finding}");
    }

    Ok(0)
}

fn run_cast(opts: CastCliOptions) -> Result<i32> {
    let opts = CastOptions {
        input: opts.input,
        output: opts.output,
        prefix: opts.prefix,
        shuffle: opts.shuffle,
        title: opts.title,
    };
    let feed = cast::build(&opts, &mut rand::rng())?;
    info!("wrote {}", feed.display());

    Ok(0)
}

fn run_wm(opts: TtyOptions) -> Result<i32> {
    let caps = SystemCapabilities::new(opts.forced());
    caps.notify(&detect_window_manager(&caps)?);
    Ok(0)
}

fn run_typist(settings: Settings) -> i32 {
    let caps = SystemCapabilities::new(None);
    let tty = std::io::stdin().is_terminal();

    match typist::run(&caps, &settings.typist.translations, tty) {
        Ok(()) => 0,
        Err(err) => {
            typist::show_error(&caps, tty, &err.to_string());
            1
        }
    }
}

fn run_reroute(opts: RerouteCliOptions, settings: Settings) -> i32 {
    let caps = SystemCapabilities::new(opts.tty.forced());
    reroute(
        &caps,
        &settings.shortcuts,
        &RerouteOptions {
            list: opts.list,
            shortcut: opts.shortcut,
        },
    )
}
