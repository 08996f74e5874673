use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use log::info;

use fsfs::fs::Filesystem;

/// One `--add` occurrence of `fsfs commit`: stage a file at `path` whose
/// content is read from `local_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFileArg {
    pub path: String,
    pub local_file: PathBuf,
}

#[derive(Debug)]
pub struct AddFileArgParseError(String);

impl std::fmt::Display for AddFileArgParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected PATH=LOCAL_FILE, got '{}'", self.0)
    }
}

impl std::error::Error for AddFileArgParseError {}

impl std::str::FromStr for AddFileArg {
    type Err = AddFileArgParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, local_file) = s.split_once('=').ok_or_else(|| AddFileArgParseError(s.to_string()))?;
        Ok(AddFileArg { path: path.to_string(), local_file: PathBuf::from(local_file) })
    }
}

/// The various kinds of commands `fsfs` can execute.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new repository.
    Init {
        /// Path at which to create the repository.
        path: PathBuf,
    },

    /// Open a transaction against the youngest revision, apply the given
    /// edits, and commit.
    Commit {
        path: PathBuf,

        #[clap(long)]
        author: Option<String>,

        #[clap(long = "log")]
        log_message: Option<String>,

        /// Stage a file add/replace: `REPO_PATH=LOCAL_FILE`.
        #[clap(long = "add", value_name = "REPO_PATH=LOCAL_FILE")]
        add: Vec<AddFileArg>,

        /// Stage a new, empty directory at `REPO_PATH`.
        #[clap(long = "add-dir", value_name = "REPO_PATH")]
        add_dir: Vec<String>,

        /// Stage a delete of `REPO_PATH`.
        #[clap(long = "delete", value_name = "REPO_PATH")]
        delete: Vec<String>,
    },

    /// Print a file's fulltext at a given revision.
    Cat { path: PathBuf, revision: u64, fspath: String },

    /// Print a revision's properties.
    Log { path: PathBuf, revision: u64 },

    /// Print one revision property.
    RevpropGet { path: PathBuf, revision: u64, name: String },

    /// Set (or, with no value, delete) one revision property.
    RevpropSet { path: PathBuf, revision: u64, name: String, value: Option<String> },

    /// Consolidate every full, not-yet-packed shard.
    Pack { path: PathBuf },

    /// Run the format upgrade procedure.
    Upgrade { path: PathBuf },

    /// Walk every revision and report integrity problems.
    Verify { path: PathBuf },
}

pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Init { path } => {
            info!("creating repository at {}", path.display());
            let fs = Filesystem::create(&path).with_context(|| format!("creating repository at {}", path.display()))?;
            println!("{} repository at {} (uuid {})", "created".green(), path.display(), fs.uuid());
            Ok(())
        }

        Command::Commit { path, author, log_message, add, add_dir, delete } => {
            let fs = Filesystem::open(&path)?;
            let mut txn = fs.begin_txn()?;

            for AddFileArg { path: repo_path, local_file } in &add {
                let content = std::fs::read(local_file)
                    .with_context(|| format!("reading local file {}", local_file.display()))?;
                txn.add_file(repo_path, content, BTreeMap::new(), None)?;
            }
            for repo_path in &add_dir {
                txn.add_dir(repo_path, BTreeMap::new(), None)?;
            }
            for repo_path in &delete {
                txn.delete(repo_path);
            }
            if let Some(author) = author {
                txn.change_revprop("svn:author", Some(author));
            }
            if let Some(message) = log_message {
                txn.change_revprop("svn:log", Some(message));
            }

            let revision = fs.commit(txn)?;
            info!("committed revision {revision}");
            println!("{} revision {}", "committed".green(), revision);
            Ok(())
        }

        Command::Cat { path, revision, fspath } => {
            let fs = Filesystem::open(&path)?;
            let contents = fs.read_file_contents(revision, &fspath)?;
            use std::io::Write;
            std::io::stdout().write_all(&contents)?;
            Ok(())
        }

        Command::Log { path, revision } => {
            let fs = Filesystem::open(&path)?;
            let props = fs.read_revprops(revision)?;
            for (key, value) in &props {
                println!("{}: {}", key.bold(), value);
            }
            Ok(())
        }

        Command::RevpropGet { path, revision, name } => {
            let fs = Filesystem::open(&path)?;
            let props = fs.read_revprops(revision)?;
            match props.get(&name) {
                Some(value) => {
                    println!("{value}");
                    Ok(())
                }
                None => bail!("revision {revision} has no property '{name}'"),
            }
        }

        Command::RevpropSet { path, revision, name, value } => {
            let fs = Filesystem::open(&path)?;
            fs.set_revprop(revision, &name, value)?;
            println!("{}", "set".green());
            Ok(())
        }

        Command::Pack { path } => {
            let fs = Filesystem::open(&path)?;
            let min_unpacked = fs.pack()?;
            info!("packed up to revision {min_unpacked}");
            println!("{} min-unpacked-rev is now {}", "packed".green(), min_unpacked);
            Ok(())
        }

        Command::Upgrade { path } => {
            let mut fs = Filesystem::open(&path)?;
            let format = fs.upgrade()?;
            info!("upgraded to format {format}");
            println!("{} repository is now format {}", "upgraded".green(), format);
            Ok(())
        }

        Command::Verify { path } => {
            let fs = Filesystem::open(&path)?;
            let report = fs.verify()?;
            println!("checked {} revision(s)", report.revisions_checked);
            if report.is_clean() {
                println!("{}", "clean".green());
                Ok(())
            } else {
                for problem in &report.problems {
                    println!("{} {}", "CORRUPT".red().bold(), problem);
                }
                bail!("{} problem(s) found", report.problems.len())
            }
        }
    }
}
