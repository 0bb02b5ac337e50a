use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use profile::{ProfileConfig, ProfileFile, ProfileStore};
use tracing_subscriber::EnvFilter;

/// Buffer size used for section listings.
const LISTING_BUFFER_LEN: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "profile", version, about = "Inspect and edit sectioned profile files")]
struct Cli {
    /// TOML file with store settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every section and key
    Dump { file: PathBuf },
    /// Print the value of a key
    Get {
        file: PathBuf,
        section: String,
        key: String,
        #[arg(long)]
        default: Option<String>,
    },
    /// Set the value of a key
    Set {
        file: PathBuf,
        section: String,
        key: String,
        value: String,
    },
    /// Delete a key, or the whole section when no key is given
    Delete {
        file: PathBuf,
        section: String,
        key: Option<String>,
    },
    /// List section names, or the keys of one section
    Sections {
        file: PathBuf,
        section: Option<String>,
    },
    /// Print a binary value as hex
    GetStruct {
        file: PathBuf,
        section: String,
        key: String,
        #[arg(long)]
        len: usize,
    },
    /// Store hex-encoded bytes as a binary value
    SetStruct {
        file: PathBuf,
        section: String,
        key: String,
        hex: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = ProfileStore::new(&config);

    run(&store, cli.command)?;
    store.close().context("failed to write profiles")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ProfileConfig> {
    let Some(path) = path else {
        return Ok(ProfileConfig::default());
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}

fn profile_file(path: &Path) -> ProfileFile {
    ProfileFile::new(path.display().to_string(), path)
}

fn run(store: &ProfileStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Dump { file } => dump(store, &profile_file(&file)),
        Command::Get {
            file,
            section,
            key,
            default,
        } => {
            let file = profile_file(&file);
            match store.get_value(&file, &section, &key) {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => match default {
                    Some(default) => println!("{default}"),
                    None => bail!("no key {key:?} in section {section:?}"),
                },
            }
        }
        Command::Set {
            file,
            section,
            key,
            value,
        } => {
            store.set_string(&profile_file(&file), &section, &key, &value)?;
        }
        Command::Delete { file, section, key } => {
            let file = profile_file(&file);
            let found = match key {
                Some(key) => store.delete_key(&file, &section, &key)?,
                None => store.delete_section(&file, &section)?,
            };
            if !found {
                tracing::warn!(section, "nothing to delete");
            }
        }
        Command::Sections { file, section } => {
            let file = profile_file(&file);
            let mut buf = vec![0_u8; LISTING_BUFFER_LEN];
            let n = match section {
                Some(section) => store.get_section_keys(&file, &section, "", &mut buf),
                None => store.get_section_names(&file, &mut buf),
            };

            for name in buf[..n].split(|&b| b == 0).filter(|name| !name.is_empty()) {
                println!("{}", String::from_utf8_lossy(name));
            }
        }
        Command::GetStruct {
            file,
            section,
            key,
            len,
        } => {
            let bytes = store.get_struct(&profile_file(&file), &section, &key, len)?;
            println!("{}", hex::encode_upper(bytes));
        }
        Command::SetStruct {
            file,
            section,
            key,
            hex,
        } => {
            let bytes = hex::decode(&hex).context("value must be hex digits")?;
            store.set_struct(&profile_file(&file), &section, &key, &bytes)?;
        }
    }

    Ok(())
}

fn dump(store: &ProfileStore, file: &ProfileFile) {
    store.with_document(file, |document| {
        for section in document.sections() {
            if section.is_named() {
                println!("[{}]", String::from_utf8_lossy(section.name()));
            }

            for key in section.keys() {
                let name = String::from_utf8_lossy(key.name());
                match key.value() {
                    Some(value) => println!("{name} = \"{}\"", String::from_utf8_lossy(value)),
                    None => println!("{name}"),
                }
            }

            println!();
        }
    });
}
