use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{info, LevelFilter};
use url::Url;

use segxfer::config::{StoreEndpoint, TransferArgs, TransferConfig};
use segxfer::http_store::HttpStore;
use segxfer::local_store::LocalStore;
use segxfer::progress_reporter::{transfer_bar, ProgressReader};
use segxfer::range_reader::SequentialRangeReader;
use segxfer::segment_source::FileSegmentSource;
use segxfer::shared_types::ByteStream;
use segxfer::storage::Storage;
use segxfer::store::{Metadata, ObjectStoreClient};

const COMPARE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Store endpoint: an http(s) URL, or a file:// URL for a local directory
    #[arg(long)]
    url: Option<Url>,

    /// Account whose home directory holds the containers
    #[arg(long, default_value = "anonymous")]
    user: String,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    transfer: TransferArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Store(StoreCommand),

    /// Read a local file in sections and compare it with a plain read
    Verify {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Read an object
    Get {
        #[command(flatten)]
        target: ObjectTarget,

        /// File to write the object to; discarded when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a local file as an object
    Put {
        #[command(flatten)]
        target: ObjectTarget,

        #[arg(short, long)]
        file: PathBuf,
    },
    /// Set user metadata on an object, or print it when no --set is given
    Metadata {
        #[command(flatten)]
        target: ObjectTarget,

        /// KEY=VALUE pair; repeatable
        #[arg(long = "set", value_parser = parse_key_value)]
        entries: Vec<(String, String)>,
    },
    /// Delete an object
    Delete {
        #[command(flatten)]
        target: ObjectTarget,
    },
    /// Create a container
    Mkcontainer {
        #[arg(long)]
        container: String,
    },
    /// Delete a container and everything in it
    Rmcontainer {
        #[arg(long)]
        container: String,
    },
}

#[derive(Args, Debug)]
struct ObjectTarget {
    #[arg(long)]
    container: String,

    #[arg(long)]
    object: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let multi = MultiProgress::new();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(level);

    let config = TransferConfig::try_from(args.transfer)?;

    let command = match args.command {
        Command::Verify { file } => return verify(&file, config.sections, &multi),
        Command::Store(command) => command,
    };
    let url = args.url.ok_or("--url is required for store operations")?;

    match StoreEndpoint::from_url(&url)? {
        StoreEndpoint::Http(base) => {
            let client = HttpStore::new(base, &args.user)?;
            let home = client.home().to_owned();
            run(Storage::new(client, config, home), command, &multi)
        }
        StoreEndpoint::Local(root) => {
            fs::create_dir_all(root.join(&args.user))?;
            let home = format!("/{}", args.user);
            run(Storage::new(LocalStore::new(root), config, home), command, &multi)
        }
    }
}

fn run<C: ObjectStoreClient>(
    storage: Storage<C>,
    command: StoreCommand,
    multi: &MultiProgress,
) -> Result<(), Box<dyn Error>> {
    storage.init()?;

    match command {
        StoreCommand::Get { target, output } => {
            let pb = transfer_bar(multi, storage.config().object_size);
            let object = storage.get_object(&target.container, &target.object)?;
            let mut reader = ProgressReader::new(object, pb);
            let copied = match output {
                Some(path) => io::copy(&mut reader, &mut File::create(path)?)?,
                None => io::copy(&mut reader, &mut io::sink())?,
            };
            reader.finish();
            info!(
                "Read {} bytes from /{}/{}",
                copied, target.container, target.object
            );
        }
        StoreCommand::Put { target, file } => {
            let length = fs::metadata(&file)?.len();
            let pb = transfer_bar(multi, Some(length));
            storage.create_object(
                &target.container,
                &target.object,
                || {
                    let source = File::open(&file)?;
                    Ok(Box::new(ProgressReader::new(source, pb.clone())) as ByteStream)
                },
                length,
            )?;
            pb.finish();
        }
        StoreCommand::Metadata { target, entries } if entries.is_empty() => {
            let metadata = storage.get_metadata(&target.container, &target.object)?;
            for (key, value) in metadata {
                info!("{}: {}", key, value);
            }
        }
        StoreCommand::Metadata { target, entries } => {
            let metadata: Metadata = entries.into_iter().collect();
            storage.create_metadata(&target.container, &target.object, &metadata)?;
        }
        StoreCommand::Delete { target } => {
            storage.delete_object(&target.container, &target.object)?;
        }
        StoreCommand::Mkcontainer { container } => storage.create_container(&container)?,
        StoreCommand::Rmcontainer { container } => storage.delete_container(&container)?,
    }

    Ok(())
}

/// Splices `file` back together from ranged reads and checks every byte
/// against a sequential read of the same file.
fn verify(file: &Path, sections: u32, multi: &MultiProgress) -> Result<(), Box<dyn Error>> {
    let size = fs::metadata(file)?.len();
    let sections = sections.max(2);
    let reader = SequentialRangeReader::new(
        file.display().to_string(),
        FileSegmentSource::new(file),
        size,
        sections,
    )?;
    let segment_count = reader.segments().len();
    let mut segmented = ProgressReader::new(reader, transfer_bar(multi, Some(size)));
    let mut plain = BufReader::new(File::open(file)?);

    let mut expected = vec![0u8; COMPARE_BUFFER_SIZE];
    let mut actual = vec![0u8; COMPARE_BUFFER_SIZE];
    let mut offset: u64 = 0;
    loop {
        let n = segmented.read(&mut actual)?;
        if n == 0 {
            break;
        }
        plain.read_exact(&mut expected[..n])?;
        if let Some(i) = (0..n).find(|&i| actual[i] != expected[i]) {
            return Err(format!("{}: mismatch at byte {}", file.display(), offset + i as u64).into());
        }
        offset += n as u64;
    }
    segmented.finish();

    if plain.read(&mut expected)? != 0 {
        return Err(format!("{}: segmented read stopped at byte {}", file.display(), offset).into());
    }
    info!(
        "{}: {} bytes identical across {} segments",
        file.display(),
        offset,
        segment_count
    );
    Ok(())
}
