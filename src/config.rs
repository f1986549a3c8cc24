use std::path::PathBuf;

use clap::{Args, ValueEnum};
use url::Url;

use crate::chunked_upload::DEFAULT_SPLIT_SIZE;
use crate::errors::TransferError;
use crate::shared_types::ByteCount;

pub const DEFAULT_BASE_DIRECTORY: &str = "stor/cosbench";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerMode {
    /// Containers are directories under the base directory
    Directory,
    /// Containers are buckets under `/<user>/buckets`
    Buckets,
}

/// Transfer settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Number of byte-range sections each object is fetched in
    #[arg(long, default_value_t = 1)]
    pub sections: u32,

    /// Size of the objects being read; required with more than one section
    #[arg(long)]
    pub object_size: Option<ByteCount>,

    /// Maximum size of one multipart part, in bytes
    #[arg(long, default_value_t = DEFAULT_SPLIT_SIZE)]
    pub split_size: ByteCount,

    /// Upload objects with the multipart protocol
    #[arg(long)]
    pub multipart: bool,

    /// Number of copies the store should keep of written objects
    #[arg(long)]
    pub durability_level: Option<u32>,

    /// Stream single-request uploads with chunked transfer encoding
    #[arg(long)]
    pub chunked: bool,

    /// Suppress per-operation log lines
    #[arg(long)]
    pub no_logging: bool,

    /// Directory under the user's home holding directory-mode containers
    #[arg(long, default_value = DEFAULT_BASE_DIRECTORY)]
    pub base_directory: String,

    #[arg(long, value_enum, default_value_t = ContainerMode::Directory)]
    pub mode: ContainerMode,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub sections: u32,
    pub object_size: Option<ByteCount>,
    pub split_size: ByteCount,
    pub multipart: bool,
    pub durability_level: Option<u32>,
    pub chunked: bool,
    pub logging: bool,
    pub base_directory: String,
    pub mode: ContainerMode,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            sections: 1,
            object_size: None,
            split_size: DEFAULT_SPLIT_SIZE,
            multipart: false,
            durability_level: None,
            chunked: false,
            logging: true,
            base_directory: DEFAULT_BASE_DIRECTORY.into(),
            mode: ContainerMode::Directory,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.sections < 1 {
            return Err(TransferError::InvalidArgument(
                "sections should be set to one or greater".into(),
            ));
        }
        if self.sections > 1 && self.object_size.is_none() {
            return Err(TransferError::InvalidArgument(
                "object size must be set when more than one section is requested".into(),
            ));
        }
        if self.object_size == Some(0) {
            return Err(TransferError::InvalidArgument(
                "object size must be greater than zero".into(),
            ));
        }
        if self.split_size == 0 {
            return Err(TransferError::InvalidArgument(
                "split size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<TransferArgs> for TransferConfig {
    type Error = TransferError;

    fn try_from(args: TransferArgs) -> Result<Self, Self::Error> {
        let config = TransferConfig {
            sections: args.sections,
            object_size: args.object_size,
            split_size: args.split_size,
            multipart: args.multipart,
            durability_level: args.durability_level,
            chunked: args.chunked,
            logging: !args.no_logging,
            base_directory: args.base_directory.trim_matches('/').to_owned(),
            mode: args.mode,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Where objects live, selected by URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEndpoint {
    Http(Url),
    Local(PathBuf),
}

impl StoreEndpoint {
    pub fn from_url(url: &Url) -> Result<Self, TransferError> {
        match url.scheme() {
            "http" | "https" => Ok(StoreEndpoint::Http(url.to_owned())),
            "file" => url.to_file_path().map(StoreEndpoint::Local).map_err(|_| {
                TransferError::InvalidArgument(format!("{url} is not a usable local path"))
            }),
            other => Err(TransferError::InvalidArgument(format!(
                "Unsupported scheme: {other}"
            ))),
        }
    }
}
