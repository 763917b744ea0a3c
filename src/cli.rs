use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use saivfs::KeyTable;

#[derive(Parser)]
#[command(name = "saivfs")]
#[command(about = "Read-only inspector for encrypted paged-VFS document containers")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Key table flavor the container was written with
    #[arg(short, long, value_enum, default_value = "user")]
    pub key: KeyFlavor,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lists the container's file tree
    List {
        /// The container file
        container: PathBuf,

        /// Also show sizes and timestamps
        #[arg(short, long)]
        long: bool,
    },

    /// Writes one contained file to stdout or a path
    Cat {
        /// The container file
        container: PathBuf,

        /// Path inside the container, e.g. "layers/00000002"
        path: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decodes the thumbnail into a binary PPM image
    Thumbnail {
        /// The container file
        container: PathBuf,

        /// Output PPM path
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy)]
pub enum KeyFlavor {
    User,
    NotRemoveMe,
    LocalState,
    System,
}

impl From<KeyFlavor> for KeyTable {
    fn from(flavor: KeyFlavor) -> KeyTable {
        match flavor {
            KeyFlavor::User => KeyTable::User,
            KeyFlavor::NotRemoveMe => KeyTable::NotRemoveMe,
            KeyFlavor::LocalState => KeyTable::LocalState,
            KeyFlavor::System => KeyTable::System,
        }
    }
}
