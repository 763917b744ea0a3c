use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::process::exit;

use clap::Parser;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use saivfs::{Document, VirtualFileEntry, VirtualFileSystem, VirtualFileVisitor};

mod cli;
use crate::cli::{Cli, Commands};

struct TreePrinter {
    depth: usize,
    long: bool,
}

impl<R: Read + Seek> VirtualFileVisitor<R> for TreePrinter {
    fn visit_folder_begin(&mut self, entry: &mut VirtualFileEntry<R>) -> bool {
        println!("{:indent$}{}/", "", entry.name(), indent = self.depth * 2);
        self.depth += 1;
        true
    }

    fn visit_folder_end(&mut self, _entry: &mut VirtualFileEntry<R>) -> bool {
        self.depth -= 1;
        true
    }

    fn visit_file(&mut self, entry: &mut VirtualFileEntry<R>) -> bool {
        if self.long {
            let stamp = OffsetDateTime::from_unix_timestamp(entry.timestamp())
                .ok()
                .and_then(|dt| dt.format(&Rfc3339).ok())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:indent$}{:<32} {:>10} {}",
                "",
                entry.name(),
                entry.size(),
                stamp,
                indent = self.depth * 2
            );
        } else {
            println!("{:indent$}{}", "", entry.name(), indent = self.depth * 2);
        }
        true
    }
}

fn run(cli: &Cli) -> saivfs::Result<()> {
    match &cli.command {
        Commands::List { container, long } => {
            let vfs = VirtualFileSystem::open_with_key(container, cli.key.into())?;
            let mut printer = TreePrinter {
                depth: 0,
                long: *long,
            };
            vfs.walk(&mut printer)?;
        }

        Commands::Cat {
            container,
            path,
            output,
        } => {
            let vfs = VirtualFileSystem::open_with_key(container, cli.key.into())?;
            let data = vfs.entry(path)?.read_to_vec()?;
            match output {
                Some(target) => File::create(target)?.write_all(&data)?,
                None => io::stdout().write_all(&data)?,
            }
        }

        Commands::Thumbnail { container, output } => {
            let doc = Document::open_with_key(container, cli.key.into())?;
            let thumbnail = doc.thumbnail()?;

            let mut out = File::create(output)?;
            write!(out, "P6\n{} {}\n255\n", thumbnail.width, thumbnail.height)?;
            // Stored pixel order is BGRA
            for pixel in thumbnail.pixels.chunks_exact(4) {
                out.write_all(&[pixel[2], pixel[1], pixel[0]])?;
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        eprintln!("error: {}", error);
        exit(1);
    }
}
