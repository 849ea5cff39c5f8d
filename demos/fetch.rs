use std::{io, path::PathBuf};

use clap::Parser;
use saved_image_extract::{
    write_to, CommandOpener, Compression, Extractor, FileOpener, LayerSelector, Opener,
    SearchOrder, TracingEventHandler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Saved image archive.
    #[arg(required_unless_present = "image", conflicts_with = "image")]
    archive: Option<PathBuf>,

    /// Image to read with `docker save`.
    #[arg(short, long)]
    image: Option<String>,

    /// File to extract.
    #[arg(short, long, default_value = "package.yaml")]
    file: String,

    /// Destination file. Standard output if missing.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compress the output with gzip.
    #[arg(long)]
    gzip: bool,

    /// Take the layers from `manifest.json`, and use the top-most
    /// layer containing the file.
    #[arg(long)]
    manifest: bool,
}

fn run<O: Opener>(opener: O, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut extractor = Extractor::new(opener).event_handler(TracingEventHandler);

    if args.manifest {
        extractor = extractor
            .layers(LayerSelector::Manifest)
            .search_order(SearchOrder::TopLayerFirst);
    }

    let compression = if args.gzip {
        Compression::gzip()
    } else {
        Compression::None
    };

    let written = match &args.output {
        Some(path) => extractor.save_file(&args.file, path, compression)?,

        None => {
            let layer = extractor.locate(&args.file)?;
            extractor.extract(&layer, &args.file, |content| {
                write_to(content, io::stdout().lock(), compression)
            })?
        }
    };

    tracing::info!(size = written.size, sha256 = %written.sha256, "done");

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match (&args.archive, &args.image) {
        (_, Some(image)) => run(CommandOpener::docker_save(image)?, &args),
        (Some(archive), None) => run(FileOpener::new(archive), &args),
        (None, None) => Err("Missing archive or image.".into()),
    }
}
