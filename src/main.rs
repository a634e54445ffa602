use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use lodestar::io::fetch::{FileFetcher, RawTextureDecoder};
use lodestar::session::{Loader, LoaderOptions};
use lodestar_gltf::glb::writer::GlbWriter;

#[derive(Parser, Debug)]
#[command(name = "lodestar")]
#[command(about = "Inspects and packs binary scene containers")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a scene file (container or JSON) and print what it resolves to.
    Inspect {
        file: PathBuf,

        #[arg(long, env = "LODESTAR_SKIP_MATERIALS")]
        skip_materials: bool,
    },
    /// Pack a JSON document and an optional binary body into a container.
    Pack {
        json: PathBuf,

        #[arg(long)]
        bin: Option<PathBuf>,

        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    match args.command {
        Command::Inspect {
            file,
            skip_materials,
        } => inspect(&file, skip_materials).await,
        Command::Pack { json, bin, out } => pack(&json, bin.as_deref(), &out),
    }
}

async fn inspect(file: &Path, skip_materials: bool) -> anyhow::Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Reading {}", file.display()))?;
    let root = file.parent().unwrap_or(Path::new(".")).to_path_buf();

    let loader = Loader::new(
        Arc::new(FileFetcher::new(root)),
        Arc::new(RawTextureDecoder {}),
    )
    .with_options(LoaderOptions {
        skip_materials,
        ..LoaderOptions::default()
    });

    let result = loader.load(&data).await?;

    println!("{}:", file.display());
    println!("  {} nodes", result.nodes.len());
    println!("  {} meshes", result.meshes.len());
    for mesh in &result.meshes {
        println!(
            "    {} ({:?}, {} vertices, {} indices{})",
            mesh.name,
            mesh.geometry.topology,
            mesh.geometry.vertex_buffers.positions.len(),
            mesh.geometry.indices.len(),
            if mesh.geometry.unindexed { ", unindexed" } else { "" },
        );
    }
    println!("  {} skeletons", result.skeletons.len());
    println!("  {} animation groups", result.animation_groups.len());
    println!("  {} cameras", result.cameras.len());
    println!("  {} lights", result.lights.len());
    Ok(())
}

fn pack(json: &Path, bin: Option<&Path>, out: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(json)
        .with_context(|| format!("Reading {}", json.display()))?;
    let bin = bin
        .map(|path| std::fs::read(path).with_context(|| format!("Reading {}", path.display())))
        .transpose()?;

    let mut packed = Vec::new();
    GlbWriter::write(&mut packed, &json, bin.as_deref())?;
    std::fs::write(out, &packed).with_context(|| format!("Writing {}", out.display()))?;
    println!("Wrote {} ({} bytes)", out.display(), packed.len());
    Ok(())
}
