use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use vdp_packer::project::Project;

#[derive(Parser, Debug)]
#[command(version, about = "Packs sprites, tilesets, maps and palettes into video memory atlases")]
struct Args {
    /// Project file describing the resources to pack
    project: PathBuf,

    /// Output directory (defaults to the project's, or `build` next to it)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write sample.png, the sprite atlas rendered with its palettes
    #[arg(long)]
    debug: bool,
}

pub fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut project = Project::load(&args.project)?;
    if args.debug {
        project.config.debug = true;
    }
    let bundle = project.build()?;
    let packed = bundle.pack()?;

    let out_dir = args.out.unwrap_or_else(|| project.output_dir());
    packed.write_to(&out_dir)?;

    let warnings = bundle.diagnostics().warnings();
    if !warnings.is_empty() {
        warn!("{} warning(s) while packing", warnings.len());
    }
    info!("Done");
    Ok(())
}
