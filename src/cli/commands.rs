use std::path::PathBuf;

use clap::Subcommand;

use crate::compression::{BlockCompressor, Lz4Compressor, OodleCompressor};
use crate::cr2w::{read_buffer, sidecar_path, Container};
use crate::host::DiskFileProvider;
use crate::mesh::{decode_mesh, inspect_mesh};
use crate::settings::Settings;

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize a container: exports, submeshes, buffers
    Inspect {
        /// Source .mesh / .morphtarget / .rig file
        source: PathBuf,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decompress the container's deferred buffers to sidecar files
    Extract {
        /// Source container
        source: PathBuf,

        /// Oodle shared library for compressed buffers
        #[arg(long)]
        oodle: Option<PathBuf>,

        /// Only extract this buffer index
        #[arg(long)]
        buffer: Option<usize>,
    },

    /// Decode geometry and report per-submesh statistics
    Mesh {
        /// Source .mesh file
        source: PathBuf,

        /// Oodle shared library for compressed buffers
        #[arg(long)]
        oodle: Option<PathBuf>,

        /// Donor rig files to merge ancestor bones from
        #[arg(long)]
        rig: Vec<PathBuf>,

        /// Decode tangents as well
        #[arg(long)]
        tangents: bool,

        /// Keep every LOD in one model instead of splitting
        #[arg(long)]
        all_lods: bool,
    },
}

fn load_codec(oodle: Option<&PathBuf>) -> anyhow::Result<Box<dyn BlockCompressor>> {
    match oodle {
        // Safety: the user explicitly pointed at an Oodle build.
        Some(path) => Ok(Box::new(unsafe { OodleCompressor::load(path)? })),
        None => Ok(Box::new(Lz4Compressor)),
    }
}

impl Commands {
    /// Execute the selected subcommand.
    ///
    /// # Errors
    /// Propagates IO and codec failures.
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Commands::Inspect { source, json } => {
                let container = Container::parse(std::fs::read(source)?)?;
                let report = inspect_mesh(&container)?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("version:    {}", report.version);
                    println!("exports:    {}", report.export_names.join(", "));
                    println!("buffers:    {}", report.buffer_count);
                    println!("submeshes:  {}", report.submesh_count);
                    for i in 0..report.submesh_count {
                        println!(
                            "  submesh{i}: {} vertices, {} indices, lod mask {}",
                            report.vertex_counts[i], report.index_counts[i], report.lod_masks[i]
                        );
                    }
                    println!("rigged:     {}", report.rigged);
                    println!("garment:    {}", report.has_garment);
                    println!("morphs:     {}", report.has_morph_targets);
                }
                Ok(())
            }

            Commands::Extract {
                source,
                oodle,
                buffer,
            } => {
                let container = Container::parse(std::fs::read(source)?)?;
                let codec = load_codec(oodle.as_ref())?;
                let indices: Vec<usize> = match buffer {
                    Some(index) => vec![*index],
                    None => (0..container.buffers.len()).collect(),
                };
                for index in indices {
                    match read_buffer(&container, index, codec.as_ref()) {
                        Ok(bytes) => {
                            let path = sidecar_path(source, index);
                            std::fs::write(&path, &bytes)?;
                            println!("wrote {} ({} bytes)", path.display(), bytes.len());
                        }
                        Err(e) => eprintln!("buffer {index}: {e}"),
                    }
                }
                Ok(())
            }

            Commands::Mesh {
                source,
                oodle,
                rig,
                tangents,
                all_lods,
            } => {
                let container = Container::parse(std::fs::read(source)?)?;
                let codec = load_codec(oodle.as_ref())?;
                let settings = Settings {
                    read_tangents: *tangents,
                    highest_lod_only: !all_lods,
                    ..Settings::default()
                };
                let donor_rigs: Vec<Vec<u8>> =
                    rig.iter().map(std::fs::read).collect::<Result<_, _>>()?;
                let decoded = decode_mesh(
                    &container,
                    codec.as_ref(),
                    &DiskFileProvider,
                    Some(source),
                    &donor_rigs,
                    &settings,
                )?;
                for model in &decoded.models {
                    println!("model (lod mask {}):", model.lod_mask);
                    for submesh in &model.submeshes {
                        println!(
                            "  submesh{}: {} vertices, {} triangles{}",
                            submesh.submesh_index,
                            submesh.positions.len(),
                            submesh.indices.len() / 3,
                            if submesh.skin.is_some() { ", skinned" } else { "" }
                        );
                    }
                }
                if let Some(skeleton) = &decoded.skeleton {
                    println!("skeleton: {} bones", skeleton.bones.len());
                }
                for (index, error) in &decoded.failures {
                    eprintln!("submesh {index} failed: {error}");
                }
                Ok(())
            }
        }
    }
}
