//! Mesh geometry codec: layout discovery, vertex/index streams, morph
//! diffs, garment (cloth) overlays, and the decode/encode orchestrators.

pub mod garment;
pub mod layout;
pub mod morph;
pub mod reader;
pub mod types;
pub mod vertex;
pub mod writer;

pub use layout::{Quantization, RenderBlob, SubmeshLayout, VertexSemantic};
pub use reader::{decode_mesh, inspect_mesh};
pub use types::{DecodedMesh, EditedModel, EditedSubmesh, MeshReport, Model, SubmeshGeometry};
pub use writer::{encode_mesh, resolve_target, EncodedMesh};
