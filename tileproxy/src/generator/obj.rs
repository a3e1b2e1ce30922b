//! Minimal Wavefront OBJ reader for mesh geodata.
//!
//! Understands `v`, `f` (triangulated as a fan), `usemtl` and `mtllib`;
//! everything else is skipped. Texture and normal indices in faces are
//! ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Name of the single mesh of a file without material libraries.
pub const DEFAULT_MESH_NAME: &str = "mesh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub indices: [u32; 3],
    /// Index into [`ObjFile::materials`].
    pub material: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjFile {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<Face>,
    pub materials: Vec<String>,
    pub mtllibs: Vec<String>,
}

/// Mesh with its own vertex list.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMesh {
    pub name: String,
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[u32; 3]>,
}

fn malformed(line: usize, what: &str) -> Error {
    Error::internal(format!("OBJ line {}: {}.", line, what))
}

/// Resolves a 1-based (or negative, relative) OBJ index.
fn vertex_index(token: &str, count: usize, line: usize) -> Result<u32> {
    let raw = token.split('/').next().unwrap_or_default();
    let value: i64 = raw
        .parse()
        .map_err(|_| malformed(line, "bad vertex index"))?;
    let index = match value {
        v if v > 0 => v - 1,
        v if v < 0 => count as i64 + v,
        _ => return Err(malformed(line, "vertex index 0")),
    };
    if index < 0 || index >= count as i64 {
        return Err(malformed(line, "vertex index out of range"));
    }
    Ok(index as u32)
}

/// Parses OBJ content.
pub fn parse(reader: impl BufRead) -> Result<ObjFile> {
    let mut obj = ObjFile::default();
    let mut material_ids: HashMap<String, usize> = HashMap::new();
    let mut current = 0usize;

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = n + 1;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut p = [0.0; 3];
                for c in &mut p {
                    *c = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| malformed(lineno, "bad vertex"))?;
                }
                obj.vertices.push(p);
            }
            Some("f") => {
                let count = obj.vertices.len();
                let indices = tokens
                    .map(|t| vertex_index(t, count, lineno))
                    .collect::<Result<Vec<u32>>>()?;
                if indices.len() < 3 {
                    return Err(malformed(lineno, "face with fewer than 3 vertices"));
                }
                if obj.materials.is_empty() {
                    obj.materials.push("default".to_string());
                    material_ids.insert("default".to_string(), 0);
                }
                for i in 1..indices.len() - 1 {
                    obj.faces.push(Face {
                        indices: [indices[0], indices[i], indices[i + 1]],
                        material: current,
                    });
                }
            }
            Some("usemtl") => {
                let name = tokens.next().unwrap_or("default").to_string();
                current = *material_ids.entry(name.clone()).or_insert_with(|| {
                    obj.materials.push(name);
                    obj.materials.len() - 1
                });
            }
            Some("mtllib") => obj.mtllibs.extend(tokens.map(str::to_string)),
            _ => {}
        }
    }
    Ok(obj)
}

/// Loads an OBJ file; a missing file is `NotFound`.
pub fn load(path: &Path) -> Result<ObjFile> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::not_found(format!("{} not found.", path.display()))
        } else {
            Error::from(e)
        }
    })?;
    let obj = parse(BufReader::new(file))?;
    debug!(
        path = %path.display(),
        vertices = obj.vertices.len(),
        faces = obj.faces.len(),
        "Loaded OBJ"
    );
    Ok(obj)
}

impl ObjFile {
    /// Splits the file into meshes, one per used material.
    ///
    /// Files without material libraries yield a single mesh named
    /// [`DEFAULT_MESH_NAME`]. Split meshes carry only the vertices their
    /// faces use, deduplicated by position.
    pub fn into_meshes(self) -> Vec<NamedMesh> {
        if self.mtllibs.is_empty() {
            return vec![NamedMesh {
                name: DEFAULT_MESH_NAME.to_string(),
                faces: self.faces.iter().map(|f| f.indices).collect(),
                vertices: self.vertices,
            }];
        }

        struct Builder {
            mesh: NamedMesh,
            lookup: HashMap<[u64; 3], u32>,
        }

        let mut builders: Vec<Option<Builder>> = (0..self.materials.len()).map(|_| None).collect();
        for face in &self.faces {
            let builder = builders[face.material].get_or_insert_with(|| Builder {
                mesh: NamedMesh {
                    name: self.materials[face.material].clone(),
                    vertices: Vec::new(),
                    faces: Vec::new(),
                },
                lookup: HashMap::new(),
            });

            let mut out = [0u32; 3];
            for (slot, index) in out.iter_mut().zip(face.indices) {
                let p = self.vertices[index as usize];
                let key = [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()];
                *slot = *builder.lookup.entry(key).or_insert_with(|| {
                    builder.mesh.vertices.push(p);
                    (builder.mesh.vertices.len() - 1) as u32
                });
            }
            builder.mesh.faces.push(out);
        }

        builders.into_iter().flatten().map(|b| b.mesh).collect()
    }
}
