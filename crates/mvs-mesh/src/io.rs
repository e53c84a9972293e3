//! Mesh file I/O for OBJ and PLY formats.
//!
//! OBJ carries positions, optional per-vertex colors (`v x y z r g b`) and faces.
//! PLY additionally carries normals and the per-vertex `visibility` list of
//! observing camera ids.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex, VertexColor};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Ply,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "obj" => Some(MeshFormat::Obj),
                "ply" => Some(MeshFormat::Ply),
                _ => None,
            })
    }
}

fn format_of(path: &Path) -> MeshResult<MeshFormat> {
    MeshFormat::from_path(path).ok_or_else(|| MeshError::UnsupportedFormat {
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_string()),
    })
}

/// Load a mesh from file, auto-detecting format from extension.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let mesh = match format_of(path)? {
        MeshFormat::Obj => load_obj(path)?,
        MeshFormat::Ply => load_ply(path)?,
    };
    check_indices(&mesh)?;

    info!(
        "Loaded mesh from {:?}: {} vertices, {} faces",
        path,
        mesh.vertices.len(),
        mesh.faces.len()
    );
    Ok(mesh)
}

/// Save mesh to file, auto-detecting format from extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    match format_of(path)? {
        MeshFormat::Obj => save_obj(mesh, path),
        MeshFormat::Ply => save_ply_binary(mesh, path),
    }
}

fn check_indices(mesh: &Mesh) -> MeshResult<()> {
    let n = mesh.vertices.len();
    for (face_index, face) in mesh.faces.iter().enumerate() {
        if let Some(&bad) = face.iter().find(|&&v| v as usize >= n) {
            return Err(MeshError::invalid_vertex_index(face_index, bad, n));
        }
    }
    Ok(())
}

/// Load mesh from OBJ file.
pub fn load_obj(path: &Path) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| MeshError::parse_error(path, e.to_string()))?;

    if models.is_empty() {
        return Err(MeshError::empty_mesh("OBJ file contains no models"));
    }

    let mut mesh = Mesh::new();
    let mut vertex_offset = 0u32;

    for model in &models {
        let obj_mesh = &model.mesh;
        let has_colors = obj_mesh.vertex_color.len() == obj_mesh.positions.len();

        for (i, chunk) in obj_mesh.positions.chunks_exact(3).enumerate() {
            let mut vertex =
                Vertex::from_coords(chunk[0] as f64, chunk[1] as f64, chunk[2] as f64);
            if has_colors {
                let c = &obj_mesh.vertex_color[i * 3..i * 3 + 3];
                vertex.color = Some(VertexColor::from_float(c[0], c[1], c[2]));
            }
            mesh.vertices.push(vertex);
        }

        for chunk in obj_mesh.indices.chunks_exact(3) {
            mesh.faces.push([
                chunk[0] + vertex_offset,
                chunk[1] + vertex_offset,
                chunk[2] + vertex_offset,
            ]);
        }

        vertex_offset = mesh.vertices.len() as u32;
    }

    debug!(
        "OBJ loaded: {} vertices, {} faces from {} models",
        mesh.vertices.len(),
        mesh.faces.len(),
        models.len()
    );

    Ok(mesh)
}

/// Save mesh to OBJ file. Colors are written as `v x y z r g b`.
pub fn save_obj(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?} (OBJ format)", path);

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer).map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );
    Ok(())
}

fn write_obj<W: Write>(mesh: &Mesh, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "# OBJ file exported by mvs-mesh")?;
    writeln!(writer, "# Vertices: {}", mesh.vertices.len())?;
    writeln!(writer, "# Faces: {}", mesh.faces.len())?;
    writeln!(writer)?;

    let has_colors = mesh.vertices.iter().any(|v| v.color.is_some());
    for v in &mesh.vertices {
        let p = &v.position;
        if has_colors {
            let (r, g, b) = v.color.unwrap_or(VertexColor::new(255, 255, 255)).to_float();
            writeln!(
                writer,
                "v {:.6} {:.6} {:.6} {:.4} {:.4} {:.4}",
                p.x, p.y, p.z, r, g, b
            )?;
        } else {
            writeln!(writer, "v {:.6} {:.6} {:.6}", p.x, p.y, p.z)?;
        }
    }

    writeln!(writer)?;

    // OBJ indices are 1-based
    for face in &mesh.faces {
        writeln!(writer, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1)?;
    }

    writer.flush()
}

/// Load mesh from a PLY file (ASCII or binary).
pub fn load_ply(path: &Path) -> MeshResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::Property;

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        for element in vertices {
            let x = ply_float(element.get("x"), "x", path)?;
            let y = ply_float(element.get("y"), "y", path)?;
            let z = ply_float(element.get("z"), "z", path)?;
            let mut vertex = Vertex::from_coords(x, y, z);

            if let (Some(nx), Some(ny), Some(nz)) =
                (element.get("nx"), element.get("ny"), element.get("nz"))
            {
                vertex.normal = Some(nalgebra::Vector3::new(
                    ply_float(Some(nx), "nx", path)?,
                    ply_float(Some(ny), "ny", path)?,
                    ply_float(Some(nz), "nz", path)?,
                ));
            }

            if let (Some(Property::UChar(r)), Some(Property::UChar(g)), Some(Property::UChar(b))) =
                (element.get("red"), element.get("green"), element.get("blue"))
            {
                vertex.color = Some(VertexColor::new(*r, *g, *b));
            }

            match element.get("visibility") {
                Some(Property::ListUInt(cams)) => vertex.visibility = cams.clone(),
                Some(Property::ListInt(cams)) => {
                    vertex.visibility = cams.iter().map(|&c| c.max(0) as u32).collect()
                }
                _ => {}
            }

            mesh.vertices.push(vertex);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for element in faces {
            let indices: Vec<u32> = match element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"))
            {
                Some(Property::ListInt(v)) => v.iter().map(|&i| i as u32).collect(),
                Some(Property::ListUInt(v)) => v.clone(),
                Some(Property::ListUChar(v)) => v.iter().map(|&i| i as u32).collect(),
                _ => continue,
            };
            // Fan triangulation for polygons
            for i in 1..indices.len().saturating_sub(1) {
                mesh.faces.push([indices[0], indices[i], indices[i + 1]]);
            }
        }
    }

    debug!(
        "PLY loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );

    Ok(mesh)
}

fn ply_float(prop: Option<&ply_rs::ply::Property>, name: &str, path: &Path) -> MeshResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        _ => Err(MeshError::parse_error(
            path,
            format!("Missing or invalid PLY property: {}", name),
        )),
    }
}

/// Save mesh to a binary little-endian PLY file, including normals, colors and
/// visibility lists when any vertex carries them.
pub fn save_ply_binary(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    info!("Saving mesh to {:?} (PLY binary format)", path);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let has_colors = mesh.vertices.iter().any(|v| v.color.is_some());
    let has_visibility = mesh.vertices.iter().any(|v| !v.visibility.is_empty());

    let scalar = |name: &str, ty: ScalarType| PropertyDef::new(name.to_string(), PropertyType::Scalar(ty));

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(scalar(name, ScalarType::Float));
    }
    if has_normals {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(scalar(name, ScalarType::Float));
        }
    }
    if has_colors {
        for name in ["red", "green", "blue"] {
            vertex_def.properties.add(scalar(name, ScalarType::UChar));
        }
    }
    if has_visibility {
        vertex_def.properties.add(PropertyDef::new(
            "visibility".to_string(),
            PropertyType::List(ScalarType::UInt, ScalarType::UInt),
        ));
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let mut vertices_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.vertices.len());
    for v in &mesh.vertices {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(v.position.x as f32));
        element.insert("y".to_string(), Property::Float(v.position.y as f32));
        element.insert("z".to_string(), Property::Float(v.position.z as f32));
        if has_normals {
            let n = v.normal.unwrap_or_else(nalgebra::Vector3::zeros);
            element.insert("nx".to_string(), Property::Float(n.x as f32));
            element.insert("ny".to_string(), Property::Float(n.y as f32));
            element.insert("nz".to_string(), Property::Float(n.z as f32));
        }
        if has_colors {
            let c = v.color.unwrap_or(VertexColor::new(255, 255, 255));
            element.insert("red".to_string(), Property::UChar(c.r));
            element.insert("green".to_string(), Property::UChar(c.g));
            element.insert("blue".to_string(), Property::UChar(c.b));
        }
        if has_visibility {
            element.insert(
                "visibility".to_string(),
                Property::ListUInt(v.visibility.clone()),
            );
        }
        vertices_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let faces_payload: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListInt(vec![face[0] as i32, face[1] as i32, face[2] as i32]),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| {
        MeshError::io_write(
            path,
            std::io::Error::other(format!("PLY consistency error: {:?}", e)),
        )
    })?;

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| MeshError::io_write(path, e))?;
    writer.flush().map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?} (PLY binary)",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn colored_triangle() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(
            Vertex::from_coords(0.0, 0.0, 0.0)
                .with_color(VertexColor::new(255, 0, 0))
                .with_visibility(vec![0, 3]),
        );
        mesh.vertices.push(
            Vertex::from_coords(1.0, 0.0, 0.0)
                .with_color(VertexColor::new(0, 255, 0))
                .with_visibility(vec![1]),
        );
        mesh.vertices.push(
            Vertex::from_coords(0.0, 1.0, 0.0)
                .with_color(VertexColor::new(0, 0, 255))
                .with_visibility(vec![2, 4, 5]),
        );
        mesh.faces.push([0, 1, 2]);
        mesh
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            MeshFormat::from_path(Path::new("a/b/mesh.OBJ")),
            Some(MeshFormat::Obj)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("dense.ply")),
            Some(MeshFormat::Ply)
        );
        assert_eq!(MeshFormat::from_path(Path::new("mesh.stl")), None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = save_mesh(&colored_triangle(), Path::new("out.stl")).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_save_and_reload_obj() {
        let mesh = colored_triangle();
        let file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        save_obj(&mesh, file.path()).unwrap();

        let loaded = load_mesh(file.path()).unwrap();
        assert_eq!(loaded.vertex_count(), 3);
        assert_eq!(loaded.faces, vec![[0, 1, 2]]);
        assert_eq!(loaded.vertices[1].color, Some(VertexColor::new(0, 255, 0)));
    }

    #[test]
    fn test_ply_keeps_visibility() {
        let mesh = colored_triangle();
        let file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
        save_ply_binary(&mesh, file.path()).unwrap();

        let loaded = load_ply(file.path()).unwrap();
        assert_eq!(loaded.faces, mesh.faces);
        assert_eq!(loaded.vertices[2].visibility, vec![2, 4, 5]);
        assert_eq!(loaded.vertices[0].color, Some(VertexColor::new(255, 0, 0)));
    }

    #[test]
    fn test_load_obj_and_missing_ply() {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        writeln!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3").unwrap();
        assert!(load_mesh(file.path()).is_ok());

        let missing = NamedTempFile::new().unwrap();
        let path = missing.path().with_extension("ply");
        assert!(matches!(
            load_mesh(&path).unwrap_err(),
            MeshError::IoRead { .. }
        ));
    }
}
