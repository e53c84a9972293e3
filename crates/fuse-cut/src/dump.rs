//! Diagnostic dump of the triangulation and its attributes.
//!
//! Two files: a JSON info file with counts and the bounding box, and a binary
//! little-endian file laid out as
//!
//! ```text
//! magic "FCDH" | version u32 | vertices u64 | cells u64
//! per vertex: x y z f64 | kind u8 | pix_size f32 | sim_score f32 | nrc u32 | on_surface u8
//! per cell:   4 x vertex u32 | 4 x neighbor u32 | full u8 | source f32 | sink f32
//! ```
//!
//! Vertex ids at or above the vertex count are enclosing vertices; cells using
//! them are infinite. The format is for offline inspection only.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FuseCutError, FuseCutResult};
use crate::graph::{DelaunayGraphCut, VertexKind};

const MAGIC: &[u8; 4] = b"FCDH";
const VERSION: u32 = 1;

/// Contents of the JSON info file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpInfo {
    pub version: u32,
    pub vertices: usize,
    pub cells: usize,
    pub full_cells: usize,
    pub cameras: usize,
    pub bbox_min: [f64; 3],
    pub bbox_max: [f64; 3],
}

/// A triangulation read back by [`load_dh`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangulationDump {
    pub points: Vec<Point3<f64>>,
    pub kinds: Vec<VertexKind>,
    pub pix_sizes: Vec<f32>,
    pub sim_scores: Vec<f32>,
    pub nrc: Vec<u32>,
    pub on_surface: Vec<bool>,
    pub cells: Vec<[u32; 4]>,
    pub neighbors: Vec<[u32; 4]>,
    pub cell_is_full: Vec<bool>,
    pub source_weights: Vec<f32>,
    pub sink_weights: Vec<f32>,
}

impl TriangulationDump {
    /// Whether cell `ci` uses an enclosing vertex.
    pub fn is_infinite_cell(&self, ci: usize) -> bool {
        self.cells[ci].iter().any(|&v| v as usize >= self.points.len())
    }

    pub fn full_cell_count(&self) -> usize {
        self.cell_is_full.iter().filter(|&&f| f).count()
    }
}

fn kind_code(kind: VertexKind) -> u8 {
    match kind {
        VertexKind::Observed => 0,
        VertexKind::CameraCenter => 1,
        VertexKind::Helper => 2,
    }
}

fn kind_from_code(code: u8) -> Option<VertexKind> {
    match code {
        0 => Some(VertexKind::Observed),
        1 => Some(VertexKind::CameraCenter),
        2 => Some(VertexKind::Helper),
        _ => None,
    }
}

impl DelaunayGraphCut {
    fn dump_info(&self) -> DumpInfo {
        let (min, max) = self
            .vertices_coords
            .iter()
            .fold(None, |acc: Option<(Point3<f64>, Point3<f64>)>, p| match acc {
                None => Some((*p, *p)),
                Some((lo, hi)) => Some((lo.inf(p), hi.sup(p))),
            })
            .unwrap_or((Point3::origin(), Point3::origin()));
        DumpInfo {
            version: VERSION,
            vertices: self.nb_vertices(),
            cells: self.nb_cells(),
            full_cells: self.cell_is_full.iter().filter(|&&f| f).count(),
            cameras: self.mp.len(),
            bbox_min: [min.x, min.y, min.z],
            bbox_max: [max.x, max.y, max.z],
        }
    }

    /// Write the JSON info file.
    pub fn save_dh_info(&self, path: impl AsRef<Path>) -> FuseCutResult<DumpInfo> {
        let path = path.as_ref();
        let info = self.dump_info();
        let json = serde_json::to_string_pretty(&info).map_err(|e| FuseCutError::config_parse(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| FuseCutError::io_write(path, e))?;
        Ok(info)
    }

    /// Write the binary dump to `dh_path` and the info file to `info_path`.
    pub fn save_dh(&self, dh_path: impl AsRef<Path>, info_path: impl AsRef<Path>) -> FuseCutResult<()> {
        let dh_path = dh_path.as_ref();
        let file = File::create(dh_path).map_err(|e| FuseCutError::io_write(dh_path, e))?;
        let mut w = BufWriter::new(file);
        self.write_dh(&mut w)
            .and_then(|_| w.flush())
            .map_err(|e| FuseCutError::io_write(dh_path, e))?;
        let info = self.save_dh_info(info_path)?;
        info!(
            "Saved triangulation dump to {:?}: {} vertices, {} cells",
            dh_path, info.vertices, info.cells
        );
        Ok(())
    }

    fn write_dh(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(self.nb_vertices() as u64).to_le_bytes())?;
        w.write_all(&(self.nb_cells() as u64).to_le_bytes())?;
        for (p, attr) in self.vertices_coords.iter().zip(&self.vertices_attr) {
            for x in [p.x, p.y, p.z] {
                w.write_all(&x.to_le_bytes())?;
            }
            w.write_all(&[kind_code(attr.kind)])?;
            w.write_all(&attr.pix_size.to_le_bytes())?;
            w.write_all(&attr.sim_score.to_le_bytes())?;
            w.write_all(&attr.nrc.to_le_bytes())?;
            w.write_all(&[attr.is_on_surface as u8])?;
        }
        for c in 0..self.nb_cells() as u32 {
            for &v in self.tet.cell(c) {
                w.write_all(&v.to_le_bytes())?;
            }
            for k in 0..4 {
                w.write_all(&self.adjacent(c, k).to_le_bytes())?;
            }
            let attr = &self.cells_attr[c as usize];
            w.write_all(&[self.cell_is_full[c as usize] as u8])?;
            w.write_all(&attr.source_weight.to_le_bytes())?;
            w.write_all(&attr.sink_weight.to_le_bytes())?;
        }
        Ok(())
    }
}

/// Little-endian reader that reports truncation as a malformed dump.
struct DumpReader<'a, R> {
    inner: R,
    path: &'a Path,
}

impl<R: Read> DumpReader<'_, R> {
    fn bytes<const N: usize>(&mut self) -> FuseCutResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FuseCutError::malformed_dump(self.path, "unexpected end of file"),
            _ => FuseCutError::io_read(self.path, e),
        })?;
        Ok(buf)
    }

    fn u8(&mut self) -> FuseCutResult<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u32(&mut self) -> FuseCutResult<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> FuseCutResult<u64> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn f32(&mut self) -> FuseCutResult<f32> {
        Ok(f32::from_le_bytes(self.bytes()?))
    }

    fn f64(&mut self) -> FuseCutResult<f64> {
        Ok(f64::from_le_bytes(self.bytes()?))
    }
}

/// Read a binary dump written by [`DelaunayGraphCut::save_dh`].
pub fn load_dh(path: impl AsRef<Path>) -> FuseCutResult<TriangulationDump> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| FuseCutError::io_read(path, e))?;
    let mut r = DumpReader {
        inner: BufReader::new(file),
        path,
    };

    if &r.bytes::<4>()? != MAGIC {
        return Err(FuseCutError::malformed_dump(path, "not a triangulation dump"));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(FuseCutError::malformed_dump(
            path,
            format!("unsupported version {} (expected {})", version, VERSION),
        ));
    }
    let nv = r.u64()? as usize;
    let nc = r.u64()? as usize;

    let mut dump = TriangulationDump::default();
    for _ in 0..nv {
        let (x, y, z) = (r.f64()?, r.f64()?, r.f64()?);
        dump.points.push(Point3::new(x, y, z));
        let code = r.u8()?;
        let kind = kind_from_code(code)
            .ok_or_else(|| FuseCutError::malformed_dump(path, format!("unknown vertex kind {}", code)))?;
        dump.kinds.push(kind);
        dump.pix_sizes.push(r.f32()?);
        dump.sim_scores.push(r.f32()?);
        dump.nrc.push(r.u32()?);
        dump.on_surface.push(r.u8()? != 0);
    }
    for _ in 0..nc {
        dump.cells.push([r.u32()?, r.u32()?, r.u32()?, r.u32()?]);
        dump.neighbors.push([r.u32()?, r.u32()?, r.u32()?, r.u32()?]);
        dump.cell_is_full.push(r.u8()? != 0);
        dump.source_weights.push(r.f32()?);
        dump.sink_weights.push(r.f32()?);
    }
    Ok(dump)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::small_graph;

    #[test]
    fn test_dump_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (dh, info) = (dir.path().join("tetra.bin"), dir.path().join("tetra.json"));

        let mut gc = small_graph();
        let c = gc.neighboring_cells_by_vertex_index(4)[2];
        gc.set_cell_full(c, true);
        gc.cells_attr[c as usize].sink_weight = 2.5;
        gc.set_is_on_surface();
        gc.save_dh(&dh, &info).unwrap();

        let dump = load_dh(&dh).unwrap();
        assert_eq!(dump.points, gc.points());
        assert_eq!(dump.cells.len(), gc.nb_cells());
        assert_eq!(dump.full_cell_count(), 1);
        assert!(dump.cell_is_full[c as usize]);
        assert_eq!(dump.sink_weights[c as usize], 2.5);
        for ci in 0..gc.nb_cells() {
            assert_eq!(dump.cells[ci], *gc.tetrahedralization().cell(ci as u32));
            assert_eq!(dump.is_infinite_cell(ci), gc.is_infinite_cell(ci as u32));
            for k in 0..4 {
                assert_eq!(dump.neighbors[ci][k], gc.adjacent(ci as u32, k));
            }
        }
        assert_eq!(dump.on_surface.iter().filter(|&&s| s).count(), 4);

        let parsed: DumpInfo = serde_json::from_str(&std::fs::read_to_string(&info).unwrap()).unwrap();
        assert_eq!(parsed.vertices, 5);
        assert_eq!(parsed.full_cells, 1);
        assert_eq!(parsed.bbox_min, [0.0, 0.0, 0.0]);
        assert_eq!(parsed.bbox_max, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rejects_foreign_and_truncated_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, b"PLY\0\x01\0\0\0").unwrap();
        assert!(matches!(load_dh(&path), Err(FuseCutError::MalformedDump { .. })));

        let gc = small_graph();
        let good = dir.path().join("good.bin");
        gc.save_dh(&good, dir.path().join("good.json")).unwrap();
        let bytes = std::fs::read(&good).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(load_dh(&path), Err(FuseCutError::MalformedDump { .. })));

        assert!(matches!(
            load_dh(dir.path().join("missing.bin")),
            Err(FuseCutError::IoRead { .. })
        ));
    }
}
