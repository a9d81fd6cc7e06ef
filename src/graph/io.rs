//! Little-endian binary layout shared by both graph stores.
//!
//! File layout: a fixed header (`capacity`, `size`, `edges_per_vertex`,
//! `dim` as u32, metric id as u8), followed by one record per live vertex:
//! external label (u32), the feature byte image, the adjacency indices
//! (u32 each) and the edge weights (f32 each). Removed slots are compacted
//! away at save time, so files are always dense.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{DegError, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub capacity: u32,
    pub size: u32,
    pub edges_per_vertex: u32,
    pub dim: u32,
    pub metric_id: u8,
}

pub(crate) fn open_reader(path: &Path) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(DegError::FileNotFound(path.display().to_string()));
    }
    Ok(BufReader::new(File::open(path)?))
}

pub(crate) fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

pub(crate) fn write_header<W: Write>(writer: &mut W, header: &Header) -> io::Result<()> {
    writer.write_all(&header.capacity.to_le_bytes())?;
    writer.write_all(&header.size.to_le_bytes())?;
    writer.write_all(&header.edges_per_vertex.to_le_bytes())?;
    writer.write_all(&header.dim.to_le_bytes())?;
    writer.write_all(&[header.metric_id])
}

pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    let capacity = read_u32(reader)?;
    let size = read_u32(reader)?;
    let edges_per_vertex = read_u32(reader)?;
    let dim = read_u32(reader)?;
    let metric_id = read_u8(reader)?;
    if size > capacity {
        return Err(DegError::InvalidFormat(format!(
            "size {size} exceeds capacity {capacity}"
        )));
    }
    if edges_per_vertex == 0 || edges_per_vertex > 255 {
        return Err(DegError::InvalidFormat(format!(
            "unsupported edges_per_vertex {edges_per_vertex}"
        )));
    }
    if dim == 0 {
        return Err(DegError::InvalidFormat("zero dimension".into()));
    }
    Ok(Header {
        capacity,
        size,
        edges_per_vertex,
        dim,
        metric_id,
    })
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub(crate) fn write_u32_slice<W: Write>(writer: &mut W, values: &[u32]) -> io::Result<()> {
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub(crate) fn write_f32_slice<W: Write>(writer: &mut W, values: &[f32]) -> io::Result<()> {
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}
