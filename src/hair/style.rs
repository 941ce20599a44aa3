//! Binary `.hair` strand geometry assets.
//!
//! The on-disk format is a fixed 128-byte little-endian header (signature
//! `"HAIR"`, strand/vertex counts, presence flags, per-strand defaults, a
//! 64-byte free-text field and an optional precomputed bounding box) followed
//! by tightly packed arrays in a fixed order: segments, vertices, thickness,
//! transparency, color, tangents, indices. Every array is gated by its
//! presence bit. Header fields are serialized one by one so the bit layout is
//! well defined on every platform.

use super::Aabb;
use glam::Vec3;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Arrays a `.hair` file can carry, used to report which read/write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Header,
    Segments,
    Vertices,
    Thickness,
    Transparency,
    Color,
    Tangents,
    Indices,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Header => "file header",
            Field::Segments => "segments",
            Field::Vertices => "vertices",
            Field::Thickness => "thickness",
            Field::Transparency => "transparency",
            Field::Color => "color",
            Field::Tangents => "tangents",
            Field::Indices => "indices",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum HairError {
    #[error("failed to open hair file: {0}")]
    OpeningFile(std::io::Error),
    #[error("hair file signature is not \"HAIR\"")]
    InvalidSignature,
    #[error("failed to read hair {0}")]
    Reading(Field),
    #[error("failed to write hair {0}")]
    Writing(Field),
    #[error("hair arrays violate the format length invariants")]
    InvalidFormat,
}

/// Presence flags for the optional arrays, serialized as a `u32` with fixed
/// bit positions (bit 0 = segments through bit 7 = bounding box; bits 8..31
/// are reserved and written as zero).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags {
    pub has_segments: bool,
    pub has_vertices: bool,
    pub has_thickness: bool,
    pub has_transparency: bool,
    pub has_color: bool,
    pub has_tangents: bool,
    pub has_indices: bool,
    pub has_bounding_box: bool,
}

impl FieldFlags {
    pub fn to_bits(self) -> u32 {
        (self.has_segments as u32)
            | (self.has_vertices as u32) << 1
            | (self.has_thickness as u32) << 2
            | (self.has_transparency as u32) << 3
            | (self.has_color as u32) << 4
            | (self.has_tangents as u32) << 5
            | (self.has_indices as u32) << 6
            | (self.has_bounding_box as u32) << 7
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            has_segments: bits & 1 != 0,
            has_vertices: bits & (1 << 1) != 0,
            has_thickness: bits & (1 << 2) != 0,
            has_transparency: bits & (1 << 3) != 0,
            has_color: bits & (1 << 4) != 0,
            has_tangents: bits & (1 << 5) != 0,
            has_indices: bits & (1 << 6) != 0,
            has_bounding_box: bits & (1 << 7) != 0,
        }
    }
}

const SIGNATURE: [u8; 4] = *b"HAIR";
const INFORMATION_SIZE: usize = 64;

/// Header defaults applied when a per-vertex array is absent.
#[derive(Debug, Clone, Copy)]
struct FileHeader {
    strand_count: u32,
    vertex_count: u32,
    flags: FieldFlags,
    default_segment_count: u32,
    default_thickness: f32,
    default_transparency: f32,
    default_color: [f32; 3],
    information: [u8; INFORMATION_SIZE],
    bounding_box_min: [f32; 3],
    bounding_box_max: [f32; 3],
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            strand_count: 0,
            vertex_count: 0,
            flags: FieldFlags::default(),
            default_segment_count: 0,
            default_thickness: 1.0,
            default_transparency: 0.5,
            default_color: [0.8, 0.57, 0.32],
            information: [0; INFORMATION_SIZE],
            bounding_box_min: [0.0; 3],
            bounding_box_max: [0.0; 3],
        }
    }
}

/// Strand-based hair geometry, immutable once loaded apart from the derived
/// arrays (tangents, indices) and the draw-time reduction state.
///
/// Invariants checked on save: every optional per-vertex array matches the
/// vertex count, and `sum(segments) + segments.len() == vertices.len()`.
#[derive(Debug, Clone)]
pub struct HairStyle {
    /// Per-strand segment counts. A strand with N segments has N+1 vertices.
    pub segments: Vec<u16>,
    /// Per-vertex positions for all strands, strand by strand.
    pub vertices: Vec<Vec3>,
    /// Per-vertex strand thickness (optional).
    pub thickness: Vec<f32>,
    /// Per-vertex transparency (optional).
    pub transparency: Vec<f32>,
    /// Per-vertex RGB color (optional).
    pub color: Vec<Vec3>,
    /// Per-vertex unit tangents, usually derived rather than stored.
    pub tangents: Vec<Vec3>,
    /// Line-list index pairs, two per segment, usually derived.
    pub indices: Vec<u32>,

    header: FileHeader,
    /// Cumulative segment count at each strand boundary in index order,
    /// rebuilt by `generate_indices` and `shuffle_strands`.
    strand_offsets: Vec<u32>,
    /// Draw-time strand reduction ratio in [0, 1].
    reduction: f32,
    shuffled: bool,
}

impl Default for HairStyle {
    /// An empty style. The reduction ratio starts at 1.0 so a freshly
    /// loaded style draws every segment.
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            vertices: Vec::new(),
            thickness: Vec::new(),
            transparency: Vec::new(),
            color: Vec::new(),
            tangents: Vec::new(),
            indices: Vec::new(),
            header: FileHeader::default(),
            strand_offsets: Vec::new(),
            reduction: 1.0,
            shuffled: false,
        }
    }
}

impl HairStyle {
    /// Parse a `.hair` file. The returned style is fully validated; on error
    /// the caller keeps whatever asset it had before.
    pub fn load(path: &Path) -> Result<Self, HairError> {
        let file = File::open(path).map_err(HairError::OpeningFile)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        let mut style = HairStyle {
            header,
            ..HairStyle::default()
        };

        let strands = header.strand_count as usize;
        let vertices = header.vertex_count as usize;

        if header.flags.has_segments {
            style.segments = read_u16s(&mut reader, strands, Field::Segments)?;
        }
        if header.flags.has_vertices {
            style.vertices = read_vec3s(&mut reader, vertices, Field::Vertices)?;
        }
        if header.flags.has_thickness {
            style.thickness = read_f32s(&mut reader, vertices, Field::Thickness)?;
        }
        if header.flags.has_transparency {
            style.transparency = read_f32s(&mut reader, vertices, Field::Transparency)?;
        }
        if header.flags.has_color {
            style.color = read_vec3s(&mut reader, vertices, Field::Color)?;
        }
        if header.flags.has_tangents {
            style.tangents = read_vec3s(&mut reader, vertices, Field::Tangents)?;
        }
        if header.flags.has_indices {
            let count = 2 * style.segment_count() as usize;
            style.indices = read_u32s(&mut reader, count, Field::Indices)?;
            style.rebuild_strand_offsets();
        }

        if !style.format_is_valid() {
            return Err(HairError::InvalidFormat);
        }

        log::debug!(
            "loaded hair style: {} strands, {} vertices",
            style.strand_count(),
            style.vertex_count()
        );

        Ok(style)
    }

    /// Mirror-image write of `load`. Re-derives the bitfield and counts from
    /// the current array lengths before writing, and refuses to write styles
    /// whose array lengths are inconsistent.
    pub fn save(&self, path: &Path) -> Result<(), HairError> {
        if !self.format_is_valid() {
            return Err(HairError::InvalidFormat);
        }

        let header = self.completed_header();

        let file = File::create(path).map_err(HairError::OpeningFile)?;
        let mut writer = BufWriter::new(file);

        write_header(&mut writer, &header)?;

        if header.flags.has_segments {
            write_u16s(&mut writer, &self.segments, Field::Segments)?;
        }
        if header.flags.has_vertices {
            write_vec3s(&mut writer, &self.vertices, Field::Vertices)?;
        }
        if header.flags.has_thickness {
            write_f32s(&mut writer, &self.thickness, Field::Thickness)?;
        }
        if header.flags.has_transparency {
            write_f32s(&mut writer, &self.transparency, Field::Transparency)?;
        }
        if header.flags.has_color {
            write_vec3s(&mut writer, &self.color, Field::Color)?;
        }
        if header.flags.has_tangents {
            write_vec3s(&mut writer, &self.tangents, Field::Tangents)?;
        }
        if header.flags.has_indices {
            write_u32s(&mut writer, &self.indices, Field::Indices)?;
        }

        writer.flush().map_err(|_| HairError::Writing(Field::Header))
    }

    pub fn strand_count(&self) -> u32 {
        if self.segments.is_empty() {
            self.header.strand_count
        } else {
            self.segments.len() as u32
        }
    }

    /// Total number of line segments across all strands.
    pub fn segment_count(&self) -> u32 {
        if self.segments.is_empty() {
            self.header.strand_count * self.header.default_segment_count
        } else {
            self.segments.iter().map(|s| *s as u32).sum()
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn has_thickness(&self) -> bool {
        !self.thickness.is_empty()
    }

    pub fn has_transparency(&self) -> bool {
        !self.transparency.is_empty()
    }

    pub fn has_color(&self) -> bool {
        !self.color.is_empty()
    }

    pub fn has_tangents(&self) -> bool {
        !self.tangents.is_empty()
    }

    pub fn has_indices(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn default_thickness(&self) -> f32 {
        self.header.default_thickness
    }

    pub fn set_default_thickness(&mut self, thickness: f32) {
        self.header.default_thickness = thickness;
    }

    pub fn default_transparency(&self) -> f32 {
        self.header.default_transparency
    }

    pub fn set_default_transparency(&mut self, transparency: f32) {
        self.header.default_transparency = transparency;
    }

    pub fn default_color(&self) -> Vec3 {
        Vec3::from_array(self.header.default_color)
    }

    pub fn set_default_color(&mut self, color: Vec3) {
        self.header.default_color = color.to_array();
    }

    /// Free-text metadata from the header, trimmed at the first NUL.
    pub fn information(&self) -> &str {
        let end = self
            .header
            .information
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(INFORMATION_SIZE);
        std::str::from_utf8(&self.header.information[..end]).unwrap_or("")
    }

    /// Set the metadata field, truncated to its fixed 64-byte size.
    pub fn set_information(&mut self, information: &str) {
        self.header.information = [0; INFORMATION_SIZE];
        let bytes = information.as_bytes();
        let len = bytes.len().min(INFORMATION_SIZE);
        self.header.information[..len].copy_from_slice(&bytes[..len]);
    }

    /// Bounding box from the file header when present, otherwise recomputed
    /// from the vertices.
    pub fn bounding_box(&self) -> Aabb {
        if self.header.flags.has_bounding_box {
            Aabb::from_min_max(
                Vec3::from_array(self.header.bounding_box_min),
                Vec3::from_array(self.header.bounding_box_max),
            )
        } else {
            Aabb::from_points(&self.vertices)
        }
    }

    /// Compute the bounding box from the vertices and store it in the header
    /// so subsequent saves persist it.
    pub fn generate_bounding_box(&mut self) {
        let aabb = Aabb::from_points(&self.vertices);
        self.header.bounding_box_min = aabb.origin.to_array();
        self.header.bounding_box_max = aabb.max().to_array();
        self.header.flags.has_bounding_box = true;
    }

    /// Derive per-vertex tangents. Interior vertices use the normalized
    /// vector from the previous to the next vertex; endpoints use their
    /// single adjacent edge. `segments` and `vertices` are left untouched.
    pub fn generate_tangents(&mut self) {
        let mut tangents = Vec::with_capacity(self.vertices.len());
        let mut base = 0usize;
        for strand in 0..self.strand_count() as usize {
            let count = self.strand_segment_count(strand) as usize;
            let verts = &self.vertices[base..base + count + 1];

            for v in 0..=count {
                let tangent = if v == 0 {
                    verts[1] - verts[0]
                } else if v == count {
                    verts[count] - verts[count - 1]
                } else {
                    verts[v + 1] - verts[v - 1]
                };
                tangents.push(tangent.normalize_or_zero());
            }

            base += count + 1;
        }
        self.tangents = tangents;
    }

    /// Derive the line-list index buffer: `segment_count` consecutive index
    /// pairs per strand, then skip over the strand's last vertex.
    pub fn generate_indices(&mut self) {
        self.indices = Vec::with_capacity(2 * self.segment_count() as usize);
        let mut vertex = 0u32;
        for strand in 0..self.strand_count() as usize {
            let count = self.strand_segment_count(strand) as u32;
            for segment in 0..count {
                self.indices.push(vertex + segment);
                self.indices.push(vertex + segment + 1);
            }
            vertex += count + 1;
        }
        self.shuffled = false;
        self.rebuild_strand_offsets();
    }

    /// Set the draw-time strand reduction ratio. No data is deleted; the
    /// effective index count shrinks instead.
    pub fn reduce(&mut self, ratio: f32) {
        self.reduction = ratio.clamp(0.0, 1.0);
    }

    pub fn reduction(&self) -> f32 {
        self.reduction
    }

    /// Shuffle whole strands with a seeded Fisher–Yates pass over the strand
    /// order and rebuild `indices`, so that cutting the index buffer at draw
    /// time drops random whole strands rather than a biased prefix. The same
    /// seed always produces the same permutation.
    pub fn shuffle_strands(&mut self, seed: u64) {
        let strand_count = self.strand_count() as usize;
        let mut order: Vec<u32> = (0..strand_count as u32).collect();

        let mut rng = XorShift64::new(seed);
        for i in (1..strand_count).rev() {
            let j = (rng.next() % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }

        // First vertex of each strand in storage order.
        let mut first_vertex = Vec::with_capacity(strand_count);
        let mut base = 0u32;
        for strand in 0..strand_count {
            first_vertex.push(base);
            base += self.strand_segment_count(strand) as u32 + 1;
        }

        self.indices.clear();
        for &strand in &order {
            let count = self.strand_segment_count(strand as usize) as u32;
            let start = first_vertex[strand as usize];
            for segment in 0..count {
                self.indices.push(start + segment);
                self.indices.push(start + segment + 1);
            }
        }

        self.shuffled = true;
        self.strand_offsets.clear();
        let mut total = 0u32;
        for &strand in &order {
            total += self.strand_segment_count(strand as usize) as u32;
            self.strand_offsets.push(total);
        }
    }

    /// Number of indices to draw under the current reduction ratio. The
    /// segment budget is `floor(segment_count * ratio)`, snapped down to a
    /// whole-strand boundary so no strand is ever split across the
    /// drawn/dropped border.
    pub fn draw_index_count(&self) -> u32 {
        let total = self.segment_count();
        let budget = (total as f64 * self.reduction as f64).floor() as u32;
        let drawn = self.snap_to_strand_boundary(budget);
        2 * drawn
    }

    /// Interleaved vec4 position + thickness stream, in the layout consumed
    /// by the ray-tracing kernel and the strand vertex buffer.
    pub fn position_thickness_data(&self) -> Vec<[f32; 4]> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let thickness = if self.has_thickness() {
                    self.thickness[i]
                } else {
                    self.header.default_thickness
                };
                [v.x, v.y, v.z, thickness]
            })
            .collect()
    }

    /// Interleaved vec4 color + transparency stream.
    pub fn color_transparency_data(&self) -> Vec<[f32; 4]> {
        (0..self.vertices.len())
            .map(|i| {
                let color = if self.has_color() {
                    self.color[i]
                } else {
                    self.default_color()
                };
                let alpha = if self.has_transparency() {
                    self.transparency[i]
                } else {
                    self.header.default_transparency
                };
                [color.x, color.y, color.z, alpha]
            })
            .collect()
    }

    /// Bytes used by all geometry arrays.
    pub fn size_in_bytes(&self) -> usize {
        self.segments.len() * std::mem::size_of::<u16>()
            + self.vertices.len() * std::mem::size_of::<Vec3>()
            + self.thickness.len() * std::mem::size_of::<f32>()
            + self.transparency.len() * std::mem::size_of::<f32>()
            + self.color.len() * std::mem::size_of::<Vec3>()
            + self.tangents.len() * std::mem::size_of::<Vec3>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }

    fn strand_segment_count(&self, strand: usize) -> u16 {
        if self.segments.is_empty() {
            self.header.default_segment_count as u16
        } else {
            self.segments[strand]
        }
    }

    fn snap_to_strand_boundary(&self, budget: u32) -> u32 {
        if self.strand_offsets.is_empty() {
            return budget;
        }
        // Largest prefix of whole strands fitting in the segment budget.
        let mut drawn = 0u32;
        for &offset in &self.strand_offsets {
            if offset > budget {
                break;
            }
            drawn = offset;
        }
        drawn
    }

    fn rebuild_strand_offsets(&mut self) {
        self.strand_offsets.clear();
        let mut total = 0u32;
        for strand in 0..self.strand_count() as usize {
            total += self.strand_segment_count(strand) as u32;
            self.strand_offsets.push(total);
        }
    }

    fn format_is_valid(&self) -> bool {
        if self.vertices.is_empty() {
            return false;
        }
        let verts = self.vertices.len();
        if !self.segments.is_empty() {
            let expected: usize = self.segments.iter().map(|s| *s as usize).sum::<usize>()
                + self.segments.len();
            if expected != verts {
                return false;
            }
        }
        if self.has_thickness() && self.thickness.len() != verts {
            return false;
        }
        if self.has_transparency() && self.transparency.len() != verts {
            return false;
        }
        if self.has_color() && self.color.len() != verts {
            return false;
        }
        if self.has_tangents() && self.tangents.len() != verts {
            return false;
        }
        if self.has_indices() && self.indices.len() != 2 * self.segment_count() as usize {
            return false;
        }
        true
    }

    /// Header with counts and presence bits re-derived from the arrays.
    fn completed_header(&self) -> FileHeader {
        let mut header = self.header;
        header.strand_count = self.strand_count();
        header.vertex_count = self.vertex_count();
        header.flags = FieldFlags {
            has_segments: !self.segments.is_empty(),
            has_vertices: !self.vertices.is_empty(),
            has_thickness: self.has_thickness(),
            has_transparency: self.has_transparency(),
            has_color: self.has_color(),
            has_tangents: self.has_tangents(),
            has_indices: self.has_indices(),
            has_bounding_box: self.header.flags.has_bounding_box,
        };
        header
    }
}

/// xorshift64 generator for the strand shuffle. Deterministic for a given
/// seed; a zero seed is remapped since xorshift has a zero fixed point.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

// Field-by-field little-endian header serialization. The explicit order and
// widths here are the documented bit layout of the format.

fn read_header(reader: &mut impl Read) -> Result<FileHeader, HairError> {
    let mut signature = [0u8; 4];
    reader
        .read_exact(&mut signature)
        .map_err(|_| HairError::Reading(Field::Header))?;
    if signature != SIGNATURE {
        return Err(HairError::InvalidSignature);
    }

    let strand_count = read_u32(reader, Field::Header)?;
    let vertex_count = read_u32(reader, Field::Header)?;
    let flags = FieldFlags::from_bits(read_u32(reader, Field::Header)?);
    let default_segment_count = read_u32(reader, Field::Header)?;
    let default_thickness = read_f32(reader, Field::Header)?;
    let default_transparency = read_f32(reader, Field::Header)?;
    let default_color = [
        read_f32(reader, Field::Header)?,
        read_f32(reader, Field::Header)?,
        read_f32(reader, Field::Header)?,
    ];

    let mut information = [0u8; INFORMATION_SIZE];
    reader
        .read_exact(&mut information)
        .map_err(|_| HairError::Reading(Field::Header))?;

    let mut bounding_box_min = [0f32; 3];
    let mut bounding_box_max = [0f32; 3];
    for v in &mut bounding_box_min {
        *v = read_f32(reader, Field::Header)?;
    }
    for v in &mut bounding_box_max {
        *v = read_f32(reader, Field::Header)?;
    }

    Ok(FileHeader {
        strand_count,
        vertex_count,
        flags,
        default_segment_count,
        default_thickness,
        default_transparency,
        default_color,
        information,
        bounding_box_min,
        bounding_box_max,
    })
}

fn write_header(writer: &mut impl Write, header: &FileHeader) -> Result<(), HairError> {
    let field = Field::Header;
    write_bytes(writer, &SIGNATURE, field)?;
    write_u32(writer, header.strand_count, field)?;
    write_u32(writer, header.vertex_count, field)?;
    write_u32(writer, header.flags.to_bits(), field)?;
    write_u32(writer, header.default_segment_count, field)?;
    write_f32(writer, header.default_thickness, field)?;
    write_f32(writer, header.default_transparency, field)?;
    for v in header.default_color {
        write_f32(writer, v, field)?;
    }
    write_bytes(writer, &header.information, field)?;
    for v in header.bounding_box_min {
        write_f32(writer, v, field)?;
    }
    for v in header.bounding_box_max {
        write_f32(writer, v, field)?;
    }
    Ok(())
}

fn read_u32(reader: &mut impl Read, field: Field) -> Result<u32, HairError> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| HairError::Reading(field))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32(reader: &mut impl Read, field: Field) -> Result<f32, HairError> {
    Ok(f32::from_bits(read_u32(reader, field)?))
}

fn read_u16s(reader: &mut impl Read, count: usize, field: Field) -> Result<Vec<u16>, HairError> {
    let mut bytes = vec![0u8; count * 2];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| HairError::Reading(field))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

fn read_u32s(reader: &mut impl Read, count: usize, field: Field) -> Result<Vec<u32>, HairError> {
    let mut bytes = vec![0u8; count * 4];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| HairError::Reading(field))?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_f32s(reader: &mut impl Read, count: usize, field: Field) -> Result<Vec<f32>, HairError> {
    Ok(read_u32s(reader, count, field)?
        .into_iter()
        .map(f32::from_bits)
        .collect())
}

fn read_vec3s(reader: &mut impl Read, count: usize, field: Field) -> Result<Vec<Vec3>, HairError> {
    let scalars = read_f32s(reader, count * 3, field)?;
    Ok(scalars
        .chunks_exact(3)
        .map(|c| Vec3::new(c[0], c[1], c[2]))
        .collect())
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8], field: Field) -> Result<(), HairError> {
    writer
        .write_all(bytes)
        .map_err(|_| HairError::Writing(field))
}

fn write_u32(writer: &mut impl Write, value: u32, field: Field) -> Result<(), HairError> {
    write_bytes(writer, &value.to_le_bytes(), field)
}

fn write_f32(writer: &mut impl Write, value: f32, field: Field) -> Result<(), HairError> {
    write_u32(writer, value.to_bits(), field)
}

fn write_u16s(writer: &mut impl Write, values: &[u16], field: Field) -> Result<(), HairError> {
    let mut bytes = Vec::with_capacity(values.len() * 2);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    write_bytes(writer, &bytes, field)
}

fn write_u32s(writer: &mut impl Write, values: &[u32], field: Field) -> Result<(), HairError> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    write_bytes(writer, &bytes, field)
}

fn write_f32s(writer: &mut impl Write, values: &[f32], field: Field) -> Result<(), HairError> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    write_bytes(writer, &bytes, field)
}

fn write_vec3s(writer: &mut impl Write, values: &[Vec3], field: Field) -> Result<(), HairError> {
    let mut bytes = Vec::with_capacity(values.len() * 12);
    for v in values {
        bytes.extend_from_slice(&v.x.to_bits().to_le_bytes());
        bytes.extend_from_slice(&v.y.to_bits().to_le_bytes());
        bytes.extend_from_slice(&v.z.to_bits().to_le_bytes());
    }
    write_bytes(writer, &bytes, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three strands of two segments each, laid out along the X axis.
    fn test_style() -> HairStyle {
        let mut style = HairStyle::default();
        style.segments = vec![2, 2, 2];
        for strand in 0..3 {
            for v in 0..3 {
                style.vertices.push(Vec3::new(v as f32, strand as f32, 0.0));
            }
        }
        style.thickness = vec![0.1; 9];
        style.transparency = vec![0.5; 9];
        style.color = (0..9).map(|i| Vec3::splat(i as f32 / 9.0)).collect();
        style
    }

    #[test]
    fn test_length_invariant_holds() {
        let style = test_style();
        let total: usize = style.segments.iter().map(|s| *s as usize).sum();
        assert_eq!(total + style.segments.len(), style.vertices.len());
        assert!(style.format_is_valid());
    }

    #[test]
    fn test_save_load_round_trip_is_bit_exact() {
        let dir = std::env::temp_dir();
        let path = dir.join("strandview_roundtrip_test.hair");

        let mut style = test_style();
        style.generate_tangents();
        style.generate_indices();
        style.generate_bounding_box();
        style.set_information("round trip test");
        style.save(&path).unwrap();

        let loaded = HairStyle::load(&path).unwrap();
        assert_eq!(loaded.segments, style.segments);
        assert_eq!(loaded.vertices, style.vertices);
        assert_eq!(loaded.thickness, style.thickness);
        assert_eq!(loaded.transparency, style.transparency);
        assert_eq!(loaded.color, style.color);
        assert_eq!(loaded.tangents, style.tangents);
        assert_eq!(loaded.indices, style.indices);
        assert_eq!(loaded.information(), "round trip test");
        assert_eq!(loaded.bounding_box(), style.bounding_box());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_rejects_bad_signature() {
        let dir = std::env::temp_dir();
        let path = dir.join("strandview_bad_signature_test.hair");
        std::fs::write(&path, b"FAIL\x00\x00\x00\x00").unwrap();

        match HairStyle::load(&path) {
            Err(HairError::InvalidSignature) => {}
            other => panic!("expected InvalidSignature, got {:?}", other.err()),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_reports_underrun_field() {
        let dir = std::env::temp_dir();
        let path = dir.join("strandview_truncated_test.hair");

        let style = test_style();
        style.save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // Cut the file in the middle of the vertex array.
        std::fs::write(&path, &bytes[..140]).unwrap();

        match HairStyle::load(&path) {
            Err(HairError::Reading(Field::Vertices)) => {}
            other => panic!("expected Reading(Vertices), got {:?}", other.err()),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_refuses_invalid_lengths() {
        let dir = std::env::temp_dir();
        let path = dir.join("strandview_invalid_test.hair");

        let mut style = test_style();
        style.thickness.pop();
        match style.save(&path) {
            Err(HairError::InvalidFormat) => {}
            other => panic!("expected InvalidFormat, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_generate_tangents_preserves_geometry() {
        let mut style = test_style();
        let segments = style.segments.clone();
        let vertices = style.vertices.clone();

        style.generate_tangents();

        assert_eq!(style.segments, segments);
        assert_eq!(style.vertices, vertices);
        assert_eq!(style.tangents.len(), style.vertices.len());
        // Strands run along +X, so every tangent should too.
        for tangent in &style.tangents {
            assert!((tangent.x - 1.0).abs() < 1e-6);
            assert!(tangent.y.abs() < 1e-6);
        }
    }

    #[test]
    fn test_generate_indices_skips_strand_boundaries() {
        let mut style = test_style();
        style.generate_indices();

        assert_eq!(
            style.indices,
            vec![0, 1, 1, 2, 3, 4, 4, 5, 6, 7, 7, 8]
        );
        // No index pair may bridge two strands.
        for pair in style.indices.chunks_exact(2) {
            assert_eq!(pair[0] / 3, pair[1] / 3);
        }
    }

    #[test]
    fn test_fresh_style_draws_every_segment() {
        // No reduce() call: a style straight out of load() must draw all of
        // its segments, so the default reduction ratio has to be 1.0.
        let mut style = test_style();
        style.generate_indices();
        assert_eq!(style.draw_index_count(), style.indices.len() as u32);
        assert_eq!(style.draw_index_count(), 12);
    }

    #[test]
    fn test_reduction_draw_count() {
        let mut style = test_style();
        style.generate_indices();

        // Untouched, the full index set is drawn.
        assert_eq!(style.draw_index_count(), 12);

        // floor(6 * 0.5) = 3 segments, snapped down to the strand boundary
        // at 2 segments: one whole strand.
        style.reduce(0.5);
        assert_eq!(style.draw_index_count(), 4);

        style.reduce(0.0);
        assert_eq!(style.draw_index_count(), 0);
    }

    #[test]
    fn test_shuffle_is_deterministic_and_keeps_strands_whole() {
        let mut a = test_style();
        let mut b = test_style();
        a.generate_indices();
        b.generate_indices();

        a.shuffle_strands(1234);
        b.shuffle_strands(1234);
        assert_eq!(a.indices, b.indices);

        let mut c = test_style();
        c.generate_indices();
        c.shuffle_strands(5678);

        // Whatever the permutation, every consecutive index pair must stay
        // inside one strand's vertex block.
        for pair in c.indices.chunks_exact(2) {
            assert_eq!(pair[0] / 3, pair[1] / 3);
            assert_eq!(pair[0] + 1, pair[1]);
        }
        // The shuffle only rebuilds indices.
        let base = test_style();
        assert_eq!(c.segments, base.segments);
        assert_eq!(c.vertices, base.vertices);
    }

    #[test]
    fn test_interleaved_streams_use_defaults() {
        let mut style = test_style();
        style.thickness.clear();
        style.set_default_thickness(0.14);

        let data = style.position_thickness_data();
        assert_eq!(data.len(), style.vertices.len());
        for v in &data {
            assert!((v[3] - 0.14).abs() < 1e-6);
        }
    }
}
