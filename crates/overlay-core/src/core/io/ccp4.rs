use super::error::FormatError;
use super::traits::FormatReader;
use crate::core::models::volume::{GridGeometry, VolumeData, VolumeStats};
use nalgebra::{Matrix3, Vector3};
use std::io::{BufRead, Read, Write};

const HEADER_LEN: usize = 1024;
const HEADER_WORDS: usize = HEADER_LEN / 4;

// Zero-based word offsets into the 256-word header.
const W_NC: usize = 0;
const W_MODE: usize = 3;
const W_START: usize = 4;
const W_SAMPLING: usize = 7;
const W_CELL: usize = 10;
const W_ANGLES: usize = 13;
const W_AXES: usize = 16;
const W_AMIN: usize = 19;
const W_AMAX: usize = 20;
const W_AMEAN: usize = 21;
const W_ISPG: usize = 22;
const W_NSYMBT: usize = 23;
const W_ORIGIN: usize = 49;
const W_MAP: usize = 52;
const W_MACHST: usize = 53;
const W_RMS: usize = 54;

const MODE_INT8: i32 = 0;
const MODE_INT16: i32 = 1;
const MODE_FLOAT32: i32 = 2;
const MODE_UINT16: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Endian {
    Little,
    Big,
}

struct Header<'a> {
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> Header<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_LEN {
            return Err(FormatError::Header(format!(
                "file is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let little = Header {
            bytes,
            endian: Endian::Little,
        };
        if is_known_mode(little.i32(W_MODE)) {
            return Ok(little);
        }
        let big = Header {
            bytes,
            endian: Endian::Big,
        };
        if is_known_mode(big.i32(W_MODE)) {
            return Ok(big);
        }
        Err(FormatError::Header(format!(
            "unsupported data mode {}",
            little.i32(W_MODE)
        )))
    }

    fn raw(&self, word: usize) -> [u8; 4] {
        let offset = word * 4;
        [
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ]
    }

    fn i32(&self, word: usize) -> i32 {
        match self.endian {
            Endian::Little => i32::from_le_bytes(self.raw(word)),
            Endian::Big => i32::from_be_bytes(self.raw(word)),
        }
    }

    fn f32(&self, word: usize) -> f32 {
        match self.endian {
            Endian::Little => f32::from_le_bytes(self.raw(word)),
            Endian::Big => f32::from_be_bytes(self.raw(word)),
        }
    }

    fn triple_i32(&self, word: usize) -> [i32; 3] {
        [self.i32(word), self.i32(word + 1), self.i32(word + 2)]
    }

    fn triple_f64(&self, word: usize) -> [f64; 3] {
        [
            self.f32(word) as f64,
            self.f32(word + 1) as f64,
            self.f32(word + 2) as f64,
        ]
    }
}

fn is_known_mode(mode: i32) -> bool {
    matches!(mode, MODE_INT8 | MODE_INT16 | MODE_FLOAT32 | MODE_UINT16)
}

fn bytes_per_value(mode: i32) -> usize {
    match mode {
        MODE_INT8 => 1,
        MODE_INT16 | MODE_UINT16 => 2,
        _ => 4,
    }
}

/// Column/row/section → x/y/z mapping, validated as a permutation of 1..=3.
fn axis_order(axes: [i32; 3]) -> Result<[usize; 3], FormatError> {
    if axes == [0, 0, 0] {
        return Ok([0, 1, 2]);
    }
    let mut seen = [false; 3];
    let mut order = [0usize; 3];
    for (slot, &axis) in axes.iter().enumerate() {
        if !(1..=3).contains(&axis) || seen[(axis - 1) as usize] {
            return Err(FormatError::Header(format!(
                "axis mapping {:?} is not a permutation of 1, 2, 3",
                axes
            )));
        }
        seen[(axis - 1) as usize] = true;
        order[slot] = (axis - 1) as usize;
    }
    Ok(order)
}

/// Fractional-to-cartesian basis for a unit cell; columns are the cell vectors.
fn cell_basis(lengths: [f64; 3], angles_deg: [f64; 3]) -> Matrix3<f64> {
    let [a, b, c] = lengths;
    let angle = |deg: f64| if deg.abs() < 1e-6 { 90.0f64 } else { deg };
    let (alpha, beta, gamma) = (
        angle(angles_deg[0]).to_radians(),
        angle(angles_deg[1]).to_radians(),
        angle(angles_deg[2]).to_radians(),
    );

    let cy = (alpha.cos() - beta.cos() * gamma.cos()) / gamma.sin();
    let cz = (1.0 - beta.cos().powi(2) - cy.powi(2)).max(0.0).sqrt();

    Matrix3::from_columns(&[
        Vector3::new(a, 0.0, 0.0),
        Vector3::new(b * gamma.cos(), b * gamma.sin(), 0.0),
        Vector3::new(c * beta.cos(), c * cy, c * cz),
    ])
}

fn decode_values(header: &Header, data: &[u8], mode: i32, count: usize) -> Vec<f32> {
    let width = bytes_per_value(mode);
    data.chunks_exact(width)
        .take(count)
        .map(|chunk| match (mode, header.endian) {
            (MODE_INT8, _) => chunk[0] as i8 as f32,
            (MODE_INT16, Endian::Little) => i16::from_le_bytes([chunk[0], chunk[1]]) as f32,
            (MODE_INT16, Endian::Big) => i16::from_be_bytes([chunk[0], chunk[1]]) as f32,
            (MODE_UINT16, Endian::Little) => u16::from_le_bytes([chunk[0], chunk[1]]) as f32,
            (MODE_UINT16, Endian::Big) => u16::from_be_bytes([chunk[0], chunk[1]]) as f32,
            (_, Endian::Little) => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            (_, Endian::Big) => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        })
        .collect()
}

/// Reader and writer for CCP4/MRC density maps.
pub struct Ccp4Map;

impl Ccp4Map {
    pub fn parse(bytes: &[u8]) -> Result<VolumeData, FormatError> {
        let header = Header::new(bytes)?;
        let mode = header.i32(W_MODE);

        let file_dims = header.triple_i32(W_NC);
        if file_dims.iter().any(|&n| n <= 0) {
            return Err(FormatError::Header(format!(
                "grid dimensions {:?} must be positive",
                file_dims
            )));
        }
        let file_dims = file_dims.map(|n| n as usize);
        let order = axis_order(header.triple_i32(W_AXES))?;

        let mut dims = [0usize; 3];
        let mut start = [0f64; 3];
        let file_start = header.triple_i32(W_START);
        for slot in 0..3 {
            dims[order[slot]] = file_dims[slot];
            start[order[slot]] = file_start[slot] as f64;
        }

        let mut sampling = header.triple_i32(W_SAMPLING);
        for axis in 0..3 {
            if sampling[axis] <= 0 {
                sampling[axis] = dims[axis] as i32;
            }
        }

        let mut cell = header.triple_f64(W_CELL);
        for axis in 0..3 {
            if cell[axis] <= 0.0 {
                cell[axis] = sampling[axis] as f64;
            }
        }
        let basis = cell_basis(cell, header.triple_f64(W_ANGLES));
        let mut step = Matrix3::<f64>::zeros();
        for axis in 0..3 {
            step.set_column(axis, &(basis.column(axis) / sampling[axis] as f64));
        }

        let origin = Vector3::from(header.triple_f64(W_ORIGIN));
        let offset = if origin.iter().any(|v| *v != 0.0) {
            origin
        } else {
            step * Vector3::from(start)
        };

        let mut grid_to_world = step.to_homogeneous();
        grid_to_world.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);

        let nsymbt = header.i32(W_NSYMBT).max(0) as usize;
        let data_start = HEADER_LEN + nsymbt;
        let count = file_dims
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| {
                FormatError::Header(format!(
                    "grid dimensions {:?} overflow the voxel count",
                    file_dims
                ))
            })?;
        let needed = count
            .checked_mul(bytes_per_value(mode))
            .ok_or_else(|| {
                FormatError::Header(format!(
                    "grid dimensions {:?} overflow the voxel data size",
                    file_dims
                ))
            })?;
        let data = bytes.get(data_start..).unwrap_or(&[]);
        if data.len() < needed {
            return Err(FormatError::Inconsistency(format!(
                "expected {} bytes of voxel data, found {}",
                needed,
                data.len()
            )));
        }
        let raw = decode_values(&header, data, mode, count);

        // Reorder from file (column, row, section) order to x-fastest order.
        let [nc, nr, _] = file_dims;
        let [nx, ny, _] = dims;
        let mut values = vec![0f32; count];
        for (linear, value) in raw.into_iter().enumerate() {
            let file_index = [linear % nc, (linear / nc) % nr, linear / (nc * nr)];
            let mut xyz = [0usize; 3];
            for slot in 0..3 {
                xyz[order[slot]] = file_index[slot];
            }
            values[xyz[0] + nx * (xyz[1] + ny * xyz[2])] = value;
        }

        VolumeData::new(GridGeometry::new(dims, grid_to_world), values).ok_or_else(|| {
            FormatError::Inconsistency("voxel count does not match grid dimensions".into())
        })
    }

    /// Writes `volume` as a little-endian mode-2 map with x/y/z axis order.
    ///
    /// Only grids whose `grid_to_world` is axis aligned (diagonal 3x3 block) can be
    /// written; the cell is derived from voxel size times dimensions.
    pub fn write_to(volume: &VolumeData, writer: &mut impl Write) -> Result<(), FormatError> {
        let geometry = volume.geometry();
        let m = &geometry.grid_to_world;
        for row in 0..3 {
            for col in 0..3 {
                if row != col && m[(row, col)].abs() > 1e-9 {
                    return Err(FormatError::Inconsistency(
                        "only axis-aligned grids can be written".into(),
                    ));
                }
            }
        }

        let dims = geometry.dimensions;
        let stats = volume.stats().unwrap_or(VolumeStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            sigma: 0.0,
        });

        fn put_i32(words: &mut [[u8; 4]; HEADER_WORDS], word: usize, v: i32) {
            words[word] = v.to_le_bytes();
        }
        fn put_f32(words: &mut [[u8; 4]; HEADER_WORDS], word: usize, v: f32) {
            words[word] = v.to_le_bytes();
        }

        let mut words = [[0u8; 4]; HEADER_WORDS];

        for axis in 0..3 {
            put_i32(&mut words, W_NC + axis, dims[axis] as i32);
            put_i32(&mut words, W_SAMPLING + axis, dims[axis] as i32);
            put_i32(&mut words, W_AXES + axis, axis as i32 + 1);
            put_f32(&mut words, W_CELL + axis, (m[(axis, axis)] * dims[axis] as f64) as f32);
            put_f32(&mut words, W_ANGLES + axis, 90.0);
            put_f32(&mut words, W_ORIGIN + axis, m[(axis, 3)] as f32);
        }
        put_i32(&mut words, W_MODE, MODE_FLOAT32);
        put_f32(&mut words, W_AMIN, stats.min as f32);
        put_f32(&mut words, W_AMAX, stats.max as f32);
        put_f32(&mut words, W_AMEAN, stats.mean as f32);
        put_f32(&mut words, W_RMS, stats.sigma as f32);
        put_i32(&mut words, W_ISPG, 1);
        words[W_MAP] = *b"MAP ";
        words[W_MACHST] = [0x44, 0x41, 0x00, 0x00];

        for word in &words {
            writer.write_all(word)?;
        }
        for value in volume.values() {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(volume: &VolumeData) -> Result<Vec<u8>, FormatError> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + volume.values().len() * 4);
        Self::write_to(volume, &mut buffer)?;
        Ok(buffer)
    }
}

impl FormatReader for Ccp4Map {
    type Output = VolumeData;

    fn read_from(reader: &mut impl BufRead) -> Result<VolumeData, FormatError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }
}
