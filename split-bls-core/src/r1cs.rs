//! Header section of the iden3 `.r1cs` binary format.
//!
//! The layout check needs the number of public signals a compiled stage *actually* has.
//! That count lives in the r1cs header (`nPubOut + nPubIn`), so it is read from the
//! artifact rather than trusted from the declarations.

use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};

use num_bigint::BigUint;

use crate::utils::errors::PipelineError;

const MAGIC: &[u8; 4] = b"r1cs";
const VERSION: u32 = 1;
const HEADER_SECTION: u32 = 1;
/// Bytes per field element. BN254 needs 32; anything past a 512-bit prime is corrupt.
const MAX_FIELD_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct R1csHeader {
    pub prime: BigUint,
    pub n_wires: u32,
    pub n_pub_out: u32,
    pub n_pub_in: u32,
    pub n_prv_in: u32,
    pub n_labels: u64,
    pub n_constraints: u32,
}

impl R1csHeader {
    /// Length of the stage's public record.
    pub fn public_len(&self) -> usize {
        self.n_pub_out as usize + self.n_pub_in as usize
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::parse(&mut BufReader::new(file)).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => PipelineError::R1cs {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            _ => PipelineError::io(path, e),
        })
    }

    pub fn parse<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(invalid(&format!("unsupported version {version}")));
        }
        let n_sections = read_u32(reader)?;
        for _ in 0..n_sections {
            let section_type = read_u32(reader)?;
            let size = read_u64(reader)?;
            if section_type == HEADER_SECTION {
                return Self::parse_header(reader);
            }
            let skip = i64::try_from(size).map_err(|_| invalid("section too large"))?;
            reader.seek(SeekFrom::Current(skip))?;
        }
        Err(invalid("no header section"))
    }

    fn parse_header<R: Read>(reader: &mut R) -> io::Result<Self> {
        let field_size = read_u32(reader)? as usize;
        if field_size == 0 || field_size % 8 != 0 || field_size > MAX_FIELD_SIZE {
            return Err(invalid(&format!("bad field size {field_size}")));
        }
        let mut prime = vec![0u8; field_size];
        reader.read_exact(&mut prime)?;
        Ok(Self {
            prime: BigUint::from_bytes_le(&prime),
            n_wires: read_u32(reader)?,
            n_pub_out: read_u32(reader)?,
            n_pub_in: read_u32(reader)?,
            n_prv_in: read_u32(reader)?,
            n_labels: read_u64(reader)?,
            n_constraints: read_u32(reader)?,
        })
    }

    /// Serializes a header-only r1cs file. Used by the dry-run toolchain.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut prime = self.prime.to_bytes_le();
        let field_size = prime.len().div_ceil(8) * 8;
        prime.resize(field_size, 0);

        let mut body = Vec::new();
        body.extend((field_size as u32).to_le_bytes());
        body.extend(&prime);
        body.extend(self.n_wires.to_le_bytes());
        body.extend(self.n_pub_out.to_le_bytes());
        body.extend(self.n_pub_in.to_le_bytes());
        body.extend(self.n_prv_in.to_le_bytes());
        body.extend(self.n_labels.to_le_bytes());
        body.extend(self.n_constraints.to_le_bytes());

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&1u32.to_le_bytes())?;
        writer.write_all(&HEADER_SECTION.to_le_bytes())?;
        writer.write_all(&(body.len() as u64).to_le_bytes())?;
        writer.write_all(&body)
    }
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
