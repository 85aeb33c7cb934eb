//! Constant pool entries and their tagged wire encoding.

use crate::error::ContainerError;

const TAG_INT: u8 = b'I';
const TAG_FLOAT: u8 = b'F';
const TAG_STR: u8 = b'S';
const TAG_NONE: u8 = b'N';

/// A literal stored in the container's constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 64-bit signed integer (`'I'`, 8 bytes)
    Int(i64),
    /// 64-bit float (`'F'`, 8 bytes)
    Float(f64),
    /// UTF-8 text (`'S'`, u16 length prefix)
    Str(String),
    /// No value (`'N'`, no payload)
    None,
}

impl Constant {
    /// Append the tagged encoding of this constant to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), ContainerError> {
        match self {
            Constant::Int(n) => {
                out.push(TAG_INT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Float(n) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Str(s) => {
                let len = u16::try_from(s.len()).map_err(|_| {
                    ContainerError::format(format!(
                        "string constant of {} bytes exceeds the u16 length field",
                        s.len()
                    ))
                })?;
                out.push(TAG_STR);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Constant::None => out.push(TAG_NONE),
        }
        Ok(())
    }

    /// Decode one constant, returning it and the number of bytes consumed.
    ///
    /// An unrecognized tag decodes as [`Constant::None`] with no payload
    /// instead of failing the whole container.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), ContainerError> {
        let Some(&tag) = bytes.first() else {
            return Err(ContainerError::format("missing constant tag"));
        };

        match tag {
            TAG_INT => {
                let payload = bytes
                    .get(1..9)
                    .ok_or_else(|| ContainerError::format("not enough bytes for integer constant"))?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(payload);
                Ok((Constant::Int(i64::from_le_bytes(raw)), 9))
            }
            TAG_FLOAT => {
                let payload = bytes
                    .get(1..9)
                    .ok_or_else(|| ContainerError::format("not enough bytes for float constant"))?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(payload);
                Ok((Constant::Float(f64::from_le_bytes(raw)), 9))
            }
            TAG_STR => {
                let len_bytes = bytes
                    .get(1..3)
                    .ok_or_else(|| ContainerError::format("not enough bytes for string length"))?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let text = bytes
                    .get(3..3 + len)
                    .ok_or_else(|| ContainerError::format("not enough bytes for string content"))?;
                let s = std::str::from_utf8(text)
                    .map_err(|e| ContainerError::format(format!("invalid UTF-8 in constant: {}", e)))?;
                Ok((Constant::Str(s.to_string()), 3 + len))
            }
            _ => Ok((Constant::None, 1)),
        }
    }
}
