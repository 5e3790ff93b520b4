//! State interval encoding
//!
//! ```text
//! start: i64 | end: i64 | quark: u32 | tag: u8 | payload
//! ```
//!
//! Payload by tag: Null none, Int `i32`, Long `i64`, Double `f64` bits,
//! String `u16` length then UTF-8 bytes.

use super::{truncated, FormatError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use statehist_core::{Quark, StateInterval, StateValue, ValueKind, MAX_STRING_LEN};
use std::io::{self, Read, Write};

/// Append one interval.
pub fn write_interval<W: Write>(w: &mut W, interval: &StateInterval) -> io::Result<()> {
    w.write_i64::<LittleEndian>(interval.start())?;
    w.write_i64::<LittleEndian>(interval.end())?;
    w.write_u32::<LittleEndian>(interval.quark().as_u32())?;
    let value = interval.value();
    w.write_u8(value.kind().tag())?;
    match value {
        StateValue::Null => {}
        StateValue::Int(v) => w.write_i32::<LittleEndian>(*v)?,
        StateValue::Long(v) => w.write_i64::<LittleEndian>(*v)?,
        StateValue::Double(v) => w.write_f64::<LittleEndian>(*v)?,
        StateValue::String(s) => {
            if s.len() > MAX_STRING_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("string value of {} bytes exceeds {}", s.len(), MAX_STRING_LEN),
                ));
            }
            w.write_u16::<LittleEndian>(s.len() as u16)?;
            w.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}

/// Read one interval.
pub fn read_interval<R: Read>(r: &mut R) -> Result<StateInterval, FormatError> {
    let eof = truncated("state interval");
    let start = r.read_i64::<LittleEndian>().map_err(&eof)?;
    let end = r.read_i64::<LittleEndian>().map_err(&eof)?;
    let quark = Quark::new(r.read_u32::<LittleEndian>().map_err(&eof)?);
    let tag = r.read_u8().map_err(&eof)?;
    let kind = ValueKind::from_tag(tag).ok_or(FormatError::UnknownValueTag(tag))?;
    let value = match kind {
        ValueKind::Null => StateValue::Null,
        ValueKind::Int => StateValue::Int(r.read_i32::<LittleEndian>().map_err(&eof)?),
        ValueKind::Long => StateValue::Long(r.read_i64::<LittleEndian>().map_err(&eof)?),
        ValueKind::Double => StateValue::Double(r.read_f64::<LittleEndian>().map_err(&eof)?),
        ValueKind::String => {
            let len = r.read_u16::<LittleEndian>().map_err(&eof)? as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes).map_err(&eof)?;
            StateValue::String(String::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8)?)
        }
    };
    StateInterval::new(start, end, quark, value)
        .map_err(|_| FormatError::Invalid(format!("interval end {} precedes start {}", end, start)))
}
