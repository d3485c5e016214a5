use std::{borrow::Cow, io};

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Deserialize, Serialize};

type Header = u64;
const HEADER_SIZE: usize = size_of::<Header>();
const ALIGN: usize = size_of::<f64>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const DATA_KIND: Header = 2;

/// The payload for the `Data` variant of the `Msg` enum.
///
/// `meta` is an opaque JSON document and `floats` a numeric tail sent without copying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Payload<'a> {
    pub meta: &'a [u8],
    pub floats: &'a [f64],
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message of a peer connecting to the coordinator.
    Join { rank: usize, size: usize },
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the message's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(_) => "data",
            Msg::Err(_) => "err",
        }
    }

    fn invalid_data<T>(detail: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail))
    }

    fn read_header(buf: &[u8]) -> io::Result<(Header, &[u8])> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid_data(format!(
                "The given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (head, rest) = buf.split_at(HEADER_SIZE);
        let mut bytes = [0; HEADER_SIZE];
        bytes.copy_from_slice(head);
        Ok((Header::from_be_bytes(bytes), rest))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(detail) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(detail.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: `Command` derives its serde impl and holds no map with
                //         non string keys, so serialization can't fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload { meta, floats }) => {
                // The body starts 8-byte aligned in the receiving buffer, pad the metadata so
                // the float tail starts aligned as well.
                let start = buf.len();
                buf.extend_from_slice(&DATA_KIND.to_be_bytes());
                buf.extend_from_slice(&(meta.len() as Header).to_be_bytes());
                buf.extend_from_slice(meta);

                let written = buf.len() - start;
                buf.resize(start + written.next_multiple_of(ALIGN), 0);
                Some(bytemuck::cast_slice(floats))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let (kind, rest) = Self::read_header(buf)?;

        match kind {
            ERR_KIND => {
                let detail = std::str::from_utf8(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                Ok(Self::Err(Cow::Borrowed(detail)))
            }
            CONTROL_KIND => Ok(Self::Control(serde_json::from_slice(rest)?)),
            DATA_KIND => {
                let (meta_len, rest) = Self::read_header(rest)?;
                let meta_len = meta_len as usize;

                if rest.len() < meta_len {
                    return Self::invalid_data(format!(
                        "Metadata of {meta_len} bytes doesn't fit in a body of {} bytes",
                        rest.len()
                    ));
                }

                let (meta, rest) = rest.split_at(meta_len);
                let pad = (2 * HEADER_SIZE + meta_len).next_multiple_of(ALIGN)
                    - (2 * HEADER_SIZE + meta_len);
                let tail = rest.get(pad..).unwrap_or_default();

                let floats = bytemuck::try_cast_slice(tail).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("Bad float tail: {e}"))
                })?;

                Ok(Self::Data(Payload { meta, floats }))
            }
            byte => Self::invalid_data(format!("Received an invalid kind byte {byte}")),
        }
    }
}
