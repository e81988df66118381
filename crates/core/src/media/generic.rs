use crate::error::{ProtocolErrorKind, Result, StreamError};

/// Size of the Generic Byte Data header.
pub const HEADER_LENGTH: usize = 32;

const DATATYPE_POS: usize = 0;
const TOTALLENGTH_POS: usize = 2;
const CODECTYPE_POS: usize = 6;
const SEQNUM_POS: usize = 8;
const FLAGS_POS: usize = 10;
const TIMESTAMP_SYNC_POS: usize = 12;
const TIMESTAMP_POS: usize = 20;

/// Header flag marking a key frame / sync point.
pub const FLAG_SYNC_POINT: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Video,
    Audio,
    Metadata,
    Other(u16),
}

impl From<u16> for DataType {
    fn from(value: u16) -> Self {
        match value {
            0x0010 => DataType::Video,
            0x0020 => DataType::Audio,
            0x0030 => DataType::Metadata,
            other => DataType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Jpeg,
    H264,
    H265,
    Other(u16),
}

impl From<u16> for Codec {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Codec::Jpeg,
            0x000A => Codec::H264,
            0x000E => Codec::H265,
            other => Codec::Other(other),
        }
    }
}

impl Codec {
    /// Conventional MIME type for the encoded body.
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            Codec::Jpeg => Some("image/jpeg"),
            Codec::H264 => Some("video/x-h264"),
            Codec::H265 => Some("video/x-h265"),
            Codec::Other(_) => None,
        }
    }
}

/// Borrowed view of one Generic Byte Data frame.
#[derive(Debug, Clone, Copy)]
pub struct GenericByteData<'a> {
    data: &'a [u8],
}

impl<'a> GenericByteData<'a> {
    /// Wrap a payload. Fails if it cannot hold a header.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(StreamError::protocol(ProtocolErrorKind::ShortGenericHeader(
                data.len(),
            )));
        }
        Ok(GenericByteData { data })
    }

    pub fn data_type(&self) -> DataType {
        DataType::from(self.u16_at(DATATYPE_POS))
    }

    /// Total frame length as declared in the header.
    pub fn declared_length(&self) -> u32 {
        u32::from_be_bytes(self.array(TOTALLENGTH_POS))
    }

    pub fn codec(&self) -> Codec {
        Codec::from(self.u16_at(CODECTYPE_POS))
    }

    pub fn sequence_number(&self) -> u16 {
        self.u16_at(SEQNUM_POS)
    }

    pub fn flags(&self) -> u16 {
        self.u16_at(FLAGS_POS)
    }

    pub fn is_sync_point(&self) -> bool {
        self.flags() & FLAG_SYNC_POINT != 0
    }

    pub fn sync_timestamp(&self) -> u64 {
        u64::from_be_bytes(self.array(TIMESTAMP_SYNC_POS))
    }

    pub fn timestamp(&self) -> u64 {
        u64::from_be_bytes(self.array(TIMESTAMP_POS))
    }

    /// Encoded picture following the header.
    pub fn body(&self) -> &'a [u8] {
        &self.data[HEADER_LENGTH..]
    }

    /// Complete frame, header included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    fn u16_at(&self, pos: usize) -> u16 {
        u16::from_be_bytes(self.array(pos))
    }

    fn array<const N: usize>(&self, pos: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[pos..pos + N]);
        out
    }
}
