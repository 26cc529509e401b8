use bytes::Bytes;

use crate::frame::FrameItem;

/// A finished packet handed back to the caller.
///
/// The buffer is owned by the caller once returned; the pipeline keeps no
/// reference to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

impl EncodedPacket {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl From<FrameItem> for EncodedPacket {
    fn from(item: FrameItem) -> Self {
        Self {
            data: item.payload.freeze(),
            pts: item.timestamp,
            dts: item.timestamp,
            keyframe: item.keyframe,
        }
    }
}
