//! Wire format of the Game ↔ AI link.

mod codec;
mod message;

pub use codec::{split_frame, FrameDecoder, PacketReader, PacketWriter, HEADER_LEN, MAX_FRAME_LEN};
pub use message::{
    ActionKind, ActionRequest, DynaMapChange, LoginResult, MessageType, PlayerSnapshot, SpawnBatch,
    SpawnEntry, SyncMessage,
};
