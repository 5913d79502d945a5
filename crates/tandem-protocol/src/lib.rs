//! Message model and wire codec for tandem RPC.
//!
//! Every unit on the wire is an [`RpcMessage`]: a request, a response, or a
//! keep-alive. [`encode`] produces one length-prefixed frame; [`FrameDecoder`]
//! reassembles frames from a byte stream that may split or coalesce them.

mod codec;
mod error;
mod message;

pub use codec::{
    decode, encode, encode_into, try_decode_frames, FrameDecoder, DEFAULT_MAX_FRAME_LEN,
    LENGTH_PREFIX_LEN,
};
pub use error::{FramingError, Result};
pub use message::{MessageId, MessageType, RemoteFault, Request, Response, RpcMessage};
