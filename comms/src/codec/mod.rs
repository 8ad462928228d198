mod binary;
mod error;

pub use binary::BinaryCodec;
pub use error::{CodecErr, Result};

use crate::{msg::Update, state::ModelState};

/// Turns model states and worker updates into bytes and back.
///
/// Implementations must round-trip exactly, numeric precision included.
pub trait Codec: Send + Sync {
    /// Serializes a model state, used to ship the global model to the workers.
    fn encode_state(&self, state: &ModelState) -> Result<Vec<u8>>;

    /// Deserializes a model state produced by `encode_state`.
    fn decode_state(&self, buf: &[u8]) -> Result<ModelState>;

    /// Serializes a worker update, used by the workers to submit their training results.
    fn encode_update(&self, update: &Update) -> Result<Vec<u8>>;

    /// Deserializes a worker update produced by `encode_update`.
    fn decode_update(&self, buf: &[u8]) -> Result<Update>;
}
