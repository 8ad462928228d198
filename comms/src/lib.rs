pub mod codec;
pub mod msg;
pub mod specs;
pub mod state;

pub use codec::{BinaryCodec, Codec, CodecErr};
pub use msg::Update;
pub use state::{ModelState, ShapeErr, Tensor};
