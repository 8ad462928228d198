mod error;
mod model_state;
mod tensor;

pub use error::{Result, ShapeErr};
pub use model_state::ModelState;
pub use tensor::Tensor;
