pub mod errors;
pub mod frame;
pub mod ring;
pub mod subscription;

pub use errors::BufferError;
pub use frame::{Frame, PixelLayout};
pub use ring::{BufferStats, FrameBuffer, MAX_CAPACITY};
pub use subscription::Subscription;
