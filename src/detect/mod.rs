mod adapter;
mod backend;
mod stub;

pub use adapter::DetectionAdapter;
pub use backend::{DetectorBackend, RawObject};
pub use stub::StubDetector;
