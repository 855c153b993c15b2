//! Dataset providers and image preprocessing

mod images;
mod placeholder;
pub mod preprocess;

pub use images::ImageDatasetProvider;
pub use placeholder::PlaceholderDatasetProvider;
