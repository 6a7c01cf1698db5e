//! Front-end affordances over a [`BedSession`](crate::session::BedSession):
//! one cover per section, the flat button, and the stdin console.

pub mod button;
pub mod console;
pub mod cover;
pub mod error;

pub use button::FlatButton;
pub use cover::BedCover;
pub use error::PresentationError;
