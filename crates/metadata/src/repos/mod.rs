//! Repository traits for metadata operations.

pub mod manufacturers;
pub mod sheets;

pub use manufacturers::ManufacturerRepo;
pub use sheets::SheetRepo;
