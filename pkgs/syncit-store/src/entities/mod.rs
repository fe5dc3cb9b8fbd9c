//! Sea-ORM entities for syncit-store

pub mod documents;

pub use documents::Entity as Documents;
