mod database_id;
mod document_key;
mod field_path;
mod geo_point;
mod maybe_document;
mod resource_path;
mod timestamp;
pub mod user;

pub use database_id::DatabaseId;
pub use document_key::DocumentKey;
pub use field_path::{FieldPath, IntoFieldPath};
pub use geo_point::GeoPoint;
pub use maybe_document::MaybeDocument;
pub use resource_path::ResourcePath;
pub use timestamp::Timestamp;
pub use user::User;
