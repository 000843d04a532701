//! The item entity and its encryption envelope.
pub mod model;
pub mod transformer;

pub use model::{Item, ItemReference};
pub use transformer::{
    decrypt_item, decrypt_item_or_throw, decrypt_items_batch, encrypt_item_content,
    encrypt_item_key, DecryptedItem, TransformError,
};
